//! Per-server check tasks: scheduling, probe execution and liveness
//! propagation into the backend.
//!
//! Each checked server gets one task. A tick sleeps until the task's
//! deadline, runs one probe bounded by the interval, feeds the outcome to
//! the liveness machine, and on an edge runs the membership and queue
//! effects while still holding the backend lock. The deadline then advances
//! by whole multiples of the interval, which keeps the probe phase monotonic
//! even after long stalls.

use crate::metrics::MetricsRegistry;
use balancer::Backend;
use dashmap::DashMap;
use healthcheck::liveness::Transition;
use healthcheck::probe::run_probe;
use healthcheck::types::{CheckSpec, ProbeFailure, ProbeOutcome};
use rand::Rng as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// One server's periodic health check.
pub struct CheckTask {
    backend: Arc<Backend>,
    server: usize,
    spec: CheckSpec,
    permits: Arc<Semaphore>,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
}

impl CheckTask {
    pub fn new(
        backend: Arc<Backend>,
        server: usize,
        spec: CheckSpec,
        permits: Arc<Semaphore>,
        metrics: Arc<MetricsRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self { backend, server, spec, permits, metrics, cancel }
    }

    /// Drive this server's checks until cancelled.
    pub async fn run(self) {
        let (inter, target, backend_id, server_name) = {
            let st = self.backend.state();
            let srv = &st.servers[self.server];
            (srv.inter, st.probe_target(self.server), st.id.clone(), srv.name.clone())
        };

        // spread first probes so one backend's checks do not fire in lockstep
        let spread = rand::thread_rng().gen_range(0..inter.as_millis().max(1) as u64);
        let mut expire = Instant::now() + Duration::from_millis(spread);

        debug!(backend = %backend_id, server = %server_name, "check task started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(backend = %backend_id, server = %server_name, "check task stopped");
                    return;
                }
                _ = sleep_until(expire) => {}
            }

            let now = Instant::now();
            let enabled = {
                let st = self.backend.state();
                st.servers[self.server].checked && !st.stopped
            };

            if enabled {
                let outcome = match self.permits.try_acquire() {
                    Ok(_permit) => {
                        // the interval doubles as the probe deadline
                        expire = now + inter;
                        let outcome = run_probe(&target, &self.spec, expire).await;
                        if outcome != ProbeOutcome::Skipped {
                            self.metrics.record_check(
                                &backend_id,
                                &server_name,
                                outcome.label(),
                                now.elapsed(),
                            );
                        }
                        outcome
                    }
                    Err(_) => {
                        debug!(
                            backend = %backend_id,
                            server = %server_name,
                            "probe socket cap reached, skipping this tick"
                        );
                        ProbeOutcome::Skipped
                    }
                };
                self.consume(outcome, &backend_id, &server_name);
            }

            expire = rephase(expire, Instant::now(), inter);
        }
    }

    /// Feed a completed probe into the liveness machine and apply edge
    /// effects. Everything runs under the backend lock, so membership and
    /// queue changes are atomic with respect to routing.
    fn consume(&self, outcome: ProbeOutcome, backend_id: &str, server_name: &str) {
        let mut st = self.backend.state();

        let transition = {
            let srv = &mut st.servers[self.server];
            let th = srv.thresholds();
            match outcome {
                ProbeOutcome::Skipped => return,
                ProbeOutcome::Success => {
                    debug!(backend = %backend_id, server = %server_name, "health check passed");
                    srv.liveness.observe_success(th)
                }
                ProbeOutcome::Failed(kind) => {
                    if kind == ProbeFailure::Bind {
                        error!(
                            backend = %backend_id,
                            server = %server_name,
                            "cannot bind to source address before connect, probe aborted"
                        );
                    }
                    debug!(backend = %backend_id, server = %server_name, kind = ?kind, "health check failed");
                    let was_up = srv.liveness.is_up();
                    let transition = srv.liveness.observe_failure();
                    if transition == Transition::None && was_up {
                        srv.failed_checks += 1;
                        self.metrics.record_failed_check(backend_id, server_name);
                    }
                    transition
                }
            }
        };

        match transition {
            Transition::WentUp => {
                let report = st.server_came_up(self.server);
                self.metrics.record_up_transition(backend_id, server_name, report.xferred);
            }
            Transition::WentDown => {
                let report = st.server_went_down(self.server);
                self.metrics.record_down_transition(backend_id, server_name, report.xferred);
            }
            Transition::None => {}
        }

        let srv = &st.servers[self.server];
        self.metrics.observe_server(backend_id, server_name, srv.is_up(), srv.health());
        self.metrics.observe_backend(&st.id, st.srv_act, st.srv_bck, st.nbpend_total());
    }
}

/// Spawn one check task per checked server of `backend`, registering the
/// join handles under "backend/server" keys.
pub fn spawn_backend_checks(
    backend: &Arc<Backend>,
    spec: &CheckSpec,
    permits: &Arc<Semaphore>,
    metrics: &Arc<MetricsRegistry>,
    cancel: &CancellationToken,
    tasks: &DashMap<String, JoinHandle<()>>,
) {
    let checked: Vec<(usize, String, String)> = {
        let st = backend.state();
        st.servers
            .iter()
            .enumerate()
            .filter(|(_, srv)| srv.checked)
            .map(|(idx, srv)| (idx, st.id.clone(), srv.name.clone()))
            .collect()
    };

    for (idx, backend_id, server_name) in checked {
        let task = CheckTask::new(
            backend.clone(),
            idx,
            spec.clone(),
            permits.clone(),
            metrics.clone(),
            cancel.clone(),
        );
        tasks.insert(format!("{backend_id}/{server_name}"), tokio::spawn(task.run()));
    }
}

/// Advance a deadline by whole multiples of `inter` until it is in the
/// future relative to `now`.
fn rephase(mut expire: Instant, now: Instant, inter: Duration) -> Instant {
    while expire <= now {
        expire += inter;
    }
    expire
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rephase_is_a_noop_on_future_deadlines() {
        let now = Instant::now();
        let expire = now + Duration::from_millis(500);
        assert_eq!(rephase(expire, now, Duration::from_secs(2)), expire);
    }

    #[test]
    fn rephase_advances_by_whole_intervals() {
        let start = Instant::now();
        let inter = Duration::from_millis(200);
        // five and a half intervals late
        let now = start + Duration::from_millis(1100);
        let expire = rephase(start, now, inter);
        assert_eq!(expire, start + inter * 6);
        assert!(expire > now);
    }

    #[test]
    fn rephase_lands_strictly_after_a_deadline_on_the_boundary() {
        let start = Instant::now();
        let inter = Duration::from_millis(200);
        let now = start + inter;
        // expire == now counts as elapsed and moves one more interval out
        assert_eq!(rephase(start + inter, now, inter), start + inter * 2);
    }
}
