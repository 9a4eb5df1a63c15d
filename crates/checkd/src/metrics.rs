//! Prometheus metrics for the health-check daemon.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels identifying one server.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServerLabels {
    pub backend: String,
    pub server: String,
}

/// Labels for per-check counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    pub backend: String,
    pub server: String,
    /// success, failure or timeout
    pub result: String,
}

/// Labels identifying one backend.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Registry of all health-check daemon metrics.
pub struct MetricsRegistry {
    pub registry: Registry,

    checks_total: Family<CheckLabels, Counter>,
    probe_duration_seconds: Family<ServerLabels, Histogram>,
    server_up: Family<ServerLabels, Gauge>,
    server_health: Family<ServerLabels, Gauge>,
    failed_checks_total: Family<ServerLabels, Counter>,
    up_transitions_total: Family<ServerLabels, Counter>,
    down_transitions_total: Family<ServerLabels, Counter>,
    sessions_requeued_total: Family<ServerLabels, Counter>,
    sessions_redispatched_total: Family<ServerLabels, Counter>,
    active_servers: Family<BackendLabels, Gauge>,
    backup_servers: Family<BackendLabels, Gauge>,
    pending_sessions: Family<BackendLabels, Gauge>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("checkd");

        let checks_total = Family::<CheckLabels, Counter>::default();
        registry.register("checks", "Health checks performed", checks_total.clone());

        let probe_duration_seconds = Family::<ServerLabels, Histogram>::new_with_constructor(
            || Histogram::new(exponential_buckets(0.0005, 2.0, 12)),
        );
        registry.register(
            "probe_duration_seconds",
            "Wall time of one probe",
            probe_duration_seconds.clone(),
        );

        let server_up = Family::<ServerLabels, Gauge>::default();
        registry.register("server_up", "Server liveness (1 up, 0 down)", server_up.clone());

        let server_health = Family::<ServerLabels, Gauge>::default();
        registry.register(
            "server_health",
            "Health counter between 0 and rise+fall-1",
            server_health.clone(),
        );

        let failed_checks_total = Family::<ServerLabels, Counter>::default();
        registry.register(
            "failed_checks",
            "Failed checks absorbed by an up server's cushion",
            failed_checks_total.clone(),
        );

        let up_transitions_total = Family::<ServerLabels, Counter>::default();
        registry.register("up_transitions", "UP edges", up_transitions_total.clone());

        let down_transitions_total = Family::<ServerLabels, Counter>::default();
        registry.register("down_transitions", "DOWN edges", down_transitions_total.clone());

        let sessions_requeued_total = Family::<ServerLabels, Counter>::default();
        registry.register(
            "sessions_requeued",
            "Sessions pulled from the backend queue on UP edges",
            sessions_requeued_total.clone(),
        );

        let sessions_redispatched_total = Family::<ServerLabels, Counter>::default();
        registry.register(
            "sessions_redispatched",
            "Sessions moved off a dead server on DOWN edges",
            sessions_redispatched_total.clone(),
        );

        let active_servers = Family::<BackendLabels, Gauge>::default();
        registry.register("active_servers", "Running active servers", active_servers.clone());

        let backup_servers = Family::<BackendLabels, Gauge>::default();
        registry.register("backup_servers", "Running backup servers", backup_servers.clone());

        let pending_sessions = Family::<BackendLabels, Gauge>::default();
        registry.register(
            "pending_sessions",
            "Sessions parked in the backend and server queues",
            pending_sessions.clone(),
        );

        Self {
            registry,
            checks_total,
            probe_duration_seconds,
            server_up,
            server_health,
            failed_checks_total,
            up_transitions_total,
            down_transitions_total,
            sessions_requeued_total,
            sessions_redispatched_total,
            active_servers,
            backup_servers,
            pending_sessions,
        }
    }

    fn server_labels(backend: &str, server: &str) -> ServerLabels {
        ServerLabels { backend: backend.to_string(), server: server.to_string() }
    }

    /// Record one completed check and its duration.
    pub fn record_check(&self, backend: &str, server: &str, result: &str, duration: Duration) {
        self.checks_total
            .get_or_create(&CheckLabels {
                backend: backend.to_string(),
                server: server.to_string(),
                result: result.to_string(),
            })
            .inc();
        self.probe_duration_seconds
            .get_or_create(&Self::server_labels(backend, server))
            .observe(duration.as_secs_f64());
    }

    /// Record a failure absorbed by an up server's cushion.
    pub fn record_failed_check(&self, backend: &str, server: &str) {
        self.failed_checks_total.get_or_create(&Self::server_labels(backend, server)).inc();
    }

    /// Record an UP edge and the sessions it requeued.
    pub fn record_up_transition(&self, backend: &str, server: &str, requeued: u32) {
        let labels = Self::server_labels(backend, server);
        self.up_transitions_total.get_or_create(&labels).inc();
        self.sessions_requeued_total.get_or_create(&labels).inc_by(u64::from(requeued));
    }

    /// Record a DOWN edge and the sessions it redispatched.
    pub fn record_down_transition(&self, backend: &str, server: &str, redispatched: u32) {
        let labels = Self::server_labels(backend, server);
        self.down_transitions_total.get_or_create(&labels).inc();
        self.sessions_redispatched_total.get_or_create(&labels).inc_by(u64::from(redispatched));
    }

    /// Update the per-server liveness gauges.
    pub fn observe_server(&self, backend: &str, server: &str, up: bool, health: u32) {
        let labels = Self::server_labels(backend, server);
        self.server_up.get_or_create(&labels).set(i64::from(up));
        self.server_health.get_or_create(&labels).set(i64::from(health));
    }

    /// Update the per-backend membership and queue gauges.
    pub fn observe_backend(&self, backend: &str, active: u32, backup: u32, pending: usize) {
        let labels = BackendLabels { backend: backend.to_string() };
        self.active_servers.get_or_create(&labels).set(i64::from(active));
        self.backup_servers.get_or_create(&labels).set(i64::from(backup));
        self.pending_sessions.get_or_create(&labels).set(pending as i64);
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn recorded_metrics_encode() {
        let metrics = MetricsRegistry::new();
        metrics.record_check("pool", "web1", "success", Duration::from_millis(3));
        metrics.record_down_transition("pool", "web1", 2);
        metrics.observe_server("pool", "web1", false, 0);
        metrics.observe_backend("pool", 0, 1, 2);

        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();

        assert!(buffer.contains("checkd_checks_total"));
        assert!(buffer.contains("checkd_down_transitions_total"));
        assert!(buffer.contains("checkd_server_up"));
        assert!(buffer.contains("checkd_pending_sessions"));
        assert!(buffer.contains("backend=\"pool\""));
        assert!(buffer.contains("server=\"web1\""));
    }

    #[test]
    fn gauges_track_the_latest_observation() {
        let metrics = MetricsRegistry::new();
        metrics.observe_server("pool", "web1", true, 4);
        metrics.observe_server("pool", "web1", false, 0);

        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();
        assert!(buffer.contains("checkd_server_up{backend=\"pool\",server=\"web1\"} 0"));
    }
}
