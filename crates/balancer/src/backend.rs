//! Backend state: server membership, the weighted routing map, and the
//! UP/DOWN edge effects driven by the health-check engine.

use crate::queue::PendConn;
use crate::server::Server;
use healthcheck::probe::{ProbeTarget, SourceBinding};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A group of interchangeable servers behind one frontend.
///
/// All mutable state lives in [`BackendState`] behind the lock; critical
/// sections never suspend, which serializes edge effects with routing.
pub struct Backend {
    state: Mutex<BackendState>,
}

impl Backend {
    pub fn new(state: BackendState) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(state) })
    }

    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock()
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        self.state().snapshot()
    }
}

/// Mutable backend state, guarded by the backend lock.
pub struct BackendState {
    pub id: String,
    /// Sessions of this backend may be moved off a dead server.
    pub redispatch: bool,
    /// Backend-level outbound binding for probes, overridden per server.
    pub source: Option<SourceBinding>,
    /// Session count at which servers with `minconn` reach full allowance.
    pub fullconn: u32,
    /// A stopped backend keeps its check tasks ticking but probes nothing.
    pub stopped: bool,
    /// Sessions currently active on the backend.
    pub beconn: u32,
    pub srv_act: u32,
    pub srv_bck: u32,
    pub servers: Vec<Server>,
    /// Weighted routing map: each slot is a server index.
    pub server_map: Vec<usize>,
    pub(crate) pending: VecDeque<Arc<PendConn>>,
}

/// Outcome of an UP or DOWN edge, for metrics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeReport {
    /// Sessions requeued (UP drain) or redispatched (DOWN rescue).
    pub xferred: u32,
    /// Pending connections left on the server's own queue.
    pub remaining: usize,
    /// No running server of any role was left after the transition.
    pub backend_empty: bool,
}

impl BackendState {
    /// Build a backend over `servers` and derive the initial counts and map.
    pub fn new(id: impl Into<String>, servers: Vec<Server>) -> Self {
        let mut state = Self {
            id: id.into(),
            redispatch: false,
            source: None,
            fullconn: 0,
            stopped: false,
            beconn: 0,
            srv_act: 0,
            srv_bck: 0,
            servers,
            server_map: Vec::new(),
            pending: VecDeque::new(),
        };
        state.recount_servers();
        state.recalc_server_map();
        state
    }

    /// Recount running active and backup servers.
    pub fn recount_servers(&mut self) {
        self.srv_act = 0;
        self.srv_bck = 0;
        for srv in &self.servers {
            if srv.is_up() {
                if srv.backup {
                    self.srv_bck += 1;
                } else {
                    self.srv_act += 1;
                }
            }
        }
    }

    /// Rebuild the weighted routing map over eligible servers.
    ///
    /// Running active servers fill the map; backup servers are eligible only
    /// when no active server remains. Each server takes `weight` slots,
    /// interleaved smoothly so equal weights alternate instead of clustering.
    pub fn recalc_server_map(&mut self) {
        let use_backup = self.srv_act == 0;
        let eligible: Vec<usize> = self
            .servers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_up() && s.backup == use_backup && s.weight > 0)
            .map(|(i, _)| i)
            .collect();

        self.server_map.clear();
        let total: u32 = eligible.iter().map(|&i| self.servers[i].weight).sum();
        if total == 0 {
            return;
        }

        let mut credit: Vec<i64> = vec![0; eligible.len()];
        for _ in 0..total {
            for (slot, &idx) in eligible.iter().enumerate() {
                credit[slot] += i64::from(self.servers[idx].weight);
            }
            let mut best = 0;
            for slot in 1..credit.len() {
                if credit[slot] > credit[best] {
                    best = slot;
                }
            }
            self.server_map.push(eligible[best]);
            credit[best] -= i64::from(total);
        }
    }

    /// Probe target for server `idx`: server-level source binding first,
    /// backend-level binding otherwise.
    pub fn probe_target(&self, idx: usize) -> ProbeTarget {
        let srv = &self.servers[idx];
        ProbeTarget {
            dest: srv.check_dest(),
            source: srv.source.clone().or_else(|| self.source.clone()),
        }
    }

    /// Account a session entering service on server `idx`.
    pub fn session_started(&mut self, idx: usize) {
        self.beconn += 1;
        self.servers[idx].cur_sess += 1;
    }

    /// Account a session leaving server `idx`.
    pub fn session_finished(&mut self, idx: usize) {
        self.beconn = self.beconn.saturating_sub(1);
        let srv = &mut self.servers[idx];
        srv.cur_sess = srv.cur_sess.saturating_sub(1);
    }

    /// UP edge effects for server `idx`: recount, map recalc, then drain the
    /// backend-wide queue into the server up to its dynamic allowance. Each
    /// drained session is pointed at the server and woken.
    pub fn server_came_up(&mut self, idx: usize) -> EdgeReport {
        self.recount_servers();
        self.recalc_server_map();

        let allowance = self.servers[idx].dynamic_maxconn(self.beconn, self.fullconn);
        let mut xferred = 0u32;
        while xferred < allowance {
            let Some(pc) = self.pendconn_from_backend() else { break };
            pc.sess.assign_server(idx);
            pc.sess.wake();
            xferred += 1;
        }

        let srv = &self.servers[idx];
        info!(
            "{}Server {}/{} is UP. {} active and {} backup servers online.{} \
             {} sessions requeued, {} total in queue.",
            if srv.backup { "Backup " } else { "" },
            self.id,
            srv.name,
            self.srv_act,
            self.srv_bck,
            if self.srv_bck > 0 && self.srv_act == 0 { " Running on backup." } else { "" },
            xferred,
            srv.nbpend(),
        );

        EdgeReport { xferred, remaining: srv.nbpend(), backend_empty: false }
    }

    /// DOWN edge effects for server `idx`: recount, map recalc, then move
    /// every redispatchable pending connection off the server's queue,
    /// stripping the session's stickiness so the dispatcher rechooses, and
    /// wake it. Non-redispatchable entries stay queued.
    pub fn server_went_down(&mut self, idx: usize) -> EdgeReport {
        self.recount_servers();
        self.recalc_server_map();

        let mut xferred = 0u32;
        let queue = std::mem::take(&mut self.servers[idx].pendconns);
        let mut kept = VecDeque::with_capacity(queue.len());
        for pc in queue {
            if pc.sess.redispatch {
                pc.sess.prepare_redispatch();
                pc.sess.wake();
                xferred += 1;
            } else {
                kept.push_back(pc);
            }
        }
        self.servers[idx].pendconns = kept;

        let backend_empty = self.srv_act == 0 && self.srv_bck == 0;
        {
            let srv = &self.servers[idx];
            warn!(
                "{}Server {}/{} is DOWN. {} active and {} backup servers left.{} \
                 {} sessions active, {} requeued, {} remaining in queue.",
                if srv.backup { "Backup " } else { "" },
                self.id,
                srv.name,
                self.srv_act,
                self.srv_bck,
                if self.srv_bck > 0 && self.srv_act == 0 { " Running on backup." } else { "" },
                srv.cur_sess,
                xferred,
                srv.nbpend(),
            );
        }
        if backend_empty {
            error!("backend '{}' has no server available!", self.id);
        }
        self.servers[idx].down_trans += 1;

        EdgeReport { xferred, remaining: self.servers[idx].nbpend(), backend_empty }
    }

    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id.clone(),
            stopped: self.stopped,
            srv_act: self.srv_act,
            srv_bck: self.srv_bck,
            queued: self.pending.len(),
            servers: self
                .servers
                .iter()
                .map(|srv| ServerSnapshot {
                    name: srv.name.clone(),
                    addr: srv.addr.to_string(),
                    backup: srv.backup,
                    checked: srv.checked,
                    up: srv.is_up(),
                    health: srv.health(),
                    rise: srv.rise,
                    fall: srv.fall,
                    cur_sess: srv.cur_sess,
                    queued: srv.nbpend(),
                    failed_checks: srv.failed_checks,
                    down_trans: srv.down_trans,
                })
                .collect(),
        }
    }
}

/// Point-in-time view of a backend, served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub id: String,
    pub stopped: bool,
    pub srv_act: u32,
    pub srv_bck: u32,
    pub queued: usize,
    pub servers: Vec<ServerSnapshot>,
}

/// Point-in-time view of one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub addr: String,
    pub backup: bool,
    pub checked: bool,
    pub up: bool,
    pub health: u32,
    pub rise: u32,
    pub fall: u32,
    pub cur_sess: u32,
    pub queued: usize,
    pub failed_checks: u64,
    pub down_trans: u64,
}
