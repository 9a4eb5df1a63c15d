//! Per-server record: addressing, check parameters and liveness bookkeeping.

use crate::queue::PendConn;
use healthcheck::liveness::{Liveness, Thresholds};
use healthcheck::probe::SourceBinding;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

/// One backend server as seen by routing and the health-check engine.
///
/// The engine mutates `liveness`, `failed_checks` and `down_trans`; the
/// routing side maintains `cur_sess` and the pending queue.
#[derive(Debug)]
pub struct Server {
    pub name: String,
    /// Serving address.
    pub addr: SocketAddrV4,
    /// Probe destination override; probes go to `addr` when unset.
    pub check_addr: Option<Ipv4Addr>,
    /// Probe port.
    pub check_port: u16,
    /// Server-level outbound binding for probes.
    pub source: Option<SourceBinding>,
    /// Probe interval; also the per-probe deadline.
    pub inter: Duration,
    pub rise: u32,
    pub fall: u32,
    /// Routing-map slots this server occupies when up.
    pub weight: u32,
    /// Hard session cap; 0 means unbounded.
    pub maxconn: u32,
    /// Floor of the dynamic session allowance; 0 disables scaling.
    pub minconn: u32,
    pub backup: bool,
    /// Probes enabled for this server.
    pub checked: bool,
    pub liveness: Liveness,
    pub cur_sess: u32,
    pub failed_checks: u64,
    pub down_trans: u64,
    pub(crate) pendconns: VecDeque<Arc<PendConn>>,
}

impl Server {
    /// A checked, active server with default thresholds (rise 2, fall 3)
    /// and a 2s interval, probing the serving address.
    pub fn new(name: impl Into<String>, addr: SocketAddrV4) -> Self {
        Self {
            name: name.into(),
            check_addr: None,
            check_port: addr.port(),
            addr,
            source: None,
            inter: Duration::from_secs(2),
            rise: 2,
            fall: 3,
            weight: 1,
            maxconn: 0,
            minconn: 0,
            backup: false,
            checked: true,
            liveness: Liveness::initial(),
            cur_sess: 0,
            failed_checks: 0,
            down_trans: 0,
            pendconns: VecDeque::new(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.rise, self.fall)
    }

    /// Scalar health counter in `[0, rise + fall - 1]`.
    pub fn health(&self) -> u32 {
        self.liveness.health(self.thresholds())
    }

    pub fn is_up(&self) -> bool {
        self.liveness.is_up()
    }

    /// Probe destination: the check address when set, the serving address
    /// otherwise, always on the check port.
    pub fn check_dest(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.check_addr.unwrap_or(*self.addr.ip()), self.check_port)
    }

    /// Pending connections queued on this server.
    pub fn nbpend(&self) -> usize {
        self.pendconns.len()
    }

    /// Dynamic session allowance used when draining queued sessions into
    /// this server after an UP edge.
    ///
    /// Unbounded when `maxconn` is 0. With `minconn` set, the allowance
    /// scales with backend load (`beconn / fullconn`) between the two
    /// bounds; otherwise it is simply `maxconn`.
    pub fn dynamic_maxconn(&self, beconn: u32, fullconn: u32) -> u32 {
        if self.maxconn == 0 {
            u32::MAX
        } else if self.minconn == 0 || fullconn == 0 {
            self.maxconn
        } else {
            let scaled = (u64::from(self.maxconn) * u64::from(beconn) / u64::from(fullconn)) as u32;
            scaled.clamp(self.minconn, self.maxconn)
        }
    }
}
