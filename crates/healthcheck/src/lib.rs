//! Active health checking for backend servers of a TCP/HTTP load balancer.
//!
//! This crate provides the probe-level building blocks of the check engine:
//!
//! - Probe payloads and byte-exact reply classification for the built-in
//!   protocols (bare TCP, HTTP, SSLv3, SMTP)
//! - A probe driver running one complete check over a fresh AF_INET
//!   connection, with optional source binding and transparent-proxy mode
//! - The hysteretic rise/fall liveness state machine
//!
//! Scheduling and backend propagation live in the `checkd` crate; this crate
//! is deliberately free of backend state so the pieces can be exercised in
//! isolation.
//!
//! # Example
//!
//! ```no_run
//! use healthcheck::liveness::{Liveness, Thresholds, Transition};
//! use healthcheck::probe::{run_probe, ProbeTarget};
//! use healthcheck::types::CheckSpec;
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! # async fn example() {
//! let target = ProbeTarget {
//!     dest: "192.168.1.100:80".parse().unwrap(),
//!     source: None,
//! };
//! let spec = CheckSpec::http("/", "HTTP/1.0");
//! let th = Thresholds::new(2, 3);
//! let mut liveness = Liveness::initial();
//!
//! let outcome = run_probe(&target, &spec, Instant::now() + Duration::from_secs(2)).await;
//! let transition = if outcome.is_success() {
//!     liveness.observe_success(th)
//! } else {
//!     liveness.observe_failure()
//! };
//! assert_ne!(transition, Transition::WentUp);
//! # }
//! ```

pub mod liveness;
pub mod probe;
pub mod types;

pub use liveness::{Liveness, Thresholds, Transition};
pub use probe::{run_probe, ProbeTarget, SourceBinding};
pub use types::{CheckProtocol, CheckSpec, ProbeFailure, ProbeOutcome};
