//! Active health-check daemon for the load balancer.
//!
//! One check task per backend server probes it at its configured interval,
//! feeds the outcome into the rise/fall liveness machine, and on every edge
//! recounts the backend membership, recomputes the routing map, and moves
//! queued sessions: the backend queue drains into a freshly up server, and
//! redispatchable sessions are rescued off a freshly down one.
//!
//! # Components
//!
//! - **Scheduler**: per-server check tasks and edge propagation
//! - **Config**: YAML configuration with validation
//! - **Metrics**: Prometheus registry and recording hooks
//! - **StatusServer**: /metrics and /status HTTP endpoints

pub mod config;
pub mod daemon;
pub mod http_server;
pub mod metrics;
pub mod scheduler;

pub use config::{Config, ConfigError};
pub use daemon::Daemon;
pub use http_server::StatusServer;
pub use metrics::MetricsRegistry;
pub use scheduler::{spawn_backend_checks, CheckTask};
