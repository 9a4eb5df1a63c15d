//! Backend and server model for the load balancer.
//!
//! A [`Backend`] owns its servers, the weighted routing map, and the pending
//! connection queues. The health-check engine mutates server liveness and
//! drives the membership operations (`recount_servers`,
//! `recalc_server_map`, the UP/DOWN edge effects); the routing side consumes
//! the map and parks sessions in the queues.
//!
//! All mutable state sits behind the backend's lock, and every mutation
//! happens in short critical sections without suspension points, so edge
//! effects and routing decisions on one backend never interleave.

pub mod backend;
pub mod queue;
pub mod server;
pub mod session;

pub use backend::{Backend, BackendSnapshot, BackendState, EdgeReport, ServerSnapshot};
pub use queue::PendConn;
pub use server::Server;
pub use session::{CookieFlags, SessFlags, Session, SessionRouting};
