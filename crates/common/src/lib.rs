//! Shared plumbing for the load-balancer workspace.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
