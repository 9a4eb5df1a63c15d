//! Daemon assembly: configuration to running check tasks.

use crate::config::Config;
use crate::http_server::StatusServer;
use crate::metrics::MetricsRegistry;
use crate::scheduler::spawn_backend_checks;
use balancer::Backend;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The health-check daemon: builds backends from the configuration, spawns
/// one check task per server, serves metrics, and shuts down cleanly on
/// interrupt.
pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted.
    pub async fn run(self) -> common::Result<()> {
        let metrics = Arc::new(MetricsRegistry::new());
        let permits = Arc::new(Semaphore::new(self.config.engine.max_probe_sockets));
        let cancel = CancellationToken::new();
        let tasks: DashMap<String, JoinHandle<()>> = DashMap::new();

        let backends: Vec<Arc<Backend>> = self
            .config
            .build_backends()
            .into_iter()
            .map(|(backend, spec)| {
                spawn_backend_checks(&backend, &spec, &permits, &metrics, &cancel, &tasks);
                backend
            })
            .collect();
        info!(backends = backends.len(), checks = tasks.len(), "check tasks spawned");

        if self.config.metrics.enabled {
            let status = StatusServer::new(
                metrics.clone(),
                backends.clone(),
                self.config.metrics.listen_addr.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = status.run().await {
                    warn!(error = %e, "status server error");
                }
            });
        }

        tokio::signal::ctrl_c().await?;
        info!("shutdown requested, stopping check tasks");
        cancel.cancel();
        for (_, handle) in tasks.into_iter() {
            let _ = handle.await;
        }
        info!("health-check daemon stopped");
        Ok(())
    }
}
