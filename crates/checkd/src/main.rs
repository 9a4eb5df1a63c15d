//! checkd binary: active health checks for the load balancer.

use checkd::{Config, Daemon};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    common::logging::init_with(
        config.logging.level.as_deref(),
        config.logging.format.as_deref() == Some("json"),
    );

    tracing::info!("checkd starting");
    Daemon::new(config).run().await?;

    Ok(())
}
