use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use clinic_sched::config::Config;
use clinic_sched::host::Host;
use clinic_sched::store::InMemoryStore;

/// Scheduling host: one engine over the in-memory store, with the outbox pump and
/// compactor running on the engine's own outbox log.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    clinic_sched::observability::init(config.metrics_port)?;

    info!("clinic-sched");
    info!("  outbox: {}", config.outbox_path.display());
    info!("  pump_interval: {:?}", config.pump_interval);
    info!("  overbook_limit: {}", config.overbook_limit);
    info!("  availability tz: {}", config.tz_availability);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let host = Host::start(Arc::new(InMemoryStore::new()), config)?;
    info!("{} outbox events on open", host.outbox().len().await);

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutting down");
    host.shutdown().await?;
    Ok(())
}
