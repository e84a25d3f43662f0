use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use stagebook::clock::SystemClock;
use stagebook::config::Settings;
use stagebook::engine::Engine;
use stagebook::notify::NotifyHub;
use stagebook::reaper;
use stagebook::store::{MemoryStore, Repositories};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;
    stagebook::observability::init(settings.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&settings.data_dir)?;

    let store = Arc::new(MemoryStore::open(settings.wal_path())?);
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        Repositories::from_memory(store.clone()),
        Arc::new(SystemClock),
        notify.clone(),
        settings.policy.clone(),
    ));

    info!("stagebookd started");
    info!("  data_dir: {}", settings.data_dir.display());
    info!("  sweep every {}s, expiring look-ahead {} days", settings.sweep_interval.as_secs(), settings.expiring_days);
    info!("  compact after {} appends", settings.compact_threshold);
    info!(
        "  metrics: {}",
        settings
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(reaper::run_sweeper(engine.clone(), settings.sweep_interval, settings.expiring_days));
    let compactor = tokio::spawn(reaper::run_compactor(store.clone(), settings.compact_threshold));

    // Delivery to visitors happens elsewhere; the daemon logs every notice as JSON.
    let mut notices = notify.subscribe_all();
    let dispatcher = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => info!(target: "stagebook::notice", to = notice.email(), "{}", notice.to_payload()),
                Err(RecvError::Lagged(n)) => tracing::warn!("notice log fell behind, {n} notices dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");

    sweeper.abort();
    compactor.abort();
    dispatcher.abort();

    if let Err(e) = store.compact().await {
        tracing::error!("final WAL compaction failed: {e}");
    }
    info!("stagebookd stopped");
    Ok(())
}
