use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use hostelbeds::api::{self, AppState};
use hostelbeds::auth::StaticTokenIdentity;
use hostelbeds::blob::FsBlobStore;
use hostelbeds::config::Config;
use hostelbeds::engine::Engine;
use hostelbeds::notify::{self, LogNotifier, Notifier, NotifyHub};
use hostelbeds::receipt::TextReceipt;
use hostelbeds::scheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    hostelbeds::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let topology = Arc::new(config.topology()?);
    let notify_hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        topology.clone(),
        config.payment_codes.clone(),
        notify_hub.clone(),
    )?);

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    tokio::spawn(notify::run_dispatcher(notify_hub.subscribe(), notifier.clone()));
    tokio::spawn(scheduler::run_compactor(engine.clone(), config.compact_threshold));
    if config.reminders {
        tokio::spawn(scheduler::run_reminders(engine.clone(), notifier));
    }

    let state = AppState {
        engine,
        identity: Arc::new(StaticTokenIdentity::new(config.staff_token.clone())),
        blobs: Arc::new(FsBlobStore::new(config.uploads_dir())),
        receipts: Arc::new(TextReceipt::default()),
    };
    let app = api::router(state, config.max_upload_bytes);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("hostelbeds listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  beds: {}", topology.total_beds());
    info!("  staff access: {}", if config.staff_token.is_some() { "enabled" } else { "disabled" });
    info!("  reminders: {}", if config.reminders { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("hostelbeds stopped");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM; in-flight requests are drained by `axum::serve`.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
