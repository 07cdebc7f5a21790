use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chairbook::api::{self, AppState};
use chairbook::clock::FixedOffsetClock;
use chairbook::config::ServerConfig;
use chairbook::engine::Engine;
use chairbook::notify::HttpSender;
use chairbook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    chairbook::observability::init(config.metrics_port)?;

    let clock = FixedOffsetClock::new(config.utc_offset_minutes)
        .ok_or_else(|| format!("invalid UTC offset: {} minutes", config.utc_offset_minutes))?;
    let sender = HttpSender::new()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(clock),
        Arc::new(sender),
    )?);

    tokio::spawn(sweeper::run_compactor(engine.clone(), config.compact_threshold));
    if let Some(every) = config.sweep_interval {
        tokio::spawn(sweeper::run_sweeper(engine.clone(), every, config.sweep_window));
    }

    let state = Arc::new(AppState {
        engine,
        cron: config.cron_guard(),
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("chairbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  utc_offset_minutes: {}", config.utc_offset_minutes);
    info!(
        "  cron auth: {}",
        if config.cron_guard().is_enforced() { "enforced" } else { "open" }
    );
    info!(
        "  sweeper: {}",
        config.sweep_interval.map_or("external".to_string(), |d| format!(
            "every {}s, hours {}-{}",
            d.as_secs(),
            config.sweep_window.0,
            config.sweep_window.1
        ))
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("chairbook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. In-flight requests are drained by axum.
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
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}
