//! otw-ingest - traffic incident ingestion service
//!
//! Polls the upstream incident feed, keeps the incident store reconciled
//! with it, and pushes changed snapshots to webhook subscribers and to
//! WebSocket/SSE viewers.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use otw_ingest::config::{Args, ServiceConfig};
use otw_ingest::fetcher::IncidentFetcher;
use otw_ingest::filter::AreaFilter;
use otw_ingest::hub::{spawn_dispatcher, FanoutHub};
use otw_ingest::notifier::{ChannelNotifier, Notifier, WebhookNotifier};
use otw_ingest::pipeline::Pipeline;
use otw_ingest::scheduler::spawn_scheduler;
use otw_ingest::{db, AppState};

const DEFAULT_LOG_FILTER: &str = "otw_ingest=info,otw_common=info,tower_http=info";

/// Pending notifications between the pipeline and the hub dispatcher
const NOTIFICATION_QUEUE: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(&args).context("Failed to load configuration")?;

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting otw-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    config.log_summary();

    let pool = db::connect(&config.database_path, config.acquire_timeout)
        .await
        .context("Failed to open incident database")?;

    let hub = FanoutHub::new(config.client_buffer);
    let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_QUEUE);
    let dispatcher = spawn_dispatcher(hub.clone(), notification_rx);

    let mut notifiers: Vec<Arc<dyn Notifier>> =
        vec![Arc::new(ChannelNotifier::new(notification_tx))];
    if let Some(url) = &config.webhook_url {
        let webhook = WebhookNotifier::new(url.clone(), config.notify_timeout)
            .context("Failed to build webhook client")?;
        notifiers.push(Arc::new(webhook));
        info!(url = %url, "Webhook notifications enabled");
    }

    let fetcher = IncidentFetcher::new(
        config.upstream_url.clone(),
        config.upstream_timeout,
        config.retry.clone(),
    )
    .context("Failed to build upstream client")?;

    let pipeline = Arc::new(Pipeline::new(
        fetcher,
        pool.clone(),
        AreaFilter::new(&config.area_keywords),
        notifiers,
    ));

    let scheduler = spawn_scheduler(Arc::clone(&pipeline), config.interval);

    let state = AppState::new(pipeline, hub, config.push_timeout);
    let app = otw_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!("Listening on http://{}", config.bind);
    info!("Health check: http://{}/health", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    dispatcher.abort();
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
