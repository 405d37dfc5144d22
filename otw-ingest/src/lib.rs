//! otw-ingest library interface
//!
//! Traffic incident ingestion: fetch the upstream snapshot, canonicalize it,
//! detect whole-snapshot changes, reconcile the store, and propagate changed
//! snapshots to webhook subscribers and live viewers.

pub mod api;
pub mod canonicalize;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod fingerprint;
pub mod hub;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod scheduler;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use hub::FanoutHub;
use pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub hub: FanoutHub,
    /// Per-frame send timeout for WebSocket writers
    pub push_timeout: Duration,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, hub: FanoutHub, push_timeout: Duration) -> Self {
        Self {
            pipeline,
            hub,
            push_timeout,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::cycle_routes())
        .merge(api::broadcast_routes())
        .merge(api::incident_routes())
        .route("/ws", get(api::ws_handler))
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
