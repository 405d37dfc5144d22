//! Cycle triggers
//!
//! - `POST /api/cycle`: fetch upstream and run one cycle
//! - `POST /api/ingest`: run one cycle on a snapshot carried in the body

use super::parse_events_body;
use crate::error::ApiResult;
use crate::pipeline::CycleReport;
use crate::AppState;
use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use tracing::info;

/// POST /api/cycle
///
/// 200 with the cycle report (including unchanged snapshots), 409 while
/// another cycle runs, 500 when the upstream could not be fetched.
pub async fn trigger_cycle(State(state): State<AppState>) -> ApiResult<Json<CycleReport>> {
    info!("Cycle triggered over HTTP");
    let report = state.pipeline.run_cycle().await?;
    Ok(Json(report))
}

/// POST /api/ingest
pub async fn ingest_snapshot(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<CycleReport>> {
    let records = parse_events_body(&body)?;
    info!(records = records.len(), "Snapshot pushed over HTTP");
    let report = state.pipeline.ingest_snapshot(records).await?;
    Ok(Json(report))
}

pub fn cycle_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cycle", post(trigger_cycle))
        .route("/api/ingest", post(ingest_snapshot))
}
