//! Read-only incident queries

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use otw_common::{StoredEventRecord, StoredStatus};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct IncidentQuery {
    /// ACTIVE or INACTIVE; all rows when omitted
    pub status: Option<String>,
}

/// GET /api/incidents
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentQuery>,
) -> ApiResult<Json<Vec<StoredEventRecord>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<StoredStatus>)
        .transpose()?;

    let records = state.pipeline.store().list(status).await?;
    Ok(Json(records))
}

/// GET /api/incidents/:id
pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StoredEventRecord>> {
    state
        .pipeline
        .store()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Incident {}", id)))
}

pub fn incident_routes() -> Router<AppState> {
    Router::new()
        .route("/api/incidents", get(list_incidents))
        .route("/api/incidents/:id", get(get_incident))
}
