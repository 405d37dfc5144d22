//! HTTP API handlers for otw-ingest
//!
//! Cycle triggers, push ingress for the hub, live push endpoints (WebSocket
//! and SSE), and read-only incident queries.

pub mod broadcast;
pub mod cycle;
pub mod health;
pub mod incidents;
pub mod sse;
pub mod ws;

pub use broadcast::broadcast_routes;
pub use cycle::cycle_routes;
pub use health::health_routes;
pub use incidents::incident_routes;
pub use sse::event_stream;
pub use ws::ws_handler;

use crate::error::{ApiError, ApiResult};
use serde_json::Value;

/// Parse a `{"events": [...]}` request body into its raw entries
///
/// Anything other than a JSON object whose `events` is a list is rejected.
pub(crate) fn parse_events_body(body: &[u8]) -> ApiResult<Vec<Value>> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Body is not valid JSON: {}", e)))?;

    match payload {
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            Some(_) => Err(ApiError::BadRequest("'events' must be a list".to_string())),
            None => Err(ApiError::BadRequest("Missing 'events' field".to_string())),
        },
        _ => Err(ApiError::BadRequest(
            "Body must be an object with an 'events' list".to_string(),
        )),
    }
}
