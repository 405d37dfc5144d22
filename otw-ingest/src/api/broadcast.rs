//! Hub ingress
//!
//! `POST /broadcast` takes an already-canonical frame; `POST /api/notifications`
//! takes the webhook envelope array, so a hub running in another process can
//! subscribe to this service's webhook sink.

use super::parse_events_body;
use crate::error::{ApiError, ApiResult};
use crate::notifier::NotificationEnvelope;
use crate::AppState;
use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use otw_common::models::NOTIFICATION_EVENT_TYPE;
use otw_common::{CanonicalEvent, PushFrame};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub status: &'static str,
    pub clients: usize,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub status: &'static str,
    pub broadcasts: usize,
    pub ignored: usize,
}

/// POST /broadcast
///
/// The whole frame is validated before anything is pushed.
pub async fn broadcast(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<BroadcastResponse>> {
    let raw = parse_events_body(&body)?;
    let events = raw
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value::<CanonicalEvent>(value)
                .map_err(|e| ApiError::BadRequest(format!("events[{}]: {}", index, e)))
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let report = state.hub.on_notification(PushFrame { events }).await;
    Ok(Json(BroadcastResponse {
        status: "sent",
        clients: report.delivered,
    }))
}

/// POST /api/notifications
pub async fn receive_notifications(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<NotificationsResponse>> {
    let envelopes: Vec<NotificationEnvelope> = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid notification envelope: {}", e)))?;

    let mut broadcasts = 0;
    let mut ignored = 0;
    for envelope in envelopes {
        if envelope.event_type != NOTIFICATION_EVENT_TYPE {
            debug!(event_type = %envelope.event_type, "Ignoring notification of another type");
            ignored += 1;
            continue;
        }

        info!(
            id = %envelope.id,
            events = envelope.data.events.len(),
            "Received change notification"
        );
        state
            .hub
            .on_notification(PushFrame {
                events: envelope.data.events,
            })
            .await;
        broadcasts += 1;
    }

    Ok(Json(NotificationsResponse {
        status: "accepted",
        broadcasts,
        ignored,
    }))
}

pub fn broadcast_routes() -> Router<AppState> {
    Router::new()
        .route("/broadcast", post(broadcast))
        .route("/api/notifications", post(receive_notifications))
}
