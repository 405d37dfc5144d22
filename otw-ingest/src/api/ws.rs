//! WebSocket push
//!
//! One writer task drains the client's hub queue with a per-frame send
//! timeout; one reader task watches for close. Whichever ends first tears
//! down the other and the client is unregistered.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(socket: WebSocket, state: AppState) {
    let subscription = state.hub.register().await;
    let client = subscription.id;
    let mut frames = subscription.frames;
    let push_timeout = state.push_timeout;
    info!(client, "WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(frame.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(client, error = %e, "Failed to encode frame");
                    continue;
                }
            };

            match tokio::time::timeout(push_timeout, sender.send(Message::Text(text))).await {
                Ok(Ok(())) => debug!(client, events = frame.events.len(), "Frame sent"),
                Ok(Err(e)) => {
                    debug!(client, error = %e, "Send failed");
                    break;
                }
                Err(_) => {
                    warn!(client, timeout_ms = push_timeout.as_millis() as u64, "Send timed out");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.hub.unregister(client).await;
    info!(client, "WebSocket client disconnected");
}
