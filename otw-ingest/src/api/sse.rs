//! Server-Sent Events push
//!
//! Each connection registers with the hub before the response is returned,
//! so a frame broadcast right after the request cannot be missed. When the
//! client disconnects the stream is dropped with its queue, and the hub
//! evicts the entry on the next broadcast.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.hub.register().await;
    info!(client = subscription.id, "SSE client connected");

    let stream = async_stream::stream! {
        while let Some(frame) = subscription.frames.recv().await {
            match Event::default().event("traffic").json_data(frame.as_ref()) {
                Ok(event) => {
                    debug!(client = subscription.id, events = frame.events.len(), "SSE: sending frame");
                    yield Ok(event);
                }
                Err(e) => warn!(client = subscription.id, error = %e, "SSE: failed to encode frame"),
            }
        }
        info!(client = subscription.id, "SSE client evicted, closing stream");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
