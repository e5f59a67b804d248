//! Server-Sent Events (SSE) utilities
//!
//! Shared encoding of progress events for SSE transmission.

use axum::response::sse::{Event, KeepAlive};
use std::time::Duration;
use tracing::warn;

use crate::events::ProgressEvent;

/// Heartbeat interval for long-lived progress streams
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Encode a progress event as an SSE frame named after its type
///
/// Returns None (and logs) if the event cannot be serialized.
pub fn encode_event(event: &ProgressEvent) -> Option<Event> {
    let event_type = event.event_type();
    match Event::default().event(event_type).json_data(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

/// Keep-alive used by every progress stream
pub fn heartbeat() -> KeepAlive {
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")
}
