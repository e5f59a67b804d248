//! Server-Sent Events (SSE) for import progress streaming
//!
//! Every stream opens with a synthesized `status` snapshot, then relays
//! broadcast events until a `complete` or `error` event has been sent.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use hfx_common::events::ProgressEvent;
use hfx_common::sse::{encode_event, heartbeat};
use std::convert::Infallible;
use tracing::{debug, info};

/// GET /import/events - SSE event stream for import progress
///
/// Streams events:
/// - status (first, then on phase changes and cancel requests)
/// - progress (one per chunk)
/// - complete / error (last)
///
/// A stream opened after the last job finished ends right after its
/// snapshot. A slow client may miss progress events; it never slows the
/// import. If it misses the terminal event too, the periodic status
/// re-check ends the stream with a final `status` snapshot.
pub async fn import_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (snapshot, mut subscription) = state.imports.subscribe().await;
    let shutdown = state.shutdown.clone();
    info!(subscriber = subscription.id(), "New SSE client connected to import events");

    let stream = async_stream::stream! {
        let finished = snapshot.status.is_done();
        if let Some(frame) = encode_event(&ProgressEvent::Status(snapshot)) {
            yield Ok(frame);
        }
        if finished {
            debug!(subscriber = subscription.id(), "SSE: Last import already finished, closing stream");
            return;
        }

        let mut recheck = tokio::time::interval(state.status_recheck);
        recheck.tick().await;

        'events: loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(subscriber = subscription.id(), "SSE: Server shutting down, closing stream");
                    break;
                }
                _ = recheck.tick() => {
                    // A full queue may have dropped the terminal event
                    let status = state.imports.status().await;
                    if !status.status.is_done() {
                        continue;
                    }
                    while let Some(event) = subscription.try_recv() {
                        let terminal = event.is_terminal();
                        if let Some(frame) = encode_event(&event) {
                            yield Ok(frame);
                        }
                        if terminal {
                            break 'events;
                        }
                    }
                    debug!(subscriber = subscription.id(), "SSE: Import finished without a terminal event, sending final status");
                    if let Some(frame) = encode_event(&ProgressEvent::Status(status)) {
                        yield Ok(frame);
                    }
                    break;
                }
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    let terminal = event.is_terminal();
                    if let Some(frame) = encode_event(&event) {
                        yield Ok(frame);
                    }
                    if terminal {
                        debug!(subscriber = subscription.id(), "SSE: Import finished, closing stream");
                        break;
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(heartbeat())
}
