//! Chunk planning
//!
//! Splits an import window into fixed-length, gap-free, non-overlapping
//! chunks. The window end must already be exclusive (see
//! [`crate::models::import_request::normalize_window`]).

use chrono::Duration;
use hfx_common::events::ChunkWindow;

/// Split `[window.start, window.end)` into chunks of `chunk_len`
///
/// Every chunk but the last is exactly `chunk_len`; the last is clipped to
/// the window end. An empty window, or a non-positive chunk length, yields
/// no chunks.
pub fn plan_chunks(window: ChunkWindow, chunk_len: Duration) -> Vec<ChunkWindow> {
    if chunk_len <= Duration::zero() || window.end <= window.start {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut cursor = window.start;
    while cursor < window.end {
        let next = (cursor + chunk_len).min(window.end);
        chunks.push(ChunkWindow::new(cursor, next));
        cursor = next;
    }
    chunks
}

/// Advisory step total for progress display
///
/// One step per (metric, chunk) in the metrics phase plus one per chunk in
/// the workouts phase. Never used to decide termination.
pub fn total_steps(metric_count: usize, chunk_count: usize) -> usize {
    metric_count * chunk_count + chunk_count
}
