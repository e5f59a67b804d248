//! Phase 2: WORKOUTS
//!
//! One workouts request per chunk, after every metric is done.

use super::{window_arguments, ImportOrchestrator, PhaseOutcome};
use crate::services::rpc_client::TOOL_WORKOUTS;
use hfx_common::events::ImportPhase;
use tracing::debug;

impl ImportOrchestrator {
    pub(super) async fn phase_workouts(&self) -> PhaseOutcome {
        self.enter_phase(ImportPhase::Workouts).await;

        for chunk in &self.chunks {
            if self.job.is_cancel_requested() {
                debug!(chunk_start = %chunk.start, "Cancellation observed");
                return PhaseOutcome::Cancelled;
            }
            self.process_chunk(
                ImportPhase::Workouts,
                TOOL_WORKOUTS,
                None,
                window_arguments(chunk),
                *chunk,
            )
            .await;
        }

        PhaseOutcome::Completed
    }
}
