//! Phase 1: METRICS
//!
//! Every configured metric is fetched for every chunk, in list order.

use super::{window_arguments, ImportOrchestrator, PhaseOutcome};
use crate::models::MetricSpec;
use crate::services::rpc_client::TOOL_HEALTH_METRICS;
use hfx_common::events::{ChunkWindow, ImportPhase};
use serde_json::{Map, Value};
use tracing::debug;

impl ImportOrchestrator {
    pub(super) async fn phase_metrics(&self) -> PhaseOutcome {
        self.enter_phase(ImportPhase::Metrics).await;

        for metric in self.metrics.iter() {
            for chunk in &self.chunks {
                if self.job.is_cancel_requested() {
                    debug!(metric = %metric.name, chunk_start = %chunk.start, "Cancellation observed");
                    return PhaseOutcome::Cancelled;
                }
                self.process_chunk(
                    ImportPhase::Metrics,
                    TOOL_HEALTH_METRICS,
                    Some(&metric.name),
                    metric_arguments(metric, chunk),
                    *chunk,
                )
                .await;
            }
            debug!(metric = %metric.name, "Metric complete");
        }

        PhaseOutcome::Completed
    }
}

fn metric_arguments(metric: &MetricSpec, chunk: &ChunkWindow) -> Map<String, Value> {
    let mut arguments = window_arguments(chunk);
    arguments.insert("metric".to_string(), Value::String(metric.name.clone()));
    arguments.insert("aggregate".to_string(), Value::Bool(metric.aggregate));
    arguments
}
