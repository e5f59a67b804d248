//! Import orchestrator
//!
//! Drives one import job from the background task.
//!
//! # Phase Progression
//! METRICS (every metric × every chunk) → WORKOUTS (every chunk) → done
//!
//! Each chunk is one device round trip. Failed round trips are retried up to
//! `max_chunk_attempts` times, waiting for the device to come back between
//! attempts; a chunk that still fails is skipped and the import continues.
//! Cancellation is observed at the top of every chunk iteration, so a
//! cancelled job stops after at most one in-flight chunk.

use crate::models::{ImportJob, ImportSettings, MetricSpec};
use crate::services::ingestion_sink::IngestionSink;
use crate::services::progress_broadcaster::ProgressBroadcaster;
use crate::services::rpc_client::{RpcClient, RpcError, ToolResult};
use chrono::NaiveDateTime;
use hfx_common::events::{ChunkWindow, ImportPhase, ProgressEvent, RunOutcome};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

mod phase_metrics;
mod phase_workouts;

/// Timestamp format sent to the device tools
const DEVICE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseOutcome {
    Completed,
    Cancelled,
}

/// Per-job import driver
pub struct ImportOrchestrator {
    job: Arc<ImportJob>,
    client: RpcClient,
    sink: Arc<dyn IngestionSink>,
    broadcaster: ProgressBroadcaster,
    settings: ImportSettings,
    metrics: Arc<[MetricSpec]>,
    chunks: Vec<ChunkWindow>,
}

impl ImportOrchestrator {
    pub fn new(
        job: Arc<ImportJob>,
        sink: Arc<dyn IngestionSink>,
        broadcaster: ProgressBroadcaster,
        settings: ImportSettings,
        metrics: Arc<[MetricSpec]>,
        chunks: Vec<ChunkWindow>,
    ) -> Self {
        let client = RpcClient::new(&job.request.host, job.request.port, settings.request_timeout);
        Self {
            job,
            client,
            sink,
            broadcaster,
            settings,
            metrics,
            chunks,
        }
    }

    /// Run both phases to completion or cancellation
    ///
    /// Per-chunk failures never end the run; they are counted as skipped
    /// chunks. Finalization (audit log, terminal event) is the caller's job.
    pub async fn run(&self) -> RunOutcome {
        let started = Instant::now();
        info!(
            run_id = %self.job.run_id,
            addr = %self.client.addr(),
            window = %self.job.request.window,
            chunks = self.chunks.len(),
            metrics = self.metrics.len(),
            dry_run = self.job.request.dry_run,
            "Import started"
        );

        let outcome = match self.phase_metrics().await {
            PhaseOutcome::Cancelled => RunOutcome::Cancelled,
            PhaseOutcome::Completed => match self.phase_workouts().await {
                PhaseOutcome::Cancelled => RunOutcome::Cancelled,
                // A cancel accepted during the last chunk still ends as cancelled
                PhaseOutcome::Completed if self.job.is_cancel_requested() => {
                    RunOutcome::Cancelled
                }
                PhaseOutcome::Completed => RunOutcome::Success,
            },
        };

        let counters = self.job.counters().await;
        info!(
            run_id = %self.job.run_id,
            outcome = outcome.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            received = counters.total_received(),
            inserted = counters.total_inserted(),
            skipped = counters.chunks_skipped,
            "Import finished"
        );
        outcome
    }

    /// Record the phase change and tell observers
    async fn enter_phase(&self, phase: ImportPhase) {
        self.job.enter_phase(phase).await;
        info!(run_id = %self.job.run_id, phase = phase.as_str(), "Entering import phase");
        self.broadcaster
            .broadcast(&ProgressEvent::Status(self.job.snapshot().await));
    }

    /// Fetch one chunk, hand it to the sink and advance the step
    ///
    /// The step advances whether the chunk was stored, empty or skipped.
    async fn process_chunk(
        &self,
        phase: ImportPhase,
        tool: &str,
        metric: Option<&str>,
        arguments: Map<String, Value>,
        chunk: ChunkWindow,
    ) {
        self.job.begin_chunk(metric, chunk).await;
        let label = metric.unwrap_or(phase.as_str());

        let fetched = match self.fetch_with_recovery(tool, &arguments, label, chunk).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    run_id = %self.job.run_id,
                    metric = label,
                    chunk_start = %chunk.start,
                    chunk_end = %chunk.end,
                    kind = e.kind(),
                    error = %e,
                    "Chunk skipped after exhausting retries"
                );
                self.job
                    .record_error(format!("{} {}: {}", label, chunk, e))
                    .await;
                let step = self.job.complete_chunk(|c| c.chunks_skipped += 1).await;
                self.broadcast_progress(step, phase, metric, chunk);
                return;
            }
        };

        let records = fetched.record_count();
        let bytes = fetched.bytes_read() as u64;

        let ingested = match fetched.payload() {
            _ if records == 0 => {
                debug!(metric = label, chunk_start = %chunk.start, "No data for chunk");
                Ok(None)
            }
            None => Ok(None),
            Some(_) if self.job.request.dry_run => Ok(None),
            Some(payload) => self
                .sink
                .ingest(payload, &self.job.request.user)
                .await
                .map(Some),
        };

        let step = match ingested {
            Ok(stored) => {
                debug!(
                    metric = label,
                    chunk_start = %chunk.start,
                    records,
                    bytes,
                    "Chunk processed"
                );
                self.job
                    .complete_chunk(|c| {
                        c.bytes_fetched += bytes;
                        c.add_received(phase, records);
                        if let Some(stored) = stored {
                            c.add_inserted(phase, stored.inserted, stored.duplicates);
                        }
                    })
                    .await
            }
            Err(e) => {
                warn!(
                    run_id = %self.job.run_id,
                    metric = label,
                    chunk_start = %chunk.start,
                    chunk_end = %chunk.end,
                    error = %e,
                    "Ingestion failed, chunk skipped"
                );
                self.job
                    .record_error(format!("{} {}: {}", label, chunk, e))
                    .await;
                self.job
                    .complete_chunk(|c| {
                        c.bytes_fetched += bytes;
                        c.add_received(phase, records);
                        c.chunks_skipped += 1;
                    })
                    .await
            }
        };

        self.broadcast_progress(step, phase, metric, chunk);
    }

    /// Call a tool, waiting out device restarts between attempts
    async fn fetch_with_recovery(
        &self,
        tool: &str,
        arguments: &Map<String, Value>,
        label: &str,
        chunk: ChunkWindow,
    ) -> Result<ToolResult, RpcError> {
        let max_attempts = self.settings.max_chunk_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match self.client.call_tool(tool, arguments).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            warn!(
                metric = label,
                chunk_start = %chunk.start,
                chunk_end = %chunk.end,
                attempt,
                max_attempts,
                kind = err.kind(),
                error = %err,
                "Device request failed, waiting for device"
            );
            if !self.client.wait_until_reachable(&self.settings.probe).await {
                warn!(addr = %self.client.addr(), "Device did not come back");
                return Err(err);
            }
            attempt += 1;
        }
    }

    fn broadcast_progress(
        &self,
        step: usize,
        phase: ImportPhase,
        metric: Option<&str>,
        chunk: ChunkWindow,
    ) {
        self.broadcaster.broadcast(&ProgressEvent::Progress {
            step,
            total: self.job.total_steps,
            metric: metric.map(str::to_string),
            chunk,
            phase,
        });
    }
}

fn device_time(at: NaiveDateTime) -> Value {
    Value::String(at.format(DEVICE_TIME_FORMAT).to_string())
}

/// `start`/`end` arguments shared by both tools
fn window_arguments(chunk: &ChunkWindow) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("start".to_string(), device_time(chunk.start));
    arguments.insert("end".to_string(), device_time(chunk.end));
    arguments
}
