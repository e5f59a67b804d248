//! In-memory import job state machine
//!
//! Idle → Running → Done(success) | Cancelling → Done(cancelled) | Done(error)
//!
//! All mutable fields sit behind one lock that is only held for the field
//! access itself, never across a network call.

use chrono::{DateTime, Utc};
use hfx_common::events::{
    ChunkWindow, ImportCounters, ImportPhase, ImportStatus, JobStatus, RunOutcome,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::ImportRequest;

/// Mutable job fields
#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    phase: Option<ImportPhase>,
    step: usize,
    current_metric: Option<String>,
    current_chunk: Option<ChunkWindow>,
    counters: ImportCounters,
    last_error: Option<String>,
    ended_at: Option<DateTime<Utc>>,
}

/// The single active (or most recently finished) import job
#[derive(Debug)]
pub struct ImportJob {
    pub run_id: Uuid,
    pub request: ImportRequest,
    /// Advisory step total for display
    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
    finalized: AtomicBool,
    done: watch::Sender<bool>,
    state: Mutex<JobState>,
}

impl ImportJob {
    /// Create a job in the Running state
    pub fn new(run_id: Uuid, request: ImportRequest, total_steps: usize) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            run_id,
            request,
            total_steps,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            finalized: AtomicBool::new(false),
            done,
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                phase: None,
                step: 0,
                current_metric: None,
                current_chunk: None,
                counters: ImportCounters::default(),
                last_error: None,
                ended_at: None,
            }),
        }
    }

    pub async fn status(&self) -> JobStatus {
        self.state.lock().await.status
    }

    pub async fn counters(&self) -> ImportCounters {
        self.state.lock().await.counters
    }

    /// Synthesize a point-in-time snapshot
    pub async fn snapshot(&self) -> ImportStatus {
        let state = self.state.lock().await.clone();
        ImportStatus {
            running: state.status.is_active(),
            status: state.status,
            run_id: Some(self.run_id),
            host: Some(self.request.host.clone()),
            port: Some(self.request.port),
            window: Some(self.request.window),
            dry_run: self.request.dry_run,
            phase: state.phase,
            step: state.step,
            total: self.total_steps,
            current_metric: state.current_metric,
            current_chunk: state.current_chunk,
            counters: state.counters,
            last_error: state.last_error,
            started_at: Some(self.started_at),
            ended_at: state.ended_at,
        }
    }

    /// Checked by the background task at the top of each chunk iteration
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Running → Cancelling, then raise the cancellation token
    ///
    /// Returns false (no-op) if the job is not Running.
    pub async fn request_cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status != JobStatus::Running {
            return false;
        }
        state.status = JobStatus::Cancelling;
        drop(state);
        self.cancel.cancel();
        true
    }

    pub async fn enter_phase(&self, phase: ImportPhase) {
        let mut state = self.state.lock().await;
        state.phase = Some(phase);
        state.current_metric = None;
        state.current_chunk = None;
    }

    /// Record the cursor before a chunk's network work starts
    pub async fn begin_chunk(&self, metric: Option<&str>, chunk: ChunkWindow) {
        let mut state = self.state.lock().await;
        state.current_metric = metric.map(str::to_string);
        state.current_chunk = Some(chunk);
    }

    /// Apply a chunk's counter changes and advance the step
    ///
    /// Returns the new step. Steps never exceed the advisory total.
    pub async fn complete_chunk(&self, apply: impl FnOnce(&mut ImportCounters)) -> usize {
        let mut state = self.state.lock().await;
        apply(&mut state.counters);
        state.step = (state.step + 1).min(self.total_steps);
        state.step
    }

    pub async fn record_error(&self, message: String) {
        self.state.lock().await.last_error = Some(message);
    }

    /// Claim the right to finalize; true for exactly one caller
    pub fn claim_finalization(&self) -> bool {
        !self.finalized.swap(true, Ordering::SeqCst)
    }

    /// Move to Done(outcome) and return the final snapshot
    pub async fn finish(&self, outcome: RunOutcome, error: Option<String>) -> ImportStatus {
        {
            let mut state = self.state.lock().await;
            state.status = JobStatus::Done(outcome);
            state.ended_at = Some(Utc::now());
            if error.is_some() {
                state.last_error = error;
            }
        }
        self.snapshot().await
    }

    /// Wake everyone waiting in [`ImportJob::wait_done`]
    pub fn signal_done(&self) {
        self.done.send_replace(true);
    }

    /// Wait up to `grace` for the job to be fully finalized
    pub async fn wait_done(&self, grace: Duration) -> bool {
        let mut rx = self.done.subscribe();
        let done = matches!(
            tokio::time::timeout(grace, rx.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn job(total_steps: usize) -> ImportJob {
        let request =
            ImportRequest::new("127.0.0.1", 9000, "2025-01-01", "2025-01-09", 7, false, "u")
                .unwrap();
        ImportJob::new(Uuid::new_v4(), request, total_steps)
    }

    #[tokio::test]
    async fn test_new_job_is_running() {
        let job = job(4);
        let snapshot = job.snapshot().await;
        assert!(snapshot.running);
        assert_eq!(snapshot.status, JobStatus::Running);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.step, 0);
    }

    #[tokio::test]
    async fn test_cancel_passes_through_cancelling_once() {
        let job = job(4);
        assert!(job.request_cancel().await);
        assert_eq!(job.status().await, JobStatus::Cancelling);
        assert!(job.is_cancel_requested());

        // Second request is a no-op
        assert!(!job.request_cancel().await);
        assert_eq!(job.status().await, JobStatus::Cancelling);

        let snapshot = job.finish(RunOutcome::Cancelled, Some("cancelled by user".into())).await;
        assert_eq!(snapshot.status, JobStatus::Done(RunOutcome::Cancelled));
        assert!(!snapshot.running);
        assert!(!job.request_cancel().await);
    }

    #[tokio::test]
    async fn test_step_is_bounded_by_total() {
        let job = job(2);
        assert_eq!(job.complete_chunk(|_| {}).await, 1);
        assert_eq!(job.complete_chunk(|_| {}).await, 2);
        assert_eq!(job.complete_chunk(|_| {}).await, 2);
    }

    #[tokio::test]
    async fn test_cursor_tracks_current_chunk() {
        let job = job(2);
        let start = job.request.window.start;
        let chunk = ChunkWindow::new(start, start + ChronoDuration::days(7));

        job.enter_phase(ImportPhase::Metrics).await;
        job.begin_chunk(Some("step_count"), chunk).await;

        let snapshot = job.snapshot().await;
        assert_eq!(snapshot.phase, Some(ImportPhase::Metrics));
        assert_eq!(snapshot.current_metric.as_deref(), Some("step_count"));
        assert_eq!(snapshot.current_chunk, Some(chunk));

        job.enter_phase(ImportPhase::Workouts).await;
        assert!(job.snapshot().await.current_metric.is_none());
    }

    #[tokio::test]
    async fn test_finalization_claimed_once() {
        let job = job(1);
        assert!(job.claim_finalization());
        assert!(!job.claim_finalization());
    }

    #[tokio::test]
    async fn test_wait_done_times_out_then_succeeds() {
        let job = job(1);
        assert!(!job.wait_done(Duration::from_millis(20)).await);
        job.signal_done();
        assert!(job.wait_done(Duration::from_millis(20)).await);
    }
}
