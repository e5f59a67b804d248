//! End-to-end import runs against a scripted device
//!
//! Window 2025-01-01 ..= 2025-01-09 with 7-day chunks gives 2 chunks; with
//! two metrics the advisory total is 2 × 2 + 2 = 6 steps.

mod helpers;

use helpers::fake_device::{unused_port, FakeDevice, Reply};
use helpers::{manager, request, test_db, wait_for_progress, wait_for_terminal, RecordingSink};
use hfx_common::events::{JobStatus, ProgressEvent, RunOutcome};
use hfx_importer::db::import_runs;
use hfx_importer::models::AuditStatus;
use hfx_importer::services::{DiscardingSink, StartError};
use std::sync::Arc;
use std::time::Duration;

const TOTAL_STEPS: usize = 6;

#[tokio::test]
async fn test_successful_import_walks_metrics_then_workouts() {
    let device = FakeDevice::always(Reply::records(2)).await;
    let db = test_db().await;
    let sink = Arc::new(RecordingSink::default());
    let imports = manager(db.clone(), sink.clone());
    let (snapshot, mut events) = imports.subscribe().await;
    assert_eq!(snapshot.status, JobStatus::Idle);

    let started = imports.start(request(device.port, false)).await.unwrap();
    assert_eq!(started.total_steps, TOTAL_STEPS);
    assert_eq!(started.chunks_per_series, 2);

    // Collect progress until the terminal event
    let mut steps = Vec::new();
    let terminal = loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ProgressEvent::Progress { step, total, .. } => {
                assert_eq!(total, TOTAL_STEPS);
                steps.push(step);
            }
            event if event.is_terminal() => break event,
            _ => {}
        }
    };
    assert_eq!(steps, vec![1, 2, 3, 4, 5, 6]);
    match terminal {
        ProgressEvent::Complete { outcome, counters, error, .. } => {
            assert_eq!(outcome, RunOutcome::Success);
            assert_eq!(counters.metrics_received, 8);
            assert_eq!(counters.workouts_received, 4);
            assert_eq!(counters.metrics_inserted, 8);
            assert_eq!(counters.workouts_inserted, 4);
            assert_eq!(counters.chunks_skipped, 0);
            assert!(counters.bytes_fetched > 0);
            assert!(error.is_none());
        }
        other => panic!("expected complete, got {other:?}"),
    }

    // Metrics first (each metric over every chunk), then workouts
    let calls = device.calls();
    let order: Vec<(String, Option<String>, String)> = calls
        .iter()
        .map(|c| (c.tool.clone(), c.metric().map(str::to_string), c.start().to_string()))
        .collect();
    let metric = |name: &str, start: &str| {
        ("health_metrics".to_string(), Some(name.to_string()), start.to_string())
    };
    let workouts = |start: &str| ("workouts".to_string(), None, start.to_string());
    assert_eq!(
        order,
        vec![
            metric("step_count", "2025-01-01T00:00:00"),
            metric("step_count", "2025-01-08T00:00:00"),
            metric("heart_rate", "2025-01-01T00:00:00"),
            metric("heart_rate", "2025-01-08T00:00:00"),
            workouts("2025-01-01T00:00:00"),
            workouts("2025-01-08T00:00:00"),
        ]
    );
    assert_eq!(calls[1].arguments["end"], "2025-01-10T00:00:00");
    assert_eq!(calls[0].arguments["aggregate"], true);
    assert_eq!(calls[2].arguments["aggregate"], false);

    assert_eq!(sink.writes(), 6);
    assert!(sink.users().iter().all(|u| u == "alice"));

    let status = imports.status().await;
    assert_eq!(status.status, JobStatus::Done(RunOutcome::Success));
    assert!(!status.running);
    assert_eq!(status.step, TOTAL_STEPS);

    let record = import_runs::load_run(&db, started.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Success);
    assert_eq!(record.counters.metrics_received, 8);
    assert!(record.ended_at.is_some());
}

#[tokio::test]
async fn test_dry_run_fetches_but_never_writes() {
    let device = FakeDevice::always(Reply::records(3)).await;
    let db = test_db().await;
    let sink = Arc::new(RecordingSink::default());
    let imports = manager(db.clone(), sink.clone());
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, true)).await.unwrap();
    wait_for_terminal(&mut events, started.run_id).await;

    assert_eq!(sink.writes(), 0);
    let status = imports.status().await;
    assert!(status.dry_run);
    assert_eq!(status.counters.metrics_received, 12);
    assert_eq!(status.counters.workouts_received, 6);
    assert_eq!(status.counters.total_inserted(), 0);
    assert_eq!(status.step, TOTAL_STEPS);

    let record = import_runs::load_run(&db, started.run_id).await.unwrap().unwrap();
    assert!(record.dry_run);
    assert_eq!(record.status, AuditStatus::Success);
}

#[tokio::test]
async fn test_null_result_is_no_data_not_a_failure() {
    let device = FakeDevice::always(Reply::null()).await;
    let db = test_db().await;
    let sink = Arc::new(RecordingSink::default());
    let imports = manager(db, sink.clone());
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    wait_for_terminal(&mut events, started.run_id).await;

    let status = imports.status().await;
    assert_eq!(status.status, JobStatus::Done(RunOutcome::Success));
    assert_eq!(status.counters.total_received(), 0);
    assert_eq!(status.counters.chunks_skipped, 0);
    assert_eq!(status.step, TOTAL_STEPS);
    assert_eq!(device.call_count(), TOTAL_STEPS);
    assert_eq!(sink.writes(), 0);
}

#[tokio::test]
async fn test_failing_metric_is_skipped_and_import_continues() {
    let device = FakeDevice::start(|call, _| {
        if call.metric() == Some("heart_rate") {
            Reply::error("metric unavailable")
        } else {
            Reply::records(2)
        }
    })
    .await;
    let db = test_db().await;
    let imports = manager(db.clone(), Arc::new(RecordingSink::default()));
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    let terminal = wait_for_terminal(&mut events, started.run_id).await;
    assert!(matches!(
        terminal,
        ProgressEvent::Complete { outcome: RunOutcome::Success, .. }
    ));

    // Two attempts per failing chunk
    let heart_rate_calls = device
        .calls()
        .iter()
        .filter(|c| c.metric() == Some("heart_rate"))
        .count();
    assert_eq!(heart_rate_calls, 4);

    let status = imports.status().await;
    assert_eq!(status.step, TOTAL_STEPS);
    assert_eq!(status.counters.chunks_skipped, 2);
    assert_eq!(status.counters.metrics_received, 4);
    assert_eq!(status.counters.workouts_received, 4);
    let last_error = status.last_error.unwrap();
    assert!(last_error.contains("heart_rate"), "{last_error}");
    assert!(last_error.contains("metric unavailable"), "{last_error}");

    let record = import_runs::load_run(&db, started.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Success);
    assert_eq!(record.counters.chunks_skipped, 2);
}

#[tokio::test]
async fn test_empty_response_is_retried_after_recovery() {
    let device = FakeDevice::start(|_, index| {
        if index == 0 {
            Reply::Empty
        } else {
            Reply::records(1)
        }
    })
    .await;
    let db = test_db().await;
    let imports = manager(db, Arc::new(RecordingSink::default()));
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    wait_for_terminal(&mut events, started.run_id).await;

    let calls = device.calls();
    assert_eq!(calls.len(), TOTAL_STEPS + 1);
    assert_eq!(calls[0].start(), calls[1].start());
    assert_eq!(calls[0].metric(), calls[1].metric());

    let status = imports.status().await;
    assert_eq!(status.counters.chunks_skipped, 0);
    assert_eq!(status.counters.metrics_received, 4);
    assert_eq!(status.step, TOTAL_STEPS);
}

#[tokio::test]
async fn test_unreachable_device_skips_every_chunk() {
    let port = unused_port().await;
    let db = test_db().await;
    let imports = manager(db.clone(), Arc::new(DiscardingSink));
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(port, false)).await.unwrap();
    wait_for_terminal(&mut events, started.run_id).await;

    let status = imports.status().await;
    assert_eq!(status.status, JobStatus::Done(RunOutcome::Success));
    assert_eq!(status.counters.chunks_skipped, TOTAL_STEPS as u64);
    assert_eq!(status.step, TOTAL_STEPS);
    assert!(status.last_error.is_some());

    let record = import_runs::load_run(&db, started.run_id).await.unwrap().unwrap();
    assert_ne!(record.status, AuditStatus::Running);
}

#[tokio::test]
async fn test_sink_failure_skips_chunk() {
    let device = FakeDevice::always(Reply::records(2)).await;
    let db = test_db().await;
    let sink = Arc::new(RecordingSink::failing());
    let imports = manager(db, sink.clone());
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    wait_for_terminal(&mut events, started.run_id).await;

    let status = imports.status().await;
    assert_eq!(sink.writes(), TOTAL_STEPS);
    assert_eq!(status.counters.chunks_skipped, TOTAL_STEPS as u64);
    assert_eq!(status.counters.total_inserted(), 0);
    assert!(status.last_error.unwrap().contains("sink offline"));
}

#[tokio::test]
async fn test_cancel_stops_after_in_flight_chunk() {
    let device = FakeDevice::always(Reply::Delayed(
        Duration::from_millis(100),
        serde_json::json!([{"v": 1}]),
    ))
    .await;
    let db = test_db().await;
    let imports = manager(db.clone(), Arc::new(RecordingSink::default()));
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    wait_for_progress(&mut events).await;

    let first = imports.cancel().await;
    assert!(first.cancel_requested);
    assert_eq!(first.status, JobStatus::Cancelling);

    // Repeated cancel is a no-op
    let second = imports.cancel().await;
    assert!(!second.cancel_requested);

    let terminal = wait_for_terminal(&mut events, started.run_id).await;
    match terminal {
        ProgressEvent::Complete { outcome, error, .. } => {
            assert_eq!(outcome, RunOutcome::Cancelled);
            assert_eq!(error.as_deref(), Some("cancelled by user"));
        }
        other => panic!("expected complete, got {other:?}"),
    }

    let status = imports.status().await;
    assert_eq!(status.status, JobStatus::Done(RunOutcome::Cancelled));
    assert!(status.step < TOTAL_STEPS);
    // Every request sent was completed and counted, none after the cancel
    assert_eq!(status.step, device.call_count());

    let record = import_runs::load_run(&db, started.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Cancelled);
    assert_eq!(record.error.as_deref(), Some("cancelled by user"));

    // Cancel after Done is still a no-op
    let after = imports.cancel().await;
    assert!(!after.cancel_requested);
    assert_eq!(after.status, JobStatus::Done(RunOutcome::Cancelled));
}

#[tokio::test]
async fn test_second_start_while_running_conflicts() {
    let device = FakeDevice::always(Reply::Delayed(
        Duration::from_millis(100),
        serde_json::json!([]),
    ))
    .await;
    let db = test_db().await;
    let imports = manager(db.clone(), Arc::new(RecordingSink::default()));
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    match imports.start(request(device.port, false)).await {
        Err(StartError::Conflict { run_id, status }) => {
            assert_eq!(run_id, started.run_id);
            assert_eq!(status, JobStatus::Running);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    imports.cancel().await;
    wait_for_terminal(&mut events, started.run_id).await;

    // Only the first start opened an audit record
    assert_eq!(import_runs::list_runs(&db, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_waits_for_cancelling_job() {
    let device = FakeDevice::always(Reply::Delayed(
        Duration::from_millis(200),
        serde_json::json!([]),
    ))
    .await;
    let db = test_db().await;
    let imports = manager(db.clone(), Arc::new(RecordingSink::default()));
    let (_, mut events) = imports.subscribe().await;

    let first = imports.start(request(device.port, false)).await.unwrap();
    assert!(imports.cancel().await.cancel_requested);

    // The first job is Cancelling with a request in flight; the new start
    // waits for it to finish instead of failing
    let second = imports.start(request(device.port, false)).await.unwrap();
    assert_ne!(first.run_id, second.run_id);

    let record = import_runs::load_run(&db, first.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Cancelled);

    imports.cancel().await;
    wait_for_terminal(&mut events, second.run_id).await;

    let runs = import_runs::list_runs(&db, 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status != AuditStatus::Running));
}

#[tokio::test]
async fn test_empty_results_never_reach_the_sink() {
    let device = FakeDevice::start(|call, _| {
        if call.tool == "workouts" {
            Reply::Result(serde_json::json!({}))
        } else {
            Reply::Result(serde_json::json!([]))
        }
    })
    .await;
    let db = test_db().await;
    let sink = Arc::new(RecordingSink::default());
    let imports = manager(db, sink.clone());
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    let terminal = wait_for_terminal(&mut events, started.run_id).await;
    assert!(matches!(
        terminal,
        ProgressEvent::Complete { outcome: RunOutcome::Success, error: None, .. }
    ));

    assert_eq!(sink.writes(), 0);
    let status = imports.status().await;
    assert_eq!(status.step, TOTAL_STEPS);
    assert_eq!(status.counters.total_received(), 0);
    assert_eq!(status.counters.chunks_skipped, 0);
    assert!(status.last_error.is_none());
    assert!(status.counters.bytes_fetched > 0);
}

#[tokio::test]
async fn test_cancel_during_final_chunk_ends_cancelled() {
    let device = FakeDevice::start(|_, index| {
        if index == TOTAL_STEPS - 1 {
            Reply::Delayed(Duration::from_millis(300), serde_json::json!([{"v": 1}]))
        } else {
            Reply::records(1)
        }
    })
    .await;
    let db = test_db().await;
    let imports = manager(db.clone(), Arc::new(RecordingSink::default()));
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Some(ProgressEvent::Progress { step, .. }) if step == TOTAL_STEPS - 1 => return,
                Some(_) => continue,
                None => panic!("broadcaster closed"),
            }
        }
    })
    .await
    .unwrap();

    let cancel = imports.cancel().await;
    assert!(cancel.cancel_requested);
    assert_eq!(cancel.status, JobStatus::Cancelling);

    match wait_for_terminal(&mut events, started.run_id).await {
        ProgressEvent::Complete { outcome, .. } => assert_eq!(outcome, RunOutcome::Cancelled),
        other => panic!("expected complete, got {other:?}"),
    }
    assert_eq!(imports.status().await.status, JobStatus::Done(RunOutcome::Cancelled));

    let record = import_runs::load_run(&db, started.run_id).await.unwrap().unwrap();
    assert_eq!(record.status, AuditStatus::Cancelled);
}

#[tokio::test]
async fn test_unwritable_audit_log_is_reported() {
    let device = FakeDevice::always(Reply::Delayed(
        Duration::from_millis(50),
        serde_json::json!([{"v": 1}]),
    ))
    .await;
    let db = test_db().await;
    let imports = manager(db.clone(), Arc::new(RecordingSink::default()));
    let (_, mut events) = imports.subscribe().await;

    let started = imports.start(request(device.port, false)).await.unwrap();
    sqlx::query("DROP TABLE import_runs").execute(&db).await.unwrap();

    match wait_for_terminal(&mut events, started.run_id).await {
        ProgressEvent::Complete { error, .. } => {
            let error = error.expect("terminal event should carry the audit failure");
            assert!(error.contains("audit log not closed"), "{error}");
        }
        other => panic!("expected complete, got {other:?}"),
    }

    let status = imports.status().await;
    assert!(status.status.is_done());
    assert!(status.last_error.unwrap().contains("audit log not closed"));
}
