//! Integration tests for SqliteEventLedger
//!
//! Run with: cargo test -p pipewright-ledger --test sqlite_integration_test
//!
//! Each test opens its own private in-memory database, so no external
//! services or cleanup are needed. Set RUST_LOG to see ledger tracing.

use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pipewright_ledger::{
    record_replay, replay_lineage, DiffCalculator, EventLedger, EventType, ExecutionFilter,
    ExecutionStatus, LedgerError, ReplayMode, SqliteEventLedger, StepStatus,
};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pipewright_ledger=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}

/// Create a ledger backed by a fresh in-memory database
async fn create_test_ledger() -> SqliteEventLedger {
    init_tracing();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite database");
    let ledger = SqliteEventLedger::new(pool);
    ledger
        .ensure_schema()
        .await
        .expect("Failed to create schema");
    ledger
}

// ============================================================
// Append and read back
// ============================================================

#[tokio::test]
async fn test_append_and_get_events_round_trip() {
    let ledger = create_test_ledger().await;
    let execution_id = Uuid::now_v7();

    let payload = json!({
        "pipeline": "orders",
        "tenant_id": "acme",
        "config": {"retries": 3, "tags": ["a", "b"]},
    });
    let stored = ledger
        .append(execution_id, EventType::ExecutionStarted, payload.clone())
        .await
        .expect("Failed to append event");

    assert_eq!(stored.execution_id, execution_id);
    assert_eq!(stored.sequence_num, 1);
    assert_eq!(stored.event_type, EventType::ExecutionStarted);
    assert_eq!(stored.data, payload);

    let events = ledger
        .get_events(execution_id)
        .await
        .expect("Failed to load events");
    assert_eq!(events.len(), 1);

    // The TEXT column codec preserves every field exactly
    assert_eq!(events[0], stored);
}

#[tokio::test]
async fn test_sequences_are_gapless_and_independent() {
    let ledger = create_test_ledger().await;
    let exec_a = Uuid::now_v7();
    let exec_b = Uuid::now_v7();

    for i in 0..4 {
        let ev = ledger
            .append(exec_a, EventType::StepStarted, json!({"i": i}))
            .await
            .expect("Failed to append");
        assert_eq!(ev.sequence_num, i + 1);
    }
    let first_b = ledger
        .append(exec_b, EventType::ExecutionStarted, json!({}))
        .await
        .expect("Failed to append");
    assert_eq!(first_b.sequence_num, 1);

    let events = ledger.get_events(exec_a).await.expect("Failed to load");
    let seqs: Vec<i64> = events.iter().map(|e| e.sequence_num).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_get_events_unknown_execution_is_empty() {
    let ledger = create_test_ledger().await;

    let events = ledger
        .get_events(Uuid::now_v7())
        .await
        .expect("Failed to load");
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_unknown_event_types_round_trip() {
    let ledger = create_test_ledger().await;
    let execution_id = Uuid::now_v7();

    ledger
        .append(
            execution_id,
            EventType::from("custom.audit"),
            json!({"who": "ops"}),
        )
        .await
        .expect("Failed to append");

    let events = ledger.get_events(execution_id).await.expect("Failed to load");
    assert_eq!(events[0].event_type, EventType::Other("custom.audit".to_string()));
}

#[tokio::test]
async fn test_concurrent_appends_stay_ordered() {
    let ledger = Arc::new(create_test_ledger().await);
    let execution_id = Uuid::now_v7();

    let writer = |tag: &'static str| {
        let ledger = Arc::clone(&ledger);
        async move {
            for i in 0..10 {
                ledger
                    .append(
                        execution_id,
                        EventType::StepStarted,
                        json!({"writer": tag, "i": i}),
                    )
                    .await
                    .expect("Failed to append");
            }
        }
    };

    tokio::join!(writer("a"), writer("b"), writer("c"));

    let events = ledger.get_events(execution_id).await.expect("Failed to load");
    assert_eq!(events.len(), 30);
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(ev.sequence_num, i as i64 + 1);
    }
}

// ============================================================
// Derived reads
// ============================================================

#[tokio::test]
async fn test_get_timeline_materializes_full_lifecycle() {
    let ledger = create_test_ledger().await;
    let execution_id = Uuid::now_v7();

    ledger
        .append(
            execution_id,
            EventType::ExecutionStarted,
            json!({"pipeline": "orders", "tenant_id": "acme"}),
        )
        .await
        .expect("Failed to append");
    ledger
        .append(
            execution_id,
            EventType::StepStarted,
            json!({"step_name": "validate", "step_type": "http"}),
        )
        .await
        .expect("Failed to append");
    ledger
        .append(
            execution_id,
            EventType::StepOutputRecorded,
            json!({"step_name": "validate", "output": {"valid": true}}),
        )
        .await
        .expect("Failed to append");
    ledger
        .append(
            execution_id,
            EventType::StepCompleted,
            json!({"step_name": "validate"}),
        )
        .await
        .expect("Failed to append");
    ledger
        .append(execution_id, EventType::ExecutionCompleted, json!({}))
        .await
        .expect("Failed to append");

    let timeline = ledger
        .get_timeline(execution_id)
        .await
        .expect("Failed to materialize");

    assert_eq!(timeline.status, ExecutionStatus::Completed);
    assert_eq!(timeline.pipeline.as_deref(), Some("orders"));
    assert_eq!(timeline.tenant_id.as_deref(), Some("acme"));
    assert_eq!(timeline.event_count, 5);
    assert!(timeline.started_at.is_some());
    assert!(timeline.completed_at >= timeline.started_at);

    assert_eq!(timeline.steps.len(), 1);
    let step = &timeline.steps[0];
    assert_eq!(step.step_name, "validate");
    assert_eq!(step.step_type.as_deref(), Some("http"));
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.output_data, Some(json!({"valid": true})));
}

#[tokio::test]
async fn test_get_timeline_unknown_execution_not_found() {
    let ledger = create_test_ledger().await;
    let missing = Uuid::now_v7();

    let err = ledger.get_timeline(missing).await.unwrap_err();
    assert!(matches!(err, LedgerError::ExecutionNotFound(id) if id == missing));
}

#[tokio::test]
async fn test_list_executions_filters_and_pagination() {
    let ledger = create_test_ledger().await;

    let mut seeded = Vec::new();
    for (pipeline, tenant, complete) in [
        ("orders", "t1", true),
        ("orders", "t2", false),
        ("billing", "t1", true),
    ] {
        let id = Uuid::now_v7();
        ledger
            .append(
                id,
                EventType::ExecutionStarted,
                json!({"pipeline": pipeline, "tenant_id": tenant}),
            )
            .await
            .expect("Failed to append");
        if complete {
            ledger
                .append(id, EventType::ExecutionCompleted, json!({}))
                .await
                .expect("Failed to append");
        }
        seeded.push(id);
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let all = ledger
        .list_executions(ExecutionFilter::default())
        .await
        .expect("Failed to list");
    assert_eq!(all.len(), 3);
    // Newest first
    assert_eq!(all[0].execution_id, seeded[2]);

    let orders = ledger
        .list_executions(ExecutionFilter {
            pipeline: Some("orders".to_string()),
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(orders.len(), 2);

    let running = ledger
        .list_executions(ExecutionFilter {
            status: Some(ExecutionStatus::Running),
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].execution_id, seeded[1]);

    let page = ledger
        .list_executions(ExecutionFilter {
            offset: 1,
            limit: 1,
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].execution_id, seeded[1]);
}

#[tokio::test]
async fn test_list_executions_time_bounds() {
    let ledger = create_test_ledger().await;

    let early = Uuid::now_v7();
    ledger
        .append(early, EventType::ExecutionStarted, json!({"pipeline": "p"}))
        .await
        .expect("Failed to append");

    tokio::time::sleep(Duration::from_millis(10)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let late = Uuid::now_v7();
    ledger
        .append(late, EventType::ExecutionStarted, json!({"pipeline": "p"}))
        .await
        .expect("Failed to append");

    let since = ledger
        .list_executions(ExecutionFilter {
            since: Some(cutoff),
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].execution_id, late);

    let until = ledger
        .list_executions(ExecutionFilter {
            until: Some(cutoff),
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(until.len(), 1);
    assert_eq!(until[0].execution_id, early);
}

#[tokio::test]
async fn test_get_events_of_type() {
    let ledger = create_test_ledger().await;
    let execution_id = Uuid::now_v7();

    ledger
        .append(execution_id, EventType::ExecutionStarted, json!({}))
        .await
        .expect("Failed to append");
    for step in ["a", "b"] {
        ledger
            .append(
                execution_id,
                EventType::StepStarted,
                json!({"step_name": step}),
            )
            .await
            .expect("Failed to append");
    }

    let started = ledger
        .get_events_of_type(execution_id, EventType::StepStarted)
        .await
        .expect("Failed to load");
    assert_eq!(started.len(), 2);
    assert!(started.iter().all(|e| e.event_type == EventType::StepStarted));
}

// ============================================================
// Diff and replay through the SQL backend
// ============================================================

#[tokio::test]
async fn test_compare_executions() {
    let ledger = Arc::new(create_test_ledger().await);

    let mut ids = Vec::new();
    for score in [95, 30] {
        let id = Uuid::now_v7();
        ledger
            .append(id, EventType::ExecutionStarted, json!({"pipeline": "p"}))
            .await
            .expect("Failed to append");
        ledger
            .append(id, EventType::StepStarted, json!({"step_name": "validate"}))
            .await
            .expect("Failed to append");
        ledger
            .append(
                id,
                EventType::StepOutputRecorded,
                json!({"step_name": "validate", "output": {"score": score}}),
            )
            .await
            .expect("Failed to append");
        ledger
            .append(
                id,
                EventType::StepCompleted,
                json!({"step_name": "validate"}),
            )
            .await
            .expect("Failed to append");
        ids.push(id);
    }

    let calc = DiffCalculator::new(Arc::clone(&ledger));
    let diff = calc.compare(ids[0], ids[1]).await.expect("Failed to compare");

    assert_eq!(diff.summary.total_steps, 1);
    assert_eq!(diff.summary.diff_steps, 1);
    assert_eq!(diff.step_diffs[0].changes.len(), 1);
    assert_eq!(diff.step_diffs[0].changes[0].path, "score");
}

#[tokio::test]
async fn test_replay_lineage_round_trip() {
    let ledger = create_test_ledger().await;

    let original = Uuid::now_v7();
    ledger
        .append(original, EventType::ExecutionStarted, json!({"pipeline": "p"}))
        .await
        .expect("Failed to append");

    let replayed = Uuid::now_v7();
    record_replay(&ledger, original, replayed, ReplayMode::Modified)
        .await
        .expect("Failed to record replay");

    let lineage = replay_lineage(&ledger, replayed)
        .await
        .expect("Failed to look up lineage")
        .expect("Expected lineage");
    assert_eq!(lineage.original_execution_id, original);
    assert_eq!(lineage.mode, ReplayMode::Modified);

    let none = replay_lineage(&ledger, original)
        .await
        .expect("Failed to look up lineage");
    assert!(none.is_none());
}

#[tokio::test]
async fn test_execution_ids_are_distinct() {
    let ledger = create_test_ledger().await;
    let exec_a = Uuid::now_v7();
    let exec_b = Uuid::now_v7();

    for id in [exec_a, exec_a, exec_b] {
        ledger
            .append(id, EventType::StepStarted, json!({"step_name": "s"}))
            .await
            .expect("Failed to append");
    }

    let mut ids = ledger.execution_ids().await.expect("Failed to list");
    ids.sort();
    let mut expected = vec![exec_a, exec_b];
    expected.sort();
    assert_eq!(ids, expected);
}
