//! Replay lineage
//!
//! A replay re-runs a prior execution under a fresh execution ID.
//! Orchestrating the re-run is the engine's job; the ledger's part is to
//! record where the new execution came from, as the first event of its
//! stream, and to answer "is this execution a replay?" later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::event::{EventType, ExecutionEvent};
use crate::ledger::{EventLedger, LedgerError};

/// How faithfully a replay follows the original execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Re-run with the original inputs
    #[default]
    Exact,
    /// Re-run with caller-modified inputs
    Modified,
}

impl std::fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// Where a replayed execution came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayLineage {
    /// The replayed (new) execution
    pub execution_id: Uuid,
    /// The execution it was replayed from
    pub original_execution_id: Uuid,
    pub mode: ReplayMode,
    pub recorded_at: DateTime<Utc>,
}

/// Mark `new_execution_id` as a replay of `original_execution_id`
///
/// Appends the lineage event to the new execution's stream and returns it.
/// Fails with [`LedgerError::ExecutionNotFound`] if the original execution
/// has no events, since there is nothing to replay.
pub async fn record_replay<L: EventLedger>(
    ledger: &L,
    original_execution_id: Uuid,
    new_execution_id: Uuid,
    mode: ReplayMode,
) -> Result<ExecutionEvent, LedgerError> {
    let original = ledger.get_events(original_execution_id).await?;
    if original.is_empty() {
        return Err(LedgerError::ExecutionNotFound(original_execution_id));
    }

    ledger
        .append(
            new_execution_id,
            EventType::ExecutionReplay,
            json!({
                "original_execution_id": original_execution_id.to_string(),
                "mode": mode,
                "type": "replay",
            }),
        )
        .await
}

/// Look up the replay lineage of an execution, if it is a replay
///
/// Scans the execution's replay events in order and returns the first one
/// naming a valid original execution; `None` for executions that were not
/// replayed. A missing or unrecognized mode falls back to
/// [`ReplayMode::Exact`].
pub async fn replay_lineage<L: EventLedger>(
    ledger: &L,
    execution_id: Uuid,
) -> Result<Option<ReplayLineage>, LedgerError> {
    let events = ledger
        .get_events_of_type(execution_id, EventType::ExecutionReplay)
        .await?;

    for ev in events {
        let original = ev
            .data
            .get("original_execution_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok());
        if let Some(original_execution_id) = original {
            return Ok(Some(ReplayLineage {
                execution_id,
                original_execution_id,
                mode: mode_from(&ev.data),
                recorded_at: ev.created_at,
            }));
        }
    }

    Ok(None)
}

fn mode_from(data: &Value) -> ReplayMode {
    data.get("mode")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryEventLedger;

    async fn seed_original(ledger: &InMemoryEventLedger) -> Uuid {
        let id = Uuid::now_v7();
        ledger
            .append(
                id,
                EventType::ExecutionStarted,
                json!({"pipeline": "orders"}),
            )
            .await
            .unwrap();
        ledger
            .append(id, EventType::ExecutionCompleted, json!({}))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_record_replay_appends_lineage_event() {
        let ledger = InMemoryEventLedger::new();
        let original = seed_original(&ledger).await;
        let replayed = Uuid::now_v7();

        let ev = record_replay(&ledger, original, replayed, ReplayMode::Modified)
            .await
            .unwrap();

        assert_eq!(ev.execution_id, replayed);
        assert_eq!(ev.sequence_num, 1);
        assert_eq!(ev.event_type, EventType::ExecutionReplay);
        assert_eq!(
            ev.data.get("original_execution_id"),
            Some(&json!(original.to_string()))
        );
        assert_eq!(ev.data.get("mode"), Some(&json!("modified")));
    }

    #[tokio::test]
    async fn test_record_replay_requires_existing_original() {
        let ledger = InMemoryEventLedger::new();
        let missing = Uuid::now_v7();

        let err = record_replay(&ledger, missing, Uuid::now_v7(), ReplayMode::Exact)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ExecutionNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_replay_lineage_round_trip() {
        let ledger = InMemoryEventLedger::new();
        let original = seed_original(&ledger).await;
        let replayed = Uuid::now_v7();

        record_replay(&ledger, original, replayed, ReplayMode::Exact)
            .await
            .unwrap();

        let lineage = replay_lineage(&ledger, replayed).await.unwrap().unwrap();
        assert_eq!(lineage.execution_id, replayed);
        assert_eq!(lineage.original_execution_id, original);
        assert_eq!(lineage.mode, ReplayMode::Exact);

        // The original execution is not itself a replay
        assert!(replay_lineage(&ledger, original).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_lineage_defaults_to_exact_mode() {
        let ledger = InMemoryEventLedger::new();
        let original = Uuid::now_v7();
        let replayed = Uuid::now_v7();

        // Lineage event written without a mode
        ledger
            .append(
                replayed,
                EventType::ExecutionReplay,
                json!({"original_execution_id": original.to_string()}),
            )
            .await
            .unwrap();

        let lineage = replay_lineage(&ledger, replayed).await.unwrap().unwrap();
        assert_eq!(lineage.mode, ReplayMode::Exact);
    }

    #[tokio::test]
    async fn test_replay_lineage_skips_malformed_events() {
        let ledger = InMemoryEventLedger::new();
        let original = Uuid::now_v7();
        let replayed = Uuid::now_v7();

        ledger
            .append(
                replayed,
                EventType::ExecutionReplay,
                json!({"original_execution_id": "not-a-uuid"}),
            )
            .await
            .unwrap();
        ledger
            .append(
                replayed,
                EventType::ExecutionReplay,
                json!({"original_execution_id": original.to_string(), "mode": "modified"}),
            )
            .await
            .unwrap();

        let lineage = replay_lineage(&ledger, replayed).await.unwrap().unwrap();
        assert_eq!(lineage.original_execution_id, original);
        assert_eq!(lineage.mode, ReplayMode::Modified);
    }

    #[test]
    fn test_replay_mode_serde() {
        assert_eq!(serde_json::to_value(ReplayMode::Exact).unwrap(), json!("exact"));
        assert_eq!(
            serde_json::to_value(ReplayMode::Modified).unwrap(),
            json!("modified")
        );
        assert_eq!(ReplayMode::Modified.to_string(), "modified");
    }
}
