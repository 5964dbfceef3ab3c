//! Execution event vocabulary and the persisted event record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of an execution event
///
/// The known vocabulary covers execution and step lifecycle, conditional
/// routing, retries and saga compensation. Event types outside the vocabulary
/// are preserved verbatim in [`EventType::Other`]: the ledger stores them and
/// the materializer replays them as no-ops, so producers can introduce new
/// types without breaking older readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    // =========================================================================
    // Execution Lifecycle
    // =========================================================================
    /// Execution began; payload may carry `pipeline` and `tenant_id`
    ExecutionStarted,

    /// Execution finished successfully
    ExecutionCompleted,

    /// Execution failed; payload may carry `error`
    ExecutionFailed,

    /// Execution was cancelled
    ExecutionCancelled,

    /// Execution is a replay of another; payload carries
    /// `original_execution_id` and `mode`
    ExecutionReplay,

    // =========================================================================
    // Step Lifecycle
    // =========================================================================
    /// Step began; payload carries `step_name` and optionally `step_type`
    StepStarted,

    /// Step input captured; payload carries `step_name` and `input`
    StepInputRecorded,

    /// Step output captured; payload carries `step_name` and `output`
    StepOutputRecorded,

    /// Step finished successfully; payload carries `step_name`
    StepCompleted,

    /// Step failed; payload carries `step_name` and optionally `error`
    StepFailed,

    /// Step was skipped without running; payload carries `step_name` and
    /// optionally `reason`
    StepSkipped,

    /// Step's effects were rolled back during saga compensation
    StepCompensated,

    // =========================================================================
    // Control Flow
    // =========================================================================
    /// Conditional chose a branch; payload carries `step_name` and `route`
    ConditionalRouted,

    /// Step retry began; payload carries `step_name`
    RetryAttempted,

    /// Saga rollback phase began
    SagaCompensating,

    /// Saga rollback phase finished
    SagaCompensated,

    /// Any event type outside the known vocabulary, preserved verbatim
    Other(String),
}

impl EventType {
    /// The wire name of this event type, e.g. `"execution.started"`
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExecutionStarted => "execution.started",
            Self::ExecutionCompleted => "execution.completed",
            Self::ExecutionFailed => "execution.failed",
            Self::ExecutionCancelled => "execution.cancelled",
            Self::ExecutionReplay => "execution.replay",
            Self::StepStarted => "step.started",
            Self::StepInputRecorded => "step.input_recorded",
            Self::StepOutputRecorded => "step.output_recorded",
            Self::StepCompleted => "step.completed",
            Self::StepFailed => "step.failed",
            Self::StepSkipped => "step.skipped",
            Self::StepCompensated => "step.compensated",
            Self::ConditionalRouted => "conditional.routed",
            Self::RetryAttempted => "retry.attempted",
            Self::SagaCompensating => "saga.compensating",
            Self::SagaCompensated => "saga.compensated",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "execution.started" => Self::ExecutionStarted,
            "execution.completed" => Self::ExecutionCompleted,
            "execution.failed" => Self::ExecutionFailed,
            "execution.cancelled" => Self::ExecutionCancelled,
            "execution.replay" => Self::ExecutionReplay,
            "step.started" => Self::StepStarted,
            "step.input_recorded" => Self::StepInputRecorded,
            "step.output_recorded" => Self::StepOutputRecorded,
            "step.completed" => Self::StepCompleted,
            "step.failed" => Self::StepFailed,
            "step.skipped" => Self::StepSkipped,
            "step.compensated" => Self::StepCompensated,
            "conditional.routed" => Self::ConditionalRouted,
            "retry.attempted" => Self::RetryAttempted,
            "saga.compensating" => Self::SagaCompensating,
            "saga.compensated" => Self::SagaCompensated,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match Self::from(s.as_str()) {
            // Reuse the owned string instead of cloning it
            Self::Other(_) => Self::Other(s),
            known => known,
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        match t {
            EventType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable event in an execution's append-only log
///
/// Events are the storage unit of the ledger. All fields except `data` are
/// assigned by the ledger at append time; callers supply only the execution
/// ID, the event type and the payload. Within one execution, `sequence_num`
/// is unique, contiguous and ascending from 1. Events are never updated or
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Unique event ID (UUIDv7, time-ordered)
    pub id: Uuid,

    /// The execution this event belongs to
    pub execution_id: Uuid,

    /// 1-based position in the execution's log
    pub sequence_num: i64,

    /// Event type from the vocabulary, or a pass-through unknown
    pub event_type: EventType,

    /// Open JSON payload; shape depends on the event type
    pub data: serde_json::Value,

    /// Assigned by the ledger when the event was appended
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names_round_trip() {
        let known = [
            EventType::ExecutionStarted,
            EventType::ExecutionCompleted,
            EventType::ExecutionFailed,
            EventType::ExecutionCancelled,
            EventType::ExecutionReplay,
            EventType::StepStarted,
            EventType::StepInputRecorded,
            EventType::StepOutputRecorded,
            EventType::StepCompleted,
            EventType::StepFailed,
            EventType::StepSkipped,
            EventType::StepCompensated,
            EventType::ConditionalRouted,
            EventType::RetryAttempted,
            EventType::SagaCompensating,
            EventType::SagaCompensated,
        ];

        for t in known {
            let name = t.as_str().to_string();
            assert_eq!(EventType::from(name), t);
        }
    }

    #[test]
    fn test_event_type_serde_uses_wire_name() {
        let json = serde_json::to_string(&EventType::StepInputRecorded).unwrap();
        assert_eq!(json, "\"step.input_recorded\"");

        let parsed: EventType = serde_json::from_str("\"saga.compensating\"").unwrap();
        assert_eq!(parsed, EventType::SagaCompensating);
    }

    #[test]
    fn test_unknown_event_type_is_preserved() {
        let parsed: EventType = serde_json::from_str("\"custom.signal\"").unwrap();
        assert_eq!(parsed, EventType::Other("custom.signal".to_string()));
        assert_eq!(parsed.as_str(), "custom.signal");

        let back = serde_json::to_string(&parsed).unwrap();
        assert_eq!(back, "\"custom.signal\"");
    }

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(EventType::ExecutionStarted.to_string(), "execution.started");
        assert_eq!(
            EventType::Other("x.y".to_string()).to_string(),
            "x.y"
        );
    }
}
