//! EventLedger trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::event::{EventType, ExecutionEvent};
use crate::materialize::{materialize, ExecutionStatus, MaterializedExecution};

/// Error type for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// No events exist for the requested execution
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Concurrent appends raced for the same sequence number and internal
    /// retries were exhausted; the caller may retry the append
    #[error("sequence conflict for execution {execution_id} after {attempts} attempts")]
    SerializationFailure { execution_id: Uuid, attempts: u32 },

    /// Event payload could not be encoded; nothing was written
    #[error("encode event payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),
}

/// Filter and pagination for listing materialized executions
///
/// Unset fields match everything; `Default` yields the full, unpaginated
/// listing. Time bounds are inclusive and apply to `started_at`, so
/// executions that never started are excluded by any set bound.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub pipeline: Option<String>,
    pub tenant_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,

    /// Results to skip from the front of the sorted listing
    pub offset: usize,

    /// Maximum results to return; 0 means unlimited
    pub limit: usize,
}

impl ExecutionFilter {
    fn matches(&self, m: &MaterializedExecution) -> bool {
        if let Some(pipeline) = &self.pipeline {
            if m.pipeline.as_deref() != Some(pipeline.as_str()) {
                return false;
            }
        }
        if let Some(tenant_id) = &self.tenant_id {
            if m.tenant_id.as_deref() != Some(tenant_id.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if m.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if !m.started_at.is_some_and(|t| t >= since) {
                return false;
            }
        }
        if let Some(until) = self.until {
            if !m.started_at.is_some_and(|t| t <= until) {
                return false;
            }
        }
        true
    }
}

/// Append-only store of per-execution event sequences
///
/// This is the single seam between the pure replay logic and storage:
/// backends implement the three required operations and inherit every
/// derived read. Implementations must be thread-safe and support concurrent
/// access.
///
/// Concurrency contract for [`append`](EventLedger::append): concurrent
/// appends to the same execution must never produce duplicate or
/// non-monotonic sequence numbers, and appends to different executions must
/// not block each other. Sequence races are retried inside the backend;
/// [`LedgerError::SerializationFailure`] surfaces only once those retries
/// are exhausted. A duplicate sequence number must never become visible to
/// readers.
#[async_trait]
pub trait EventLedger: Send + Sync + 'static {
    /// Append a new event to an execution's log
    ///
    /// The ledger assigns the event ID, `sequence_num = max(existing) + 1`
    /// (1 if none) and `created_at`, persists atomically, and returns the
    /// stored event. All-or-nothing: on error no partial event is visible.
    async fn append(
        &self,
        execution_id: Uuid,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<ExecutionEvent, LedgerError>;

    /// All events for an execution, ascending by `sequence_num`
    ///
    /// An unknown execution yields an empty vec, not an error.
    async fn get_events(&self, execution_id: Uuid) -> Result<Vec<ExecutionEvent>, LedgerError>;

    /// Distinct execution IDs present in the ledger (no order contract)
    async fn execution_ids(&self) -> Result<Vec<Uuid>, LedgerError>;

    // =========================================================================
    // Derived reads (written once against the operations above)
    // =========================================================================

    /// Materialize a complete execution view from its event stream
    ///
    /// Fails with [`LedgerError::ExecutionNotFound`] if the execution has no
    /// events: an execution with zero events is indistinguishable from one
    /// that never started.
    async fn get_timeline(&self, execution_id: Uuid) -> Result<MaterializedExecution, LedgerError> {
        let events = self.get_events(execution_id).await?;
        if events.is_empty() {
            return Err(LedgerError::ExecutionNotFound(execution_id));
        }
        Ok(materialize(execution_id, &events))
    }

    /// Materialized executions matching the filter
    ///
    /// Sorted by `started_at` descending; executions without a start time
    /// sort last. `offset` past the end yields an empty vec.
    async fn list_executions(
        &self,
        filter: ExecutionFilter,
    ) -> Result<Vec<MaterializedExecution>, LedgerError> {
        let mut results = Vec::new();
        for execution_id in self.execution_ids().await? {
            let events = self.get_events(execution_id).await?;
            if events.is_empty() {
                continue;
            }
            let m = materialize(execution_id, &events);
            if filter.matches(&m) {
                results.push(m);
            }
        }

        results.sort_by(|a, b| match (a.started_at, b.started_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        if filter.offset > 0 {
            if filter.offset >= results.len() {
                return Ok(Vec::new());
            }
            results.drain(..filter.offset);
        }
        if filter.limit > 0 {
            results.truncate(filter.limit);
        }

        Ok(results)
    }

    /// Events of one type for an execution, in sequence order
    async fn get_events_of_type(
        &self,
        execution_id: Uuid,
        event_type: EventType,
    ) -> Result<Vec<ExecutionEvent>, LedgerError> {
        let mut events = self.get_events(execution_id).await?;
        events.retain(|ev| ev.event_type == event_type);
        Ok(events)
    }
}

// =========================================================================
// Append retry policy (shared by the SQL backends)
// =========================================================================

/// How many times an append retries after losing the max+1 race
pub(crate) const APPEND_MAX_ATTEMPTS: u32 = 10;

/// Backoff before the next append attempt, jittered so two racing writers
/// do not collide again on every retry
pub(crate) fn append_retry_delay(attempt: u32) -> Duration {
    let base_ms = 1u64 << attempt.min(6);
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms);
    Duration::from_millis(base_ms + jitter_ms)
}

/// True when the database rejected an insert because another writer took
/// the same (execution_id, sequence_num) slot
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
