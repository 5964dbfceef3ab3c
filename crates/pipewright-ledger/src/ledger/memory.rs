//! In-memory implementation of EventLedger for testing and single-process use

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::{EventLedger, LedgerError};
use crate::event::{EventType, ExecutionEvent};

/// In-memory implementation of EventLedger
///
/// Stores all events in process memory and provides the same semantics as
/// the SQL implementations. Each instance owns its own state; independent
/// instances never share anything, so concurrently running tests can each
/// create their own.
///
/// Appends take the write lock for the duration of the insert, which
/// serializes writes across all executions; per-execution sequence numbers
/// stay gapless either way.
///
/// # Example
///
/// ```
/// use pipewright_ledger::InMemoryEventLedger;
///
/// let ledger = InMemoryEventLedger::new();
/// ```
pub struct InMemoryEventLedger {
    executions: RwLock<HashMap<Uuid, Vec<ExecutionEvent>>>,
}

impl InMemoryEventLedger {
    /// Create an empty in-memory ledger
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of executions with at least one event
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Number of events recorded for one execution
    pub fn event_count(&self, execution_id: Uuid) -> usize {
        self.executions
            .read()
            .get(&execution_id)
            .map_or(0, Vec::len)
    }

    /// Drop all recorded events (for testing)
    pub fn clear(&self) {
        self.executions.write().clear();
    }
}

impl Default for InMemoryEventLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn append(
        &self,
        execution_id: Uuid,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<ExecutionEvent, LedgerError> {
        let mut executions = self.executions.write();
        let events = executions.entry(execution_id).or_default();

        let event = ExecutionEvent {
            id: Uuid::now_v7(),
            execution_id,
            sequence_num: events.len() as i64 + 1,
            event_type,
            data,
            created_at: Utc::now(),
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn get_events(&self, execution_id: Uuid) -> Result<Vec<ExecutionEvent>, LedgerError> {
        let executions = self.executions.read();
        Ok(executions.get(&execution_id).cloned().unwrap_or_default())
    }

    async fn execution_ids(&self) -> Result<Vec<Uuid>, LedgerError> {
        let executions = self.executions.read();
        Ok(executions.keys().copied().collect())
    }
}
