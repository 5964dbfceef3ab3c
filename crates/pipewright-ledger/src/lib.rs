//! # Pipewright Execution Ledger
//!
//! An event-sourced ledger for pipeline executions: an append-only log of
//! immutable facts about each run, a deterministic materializer that
//! rebuilds execution state by replaying that log, and a structural diff
//! engine that compares two executions field by field.
//!
//! ## Features
//!
//! - **Ordered event log**: Per-execution sequence numbers are gapless and
//!   strictly increasing, even under concurrent writers
//! - **Deterministic replay**: `get_timeline` materializes the same view
//!   from the same events, every time
//! - **Structural diffing**: Compare two runs step by step, down to
//!   individual output fields
//! - **Replay lineage**: Re-run an execution under a new ID and keep track
//!   of where it came from
//! - **Three backends**: In-memory, SQLite, and PostgreSQL behind one
//!   narrow trait
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Execution Engine                         │
//! │        (produces events for in-flight pipeline runs)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ append
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EventLedger                            │
//! │   (execution_events: ordered, immutable, one row per fact)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ get_events
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Materializer / DiffCalculator                   │
//! │     (pure replay: timelines, listings, structural diffs)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use pipewright_ledger::{EventLedger, EventType, InMemoryEventLedger};
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), pipewright_ledger::LedgerError> {
//! let ledger = InMemoryEventLedger::new();
//! let execution_id = Uuid::now_v7();
//!
//! ledger
//!     .append(
//!         execution_id,
//!         EventType::ExecutionStarted,
//!         json!({"pipeline": "orders", "tenant_id": "acme"}),
//!     )
//!     .await?;
//! ledger
//!     .append(execution_id, EventType::ExecutionCompleted, json!({}))
//!     .await?;
//!
//! let timeline = ledger.get_timeline(execution_id).await?;
//! assert_eq!(timeline.pipeline.as_deref(), Some("orders"));
//! # Ok(())
//! # }
//! ```

pub mod diff;
pub mod event;
pub mod ledger;
pub mod materialize;
pub mod replay;

/// Prelude for common imports
pub mod prelude {
    pub use crate::diff::{DiffCalculator, ExecutionDiff, FieldChange, StepDiff, StepDiffStatus};
    pub use crate::event::{EventType, ExecutionEvent};
    pub use crate::ledger::{
        EventLedger, ExecutionFilter, InMemoryEventLedger, LedgerError, PostgresEventLedger,
        SqliteEventLedger,
    };
    pub use crate::materialize::{
        materialize, ExecutionStatus, MaterializedExecution, MaterializedStep, StepStatus,
    };
    pub use crate::replay::{record_replay, replay_lineage, ReplayLineage, ReplayMode};
}

// Re-export key types at crate root
pub use diff::{
    diff_maps, DiffCalculator, DiffSummary, ExecutionDiff, FieldChange, StepDiff, StepDiffStatus,
};
pub use event::{EventType, ExecutionEvent};
pub use ledger::{
    EventLedger, ExecutionFilter, InMemoryEventLedger, LedgerError, PostgresEventLedger,
    SqliteEventLedger,
};
pub use materialize::{
    materialize, ExecutionStatus, MaterializedExecution, MaterializedStep, StepStatus,
};
pub use replay::{record_replay, replay_lineage, ReplayLineage, ReplayMode};
