//! Event ledger port and its storage backends
//!
//! `EventLedger` is the narrow trait producers and readers program
//! against. Three implementations are provided:
//!
//! - `InMemoryEventLedger` for tests and single-process use
//! - `SqliteEventLedger` for embedded deployments
//! - `PostgresEventLedger` for production deployments

mod memory;
mod postgres;
mod sqlite;
mod store;

pub use memory::InMemoryEventLedger;
pub use postgres::PostgresEventLedger;
pub use sqlite::SqliteEventLedger;
pub use store::{EventLedger, ExecutionFilter, LedgerError};
