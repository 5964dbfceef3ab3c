//! SQLite implementation of EventLedger
//!
//! Embedded storage for single-node deployments. Everything lives in one
//! `execution_events` table with TEXT columns: UUIDs in hyphenated form,
//! timestamps as RFC 3339, payloads as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{
    append_retry_delay, is_unique_violation, EventLedger, LedgerError, APPEND_MAX_ATTEMPTS,
};
use crate::event::{EventType, ExecutionEvent};

/// SQLite implementation of EventLedger
///
/// Sequence numbers are assigned by a single INSERT that computes max+1
/// inline; the UNIQUE(execution_id, sequence_num) constraint catches racing
/// writers and the insert is retried with jittered backoff. Short lock
/// contention between pooled connections is absorbed by the driver's busy
/// timeout.
///
/// # Example
///
/// ```ignore
/// use pipewright_ledger::SqliteEventLedger;
/// use sqlx::sqlite::SqlitePoolOptions;
///
/// let pool = SqlitePoolOptions::new()
///     .connect("sqlite://pipewright.db")
///     .await?;
/// let ledger = SqliteEventLedger::new(pool);
/// ledger.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct SqliteEventLedger {
    pool: SqlitePool,
}

impl SqliteEventLedger {
    /// Create a new SQLite ledger with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `execution_events` table and its indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        const STATEMENTS: [&str; 4] = [
            r#"
            CREATE TABLE IF NOT EXISTS execution_events (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                sequence_num INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(execution_id, sequence_num)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_execution_events_execution_id \
             ON execution_events(execution_id)",
            "CREATE INDEX IF NOT EXISTS idx_execution_events_event_type \
             ON execution_events(event_type)",
            "CREATE INDEX IF NOT EXISTS idx_execution_events_created_at \
             ON execution_events(created_at)",
        ];

        for statement in STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to initialize schema: {}", e);
                    LedgerError::Database(e.to_string())
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventLedger for SqliteEventLedger {
    #[instrument(skip(self, data))]
    async fn append(
        &self,
        execution_id: Uuid,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<ExecutionEvent, LedgerError> {
        let payload = serde_json::to_string(&data)?;

        for attempt in 1..=APPEND_MAX_ATTEMPTS {
            let id = Uuid::now_v7();
            let created_at = Utc::now();

            let inserted = sqlx::query(
                r#"
                INSERT INTO execution_events (id, execution_id, sequence_num, event_type, event_data, created_at)
                VALUES (?, ?, COALESCE((SELECT MAX(sequence_num) + 1 FROM execution_events WHERE execution_id = ?), 1), ?, ?, ?)
                RETURNING sequence_num
                "#,
            )
            .bind(id.to_string())
            .bind(execution_id.to_string())
            .bind(execution_id.to_string())
            .bind(event_type.as_str())
            .bind(&payload)
            .bind(created_at.to_rfc3339())
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok(row) => {
                    let sequence_num: i64 = row.get("sequence_num");
                    debug!(%execution_id, %event_type, sequence_num, "appended event");
                    return Ok(ExecutionEvent {
                        id,
                        execution_id,
                        sequence_num,
                        event_type,
                        data,
                        created_at,
                    });
                }
                Err(e) if is_unique_violation(&e) => {
                    debug!(%execution_id, attempt, "lost sequence race, retrying append");
                    tokio::time::sleep(append_retry_delay(attempt)).await;
                }
                Err(e) => {
                    error!("Failed to append event: {}", e);
                    return Err(LedgerError::Database(e.to_string()));
                }
            }
        }

        error!(%execution_id, attempts = APPEND_MAX_ATTEMPTS, "append retries exhausted");
        Err(LedgerError::SerializationFailure {
            execution_id,
            attempts: APPEND_MAX_ATTEMPTS,
        })
    }

    #[instrument(skip(self))]
    async fn get_events(&self, execution_id: Uuid) -> Result<Vec<ExecutionEvent>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, sequence_num, event_type, event_data, created_at
            FROM execution_events
            WHERE execution_id = ?
            ORDER BY sequence_num ASC
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load events: {}", e);
            LedgerError::Database(e.to_string())
        })?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn execution_ids(&self) -> Result<Vec<Uuid>, LedgerError> {
        let rows = sqlx::query("SELECT DISTINCT execution_id FROM execution_events")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to list executions: {}", e);
                LedgerError::Database(e.to_string())
            })?;

        rows.into_iter()
            .map(|row| parse_uuid(row.get("execution_id")))
            .collect()
    }
}

fn row_to_event(row: &SqliteRow) -> Result<ExecutionEvent, LedgerError> {
    let event_type: String = row.get("event_type");
    let data = match row.get::<Option<String>, _>("event_data") {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| LedgerError::Database(format!("malformed event payload: {e}")))?,
        None => serde_json::Value::Null,
    };

    Ok(ExecutionEvent {
        id: parse_uuid(row.get("id"))?,
        execution_id: parse_uuid(row.get("execution_id"))?,
        sequence_num: row.get("sequence_num"),
        event_type: EventType::from(event_type),
        data,
        created_at: parse_timestamp(row.get("created_at"))?,
    })
}

fn parse_uuid(raw: String) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(&raw).map_err(|e| LedgerError::Database(format!("malformed uuid {raw:?}: {e}")))
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Database(format!("malformed timestamp {raw:?}: {e}")))
}
