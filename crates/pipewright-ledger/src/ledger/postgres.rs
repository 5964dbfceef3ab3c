//! PostgreSQL implementation of EventLedger
//!
//! Production persistence with:
//! - Gapless per-execution sequences assigned inside a single INSERT
//! - Optimistic retry on sequence races, backed by a UNIQUE constraint
//! - JSONB payloads queryable with Postgres JSON operators

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{
    append_retry_delay, is_unique_violation, EventLedger, LedgerError, APPEND_MAX_ATTEMPTS,
};
use crate::event::{EventType, ExecutionEvent};

/// PostgreSQL implementation of EventLedger
///
/// Uses a connection pool for efficient database access. Concurrent
/// appenders compute max+1 in the INSERT itself; when two race, the
/// UNIQUE(execution_id, sequence_num) constraint rejects the loser and the
/// insert is retried with jittered backoff.
///
/// # Example
///
/// ```ignore
/// use pipewright_ledger::PostgresEventLedger;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/pipewright").await?;
/// let ledger = PostgresEventLedger::new(pool);
/// ledger.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct PostgresEventLedger {
    pool: PgPool,
}

impl PostgresEventLedger {
    /// Create a new PostgreSQL ledger with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `execution_events` table and its indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        const STATEMENTS: [&str; 4] = [
            r#"
            CREATE TABLE IF NOT EXISTS execution_events (
                id UUID PRIMARY KEY,
                execution_id UUID NOT NULL,
                sequence_num BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                event_data JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
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
impl EventLedger for PostgresEventLedger {
    #[instrument(skip(self, data))]
    async fn append(
        &self,
        execution_id: Uuid,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<ExecutionEvent, LedgerError> {
        for attempt in 1..=APPEND_MAX_ATTEMPTS {
            let id = Uuid::now_v7();
            let created_at = Utc::now();

            let inserted = sqlx::query(
                r#"
                INSERT INTO execution_events (id, execution_id, sequence_num, event_type, event_data, created_at)
                VALUES ($1, $2, COALESCE((SELECT MAX(sequence_num) + 1 FROM execution_events WHERE execution_id = $2), 1), $3, $4, $5)
                RETURNING sequence_num
                "#,
            )
            .bind(id)
            .bind(execution_id)
            .bind(event_type.as_str())
            .bind(&data)
            .bind(created_at)
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
            WHERE execution_id = $1
            ORDER BY sequence_num ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to load events: {}", e);
            LedgerError::Database(e.to_string())
        })?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event_type: String = row.get("event_type");
            events.push(ExecutionEvent {
                id: row.get("id"),
                execution_id: row.get("execution_id"),
                sequence_num: row.get("sequence_num"),
                event_type: EventType::from(event_type),
                data: row.get("event_data"),
                created_at: row.get("created_at"),
            });
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

        Ok(rows.iter().map(|r| r.get("execution_id")).collect())
    }
}
