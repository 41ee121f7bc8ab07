//! Ledger persisted in a single sqlite file.
//!
//! The database runs in WAL mode with `synchronous = FULL`, so every state
//! transition is flushed before the call returns. Invariant (at most one
//! active row per checksum) is enforced by a partial unique index, not just
//! by the engine.

use super::{ActionRecord, ActionStatus, Ledger, LedgerStats};
use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS actions (
        request_id  TEXT PRIMARY KEY,
        checksum    TEXT NOT NULL,
        action      TEXT NOT NULL DEFAULT '',
        payload     TEXT NOT NULL DEFAULT '',
        risk        REAL NOT NULL DEFAULT 0,
        status      TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed')),
        resource_id TEXT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        error       TEXT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS actions_checksum ON actions(checksum)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS actions_checksum_active
        ON actions(checksum) WHERE status IN ('pending', 'completed')
    "#,
];

const SELECT_COLUMNS: &str =
    "request_id, checksum, action, payload, risk, status, resource_id, created_at, updated_at, error";

impl sqlx::Type<sqlx::Sqlite> for ActionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <&str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ActionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<'r, sqlx::Sqlite>>::decode(value)?;
        Ok(ActionStatus::from_str(s)?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ActionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        let s = self.as_str();
        <&str as sqlx::Encode<'q, sqlx::Sqlite>>::encode_by_ref(&s, buf)
    }
}

/// Sqlite-backed ledger; cheap to clone
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        info!(path = %path.display(), "Opened action ledger");
        Ok(ledger)
    }

    /// Ledger living only as long as this value; single connection so every
    /// query sees the same database
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close every pooled connection, flushing the WAL
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn transition(
        &self,
        request_id: &str,
        status: ActionStatus,
        resource_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE actions
            SET status = ?2,
                resource_id = COALESCE(?3, resource_id),
                error = ?4,
                updated_at = MAX(created_at, ?5)
            WHERE request_id = ?1
              AND status = 'pending'
            "#,
        )
        .bind(request_id)
        .bind(status)
        .bind(resource_id)
        .bind(error)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(request_id = %request_id, status = %status, "Ledger row transitioned");
            return Ok(());
        }

        match self.get(request_id).await? {
            Some(record) => Err(LedgerError::InvalidTransition {
                request_id: request_id.to_string(),
                status: record.status.to_string(),
            }),
            None => Err(LedgerError::NotFound(request_id.to_string())),
        }
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn record_pending(
        &self,
        request_id: &str,
        checksum: &str,
        action: &str,
        payload: &str,
        risk: f64,
    ) -> Result<(), LedgerError> {
        let now = timestamp(Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO actions (
                request_id,
                checksum,
                action,
                payload,
                risk,
                status,
                resource_id,
                created_at,
                updated_at,
                error
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?7, NULL)
            "#,
        )
        .bind(request_id)
        .bind(checksum)
        .bind(action)
        .bind(payload)
        .bind(risk)
        .bind(ActionStatus::Pending)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::Conflict(checksum.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete(&self, request_id: &str, resource_id: &str) -> Result<(), LedgerError> {
        self.transition(request_id, ActionStatus::Completed, Some(resource_id), None)
            .await
    }

    async fn fail(&self, request_id: &str, error: &str) -> Result<(), LedgerError> {
        self.transition(request_id, ActionStatus::Failed, None, Some(error))
            .await
    }

    async fn get_by_checksum(&self, checksum: &str) -> Result<Option<ActionRecord>, LedgerError> {
        let query = format!(
            r#"
            SELECT {}
            FROM actions
            WHERE checksum = ?1
            ORDER BY CASE WHEN status IN ('pending', 'completed') THEN 0 ELSE 1 END,
                     created_at DESC
            LIMIT 1
            "#,
            SELECT_COLUMNS
        );

        sqlx::query(&query)
            .bind(checksum)
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_record)
            .transpose()
    }

    async fn get(&self, request_id: &str) -> Result<Option<ActionRecord>, LedgerError> {
        let query = format!("SELECT {} FROM actions WHERE request_id = ?1", SELECT_COLUMNS);

        sqlx::query(&query)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_record)
            .transpose()
    }

    async fn get_pending_tasks(&self) -> Result<Vec<ActionRecord>, LedgerError> {
        let query = format!(
            "SELECT {} FROM actions WHERE status = 'pending' ORDER BY created_at ASC, request_id ASC",
            SELECT_COLUMNS
        );

        sqlx::query(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(row_to_record)
            .collect()
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM actions GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = LedgerStats::default();
        for row in rows {
            let status: ActionStatus = row.try_get("status")?;
            let count = row.try_get::<i64, _>("n")?.max(0) as u64;
            match status {
                ActionStatus::Pending => stats.pending = count,
                ActionStatus::Completed => stats.completed = count,
                ActionStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}

/// Fixed-width RFC3339 so text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("{} '{}': {}", column, raw, e)))
}

fn row_to_record(row: SqliteRow) -> Result<ActionRecord, LedgerError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ActionRecord {
        request_id: row.try_get("request_id")?,
        checksum: row.try_get("checksum")?,
        action: row.try_get("action")?,
        payload: row.try_get("payload")?,
        risk: row.try_get("risk")?,
        status: row.try_get("status")?,
        resource_id: row.try_get("resource_id")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        error: row.try_get("error")?,
    })
}
