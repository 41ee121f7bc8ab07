//! Idempotency ledger
//!
//! Durable record of every guarded action, keyed by request id and indexed by
//! the checksum of the action payload. Rows only ever move forward:
//! `pending` to `completed` or `failed`. At most one row per checksum is
//! `pending` or `completed` at any time.

mod memory;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        }
    }

    /// Whether the row still blocks a new record for the same checksum
    pub fn is_active(&self) -> bool {
        matches!(self, ActionStatus::Pending | ActionStatus::Completed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "completed" => Ok(ActionStatus::Completed),
            "failed" => Ok(ActionStatus::Failed),
            other => Err(LedgerError::Corrupt(format!("unknown status '{}'", other))),
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub request_id: String,
    pub checksum: String,
    /// Action name as given by the caller
    pub action: String,
    /// Canonical JSON of the payload the checksum was computed over
    pub payload: String,
    /// Governance risk the row was recorded with; recovery replays it
    pub risk: f64,
    pub status: ActionStatus,
    pub resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn pending(request_id: &str, checksum: &str, action: &str, payload: &str, risk: f64) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.to_string(),
            checksum: checksum.to_string(),
            action: action.to_string(),
            payload: payload.to_string(),
            risk,
            status: ActionStatus::Pending,
            resource_id: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }
}

/// Row counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}

impl LedgerStats {
    pub fn total(&self) -> u64 {
        self.pending + self.completed + self.failed
    }
}

/// Persistence contract of the idempotency engine.
///
/// Implementations must make every state transition durable before
/// returning.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a new `pending` row. Fails with [`LedgerError::Conflict`] when a
    /// pending or completed row already exists for the checksum.
    async fn record_pending(
        &self,
        request_id: &str,
        checksum: &str,
        action: &str,
        payload: &str,
        risk: f64,
    ) -> Result<(), LedgerError>;

    /// Move a pending row to `completed`
    async fn complete(&self, request_id: &str, resource_id: &str) -> Result<(), LedgerError>;

    /// Move a pending row to `failed`
    async fn fail(&self, request_id: &str, error: &str) -> Result<(), LedgerError>;

    /// The row for a checksum. An active (pending or completed) row is
    /// preferred; otherwise the most recent failed row is returned.
    async fn get_by_checksum(&self, checksum: &str) -> Result<Option<ActionRecord>, LedgerError>;

    async fn get(&self, request_id: &str) -> Result<Option<ActionRecord>, LedgerError>;

    /// Every pending row, oldest first
    async fn get_pending_tasks(&self) -> Result<Vec<ActionRecord>, LedgerError>;

    async fn stats(&self) -> Result<LedgerStats, LedgerError>;
}

/// Pick the row `get_by_checksum` should return among rows sharing a checksum
fn preferred_record<'a>(records: impl IntoIterator<Item = &'a ActionRecord>) -> Option<&'a ActionRecord> {
    records.into_iter().max_by(|a, b| {
        a.status
            .is_active()
            .cmp(&b.status.is_active())
            .then(a.created_at.cmp(&b.created_at))
    })
}

#[cfg(test)]
mod tests;
