//! Process-local ledger
//!
//! Same contract as the sqlite ledger minus durability. Used for dry runs and
//! tests that do not exercise restarts.

use super::{preferred_record, ActionRecord, ActionStatus, Ledger, LedgerStats};
use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<String, ActionRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn transition(
        &self,
        request_id: &str,
        apply: impl FnOnce(&mut ActionRecord),
    ) -> Result<(), LedgerError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(request_id)
            .ok_or_else(|| LedgerError::NotFound(request_id.to_string()))?;

        if record.status != ActionStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                request_id: request_id.to_string(),
                status: record.status.to_string(),
            });
        }

        apply(record);
        record.updated_at = Utc::now().max(record.created_at);
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_pending(
        &self,
        request_id: &str,
        checksum: &str,
        action: &str,
        payload: &str,
        risk: f64,
    ) -> Result<(), LedgerError> {
        let mut records = self.records.write().await;

        if records.contains_key(request_id)
            || records
                .values()
                .any(|r| r.checksum == checksum && r.status.is_active())
        {
            return Err(LedgerError::Conflict(checksum.to_string()));
        }

        records.insert(
            request_id.to_string(),
            ActionRecord::pending(request_id, checksum, action, payload, risk),
        );
        Ok(())
    }

    async fn complete(&self, request_id: &str, resource_id: &str) -> Result<(), LedgerError> {
        self.transition(request_id, |record| {
            record.status = ActionStatus::Completed;
            record.resource_id = Some(resource_id.to_string());
        })
        .await
    }

    async fn fail(&self, request_id: &str, error: &str) -> Result<(), LedgerError> {
        self.transition(request_id, |record| {
            record.status = ActionStatus::Failed;
            record.error = Some(error.to_string());
        })
        .await
    }

    async fn get_by_checksum(&self, checksum: &str) -> Result<Option<ActionRecord>, LedgerError> {
        let records = self.records.read().await;
        Ok(preferred_record(records.values().filter(|r| r.checksum == checksum)).cloned())
    }

    async fn get(&self, request_id: &str) -> Result<Option<ActionRecord>, LedgerError> {
        Ok(self.records.read().await.get(request_id).cloned())
    }

    async fn get_pending_tasks(&self) -> Result<Vec<ActionRecord>, LedgerError> {
        let mut pending: Vec<ActionRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == ActionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.request_id.cmp(&b.request_id)));
        Ok(pending)
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let mut stats = LedgerStats::default();
        for record in self.records.read().await.values() {
            match record.status {
                ActionStatus::Pending => stats.pending += 1,
                ActionStatus::Completed => stats.completed += 1,
                ActionStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
