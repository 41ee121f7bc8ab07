//! Rebuilds dashboard actions from pending ledger rows

use crate::actions::{apply, ActionPayload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use optimizer_lib::cloud::CloudAdapter;
use optimizer_lib::idempotency::{boxed_action, RecoveredAction, RecoveryHandler};
use optimizer_lib::ledger::ActionRecord;
use serde_json::Value;
use std::sync::Arc;

/// Agent name recovered actions are audited under
pub const RECOVERY_AGENT: &str = "recovery";

/// Replays a stored [`ActionPayload`] against the cloud adapter with the
/// risk the row was recorded with
pub struct AdapterRecoveryHandler {
    adapter: Arc<dyn CloudAdapter>,
}

impl AdapterRecoveryHandler {
    pub fn new(adapter: Arc<dyn CloudAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl RecoveryHandler for AdapterRecoveryHandler {
    async fn reconstruct(&self, record: &ActionRecord) -> Result<RecoveredAction> {
        let payload: Value = serde_json::from_str(&record.payload)
            .with_context(|| format!("ledger row {} holds unreadable JSON", record.request_id))?;
        let parsed: ActionPayload = serde_json::from_value(payload.clone())
            .with_context(|| format!("ledger row {} is not a dashboard action", record.request_id))?;
        let action = parsed.validate()?;

        let adapter = self.adapter.clone();
        let resource_id = parsed.resource_id;
        Ok(RecoveredAction {
            agent: RECOVERY_AGENT.to_string(),
            action_name: record.action.clone(),
            payload,
            risk: record.risk,
            action: boxed_action(move || apply(adapter, resource_id, action)),
        })
    }
}
