use crate::error::{EngineError, ValidationError};
use crate::ledger::{ActionRecord, ActionStatus, Ledger};
use crate::observability::{AuditLogger, AuditStatus, OptimizerMetrics};
use async_trait::async_trait;
use dashmap::DashSet;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Risk at or above which actions wait for human approval
pub const GOVERNANCE_RISK_THRESHOLD: f64 = 5.0;

/// Resource id returned in place of a real one while an action awaits approval
pub const AWAITING_APPROVAL: &str = "AWAITING_APPROVAL";

pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>;

/// Type-erased action, as rebuilt by a [`RecoveryHandler`]
pub type BoxedAction = Box<dyn FnOnce() -> ActionFuture + Send>;

/// Box an async closure into a [`BoxedAction`]
pub fn boxed_action<F, Fut>(action: F) -> BoxedAction
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    Box::new(move || Box::pin(action()) as ActionFuture)
}

/// Key-sorted, whitespace-free JSON encoding
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical encoding of a payload
pub fn checksum(payload: &Value) -> String {
    checksum_canonical(&canonical_json(payload))
}

fn checksum_canonical(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Result of a guarded call that did not error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedOutcome {
    /// The action ran in this call
    Completed { request_id: String, resource_id: String },
    /// A previous call already completed the same payload
    Skipped { request_id: String, resource_id: String },
    /// Risk too high; the pending row waits for an approver to replay the call
    AwaitingApproval { request_id: String },
}

impl GuardedOutcome {
    pub fn request_id(&self) -> &str {
        match self {
            GuardedOutcome::Completed { request_id, .. }
            | GuardedOutcome::Skipped { request_id, .. }
            | GuardedOutcome::AwaitingApproval { request_id } => request_id,
        }
    }

    /// Resource id, or the `AWAITING_APPROVAL` sentinel
    pub fn resource_id(&self) -> &str {
        match self {
            GuardedOutcome::Completed { resource_id, .. }
            | GuardedOutcome::Skipped { resource_id, .. } => resource_id,
            GuardedOutcome::AwaitingApproval { .. } => AWAITING_APPROVAL,
        }
    }

    pub fn is_awaiting_approval(&self) -> bool {
        matches!(self, GuardedOutcome::AwaitingApproval { .. })
    }
}

/// Everything needed to re-run a pending ledger row
pub struct RecoveredAction {
    pub agent: String,
    pub action_name: String,
    pub payload: Value,
    pub risk: f64,
    pub action: BoxedAction,
}

/// Rebuilds the payload and action of a pending row after a restart
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn reconstruct(&self, record: &ActionRecord) -> anyhow::Result<RecoveredAction>;
}

/// Outcome counts of one recovery sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    pub scanned: usize,
    pub completed: usize,
    pub failed: usize,
    pub awaiting_approval: usize,
    pub integrity_violations: usize,
    /// Rows the handler could not rebuild; left pending
    pub unrecoverable: usize,
    /// Rows another call in this process was still executing; left alone
    pub in_progress: usize,
}

/// Checksum claimed by a running call; released on drop
struct InFlight {
    running: Arc<DashSet<String>>,
    checksum: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.running.remove(&self.checksum);
    }
}

/// Guards mutating actions so each payload runs at most once
#[derive(Clone)]
pub struct IdempotencyEngine {
    ledger: Arc<dyn Ledger>,
    audit: AuditLogger,
    metrics: Option<OptimizerMetrics>,
    /// Checksums with a call executing in this process. A pending row whose
    /// checksum is here is live, not left over from a crash.
    running: Arc<DashSet<String>>,
}

impl IdempotencyEngine {
    pub fn new(ledger: Arc<dyn Ledger>, audit: AuditLogger) -> Self {
        Self {
            ledger,
            audit,
            metrics: None,
            running: Arc::new(DashSet::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: OptimizerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Run `action` at most once for this payload.
    ///
    /// A completed row for the same checksum short-circuits without calling
    /// `action`. A pending row is resumed under its original request id. A
    /// failed row is ignored and a fresh pending row is recorded. While one
    /// call for a payload is running, identical calls fail with
    /// [`EngineError::InProgress`].
    pub async fn execute_guarded<F, Fut>(
        &self,
        agent: &str,
        action_name: &str,
        payload: &Value,
        risk: f64,
        action: F,
    ) -> Result<GuardedOutcome, EngineError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<String>> + Send,
    {
        validate_risk(risk)?;

        let canonical = canonical_json(payload);
        let checksum = checksum_canonical(&canonical);
        let _claim = self.claim(&checksum)?;

        let request_id = match self.ledger.get_by_checksum(&checksum).await? {
            Some(existing) if existing.status == ActionStatus::Completed => {
                let resource_id = existing.resource_id.unwrap_or_default();
                self.emit(
                    agent,
                    action_name,
                    AuditStatus::Skipped,
                    json!({ "request_id": existing.request_id, "resource_id": resource_id }),
                );
                return Ok(GuardedOutcome::Skipped {
                    request_id: existing.request_id,
                    resource_id,
                });
            }
            Some(existing) if existing.status == ActionStatus::Pending => {
                self.emit(
                    agent,
                    action_name,
                    AuditStatus::Resuming,
                    json!({ "request_id": existing.request_id, "checksum": checksum }),
                );
                existing.request_id
            }
            _ => {
                let request_id = Uuid::new_v4().to_string();
                self.ledger
                    .record_pending(&request_id, &checksum, action_name, &canonical, risk)
                    .await?;
                self.emit(
                    agent,
                    action_name,
                    AuditStatus::Pending,
                    json!({ "request_id": request_id, "checksum": checksum, "risk": risk }),
                );
                request_id
            }
        };

        self.gate_and_execute(agent, action_name, &request_id, payload, risk, action)
            .await
    }

    /// Re-enter a known pending request at the governance gate.
    ///
    /// The payload is re-checksummed and must still map to `request_id` in
    /// the ledger; otherwise the call fails with an integrity violation and
    /// `action` is never invoked.
    pub async fn resume<F, Fut>(
        &self,
        agent: &str,
        action_name: &str,
        request_id: &str,
        payload: &Value,
        risk: f64,
        action: F,
    ) -> Result<GuardedOutcome, EngineError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<String>> + Send,
    {
        validate_risk(risk)?;
        let _claim = self.claim(&checksum(payload))?;
        self.gate_and_execute(agent, action_name, request_id, payload, risk, action)
            .await
    }

    fn claim(&self, checksum: &str) -> Result<InFlight, EngineError> {
        if !self.running.insert(checksum.to_string()) {
            debug!(checksum, "Identical action already running");
            return Err(EngineError::InProgress {
                checksum: checksum.to_string(),
            });
        }
        Ok(InFlight {
            running: self.running.clone(),
            checksum: checksum.to_string(),
        })
    }

    /// Resume every pending row through `handler`.
    ///
    /// Rows the handler cannot rebuild stay pending. A ledger failure aborts
    /// the sweep.
    pub async fn resume_pending_tasks(
        &self,
        handler: &dyn RecoveryHandler,
    ) -> Result<RecoverySummary, EngineError> {
        let tasks = self.ledger.get_pending_tasks().await?;
        let mut summary = RecoverySummary {
            scanned: tasks.len(),
            ..Default::default()
        };

        if tasks.is_empty() {
            debug!("No pending actions to recover");
            return Ok(summary);
        }
        info!(pending = tasks.len(), "Recovering pending actions");

        for record in tasks {
            let recovered = match handler.reconstruct(&record).await {
                Ok(recovered) => recovered,
                Err(e) => {
                    warn!(
                        request_id = %record.request_id,
                        action = %record.action,
                        error = %e,
                        "Cannot rebuild pending action, leaving it pending"
                    );
                    summary.unrecoverable += 1;
                    continue;
                }
            };

            self.emit(
                &recovered.agent,
                &recovered.action_name,
                AuditStatus::Resuming,
                json!({ "request_id": record.request_id, "source": "recovery" }),
            );

            let result = self
                .resume(
                    &recovered.agent,
                    &recovered.action_name,
                    &record.request_id,
                    &recovered.payload,
                    recovered.risk,
                    recovered.action,
                )
                .await;

            match result {
                Ok(GuardedOutcome::AwaitingApproval { .. }) => summary.awaiting_approval += 1,
                Ok(_) => summary.completed += 1,
                Err(EngineError::Execution { .. }) => summary.failed += 1,
                Err(EngineError::IntegrityViolation { .. }) => summary.integrity_violations += 1,
                Err(EngineError::InProgress { .. }) => summary.in_progress += 1,
                Err(EngineError::Validation(e)) => {
                    warn!(request_id = %record.request_id, error = %e, "Rebuilt action is invalid");
                    summary.unrecoverable += 1;
                }
                Err(e @ EngineError::Ledger(_)) => return Err(e),
            }
        }

        info!(
            completed = summary.completed,
            failed = summary.failed,
            awaiting_approval = summary.awaiting_approval,
            integrity_violations = summary.integrity_violations,
            unrecoverable = summary.unrecoverable,
            in_progress = summary.in_progress,
            "Recovery sweep finished"
        );
        Ok(summary)
    }

    async fn gate_and_execute<F, Fut>(
        &self,
        agent: &str,
        action_name: &str,
        request_id: &str,
        payload: &Value,
        risk: f64,
        action: F,
    ) -> Result<GuardedOutcome, EngineError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<String>> + Send,
    {
        if risk >= GOVERNANCE_RISK_THRESHOLD {
            self.emit(
                agent,
                action_name,
                AuditStatus::AwaitingApproval,
                json!({ "request_id": request_id, "risk": risk }),
            );
            return Ok(GuardedOutcome::AwaitingApproval {
                request_id: request_id.to_string(),
            });
        }

        self.verify_integrity(agent, action_name, request_id, payload)
            .await?;

        match action().await {
            Ok(resource_id) => {
                if let Err(e) = self.ledger.complete(request_id, &resource_id).await {
                    error!(
                        request_id,
                        resource_id = %resource_id,
                        error = %e,
                        "Action ran but its ledger row is still pending"
                    );
                    return Err(e.into());
                }
                self.emit(
                    agent,
                    action_name,
                    AuditStatus::Completed,
                    json!({ "request_id": request_id, "resource_id": resource_id }),
                );
                Ok(GuardedOutcome::Completed {
                    request_id: request_id.to_string(),
                    resource_id,
                })
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.ledger.fail(request_id, &message).await?;
                self.emit(
                    agent,
                    action_name,
                    AuditStatus::Failed,
                    json!({ "request_id": request_id, "error": message }),
                );
                Err(EngineError::Execution {
                    request_id: request_id.to_string(),
                    message,
                })
            }
        }
    }

    async fn verify_integrity(
        &self,
        agent: &str,
        action_name: &str,
        request_id: &str,
        payload: &Value,
    ) -> Result<(), EngineError> {
        let checksum = checksum(payload);
        let row = self.ledger.get_by_checksum(&checksum).await?;

        let intact = matches!(
            &row,
            Some(record) if record.request_id == request_id && record.status == ActionStatus::Pending
        );
        if intact {
            return Ok(());
        }

        self.emit(
            agent,
            action_name,
            AuditStatus::SecurityBlock,
            json!({
                "request_id": request_id,
                "checksum": checksum,
                "ledger_request_id": row.as_ref().map(|r| r.request_id.clone()),
            }),
        );
        Err(EngineError::IntegrityViolation {
            request_id: request_id.to_string(),
        })
    }

    fn emit(&self, agent: &str, action_name: &str, status: AuditStatus, metadata: Value) {
        self.audit.log(agent, action_name, status, metadata);
        if let Some(metrics) = &self.metrics {
            metrics.inc_ledger_action(status);
        }
    }
}

fn validate_risk(risk: f64) -> Result<(), ValidationError> {
    if risk.is_finite() && risk >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidRisk(risk))
    }
}
