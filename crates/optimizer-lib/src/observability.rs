//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics on an owned registry (refresh latency, inventory
//!   size, suggestions, savings, anomalies, ledger outcomes)
//! - The governance audit trail, emitted as structured tracing events and
//!   retained in a bounded in-memory ring

use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Histogram buckets for refresh latency (in seconds)
const REFRESH_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Default number of audit events kept in memory
pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

/// Optimizer metrics for Prometheus exposition
///
/// Clones share the same underlying metrics and registry.
#[derive(Clone)]
pub struct OptimizerMetrics {
    registry: Registry,
    refresh_latency_seconds: Histogram,
    refresh_failures: IntCounter,
    resources_in_snapshot: IntGauge,
    suggestions: IntGauge,
    potential_savings: Gauge,
    anomalies_detected: IntCounter,
    ledger_actions: IntCounterVec,
}

impl OptimizerMetrics {
    /// Create and register every metric against a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let refresh_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cost_optimizer_refresh_latency_seconds",
                "Time spent on a full inventory refresh",
            )
            .buckets(REFRESH_LATENCY_BUCKETS.to_vec()),
        )?;
        let refresh_failures = IntCounter::new(
            "cost_optimizer_refresh_failures_total",
            "Inventory refreshes that kept the previous snapshot",
        )?;
        let resources_in_snapshot = IntGauge::new(
            "cost_optimizer_resources",
            "Resources in the current inventory snapshot",
        )?;
        let suggestions = IntGauge::new(
            "cost_optimizer_suggestions",
            "Optimization suggestions derived from the current snapshot",
        )?;
        let potential_savings = Gauge::new(
            "cost_optimizer_potential_monthly_savings",
            "Estimated monthly savings across all suggestions",
        )?;
        let anomalies_detected = IntCounter::new(
            "cost_optimizer_anomalies_detected_total",
            "Cost anomalies detected after refreshes",
        )?;
        let ledger_actions = IntCounterVec::new(
            Opts::new(
                "cost_optimizer_ledger_actions_total",
                "Guarded actions by outcome status",
            ),
            &["status"],
        )?;

        registry.register(Box::new(refresh_latency_seconds.clone()))?;
        registry.register(Box::new(refresh_failures.clone()))?;
        registry.register(Box::new(resources_in_snapshot.clone()))?;
        registry.register(Box::new(suggestions.clone()))?;
        registry.register(Box::new(potential_savings.clone()))?;
        registry.register(Box::new(anomalies_detected.clone()))?;
        registry.register(Box::new(ledger_actions.clone()))?;

        Ok(Self {
            registry,
            refresh_latency_seconds,
            refresh_failures,
            resources_in_snapshot,
            suggestions,
            potential_savings,
            anomalies_detected,
            ledger_actions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_refresh_latency(&self, duration_secs: f64) {
        self.refresh_latency_seconds.observe(duration_secs);
    }

    pub fn inc_refresh_failures(&self) {
        self.refresh_failures.inc();
    }

    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures.get()
    }

    pub fn set_resources(&self, count: usize) {
        self.resources_in_snapshot.set(count as i64);
    }

    pub fn set_suggestions(&self, count: usize, potential_savings: f64) {
        self.suggestions.set(count as i64);
        self.potential_savings.set(potential_savings);
    }

    pub fn add_anomalies(&self, count: usize) {
        self.anomalies_detected.inc_by(count as u64);
    }

    pub fn inc_ledger_action(&self, status: AuditStatus) {
        self.ledger_actions.with_label_values(&[status.as_str()]).inc();
    }

    pub fn ledger_actions(&self, status: AuditStatus) -> u64 {
        self.ledger_actions.with_label_values(&[status.as_str()]).get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Governance audit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Pending,
    AwaitingApproval,
    Skipped,
    Resuming,
    Completed,
    Failed,
    SecurityBlock,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "PENDING",
            AuditStatus::AwaitingApproval => "AWAITING_APPROVAL",
            AuditStatus::Skipped => "SKIPPED",
            AuditStatus::Resuming => "RESUMING",
            AuditStatus::Completed => "COMPLETED",
            AuditStatus::Failed => "FAILED",
            AuditStatus::SecurityBlock => "SECURITY_BLOCK",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the governance audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub action: String,
    pub status: AuditStatus,
    pub metadata: serde_json::Value,
}

/// Structured logger for governance audit events
///
/// Every event goes to `tracing` with `event = "governance_audit"`; the most
/// recent ones are also kept in memory for inspection.
#[derive(Clone)]
pub struct AuditLogger {
    recent: Arc<Mutex<VecDeque<AuditEvent>>>,
    capacity: usize,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn log(&self, agent: &str, action: &str, status: AuditStatus, metadata: serde_json::Value) {
        match status {
            AuditStatus::Failed | AuditStatus::SecurityBlock => {
                warn!(
                    event = "governance_audit",
                    agent = %agent,
                    action = %action,
                    status = %status,
                    metadata = %metadata,
                    "Governance audit"
                );
            }
            _ => {
                info!(
                    event = "governance_audit",
                    agent = %agent,
                    action = %action,
                    status = %status,
                    metadata = %metadata,
                    "Governance audit"
                );
            }
        }

        let event = AuditEvent {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            action: action.to_string(),
            status,
            metadata,
        };

        let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    /// Recent events, oldest first
    pub fn recent(&self) -> Vec<AuditEvent> {
        self.recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Statuses of the recent events, oldest first
    pub fn statuses(&self) -> Vec<AuditStatus> {
        self.recent().into_iter().map(|event| event.status).collect()
    }
}
