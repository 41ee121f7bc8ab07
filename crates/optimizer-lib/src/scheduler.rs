//! Background loops
//!
//! Drives the inventory refresh on a fixed period and sweeps the ledger for
//! pending actions at startup and, optionally, on a second period. Both
//! loops stop when the shutdown channel fires.

use crate::error::ValidationError;
use crate::health::{components, HealthRegistry};
use crate::idempotency::{IdempotencyEngine, RecoveryHandler};
use crate::inventory::{InventoryPipeline, RefreshOutcome};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the background loops
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Inventory refresh period (default: 5 minutes)
    pub refresh_interval: Duration,
    /// Period of the recurring recovery sweep; `None` runs it only at startup
    pub recovery_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            recovery_interval: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.refresh_interval.is_zero() {
            return Err(ValidationError::InvalidConfig(
                "refresh interval must be greater than zero".to_string(),
            ));
        }
        if self.recovery_interval.is_some_and(|d| d.is_zero()) {
            return Err(ValidationError::InvalidConfig(
                "recovery interval must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Scheduler {
    pipeline: Arc<InventoryPipeline>,
    engine: IdempotencyEngine,
    recovery: Arc<dyn RecoveryHandler>,
    health: HealthRegistry,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<InventoryPipeline>,
        engine: IdempotencyEngine,
        recovery: Arc<dyn RecoveryHandler>,
        health: HealthRegistry,
        config: SchedulerConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            pipeline,
            engine,
            recovery,
            health,
            config,
        })
    }

    /// Run until `shutdown` fires.
    ///
    /// The recovery sweep runs once before the first refresh. The first
    /// refresh is immediate; a refresh that overruns its period delays the
    /// next tick instead of bursting.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            refresh_interval_secs = self.config.refresh_interval.as_secs(),
            recovery_interval_secs = self.config.recovery_interval.map(|d| d.as_secs()),
            "Starting scheduler"
        );
        self.health.set_healthy(components::SCHEDULER).await;

        self.recover().await;

        let mut refresh_ticker = interval(self.config.refresh_interval);
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut recovery_ticker = self.config.recovery_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        let mut refresh_count = 0u64;
        loop {
            tokio::select! {
                _ = refresh_ticker.tick() => {
                    refresh_count += 1;
                    match self.pipeline.refresh().await {
                        RefreshOutcome::Published { .. } => {
                            debug!(refresh_count, "Scheduled refresh complete");
                        }
                        RefreshOutcome::AlreadyRunning => {
                            debug!(refresh_count, "Scheduled refresh skipped, another refresh in progress");
                        }
                        RefreshOutcome::KeptStale { error } => {
                            debug!(refresh_count, code = error.code(), "Scheduled refresh kept stale snapshot");
                        }
                    }
                }
                _ = next_tick(&mut recovery_ticker) => {
                    self.recover().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
            }
        }

        self.health
            .set_unhealthy(components::SCHEDULER, "scheduler stopped")
            .await;
    }

    /// One recovery sweep; the ledger health follows its outcome
    async fn recover(&self) {
        match self.engine.resume_pending_tasks(self.recovery.as_ref()).await {
            Ok(summary) => {
                if summary.unrecoverable > 0 || summary.integrity_violations > 0 {
                    warn!(
                        unrecoverable = summary.unrecoverable,
                        integrity_violations = summary.integrity_violations,
                        "Recovery sweep left actions unresolved"
                    );
                }
                self.health.set_healthy(components::LEDGER).await;
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "Recovery sweep aborted");
                self.health
                    .set_unhealthy(components::LEDGER, format!("recovery sweep failed: {}", e))
                    .await;
            }
        }
    }
}

/// Tick of an optional interval; never resolves when absent
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Builder for the scheduler
pub struct SchedulerBuilder {
    pipeline: Option<Arc<InventoryPipeline>>,
    engine: Option<IdempotencyEngine>,
    recovery: Option<Arc<dyn RecoveryHandler>>,
    health: HealthRegistry,
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            pipeline: None,
            engine: None,
            recovery: None,
            health: HealthRegistry::new(),
            config: SchedulerConfig::default(),
        }
    }

    pub fn pipeline(mut self, pipeline: Arc<InventoryPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn engine(mut self, engine: IdempotencyEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn recovery_handler(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.recovery = Some(handler);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.config.refresh_interval = interval;
        self
    }

    /// Enable the recurring recovery sweep
    pub fn recovery_interval(mut self, interval: Duration) -> Self {
        self.config.recovery_interval = Some(interval);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let pipeline = self
            .pipeline
            .ok_or_else(|| anyhow::anyhow!("Inventory pipeline is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Idempotency engine is required"))?;
        let recovery = self
            .recovery
            .ok_or_else(|| anyhow::anyhow!("Recovery handler is required"))?;

        Scheduler::new(pipeline, engine, recovery, self.health, self.config).map_err(anyhow::Error::from)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
