//! Cloud provider adapters
//!
//! This module provides the capability set the inventory pipeline and the
//! action executor talk to. Provider SDKs plug in underneath through
//! [`ProviderClient`]; [`PagedAdapter`] turns any client into a full
//! [`CloudAdapter`] with paginated listing and pooled metric enrichment.

mod paged;
mod simulator;

pub use paged::{
    MetricName, MetricQuery, PagedAdapter, ProviderClient, ResourcePage, Statistic,
};
pub use simulator::{SimulatedCloud, SimulatedMetrics};

use crate::error::{AdapterError, ValidationError};
use crate::models::{CanonicalResource, Provider};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use async_trait::async_trait;

/// Default number of parallel metric-enrichment workers
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Default upper bound on resources buffered from a paginated listing
pub const DEFAULT_MAX_BUFFERED_RESOURCES: usize = 10_000;

/// Trait for cloud provider implementations
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// List every inventoried resource, enriched with recent utilization.
    /// Ordering of the returned resources is unspecified.
    async fn fetch_resources(&self) -> Result<Vec<CanonicalResource>, AdapterError>;

    /// Fetch a single resource by id
    async fn get_resource(&self, id: &str) -> Result<CanonicalResource, AdapterError>;

    /// Apply an optimization and report the monthly savings it yields.
    /// In dry-run mode nothing is mutated but the same figure is returned.
    async fn apply_optimization(
        &self,
        resource: &CanonicalResource,
        action: OptimizationAction,
    ) -> Result<f64, AdapterError>;

    /// Current spot price for an instance type in a zone
    fn spot_price(&self, zone: &str, instance_type: &str) -> Result<f64, AdapterError>;

    /// Availability zones in the adapter's region
    fn list_zones(&self) -> Result<Vec<String>, AdapterError>;
}

/// Mutating actions an adapter knows how to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizationAction {
    Stop,
    Terminate,
    TerminateIfUnused,
    Resize,
    ResizeDown,
    Rightsize,
}

impl OptimizationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationAction::Stop => "stop",
            OptimizationAction::Terminate => "terminate",
            OptimizationAction::TerminateIfUnused => "terminate_if_unused",
            OptimizationAction::Resize => "resize",
            OptimizationAction::ResizeDown => "resize_down",
            OptimizationAction::Rightsize => "rightsize",
        }
    }

    /// Fraction of the monthly cost the action removes
    pub fn savings_fraction(&self) -> f64 {
        match self {
            OptimizationAction::Stop
            | OptimizationAction::Terminate
            | OptimizationAction::TerminateIfUnused => 1.0,
            OptimizationAction::Resize | OptimizationAction::ResizeDown => 0.5,
            OptimizationAction::Rightsize => 0.25,
        }
    }

    /// Monthly savings for a resource costing `cost_per_month`
    pub fn estimated_savings(&self, cost_per_month: f64) -> f64 {
        (cost_per_month * self.savings_fraction()).max(0.0)
    }

    /// Whether the action shuts the resource down rather than shrinking it
    pub fn is_shutdown(&self) -> bool {
        self.savings_fraction() >= 1.0
    }
}

impl fmt::Display for OptimizationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(OptimizationAction::Stop),
            "terminate" => Ok(OptimizationAction::Terminate),
            "terminate_if_unused" => Ok(OptimizationAction::TerminateIfUnused),
            "resize" => Ok(OptimizationAction::Resize),
            "resize_down" => Ok(OptimizationAction::ResizeDown),
            "rightsize" => Ok(OptimizationAction::Rightsize),
            other => Err(ValidationError::UnknownAction(other.to_string())),
        }
    }
}

/// Configuration for a cloud adapter
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Provider label stamped on every resource
    pub provider: Provider,
    /// Region being inventoried
    pub region: String,
    /// Account id stamped on every resource
    pub account: String,
    /// When set, write paths report savings without mutating anything
    pub dry_run: bool,
    /// Parallel metric-enrichment workers (default: 10)
    pub worker_pool_size: usize,
    /// Maximum resources buffered from a listing before the fetch fails
    pub max_buffered_resources: usize,
    /// How far back metric queries look (default: 1 hour)
    pub metric_lookback: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Aws,
            region: "us-east-1".to_string(),
            account: "000000000000".to_string(),
            dry_run: true,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            max_buffered_resources: DEFAULT_MAX_BUFFERED_RESOURCES,
            metric_lookback: Duration::from_secs(60 * 60),
        }
    }
}

impl AdapterConfig {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn max_buffered_resources(mut self, limit: usize) -> Self {
        self.max_buffered_resources = limit;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_pool_size == 0 {
            return Err(ValidationError::InvalidConfig(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        if self.max_buffered_resources == 0 {
            return Err(ValidationError::InvalidConfig(
                "resource buffer limit must be at least 1".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(ValidationError::InvalidConfig("region must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Create the adapter for the configured provider.
///
/// The simulated cloud stands in for the provider SDK; a real SDK client is
/// wired in by implementing [`ProviderClient`] and wrapping it in
/// [`PagedAdapter`].
pub fn create_adapter(config: AdapterConfig) -> Result<Arc<dyn CloudAdapter>, ValidationError> {
    config.validate()?;
    let client = SimulatedCloud::seeded(config.provider, &config.region, &config.account);
    tracing::info!(
        provider = %config.provider,
        region = %config.region,
        dry_run = config.dry_run,
        workers = config.worker_pool_size,
        "Using simulated cloud adapter"
    );
    Ok(Arc::new(PagedAdapter::new(Arc::new(client), config)?))
}
