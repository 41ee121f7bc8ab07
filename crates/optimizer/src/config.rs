//! Optimizer configuration

use anyhow::{Context, Result};
use optimizer_lib::cloud::AdapterConfig;
use optimizer_lib::inventory::PipelineConfig;
use optimizer_lib::scheduler::SchedulerConfig;
use optimizer_lib::{Provider, ValidationError};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Optimizer configuration, read from unprefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    /// Report savings without mutating provider state
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    /// Inventory refresh period in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Deadline for one inventory fetch in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,

    /// Parallel metric-enrichment workers
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Sqlite ledger file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// Recurring recovery sweep period in seconds; 0 sweeps only at startup
    #[serde(default)]
    pub recovery_interval: u64,

    #[serde(default = "default_cloud_provider")]
    pub cloud_provider: String,

    #[serde(default = "default_cloud_region")]
    pub cloud_region: String,

    /// Dashboard, health and metrics port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Cost observations kept by the anomaly detector
    #[serde(default = "default_anomaly_window")]
    pub anomaly_window: usize,
}

fn default_dry_run() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_worker_pool_size() -> usize {
    10
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("./ledger.db")
}

fn default_cloud_provider() -> String {
    "aws".to_string()
}

fn default_cloud_region() -> String {
    "us-east-1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_anomaly_window() -> usize {
    90
}

impl OptimizerConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    /// Load configuration from an environment source and validate it
    pub fn from_environment(environment: config::Environment) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .context("failed to read environment")?
            .try_deserialize()
            .context("invalid optimizer configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.provider()?;
        self.adapter_config().validate()?;
        self.pipeline_config().validate()?;
        self.scheduler_config().validate()
    }

    pub fn provider(&self) -> Result<Provider, ValidationError> {
        self.cloud_provider.parse()
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig::default()
            .provider(self.provider().unwrap_or(Provider::Aws))
            .region(self.cloud_region.clone())
            .dry_run(self.dry_run)
            .worker_pool_size(self.worker_pool_size)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .fetch_timeout(Duration::from_secs(self.fetch_timeout))
            .anomaly_window(self.anomaly_window)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval),
            recovery_interval: (self.recovery_interval > 0)
                .then(|| Duration::from_secs(self.recovery_interval)),
        }
    }
}
