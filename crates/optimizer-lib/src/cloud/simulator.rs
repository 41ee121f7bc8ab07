//! In-memory provider used for simulation and tests
//!
//! Serves a seeded fleet through the same paginated client interface the real
//! providers implement, with switches for injecting listing and metric
//! failures.

use super::paged::{MetricName, MetricQuery, ProviderClient, ResourcePage};
use super::OptimizationAction;
use crate::error::AdapterError;
use crate::models::{resource_types, CanonicalResource, Provider, ResourceState};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Default page size for simulated listings
const DEFAULT_PAGE_SIZE: usize = 50;

/// Spot price returned for unknown zone/instance combinations
const DEFAULT_SPOT_PRICE: f64 = 0.0416;

/// Spot prices keyed by instance type
const SPOT_PRICES: &[(&str, f64)] = &[
    ("t3.micro", 0.0104),
    ("t3.small", 0.0208),
    ("t3.medium", 0.0416),
    ("m5.large", 0.0960),
];

/// Utilization the simulated monitoring service reports for a resource
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimulatedMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub network_in: f64,
    pub network_out: f64,
}

#[derive(Debug, Clone)]
struct SimulatedResource {
    resource: CanonicalResource,
    metrics: SimulatedMetrics,
}

/// Simulated provider backed by a concurrent map
pub struct SimulatedCloud {
    provider: Provider,
    region: String,
    account: String,
    resources: DashMap<String, SimulatedResource>,
    page_size: usize,
    fail_listing: AtomicBool,
    failing_metrics: DashSet<(String, MetricName)>,
    mutations: AtomicUsize,
}

impl SimulatedCloud {
    /// Create a simulated cloud with no resources
    pub fn empty(provider: Provider, region: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            provider,
            region: region.into(),
            account: account.into(),
            resources: DashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            fail_listing: AtomicBool::new(false),
            failing_metrics: DashSet::new(),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Create a simulated cloud with a small representative fleet
    pub fn seeded(provider: Provider, region: &str, account: &str) -> Self {
        let cloud = Self::empty(provider, region, account);
        let now = Utc::now();

        let fleet = [
            ("db-prod-01", resource_types::DATABASE_INSTANCE, "db.r5.xlarge", ResourceState::Running, 450.0, 30, (15.5, 22.0)),
            ("web-prod-01", resource_types::COMPUTE_INSTANCE, "m5.large", ResourceState::Running, 125.0, 15, (45.2, 67.8)),
            ("api-staging-02", resource_types::COMPUTE_INSTANCE, "t3.medium", ResourceState::Running, 160.0, 60, (32.0, 41.0)),
            ("batch-worker-03", resource_types::COMPUTE_INSTANCE, "m5.2xlarge", ResourceState::Stopped, 320.0, 90, (0.0, 0.0)),
            ("vol-archive-01", resource_types::STORAGE_VOLUME, "gp3", ResourceState::Available, 40.0, 200, (0.0, 3.0)),
        ];

        for (id, kind, size, state, monthly, age_days, (cpu, memory)) in fleet {
            let mut resource = CanonicalResource::new(id, kind, provider, region);
            resource.account = account.to_string();
            resource.state = state;
            resource.created_at = now - chrono::Duration::days(age_days);
            resource.cost_per_month = monthly;
            resource.cost_per_hour = monthly / 730.0;
            resource.encryption_enabled = kind != resource_types::COMPUTE_INSTANCE;
            resource.backup_enabled = kind == resource_types::DATABASE_INSTANCE;
            resource.tags.insert("environment".to_string(), environment_of(id).to_string());
            resource
                .metadata
                .insert("instance_type".to_string(), serde_json::Value::String(size.to_string()));

            cloud.insert(
                resource,
                SimulatedMetrics {
                    cpu,
                    memory,
                    network_in: cpu * 1_000.0,
                    network_out: cpu * 400.0,
                },
            );
        }

        cloud
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add or replace a resource
    pub fn insert(&self, mut resource: CanonicalResource, metrics: SimulatedMetrics) {
        resource.provider = self.provider;
        resource.region = self.region.clone();
        if resource.account.is_empty() {
            resource.account = self.account.clone();
        }
        self.resources
            .insert(resource.id.clone(), SimulatedResource { resource, metrics });
    }

    pub fn remove(&self, id: &str) -> bool {
        self.resources.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Make every listing call fail with a transient error
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_metric(&self, id: &str, metric: MetricName) {
        self.failing_metrics.insert((id.to_string(), metric));
    }

    pub fn fail_all_metrics(&self, id: &str) {
        for metric in [
            MetricName::CpuUtilization,
            MetricName::MemoryUtilization,
            MetricName::NetworkIn,
            MetricName::NetworkOut,
        ] {
            self.fail_metric(id, metric);
        }
    }

    pub fn clear_metric_failures(&self) {
        self.failing_metrics.clear();
    }

    /// Number of provider mutations performed
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn page(&self, storage: bool, page_token: Option<String>) -> Result<ResourcePage, AdapterError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AdapterError::Transient("simulated listing failure".to_string()));
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| AdapterError::Permanent(format!("invalid page token: {}", token)))?,
            None => 0,
        };

        let mut matching: Vec<CanonicalResource> = self
            .resources
            .iter()
            .filter(|entry| (entry.resource.resource_type == resource_types::STORAGE_VOLUME) == storage)
            .map(|entry| entry.resource.clone())
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));

        let end = (offset + self.page_size).min(matching.len());
        let resources = if offset < end {
            matching[offset..end].to_vec()
        } else {
            Vec::new()
        };
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(ResourcePage {
            resources,
            next_token,
        })
    }
}

#[async_trait]
impl ProviderClient for SimulatedCloud {
    async fn list_compute(&self, page_token: Option<String>) -> Result<ResourcePage, AdapterError> {
        self.page(false, page_token)
    }

    async fn list_storage(&self, page_token: Option<String>) -> Result<ResourcePage, AdapterError> {
        self.page(true, page_token)
    }

    async fn metric_statistics(&self, query: &MetricQuery) -> Result<Option<f64>, AdapterError> {
        if self
            .failing_metrics
            .contains(&(query.resource_id.clone(), query.metric))
        {
            return Err(AdapterError::Transient(format!(
                "simulated {:?} query failure for {}",
                query.metric, query.resource_id
            )));
        }

        let entry = self
            .resources
            .get(&query.resource_id)
            .ok_or_else(|| AdapterError::NotFound(query.resource_id.clone()))?;

        let metrics = entry.metrics;
        Ok(Some(match query.metric {
            MetricName::CpuUtilization => metrics.cpu,
            MetricName::MemoryUtilization => metrics.memory,
            MetricName::NetworkIn => metrics.network_in,
            MetricName::NetworkOut => metrics.network_out,
        }))
    }

    async fn describe(&self, id: &str) -> Result<CanonicalResource, AdapterError> {
        self.resources
            .get(id)
            .map(|entry| entry.resource.clone())
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))
    }

    async fn execute_action(&self, id: &str, action: OptimizationAction) -> Result<(), AdapterError> {
        let mut entry = self
            .resources
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(id.to_string()))?;

        if action.is_shutdown() {
            entry.resource.state = ResourceState::Stopped;
            entry.metrics = SimulatedMetrics::default();
        } else {
            let remaining = 1.0 - action.savings_fraction();
            entry.resource.cost_per_month *= remaining;
            entry.resource.cost_per_hour *= remaining;
        }

        self.mutations.fetch_add(1, Ordering::SeqCst);
        debug!(resource_id = %id, action = %action, "Simulated mutation applied");
        Ok(())
    }

    fn spot_price(&self, zone: &str, instance_type: &str) -> Result<f64, AdapterError> {
        if !zone.starts_with(&self.region) {
            return Err(AdapterError::NotFound(format!("zone {}", zone)));
        }
        Ok(SPOT_PRICES
            .iter()
            .find(|(kind, _)| *kind == instance_type)
            .map(|(_, price)| *price)
            .unwrap_or(DEFAULT_SPOT_PRICE))
    }

    fn zones(&self) -> Result<Vec<String>, AdapterError> {
        Ok(["a", "b", "c"]
            .iter()
            .map(|suffix| format!("{}{}", self.region, suffix))
            .collect())
    }
}

fn environment_of(id: &str) -> &'static str {
    if id.contains("prod") {
        "production"
    } else if id.contains("staging") {
        "staging"
    } else {
        "internal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_fleet_split_by_listing() {
        let cloud = SimulatedCloud::seeded(Provider::Aws, "us-east-1", "123");

        let compute = cloud.list_compute(None).await.unwrap();
        let storage = cloud.list_storage(None).await.unwrap();

        assert_eq!(compute.resources.len(), 4);
        assert_eq!(storage.resources.len(), 1);
        assert!(compute.next_token.is_none());
        assert_eq!(storage.resources[0].id, "vol-archive-01");
    }

    #[tokio::test]
    async fn test_pagination_tokens() {
        let cloud = SimulatedCloud::seeded(Provider::Aws, "us-east-1", "123").with_page_size(3);

        let first = cloud.list_compute(None).await.unwrap();
        assert_eq!(first.resources.len(), 3);
        let second = cloud.list_compute(first.next_token).await.unwrap();
        assert_eq!(second.resources.len(), 1);
        assert!(second.next_token.is_none());

        assert!(cloud.list_compute(Some("garbage".into())).await.is_err());
    }

    #[test]
    fn test_spot_prices_and_zones() {
        let cloud = SimulatedCloud::empty(Provider::Aws, "us-east-1", "123");

        assert_eq!(cloud.spot_price("us-east-1a", "t3.micro").unwrap(), 0.0104);
        assert_eq!(cloud.spot_price("us-east-1b", "x9.huge").unwrap(), DEFAULT_SPOT_PRICE);
        assert!(cloud.spot_price("eu-west-1a", "t3.micro").is_err());
        assert_eq!(cloud.zones().unwrap(), vec!["us-east-1a", "us-east-1b", "us-east-1c"]);
    }

    #[tokio::test]
    async fn test_resize_reduces_cost() {
        let cloud = SimulatedCloud::seeded(Provider::Aws, "us-east-1", "123");

        cloud
            .execute_action("web-prod-01", OptimizationAction::Resize)
            .await
            .unwrap();

        let resource = cloud.describe("web-prod-01").await.unwrap();
        assert_eq!(resource.cost_per_month, 62.5);
        assert_eq!(cloud.mutation_count(), 1);
    }
}
