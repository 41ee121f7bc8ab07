//! Paginated inventory with pooled metric enrichment
//!
//! Implements the fetch path shared by every provider:
//! 1. page through the compute and storage listings into a bounded buffer
//! 2. hand the buffered resources to a fixed pool of workers over a closed
//!    job channel
//! 3. each worker queries the resource's metrics in parallel and publishes
//!    the enriched record on a result channel
//! 4. the collector drains the result channel until every worker is done

use super::{AdapterConfig, CloudAdapter, OptimizationAction};
use crate::error::{AdapterError, ValidationError};
use crate::models::CanonicalResource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One page of a provider listing
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub resources: Vec<CanonicalResource>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    CpuUtilization,
    MemoryUtilization,
    NetworkIn,
    NetworkOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Average,
    Sum,
}

/// A single metric-statistics request
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub resource_id: String,
    pub metric: MetricName,
    pub statistic: Statistic,
    pub period: Duration,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Low-level provider API a [`PagedAdapter`] is built on
#[async_trait]
pub trait ProviderClient: Send + Sync + 'static {
    /// One page of compute instances; `None` token requests the first page
    async fn list_compute(&self, page_token: Option<String>) -> Result<ResourcePage, AdapterError>;

    /// One page of storage resources
    async fn list_storage(&self, page_token: Option<String>) -> Result<ResourcePage, AdapterError>;

    /// Latest datapoint for a metric, `None` when the provider has no data
    async fn metric_statistics(&self, query: &MetricQuery) -> Result<Option<f64>, AdapterError>;

    /// Describe a single resource without metrics
    async fn describe(&self, id: &str) -> Result<CanonicalResource, AdapterError>;

    /// Perform a mutating action against the provider
    async fn execute_action(&self, id: &str, action: OptimizationAction) -> Result<(), AdapterError>;

    fn spot_price(&self, zone: &str, instance_type: &str) -> Result<f64, AdapterError>;

    fn zones(&self) -> Result<Vec<String>, AdapterError>;
}

#[derive(Debug, Clone, Copy)]
enum Listing {
    Compute,
    Storage,
}

/// Cloud adapter over any [`ProviderClient`]
pub struct PagedAdapter<C: ProviderClient> {
    client: Arc<C>,
    config: AdapterConfig,
}

impl<C: ProviderClient> PagedAdapter<C> {
    pub fn new(client: Arc<C>, config: AdapterConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { client, config })
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Page through a listing into memory, failing if any page fails or the
    /// buffer limit is exceeded
    async fn paginate(&self, listing: Listing) -> Result<Vec<CanonicalResource>, AdapterError> {
        let mut buffered = Vec::new();
        let mut token = None;

        loop {
            let page = match listing {
                Listing::Compute => self.client.list_compute(token).await?,
                Listing::Storage => self.client.list_storage(token).await?,
            };
            buffered.extend(page.resources);

            if buffered.len() > self.config.max_buffered_resources {
                return Err(AdapterError::Permanent(format!(
                    "{:?} listing exceeds buffer limit of {} resources",
                    listing, self.config.max_buffered_resources
                )));
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!(listing = ?listing, count = buffered.len(), "Listing paginated");
        Ok(buffered)
    }

    /// Enrich resources with metrics on a bounded worker pool
    async fn enrich_all(&self, resources: Vec<CanonicalResource>) -> Vec<CanonicalResource> {
        let total = resources.len();
        if total == 0 {
            return Vec::new();
        }

        let (job_tx, job_rx) = mpsc::channel(total);
        for resource in resources {
            // capacity equals the job count, so this never waits
            if job_tx.send(resource).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel(total);
        let mut workers = JoinSet::new();
        let worker_count = self.config.worker_pool_size.min(total);

        for worker_id in 0..worker_count {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let client = Arc::clone(&self.client);
            let lookback = self.config.metric_lookback;

            workers.spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some(resource) = next else { break };

                    match enrich(client.as_ref(), resource, lookback).await {
                        Ok(enriched) => {
                            if results.send(enriched).await.is_err() {
                                break;
                            }
                        }
                        Err((id, e)) => {
                            warn!(worker_id, resource_id = %id, error = %e, "Dropping resource, metric enrichment failed");
                        }
                    }
                }
            });
        }
        drop(result_tx);

        let mut enriched = Vec::with_capacity(total);
        while let Some(resource) = result_rx.recv().await {
            enriched.push(resource);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Metric worker terminated abnormally");
            }
        }

        enriched
    }
}

#[async_trait]
impl<C: ProviderClient> CloudAdapter for PagedAdapter<C> {
    async fn fetch_resources(&self) -> Result<Vec<CanonicalResource>, AdapterError> {
        let start = Instant::now();

        let (compute, storage) = tokio::try_join!(
            self.paginate(Listing::Compute),
            self.paginate(Listing::Storage)
        )?;

        let listed = compute.len() + storage.len();
        let mut buffered = compute;
        buffered.extend(storage);

        let resources = self.enrich_all(buffered).await;

        info!(
            provider = %self.config.provider,
            region = %self.config.region,
            listed,
            enriched = resources.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetched resources"
        );
        Ok(resources)
    }

    async fn get_resource(&self, id: &str) -> Result<CanonicalResource, AdapterError> {
        let resource = self.client.describe(id).await?;
        enrich(self.client.as_ref(), resource, self.config.metric_lookback)
            .await
            .map_err(|(id, e)| AdapterError::Transient(format!("metrics unavailable for {}: {}", id, e)))
    }

    async fn apply_optimization(
        &self,
        resource: &CanonicalResource,
        action: OptimizationAction,
    ) -> Result<f64, AdapterError> {
        let savings = action.estimated_savings(resource.cost_per_month);

        if self.config.dry_run {
            info!(
                resource_id = %resource.id,
                action = %action,
                estimated_savings = savings,
                "Dry run, skipping provider mutation"
            );
            return Ok(savings);
        }

        self.client.execute_action(&resource.id, action).await?;
        info!(
            resource_id = %resource.id,
            action = %action,
            estimated_savings = savings,
            "Applied optimization"
        );
        Ok(savings)
    }

    fn spot_price(&self, zone: &str, instance_type: &str) -> Result<f64, AdapterError> {
        self.client.spot_price(zone, instance_type)
    }

    fn list_zones(&self) -> Result<Vec<String>, AdapterError> {
        self.client.zones()
    }
}

/// Query a resource's metrics in parallel. Individual metric failures read
/// as zero; if every query fails the resource is rejected.
async fn enrich<C: ProviderClient>(
    client: &C,
    mut resource: CanonicalResource,
    lookback: Duration,
) -> Result<CanonicalResource, (String, AdapterError)> {
    let end = Utc::now();
    let start = end - chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::hours(1));

    let query = |metric, statistic, period_secs| MetricQuery {
        resource_id: resource.id.clone(),
        metric,
        statistic,
        period: Duration::from_secs(period_secs),
        start,
        end,
    };

    let cpu_query = query(MetricName::CpuUtilization, Statistic::Average, 300);
    let memory_query = query(MetricName::MemoryUtilization, Statistic::Average, 300);
    let net_in_query = query(MetricName::NetworkIn, Statistic::Sum, 3600);
    let net_out_query = query(MetricName::NetworkOut, Statistic::Sum, 3600);

    let (cpu, memory, network_in, network_out) = tokio::join!(
        client.metric_statistics(&cpu_query),
        client.metric_statistics(&memory_query),
        client.metric_statistics(&net_in_query),
        client.metric_statistics(&net_out_query),
    );

    let results = [
        (MetricName::CpuUtilization, cpu),
        (MetricName::MemoryUtilization, memory),
        (MetricName::NetworkIn, network_in),
        (MetricName::NetworkOut, network_out),
    ];

    if let Some(last_error) = all_failed(&results) {
        return Err((resource.id, last_error));
    }

    for (metric, result) in results {
        let value = match result {
            Ok(value) => value.unwrap_or(0.0),
            Err(e) => {
                debug!(resource_id = %resource.id, metric = ?metric, error = %e, "Metric query failed, using zero");
                0.0
            }
        };
        match metric {
            MetricName::CpuUtilization => resource.cpu_usage = value,
            MetricName::MemoryUtilization => resource.memory_usage = value,
            MetricName::NetworkIn => resource.network_in = value,
            MetricName::NetworkOut => resource.network_out = value,
        }
    }

    Ok(resource.normalized())
}

fn all_failed(results: &[(MetricName, Result<Option<f64>, AdapterError>)]) -> Option<AdapterError> {
    let mut last = None;
    for (_, result) in results {
        match result {
            Ok(_) => return None,
            Err(e) => last = Some(e.clone()),
        }
    }
    last
}
