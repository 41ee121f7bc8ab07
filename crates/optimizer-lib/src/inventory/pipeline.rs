use super::cache::SnapshotCache;
use crate::analytics::{AnomalyAlert, AnomalyDetector, Trend, DEFAULT_WINDOW};
use crate::cloud::CloudAdapter;
use crate::error::{AdapterError, ValidationError};
use crate::health::{components, HealthRegistry};
use crate::models::{CostDataPoint, DerivedMetrics, ResourceSnapshot, Suggestion};
use crate::observability::OptimizerMetrics;
use crate::suggest::{total_savings, SuggestionPort};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the inventory pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Deadline for one provider fetch (default: 2 minutes)
    pub fetch_timeout: Duration,
    /// Cost observations kept by the anomaly detector (default: 90)
    pub anomaly_window: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(120),
            anomaly_window: DEFAULT_WINDOW,
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn anomaly_window(mut self, window: usize) -> Self {
        self.anomaly_window = window;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fetch_timeout.is_zero() {
            return Err(ValidationError::InvalidConfig(
                "fetch timeout must be greater than zero".to_string(),
            ));
        }
        if self.anomaly_window == 0 {
            return Err(ValidationError::InvalidConfig(
                "anomaly window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Suggestions derived from one snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuggestionSet {
    pub suggestions: Vec<Suggestion>,
    pub total_potential_savings: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Result of one refresh attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A new snapshot and its derived caches were published
    Published {
        resources: usize,
        suggestions: usize,
        anomalies: usize,
    },
    /// Another refresh held the mutex; nothing was done
    AlreadyRunning,
    /// The fetch failed and the previous snapshot was kept
    KeptStale { error: AdapterError },
}

/// Refreshes the resource snapshot and the caches derived from it.
///
/// Each cache is swapped whole under its own lock. Refreshes are serialized
/// by a mutex; a refresh that finds it held returns immediately.
pub struct InventoryPipeline {
    adapter: Arc<dyn CloudAdapter>,
    suggester: Arc<dyn SuggestionPort>,
    config: PipelineConfig,
    health: HealthRegistry,
    metrics: Option<OptimizerMetrics>,
    snapshot: SnapshotCache<ResourceSnapshot>,
    derived: SnapshotCache<DerivedMetrics>,
    suggestions: SnapshotCache<SuggestionSet>,
    detector: RwLock<AnomalyDetector>,
    refresh_lock: Mutex<()>,
}

impl InventoryPipeline {
    pub fn new(
        adapter: Arc<dyn CloudAdapter>,
        suggester: Arc<dyn SuggestionPort>,
        config: PipelineConfig,
        health: HealthRegistry,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            adapter,
            suggester,
            detector: RwLock::new(AnomalyDetector::new(config.anomaly_window)),
            config,
            health,
            metrics: None,
            snapshot: SnapshotCache::default(),
            derived: SnapshotCache::default(),
            suggestions: SnapshotCache::default(),
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn with_metrics(mut self, metrics: OptimizerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn adapter(&self) -> &Arc<dyn CloudAdapter> {
        &self.adapter
    }

    /// Fetch the inventory and republish every cache.
    ///
    /// A failed or timed-out fetch leaves all caches untouched.
    pub async fn refresh(&self) -> RefreshOutcome {
        let _guard = match self.refresh_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Refresh already in progress, skipping");
                return RefreshOutcome::AlreadyRunning;
            }
        };

        let start = Instant::now();
        let fetched = match tokio::time::timeout(self.config.fetch_timeout, self.adapter.fetch_resources()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Transient(format!(
                "resource fetch exceeded {}s deadline",
                self.config.fetch_timeout.as_secs_f64()
            ))),
        };

        let resources = match fetched {
            Ok(resources) => resources,
            Err(error) => {
                warn!(
                    error = %error,
                    code = error.code(),
                    transient = error.is_transient(),
                    "Inventory refresh failed, keeping previous snapshot"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_refresh_failures();
                }
                self.health
                    .set_degraded(components::INVENTORY, format!("serving stale snapshot: {}", error))
                    .await;
                self.health.mark_inventory_refreshed();
                return RefreshOutcome::KeptStale { error };
            }
        };

        let fetched_at = Utc::now();
        let snapshot = ResourceSnapshot::new(resources, fetched_at);
        let derived = DerivedMetrics::compute(&snapshot.resources, fetched_at);

        let mut suggestions = Vec::new();
        for resource in &snapshot.resources {
            match self.suggester.suggest(resource).await {
                Ok(Some(suggestion)) => suggestions.push(suggestion),
                Ok(None) => {}
                Err(e) => warn!(resource_id = %resource.id, error = %e, "Suggestion failed, skipping resource"),
            }
        }

        let total_cost = derived.total_monthly_cost;
        let resource_count = snapshot.len();
        let suggestion_count = suggestions.len();
        let potential_savings = total_savings(&suggestions);

        self.snapshot.publish(snapshot);
        self.derived.publish(derived);
        self.suggestions.publish(SuggestionSet {
            suggestions,
            total_potential_savings: potential_savings,
            timestamp: Some(fetched_at),
        });

        let (anomalies, latest_is_anomalous, trend, forecast) = {
            let mut detector = self.detector.write().await;
            detector.add_point(CostDataPoint::new(fetched_at, total_cost));
            let detected = detector.detect_anomalies();
            (
                detected.len(),
                detected.iter().any(|a| a.timestamp == fetched_at),
                detector.trend(),
                detector.predict_next_cost(),
            )
        };

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_refresh_latency(elapsed.as_secs_f64());
            metrics.set_resources(resource_count);
            metrics.set_suggestions(suggestion_count, potential_savings);
            // Each observation is counted once, when it first lands
            if latest_is_anomalous {
                metrics.add_anomalies(1);
            }
        }
        self.health.set_healthy(components::INVENTORY).await;
        self.health.mark_inventory_refreshed();

        info!(
            resources = resource_count,
            suggestions = suggestion_count,
            anomalies,
            trend = %trend,
            total_monthly_cost = total_cost,
            forecast_monthly_cost = forecast,
            elapsed_ms = elapsed.as_millis() as u64,
            "Inventory refreshed"
        );

        RefreshOutcome::Published {
            resources: resource_count,
            suggestions: suggestion_count,
            anomalies,
        }
    }

    /// The current snapshot; empty until the first successful refresh
    pub fn snapshot(&self) -> Arc<ResourceSnapshot> {
        self.snapshot.read()
    }

    pub fn derived_metrics(&self) -> Arc<DerivedMetrics> {
        self.derived.read()
    }

    pub fn suggestions(&self) -> Arc<SuggestionSet> {
        self.suggestions.read()
    }

    /// Dashboard alerts for anomalies in the current cost window
    pub async fn anomalies(&self) -> Vec<AnomalyAlert> {
        self.detector.read().await.alerts()
    }

    pub async fn cost_trend(&self) -> Trend {
        self.detector.read().await.trend()
    }
}
