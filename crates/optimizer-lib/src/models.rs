//! Core data models for the cost optimizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Resource type labels used by the adapters
pub mod resource_types {
    pub const COMPUTE_INSTANCE: &str = "ec2";
    pub const DATABASE_INSTANCE: &str = "rds";
    pub const VIRTUAL_MACHINE: &str = "vm";
    pub const STORAGE_VOLUME: &str = "storage";
}

/// CPU threshold (percent) below which a resource counts as underutilized
pub const UNDERUTILIZED_CPU_PERCENT: f64 = 30.0;

/// Memory threshold (percent) below which a resource counts as underutilized
pub const UNDERUTILIZED_MEMORY_PERCENT: f64 = 40.0;

/// Cloud provider a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "azure" => Ok(Provider::Azure),
            "gcp" => Ok(Provider::Gcp),
            other => Err(ValidationError::UnknownProvider(other.to_string())),
        }
    }
}

/// Lifecycle state reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Running,
    Stopped,
    Pending,
    Available,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Running => "running",
            ResourceState::Stopped => "stopped",
            ResourceState::Pending => "pending",
            ResourceState::Available => "available",
            ResourceState::Terminated => "terminated",
            ResourceState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-agnostic record of a cloud resource, its utilization and cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResource {
    // Identity
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub provider: Provider,
    pub region: String,
    pub account: String,

    // Lifecycle
    pub state: ResourceState,
    pub created_at: DateTime<Utc>,
    pub last_scanned_at: DateTime<Utc>,

    // Utilization (cpu/memory in percent)
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub network_in: f64,
    pub network_out: f64,
    pub disk_io: f64,

    // Cost
    pub cost_per_hour: f64,
    pub cost_per_month: f64,
    pub currency: String,

    // Security
    pub encryption_enabled: bool,
    pub publicly_accessible: bool,
    pub backup_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance_tags: Vec<String>,

    // SLO
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_target: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_actual: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_target_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_actual_ms: Option<u32>,

    // Relations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depended_by: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CanonicalResource {
    /// Minimal running resource; adapters fill in the rest
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        provider: Provider,
        region: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            provider,
            region: region.into(),
            account: String::new(),
            state: ResourceState::Running,
            created_at: now,
            last_scanned_at: now,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            network_in: 0.0,
            network_out: 0.0,
            disk_io: 0.0,
            cost_per_hour: 0.0,
            cost_per_month: 0.0,
            currency: "USD".to_string(),
            encryption_enabled: false,
            publicly_accessible: false,
            backup_enabled: false,
            compliance_tags: Vec::new(),
            availability_target: None,
            availability_actual: None,
            latency_target_ms: None,
            latency_actual_ms: None,
            depends_on: Vec::new(),
            depended_by: Vec::new(),
            tags: BTreeMap::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Clamp percentages into [0, 100] and replace negative or non-finite
    /// numerics with zero.
    pub fn normalized(mut self) -> Self {
        self.cpu_usage = clamp_percent(self.cpu_usage);
        self.memory_usage = clamp_percent(self.memory_usage);
        self.network_in = non_negative(self.network_in);
        self.network_out = non_negative(self.network_out);
        self.disk_io = non_negative(self.disk_io);
        self.cost_per_hour = non_negative(self.cost_per_hour);
        self.cost_per_month = non_negative(self.cost_per_month);
        self.availability_target = self.availability_target.map(clamp_percent);
        self.availability_actual = self.availability_actual.map(clamp_percent);
        self
    }

    pub fn is_stopped(&self) -> bool {
        self.state == ResourceState::Stopped
    }

    pub fn is_underutilized(&self, cpu_threshold: f64, memory_threshold: f64) -> bool {
        self.cpu_usage < cpu_threshold && self.memory_usage < memory_threshold
    }

    /// Monthly spend not backed by utilization
    pub fn monthly_waste(&self) -> f64 {
        let utilization = self.cpu_usage.max(self.memory_usage).min(100.0) / 100.0;
        self.cost_per_month * (1.0 - utilization)
    }

    /// Weighted efficiency score in [0, 100]
    pub fn efficiency_score(&self) -> f64 {
        let cpu = self.cpu_usage.min(100.0);
        let memory = self.memory_usage.min(100.0);
        let cost = if self.cpu_usage < 50.0 {
            self.cpu_usage * 2.0
        } else {
            100.0
        };
        cpu * 0.4 + memory * 0.3 + cost * 0.3
    }

    /// All required tags present, encryption and backups enabled
    pub fn is_compliant(&self, required_tags: &[&str]) -> bool {
        let tagged = required_tags
            .iter()
            .all(|required| self.compliance_tags.iter().any(|t| t == required));
        tagged && self.encryption_enabled && self.backup_enabled
    }

    /// Whether availability and latency meet their targets. Missing targets
    /// count as met; a target without a measurement does not.
    pub fn meets_slo(&self) -> bool {
        let availability_ok = match (self.availability_target, self.availability_actual) {
            (None, _) => true,
            (Some(target), Some(actual)) => actual >= target,
            (Some(_), None) => false,
        };
        let latency_ok = match (self.latency_target_ms, self.latency_actual_ms) {
            (None, _) => true,
            (Some(target), Some(actual)) => actual <= target,
            (Some(_), None) => false,
        };
        availability_ok && latency_ok
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Immutable inventory published atomically by the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub resources: Vec<CanonicalResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ResourceSnapshot {
    /// Build a snapshot, stamping every resource with the same scan time
    pub fn new(mut resources: Vec<CanonicalResource>, fetched_at: DateTime<Utc>) -> Self {
        for resource in &mut resources {
            resource.last_scanned_at = fetched_at;
        }
        Self {
            resources,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CanonicalResource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

/// Aggregates computed over a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub total_resources: usize,
    pub total_monthly_cost: f64,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub underutilized_count: usize,
    pub underutilized_percentage: f64,
    pub potential_monthly_savings: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DerivedMetrics {
    pub fn compute(resources: &[CanonicalResource], timestamp: DateTime<Utc>) -> Self {
        let total_resources = resources.len();
        if total_resources == 0 {
            return Self {
                timestamp: Some(timestamp),
                ..Default::default()
            };
        }

        let mut total_cost = 0.0;
        let mut cpu_sum = 0.0;
        let mut memory_sum = 0.0;
        let mut underutilized_count = 0;

        for resource in resources {
            total_cost += resource.cost_per_month;
            cpu_sum += resource.cpu_usage;
            memory_sum += resource.memory_usage;
            if resource.is_underutilized(UNDERUTILIZED_CPU_PERCENT, UNDERUTILIZED_MEMORY_PERCENT) {
                underutilized_count += 1;
            }
        }

        let count = total_resources as f64;
        let underutilized_percentage = underutilized_count as f64 / count * 100.0;

        Self {
            total_resources,
            total_monthly_cost: total_cost,
            avg_cpu: cpu_sum / count,
            avg_memory: memory_sum / count,
            underutilized_count,
            underutilized_percentage,
            potential_monthly_savings: total_cost * underutilized_percentage / 100.0,
            timestamp: Some(timestamp),
        }
    }
}

/// Remediation proposed for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    ResizeDown,
    Rightsize,
    TerminateIfUnused,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedAction::ResizeDown => "resize_down",
            SuggestedAction::Rightsize => "rightsize",
            SuggestedAction::TerminateIfUnused => "terminate_if_unused",
        }
    }
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestedAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resize_down" => Ok(SuggestedAction::ResizeDown),
            "rightsize" => Ok(SuggestedAction::Rightsize),
            "terminate_if_unused" => Ok(SuggestedAction::TerminateIfUnused),
            other => Err(ValidationError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Optimization suggestion keyed by resource id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub resource_id: String,
    pub resource_type: String,
    pub provider: Provider,
    pub region: String,
    pub current_cost: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub action: SuggestedAction,
    pub estimated_savings: f64,
    pub priority: Priority,
    pub reason: String,
}

/// Single observation of fleet cost
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostDataPoint {
    pub timestamp: DateTime<Utc>,
    pub cost: f64,
}

impl CostDataPoint {
    pub fn new(timestamp: DateTime<Utc>, cost: f64) -> Self {
        Self {
            timestamp,
            cost: non_negative(cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, cpu: f64, memory: f64, cost: f64) -> CanonicalResource {
        let mut r = CanonicalResource::new(id, resource_types::COMPUTE_INSTANCE, Provider::Aws, "us-east-1");
        r.cpu_usage = cpu;
        r.memory_usage = memory;
        r.cost_per_month = cost;
        r
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("AWS".parse::<Provider>().unwrap(), Provider::Aws);
        assert_eq!(" gcp ".parse::<Provider>().unwrap(), Provider::Gcp);
        assert!(matches!(
            "digitalocean".parse::<Provider>(),
            Err(ValidationError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_normalized_clamps_fields() {
        let mut r = resource("i-1", 140.0, -3.0, f64::NAN);
        r.network_in = f64::INFINITY;
        let r = r.normalized();
        assert_eq!(r.cpu_usage, 100.0);
        assert_eq!(r.memory_usage, 0.0);
        assert_eq!(r.cost_per_month, 0.0);
        assert_eq!(r.network_in, 0.0);
    }

    #[test]
    fn test_resource_json_omits_empty_optionals() {
        let r = resource("i-1", 10.0, 20.0, 50.0);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "ec2");
        assert_eq!(json["provider"], "aws");
        assert_eq!(json["state"], "running");
        assert!(json.get("tags").is_none());
        assert!(json.get("availability_target").is_none());
        assert!(json.get("depends_on").is_none());
    }

    #[test]
    fn test_unknown_state_deserializes() {
        let mut json = serde_json::to_value(resource("i-1", 1.0, 1.0, 1.0)).unwrap();
        json["state"] = serde_json::json!("rebooting");
        let r: CanonicalResource = serde_json::from_value(json).unwrap();
        assert_eq!(r.state, ResourceState::Unknown);
    }

    #[test]
    fn test_snapshot_stamps_scan_time() {
        let at = Utc::now();
        let snapshot = ResourceSnapshot::new(
            vec![resource("a", 1.0, 1.0, 1.0), resource("b", 1.0, 1.0, 1.0)],
            at,
        );
        assert!(snapshot.resources.iter().all(|r| r.last_scanned_at == at));
        assert_eq!(snapshot.fetched_at, Some(at));
    }

    #[test]
    fn test_derived_metrics() {
        let resources = vec![
            resource("a", 10.0, 20.0, 100.0),
            resource("b", 80.0, 70.0, 300.0),
        ];
        let metrics = DerivedMetrics::compute(&resources, Utc::now());
        assert_eq!(metrics.total_resources, 2);
        assert_eq!(metrics.total_monthly_cost, 400.0);
        assert_eq!(metrics.avg_cpu, 45.0);
        assert_eq!(metrics.avg_memory, 45.0);
        assert_eq!(metrics.underutilized_count, 1);
        assert_eq!(metrics.underutilized_percentage, 50.0);
        assert_eq!(metrics.potential_monthly_savings, 200.0);
    }

    #[test]
    fn test_derived_metrics_empty_snapshot() {
        let metrics = DerivedMetrics::compute(&[], Utc::now());
        assert_eq!(metrics.total_resources, 0);
        assert_eq!(metrics.avg_cpu, 0.0);
        assert!(metrics.timestamp.is_some());
    }

    #[test]
    fn test_resource_helpers() {
        let mut r = resource("db", 25.0, 10.0, 200.0);
        assert!(r.is_underutilized(30.0, 40.0));
        assert_eq!(r.monthly_waste(), 150.0);

        r.compliance_tags = vec!["pci".to_string()];
        r.encryption_enabled = true;
        assert!(!r.is_compliant(&["pci"]));
        r.backup_enabled = true;
        assert!(r.is_compliant(&["pci"]));
        assert!(!r.is_compliant(&["pci", "hipaa"]));

        assert!(r.meets_slo());
        r.availability_target = Some(99.9);
        assert!(!r.meets_slo());
        r.availability_actual = Some(99.95);
        assert!(r.meets_slo());
    }
}
