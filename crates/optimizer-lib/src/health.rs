//! Health tracking for the optimizer's long-running components
//!
//! Backs the `/healthz` and `/readyz` probes. Components report their own
//! status. The service becomes ready once the inventory pipeline has made
//! its first refresh attempt, successful or not, and stays ready while no
//! component is unhealthy. A degraded inventory (stale snapshot) is still
//! ready.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst, so the aggregate is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operating on stale data or with reduced capacity
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Aggregate health across every registered component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const INVENTORY: &str = "inventory";
    pub const LEDGER: &str = "ledger";
    pub const SCHEDULER: &str = "scheduler";
}

#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    inventory_attempted: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Record that the inventory pipeline finished a refresh attempt.
    ///
    /// Never reset: a later failed refresh degrades the inventory component
    /// instead of withdrawing readiness.
    pub fn mark_inventory_refreshed(&self) {
        self.inventory_attempted.store(true, Ordering::Release);
    }

    pub fn inventory_refreshed(&self) -> bool {
        self.inventory_attempted.load(Ordering::Acquire)
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.inventory_refreshed() {
            return ReadinessResponse {
                ready: false,
                reason: Some("inventory not yet refreshed".to_string()),
            };
        }

        let components = self.components.read().await;
        let unhealthy = components
            .iter()
            .find(|(_, health)| health.status == ComponentStatus::Unhealthy);

        match unhealthy {
            Some((name, health)) => ReadinessResponse {
                ready: false,
                reason: Some(match &health.message {
                    Some(message) => format!("{} unhealthy: {}", name, message),
                    None => format!("{} unhealthy", name),
                }),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::INVENTORY).await;
        registry.register(components::LEDGER).await;

        registry.set_degraded(components::INVENTORY, "serving stale snapshot").await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::INVENTORY].message.as_deref(),
            Some("serving stale snapshot")
        );

        registry.set_unhealthy(components::LEDGER, "disk full").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_not_ready_before_first_refresh() {
        let registry = HealthRegistry::new();
        registry.register(components::LEDGER).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("inventory not yet refreshed"));
    }

    #[tokio::test]
    async fn test_stale_inventory_is_still_ready() {
        let registry = HealthRegistry::new();
        registry.register(components::LEDGER).await;
        registry.set_degraded(components::INVENTORY, "first refresh failed").await;
        registry.mark_inventory_refreshed();

        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unhealthy_component_withdraws_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::INVENTORY).await;
        registry.mark_inventory_refreshed();

        registry.set_unhealthy(components::SCHEDULER, "scheduler stopped").await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("scheduler unhealthy: scheduler stopped")
        );

        registry.set_healthy(components::SCHEDULER).await;
        assert!(registry.readiness().await.ready);
    }
}
