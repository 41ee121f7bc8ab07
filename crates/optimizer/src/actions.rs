//! Optimization actions triggered through the dashboard

use anyhow::{Context, Result};
use optimizer_lib::cloud::{CloudAdapter, OptimizationAction};
use optimizer_lib::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// What gets checksummed and stored in the ledger for one action.
///
/// Risk is not part of the payload, so a replay at a different risk maps to
/// the same ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub action: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl ActionPayload {
    /// Check the payload describes an action the adapter can apply
    pub fn validate(&self) -> Result<OptimizationAction, ValidationError> {
        if self.resource_id.trim().is_empty() {
            return Err(ValidationError::InvalidPayload(
                "resource_id must not be empty".to_string(),
            ));
        }
        self.action.parse()
    }

    pub fn to_value(&self) -> Value {
        let mut value = Map::new();
        value.insert("action".to_string(), Value::String(self.action.clone()));
        value.insert("resource_id".to_string(), Value::String(self.resource_id.clone()));
        if !self.params.is_empty() {
            value.insert("params".to_string(), Value::Object(self.params.clone()));
        }
        Value::Object(value)
    }
}

/// Look the resource up and apply `action` to it, returning its id
pub async fn apply(
    adapter: Arc<dyn CloudAdapter>,
    resource_id: String,
    action: OptimizationAction,
) -> Result<String> {
    let resource = adapter
        .get_resource(&resource_id)
        .await
        .with_context(|| format!("failed to look up resource {}", resource_id))?;

    let savings = adapter
        .apply_optimization(&resource, action)
        .await
        .with_context(|| format!("failed to apply {} to {}", action, resource_id))?;

    info!(
        resource_id = %resource.id,
        action = %action,
        estimated_savings = savings,
        "Optimization applied"
    );
    Ok(resource.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimizer_lib::cloud::{create_adapter, AdapterConfig};
    use serde_json::json;

    fn payload(action: &str, resource_id: &str) -> ActionPayload {
        ActionPayload {
            action: action.to_string(),
            resource_id: resource_id.to_string(),
            params: Map::new(),
        }
    }

    #[test]
    fn test_validation() {
        assert_eq!(payload("stop", "i-1").validate().unwrap(), OptimizationAction::Stop);
        assert!(matches!(
            payload("explode", "i-1").validate(),
            Err(ValidationError::UnknownAction(_))
        ));
        assert!(matches!(
            payload("stop", "  ").validate(),
            Err(ValidationError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_value_matches_stored_text() {
        let mut p = payload("resize_down", "db-prod-01");
        assert_eq!(p.to_value(), json!({"action": "resize_down", "resource_id": "db-prod-01"}));

        p.params.insert("new_type".to_string(), json!("db.m5.large"));
        let value = p.to_value();
        let parsed: ActionPayload = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(parsed, p);
        assert_eq!(value["params"]["new_type"], "db.m5.large");
    }

    #[tokio::test]
    async fn test_apply_against_simulated_cloud() {
        let adapter = create_adapter(AdapterConfig::default()).unwrap();

        let id = apply(adapter.clone(), "web-prod-01".to_string(), OptimizationAction::Rightsize)
            .await
            .unwrap();
        assert_eq!(id, "web-prod-01");

        let err = apply(adapter, "i-missing".to_string(), OptimizationAction::Stop)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("i-missing"));
    }
}
