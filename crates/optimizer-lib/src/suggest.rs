//! Optimization suggestions
//!
//! [`SuggestionPort`] is the narrow contract an external AI orchestrator
//! implements. [`RuleBasedSuggester`] answers it with a fixed threshold
//! table, evaluated in order with the first match winning:
//!
//! | Condition                       | Action              | Savings | Priority |
//! |---------------------------------|---------------------|---------|----------|
//! | stopped                         | terminate_if_unused | 100%    | high     |
//! | cpu < 20 and memory < 30        | resize_down         | 50%     | high     |
//! | cpu < 40 and memory < 50        | rightsize           | 25%     | medium   |

use crate::models::{CanonicalResource, Priority, SuggestedAction, Suggestion};
use async_trait::async_trait;

/// Produces at most one suggestion per resource
#[async_trait]
pub trait SuggestionPort: Send + Sync {
    async fn suggest(&self, resource: &CanonicalResource) -> anyhow::Result<Option<Suggestion>>;
}

/// Utilization thresholds, in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuggestionThresholds {
    pub resize_down_cpu: f64,
    pub resize_down_memory: f64,
    pub rightsize_cpu: f64,
    pub rightsize_memory: f64,
}

impl Default for SuggestionThresholds {
    fn default() -> Self {
        Self {
            resize_down_cpu: 20.0,
            resize_down_memory: 30.0,
            rightsize_cpu: 40.0,
            rightsize_memory: 50.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleBasedSuggester {
    thresholds: SuggestionThresholds,
}

impl RuleBasedSuggester {
    pub fn new(thresholds: SuggestionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn derive(&self, resource: &CanonicalResource) -> Option<Suggestion> {
        let t = &self.thresholds;
        let (action, fraction, priority) = if resource.is_stopped() {
            (SuggestedAction::TerminateIfUnused, 1.0, Priority::High)
        } else if resource.is_underutilized(t.resize_down_cpu, t.resize_down_memory) {
            (SuggestedAction::ResizeDown, 0.5, Priority::High)
        } else if resource.is_underutilized(t.rightsize_cpu, t.rightsize_memory) {
            (SuggestedAction::Rightsize, 0.25, Priority::Medium)
        } else {
            return None;
        };

        Some(Suggestion {
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type.clone(),
            provider: resource.provider,
            region: resource.region.clone(),
            current_cost: resource.cost_per_month,
            cpu_usage: resource.cpu_usage,
            memory_usage: resource.memory_usage,
            action,
            estimated_savings: (resource.cost_per_month * fraction).max(0.0),
            priority,
            reason: reason(action, resource.cpu_usage, resource.memory_usage),
        })
    }
}

#[async_trait]
impl SuggestionPort for RuleBasedSuggester {
    async fn suggest(&self, resource: &CanonicalResource) -> anyhow::Result<Option<Suggestion>> {
        Ok(self.derive(resource))
    }
}

fn reason(action: SuggestedAction, cpu: f64, memory: f64) -> String {
    match action {
        SuggestedAction::TerminateIfUnused => "Resource is stopped and incurring costs".to_string(),
        SuggestedAction::ResizeDown => format!(
            "Very low utilization (CPU {:.1}%, memory {:.1}%) - consider significant downsizing",
            cpu, memory
        ),
        SuggestedAction::Rightsize => format!(
            "Low utilization (CPU {:.1}%, memory {:.1}%) - consider rightsizing",
            cpu, memory
        ),
    }
}

/// Filter for suggestion listings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SuggestionFilter {
    pub action: Option<SuggestedAction>,
    pub min_savings: Option<f64>,
}

impl SuggestionFilter {
    pub fn matches(&self, suggestion: &Suggestion) -> bool {
        self.action.map_or(true, |action| suggestion.action == action)
            && self
                .min_savings
                .map_or(true, |min| suggestion.estimated_savings >= min)
    }

    pub fn apply(&self, suggestions: &[Suggestion]) -> Vec<Suggestion> {
        suggestions.iter().filter(|s| self.matches(s)).cloned().collect()
    }
}

pub fn total_savings(suggestions: &[Suggestion]) -> f64 {
    suggestions.iter().map(|s| s.estimated_savings).sum()
}
