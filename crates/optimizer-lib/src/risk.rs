//! Risk scoring and opportunity ranking

use crate::models::Suggestion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Utilization snapshot the risk of an action is derived from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub impact: f64,
    pub risk: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScorer {
    pub default_confidence: f64,
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
        }
    }
}

impl RiskScorer {
    /// `risk = max(1, cpu, memory)`, `score = impact / risk * confidence`.
    /// The floor of 1 keeps the division finite.
    pub fn score(&self, impact: f64, metrics: &CloudMetrics) -> ScoreResult {
        let risk = 1.0_f64.max(metrics.cpu.max(metrics.memory));
        ScoreResult {
            score: impact / risk * self.default_confidence,
            impact,
            risk,
            confidence: self.default_confidence,
        }
    }
}

/// A suggestion with its risk-adjusted score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    #[serde(flatten)]
    pub suggestion: Suggestion,
    pub scoring: ScoreResult,
}

/// Score every suggestion, best first; ties go to the smaller resource id
pub fn rank_opportunities(suggestions: &[Suggestion], scorer: &RiskScorer) -> Vec<Opportunity> {
    let now = Utc::now();
    let mut ranked: Vec<Opportunity> = suggestions
        .iter()
        .map(|suggestion| {
            let metrics = CloudMetrics {
                cpu: suggestion.cpu_usage,
                memory: suggestion.memory_usage,
                measured_at: now,
            };
            Opportunity {
                scoring: scorer.score(suggestion.estimated_savings, &metrics),
                suggestion: suggestion.clone(),
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.scoring
            .score
            .partial_cmp(&a.scoring.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.suggestion.resource_id.cmp(&b.suggestion.resource_id))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Provider, SuggestedAction};

    fn metrics(cpu: f64, memory: f64) -> CloudMetrics {
        CloudMetrics {
            cpu,
            memory,
            measured_at: Utc::now(),
        }
    }

    fn suggestion(id: &str, savings: f64, cpu: f64, memory: f64) -> Suggestion {
        Suggestion {
            resource_id: id.to_string(),
            resource_type: "ec2".to_string(),
            provider: Provider::Aws,
            region: "us-east-1".to_string(),
            current_cost: savings * 2.0,
            cpu_usage: cpu,
            memory_usage: memory,
            action: SuggestedAction::ResizeDown,
            estimated_savings: savings,
            priority: Priority::High,
            reason: String::new(),
        }
    }

    #[test]
    fn test_score_formula() {
        let result = RiskScorer::default().score(100.0, &metrics(20.0, 40.0));
        assert_eq!(result.risk, 40.0);
        assert!((result.score - 2.0).abs() < 1e-12);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.impact, 100.0);
    }

    #[test]
    fn test_idle_metrics_floor_risk_at_one() {
        let result = RiskScorer::default().score(10.0, &metrics(0.0, 0.0));
        assert_eq!(result.risk, 1.0);
        assert!(result.score.is_finite());
        assert!((result.score - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_in_impact() {
        let scorer = RiskScorer::default();
        let m = metrics(35.0, 12.0);
        let mut previous = f64::MIN;
        for impact in [0.0, 0.5, 1.0, 10.0, 250.0, 1e6] {
            let score = scorer.score(impact, &m).score;
            assert!(score >= previous);
            assert!(score >= 0.0);
            previous = score;
        }
    }

    #[test]
    fn test_monotone_in_utilization() {
        let scorer = RiskScorer::default();
        let mut previous = f64::MAX;
        for load in [0.0, 0.5, 1.0, 5.0, 50.0, 100.0] {
            let score = scorer.score(100.0, &metrics(load, load / 2.0)).score;
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn test_ranking_order_and_ties() {
        let ranked = rank_opportunities(
            &[
                suggestion("b", 100.0, 50.0, 10.0),
                suggestion("a", 100.0, 50.0, 10.0),
                suggestion("c", 100.0, 10.0, 10.0),
            ],
            &RiskScorer::default(),
        );

        let ids: Vec<&str> = ranked.iter().map(|o| o.suggestion.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!((ranked[0].scoring.score - 8.0).abs() < 1e-12);
    }
}
