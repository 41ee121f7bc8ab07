//! Cost anomaly detection and forecasting
//!
//! Keeps a sliding window of fleet cost observations. Mean and population
//! standard deviation over the window drive both the forecast and the
//! deviation test applied to the most recent week of points.

use crate::models::CostDataPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default number of retained observations
pub const DEFAULT_WINDOW: usize = 90;

/// Points examined by anomaly detection, and the trend comparison period
const RECENT_POINTS: usize = 7;

/// Lower bound on the standard deviation; equal-cost windows never alert
const STDDEV_FLOOR: f64 = 1e-9;

/// Relative change between consecutive weeks that counts as a trend
const TREND_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recent observation far from the window mean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAnomaly {
    pub timestamp: DateTime<Utc>,
    pub actual: f64,
    pub expected: f64,
    pub deviation: f64,
    pub severity: Severity,
}

/// Dashboard rendering of an anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&CostAnomaly> for AnomalyAlert {
    fn from(anomaly: &CostAnomaly) -> Self {
        Self {
            id: format!("cost-anomaly-{}", anomaly.timestamp.timestamp_millis()),
            severity: anomaly.severity,
            message: format!(
                "Fleet cost ${:.2} deviates ${:.2} from the expected ${:.2}",
                anomaly.actual, anomaly.deviation, anomaly.expected
            ),
            resource_id: None,
            timestamp: anomaly.timestamp,
        }
    }
}

/// Sliding-window cost model
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    window: usize,
    points: VecDeque<CostDataPoint>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl AnomalyDetector {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            points: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append an observation, evicting the oldest once the window is full
    pub fn add_point(&mut self, point: CostDataPoint) {
        self.points.push_back(point);
        while self.points.len() > self.window {
            self.points.pop_front();
        }
    }

    pub fn points(&self) -> impl Iterator<Item = &CostDataPoint> {
        self.points.iter()
    }

    /// Mean and population standard deviation of the window. The horizon
    /// does not change the projection; an empty window yields `(0, 0)`.
    pub fn predict(&self, _horizon: usize) -> (f64, f64) {
        if self.points.is_empty() {
            return (0.0, 0.0);
        }

        let n = self.points.len() as f64;
        let mean = self.points.iter().map(|p| p.cost).sum::<f64>() / n;
        let variance = self
            .points
            .iter()
            .map(|p| (p.cost - mean).powi(2))
            .sum::<f64>()
            / n;

        (mean, variance.sqrt())
    }

    /// Anomalies among the last week of points, oldest first
    pub fn detect_anomalies(&self) -> Vec<CostAnomaly> {
        if self.points.len() < RECENT_POINTS {
            return Vec::new();
        }

        let (mean, stddev) = self.predict(0);
        let stddev = stddev.max(STDDEV_FLOOR);

        self.points
            .iter()
            .skip(self.points.len() - RECENT_POINTS)
            .filter_map(|point| {
                let deviation = (point.cost - mean).abs();
                if deviation <= 2.0 * stddev {
                    return None;
                }
                let severity = if deviation > 3.0 * stddev {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Some(CostAnomaly {
                    timestamp: point.timestamp,
                    actual: point.cost,
                    expected: mean,
                    deviation,
                    severity,
                })
            })
            .collect()
    }

    /// Compare the average of the last week with the week before it
    pub fn trend(&self) -> Trend {
        if self.points.len() < 2 * RECENT_POINTS {
            return Trend::InsufficientData;
        }

        let costs: Vec<f64> = self.points.iter().map(|p| p.cost).collect();
        let split = costs.len() - RECENT_POINTS;
        let recent = average(&costs[split..]);
        let previous = average(&costs[split - RECENT_POINTS..split]);

        if recent > previous * (1.0 + TREND_THRESHOLD) {
            Trend::Increasing
        } else if recent < previous * (1.0 - TREND_THRESHOLD) {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Least-squares slope of cost against observation index
    pub fn linear_trend_slope(&self) -> f64 {
        let costs: Vec<f64> = self.points.iter().map(|p| p.cost).collect();
        linear_regression_slope(&costs)
    }

    /// Cost projected one observation past the window, never negative
    pub fn predict_next_cost(&self) -> f64 {
        let costs: Vec<f64> = self.points.iter().map(|p| p.cost).collect();
        match costs.len() {
            0 => 0.0,
            1 => costs[0],
            n => {
                let slope = linear_regression_slope(&costs);
                let mean_x = (n - 1) as f64 / 2.0;
                let intercept = average(&costs) - slope * mean_x;
                (intercept + slope * n as f64).max(0.0)
            }
        }
    }

    pub fn alerts(&self) -> Vec<AnomalyAlert> {
        self.detect_anomalies().iter().map(AnomalyAlert::from).collect()
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Slope of a least-squares fit of `values` against their index
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn detector_with(costs: &[f64]) -> AnomalyDetector {
        let start = Utc::now() - Duration::days(costs.len() as i64);
        let mut detector = AnomalyDetector::default();
        for (i, cost) in costs.iter().enumerate() {
            detector.add_point(CostDataPoint::new(start + Duration::days(i as i64), *cost));
        }
        detector
    }

    #[test]
    fn test_single_spike_is_high_severity() {
        let mut costs = vec![100.0; 20];
        costs.push(500.0);
        let detector = detector_with(&costs);

        let anomalies = detector.detect_anomalies();

        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::High);
        assert_eq!(anomalies[0].actual, 500.0);
        assert!((anomalies[0].expected - 2500.0 / 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_moderate_deviation_is_medium() {
        // Alternating 90/110 puts sigma near 10.6; 125 lands between 2 and 3 sigma
        let mut costs = Vec::new();
        for i in 0..40 {
            costs.push(if i % 2 == 0 { 90.0 } else { 110.0 });
        }
        costs.push(125.0);
        let detector = detector_with(&costs);

        let (mean, stddev) = detector.predict(0);
        let anomalies = detector.detect_anomalies();

        assert_eq!(anomalies.len(), 1);
        let deviation = anomalies[0].deviation;
        assert!(deviation > 2.0 * stddev && deviation <= 3.0 * stddev);
        assert_eq!(anomalies[0].severity, Severity::Medium);
        assert!((anomalies[0].expected - mean).abs() < 1e-12);
    }

    #[test]
    fn test_equal_costs_never_alert() {
        let detector = detector_with(&[42.0; 30]);
        assert!(detector.detect_anomalies().is_empty());
        assert_eq!(detector.predict(7), (42.0, 0.0));
    }

    #[test]
    fn test_needs_a_week_of_points() {
        let detector = detector_with(&[1.0, 1.0, 1.0, 1.0, 1.0, 900.0]);
        assert!(detector.detect_anomalies().is_empty());
        assert_eq!(AnomalyDetector::default().predict(1), (0.0, 0.0));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut detector = AnomalyDetector::new(3);
        for cost in [1.0, 2.0, 3.0, 4.0] {
            detector.add_point(CostDataPoint::new(Utc::now(), cost));
        }
        let costs: Vec<f64> = detector.points().map(|p| p.cost).collect();
        assert_eq!(costs, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_trend_labels() {
        assert_eq!(detector_with(&[100.0; 13]).trend(), Trend::InsufficientData);

        let mut rising = vec![100.0; 7];
        rising.extend([120.0; 7]);
        assert_eq!(detector_with(&rising).trend(), Trend::Increasing);

        let mut falling = vec![100.0; 7];
        falling.extend([85.0; 7]);
        assert_eq!(detector_with(&falling).trend(), Trend::Decreasing);

        let mut flat = vec![100.0; 7];
        flat.extend([105.0; 7]);
        assert_eq!(detector_with(&flat).trend(), Trend::Stable);
        assert_eq!(Trend::InsufficientData.to_string(), "insufficient_data");
    }

    #[test]
    fn test_forecast_follows_slope() {
        let detector = detector_with(&[10.0, 20.0, 30.0, 40.0]);
        assert!((detector.linear_trend_slope() - 10.0).abs() < 1e-9);
        assert!((detector.predict_next_cost() - 50.0).abs() < 1e-9);

        let shrinking = detector_with(&[30.0, 20.0, 10.0, 0.0]);
        assert_eq!(shrinking.predict_next_cost(), 0.0);
    }

    #[test]
    fn test_alert_rendering() {
        let mut costs = vec![100.0; 20];
        costs.push(500.0);
        let alerts = detector_with(&costs).alerts();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert!(alerts[0].id.starts_with("cost-anomaly-"));
        assert!(alerts[0].message.contains("$500.00"));
        assert!(alerts[0].resource_id.is_none());
    }
}
