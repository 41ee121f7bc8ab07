//! Cost analytics over the fleet's cost history

mod anomaly;

pub use anomaly::{
    linear_regression_slope, AnomalyAlert, AnomalyDetector, CostAnomaly, Severity, Trend,
    DEFAULT_WINDOW,
};
