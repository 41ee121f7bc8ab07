//! Core library of the cloud cost optimizer
//!
//! This crate provides the core functionality for:
//! - Cloud inventory collection behind a provider adapter
//! - Optimization suggestions and risk-ranked opportunities
//! - Cost anomaly detection
//! - Idempotent, crash-safe execution of mutating actions
//! - Health checks and observability

pub mod analytics;
pub mod cloud;
pub mod error;
pub mod health;
pub mod idempotency;
pub mod inventory;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod risk;
pub mod scheduler;
pub mod suggest;

pub use error::{AdapterError, EngineError, LedgerError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AuditLogger, AuditStatus, OptimizerMetrics};
