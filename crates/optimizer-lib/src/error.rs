//! Error taxonomy shared across the optimizer
//!
//! Every error carries a stable code so callers can map it onto their own
//! status space (HTTP, exit codes) without matching on messages.

use thiserror::Error;

/// Malformed caller input; never recorded in the ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown optimization action: {0}")]
    UnknownAction(String),

    #[error("invalid risk value {0}: must be finite and non-negative")]
    InvalidRisk(f64),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        "VALIDATION_ERROR"
    }
}

/// Failure talking to a cloud provider
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// Rate limits, timeouts and other conditions worth retrying next tick
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Authentication failures and other conditions that will not heal
    #[error("permanent provider error: {0}")]
    Permanent(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AdapterError {
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Transient(_) => "ADAPTER_TRANSIENT",
            AdapterError::Permanent(_) => "ADAPTER_PERMANENT",
            AdapterError::NotFound(_) => "NOT_FOUND",
            AdapterError::NotSupported(_) => "NOT_SUPPORTED",
            AdapterError::Validation(e) => e.code(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// Persistence failure in the idempotency ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("ledger record not found: {0}")]
    NotFound(String),

    /// A pending or completed row already exists for the checksum
    #[error("checksum {0} already has an active ledger record")]
    Conflict(String),

    #[error("invalid ledger transition for {request_id}: status is {status}")]
    InvalidTransition { request_id: String, status: String },

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        "LEDGER_ERROR"
    }
}

/// Errors crossing the idempotency engine boundary
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("integrity violation: checksum mismatch for task {request_id}")]
    IntegrityViolation { request_id: String },

    #[error("action {request_id} failed: {message}")]
    Execution { request_id: String, message: String },

    #[error("an identical action is already running (checksum {checksum})")]
    InProgress { checksum: String },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(e) => e.code(),
            EngineError::Ledger(e) => e.code(),
            EngineError::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            EngineError::Execution { .. } => "EXECUTION_FAILURE",
            EngineError::InProgress { .. } => "IN_PROGRESS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ValidationError::UnknownProvider("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(AdapterError::Transient("slow".into()).code(), "ADAPTER_TRANSIENT");
        assert_eq!(AdapterError::NotFound("i-1".into()).code(), "NOT_FOUND");
        assert_eq!(
            AdapterError::from(ValidationError::UnknownAction("x".into())).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            EngineError::IntegrityViolation { request_id: "r".into() }.code(),
            "INTEGRITY_VIOLATION"
        );
        assert_eq!(
            EngineError::from(LedgerError::NotFound("r".into())).code(),
            "LEDGER_ERROR"
        );
        assert_eq!(
            EngineError::InProgress { checksum: "c".into() }.code(),
            "IN_PROGRESS"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(AdapterError::Transient("rate limited".into()).is_transient());
        assert!(!AdapterError::Permanent("bad credentials".into()).is_transient());
    }
}
