//! Idempotency engine
//!
//! Guards every mutating action with a content checksum recorded in the
//! ledger before the action runs. The flow for one call:
//! 1. checksum the canonical payload and look it up in the ledger
//! 2. short-circuit completed rows, resume pending ones, record new ones
//! 3. hold high-risk actions for approval
//! 4. re-verify the payload against the ledger row
//! 5. run the action and advance the row to completed or failed
//!
//! After a crash, [`IdempotencyEngine::resume_pending_tasks`] re-enters
//! step 3 for every row left pending.

mod engine;

pub use engine::{
    boxed_action, canonical_json, checksum, ActionFuture, BoxedAction, GuardedOutcome,
    IdempotencyEngine, RecoveredAction, RecoveryHandler, RecoverySummary, AWAITING_APPROVAL,
    GOVERNANCE_RISK_THRESHOLD,
};
