//! The orchestration engine.
//!
//! This module provides:
//! - Existence checks that make re-runs cheap
//! - The apply policy with a single lock-breaking escalation
//! - The cancellable readiness gate
//! - The orchestrator and its run report

mod escalation;
mod idempotency;
mod orchestrator;
mod readiness;
mod report;

pub use escalation::{decide, ApplyAttempt, ApplyReport, EscalationDecision, EscalationPolicy};
pub use idempotency::{ExistenceCheck, IdempotencyChecker};
pub use orchestrator::Orchestrator;
pub use readiness::{GateResult, ReadinessGate, DEFAULT_TICK};
pub use report::{FailureDetail, RunReport};
