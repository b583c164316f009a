//! Core domain model types for deployflow.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - Classified backend outcomes and responses
//! - Per-stage outcomes and lifecycle states
//! - Run modes

mod outcome;
mod status;

pub use outcome::{
    diagnostic_tail, BackendResponse, Outcome, DIAGNOSTIC_TAIL_CHARS, DIAGNOSTIC_TAIL_LINES,
};
pub use status::{RunMode, StageOutcome, StageState};
