//! Testing utilities for deployflow runs.
//!
//! This module provides:
//! - A scripted, call-recording backend
//! - Assertions over recorded stage outcomes

mod assertions;
mod mocks;

pub use assertions::{assert_no_failures, assert_outcome, assert_recorded_order};
pub use mocks::{BackendCall, Operation, ScriptedBackend};
