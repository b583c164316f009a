//! Run context for a single orchestrator invocation.

mod run;

pub use run::{RunContext, StageResult, StageResults};
