//! Stage descriptors and stage sets.
//!
//! A stage is one deployable bundle with a position in the dependency
//! order. Descriptors are built once at startup and never mutated.

mod defaults;
mod descriptor;
mod set;

pub use defaults::{transit_stage_set, transit_stages, INGESTION_READINESS, PIPELINE_READINESS};
pub use descriptor::{ExistsSignal, StageDescriptor, WorkloadTrigger, NOT_DEPLOYED_MARKER};
pub use set::StageSet;
