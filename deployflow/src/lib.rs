//! # Deployflow
//!
//! A staged deployment orchestrator for bundle-based infrastructure.
//!
//! Deployflow brings a set of interdependent bundles up (and down) in a
//! strict order, with support for:
//!
//! - **Dependency ordering**: one topological order drives deploy and its exact reverse drives teardown
//! - **Idempotent re-runs**: stages whose resources already exist are skipped
//! - **Lock escalation**: a held deployment lock earns exactly one lock-breaking retry
//! - **Readiness gating**: cancellable waits after starting a stage's workload
//! - **Event-driven observability**: every stage transition is reported through an event sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//! use std::sync::Arc;
//!
//! let config = DeployConfig::load(None, &std::env::current_dir()?)?;
//! let backend = Arc::new(config.backend(&config.host()?));
//! let orchestrator = Orchestrator::new(backend, config.stage_set()?)
//!     .with_gate(config.readiness_gate());
//!
//! let mut ctx = RunContext::new(&config.target);
//! let report = orchestrator.deploy(&mut ctx).await?;
//! std::process::exit(report.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod backup;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{Backend, CliBackend, Classifier, CommandTemplates};
    pub use crate::backup::{BackupSummary, ConfigBackup};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::DeployConfig;
    pub use crate::context::{RunContext, StageResults};
    pub use crate::core::{BackendResponse, Outcome, RunMode, StageOutcome, StageState};
    pub use crate::errors::{ConfigError, DeployError, DescriptorError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{Orchestrator, ReadinessGate, RunReport};
    pub use crate::stages::{ExistsSignal, StageDescriptor, StageSet, WorkloadTrigger};
}
