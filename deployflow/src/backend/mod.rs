//! Backend adapter boundary.
//!
//! The orchestrator reaches the external deployment tool only through the
//! [`Backend`] trait. Every call returns a [`BackendResponse`] whose
//! [`Outcome`](crate::core::Outcome) has already been classified, so no
//! other module parses backend text.

mod classify;
mod cli;

pub use classify::{ClassificationRule, Classifier, RuleKind};
pub use cli::{render_args, CliBackend, CommandTemplates, DEFAULT_PROGRAM};

use crate::context::RunContext;
use crate::core::BackendResponse;
use crate::stages::StageDescriptor;
use async_trait::async_trait;

/// Primitive operations offered by the deployment backend.
///
/// Each call is scoped by the stage's location and the run's target and
/// profile. Implementations never return `Err`: every failure is expressed
/// as a classified outcome carrying the raw diagnostic text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Dry-run check of the stage's declared configuration.
    async fn validate(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse;

    /// Reports currently deployed resources for the stage.
    async fn status(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse;

    /// Deploys the stage; `escalate` overrides conflicts and held locks.
    async fn apply(&self, stage: &StageDescriptor, ctx: &RunContext, escalate: bool) -> BackendResponse;

    /// Tears down the stage's resources.
    async fn destroy(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse;

    /// Starts a workload without waiting for it to finish.
    async fn trigger_workload(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        workload: &str,
    ) -> BackendResponse;

    /// Signals a running workload to stop.
    async fn stop_workload(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        workload: &str,
    ) -> BackendResponse;

    /// Releases a stale deployment lock.
    async fn release_lock(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse;
}
