//! Scripted backend for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::backend::Backend;
use crate::context::RunContext;
use crate::core::{BackendResponse, Outcome};
use crate::stages::StageDescriptor;

/// Backend operations as seen by the scripted backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `validate`.
    Validate,
    /// `status`.
    Status,
    /// `apply` without escalation.
    Apply,
    /// `apply` with escalation.
    ApplyEscalated,
    /// `destroy`.
    Destroy,
    /// `trigger_workload`.
    Trigger,
    /// `stop_workload`.
    Stop,
    /// `release_lock`.
    ReleaseLock,
}

impl Operation {
    fn default_response(self) -> BackendResponse {
        match self {
            Self::Validate => BackendResponse::success("Validation OK!"),
            Self::Status => BackendResponse::success(""),
            Self::Apply | Self::ApplyEscalated | Self::ReleaseLock => {
                BackendResponse::success("Deployment complete!")
            }
            Self::Destroy => BackendResponse::success("Destroy complete!"),
            Self::Trigger => BackendResponse::success("Run URL: https://workspace.example/jobs/1/runs/1"),
            Self::Stop => BackendResponse::success(""),
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    /// Stage the call was scoped to.
    pub stage: String,
    /// Which operation ran.
    pub operation: Operation,
    /// Workload for trigger and stop calls.
    pub workload: Option<String>,
    /// Target from the run context.
    pub target: String,
    /// Profile from the run context.
    pub profile: Option<String>,
}

/// A backend that replays scripted responses and records every call.
///
/// Responses are queued per `(stage, operation)`. Once a queue is drained
/// the last scripted response repeats; unscripted calls get a plain
/// success.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<(String, Operation), VecDeque<BackendResponse>>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl ScriptedBackend {
    /// Creates a backend that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for a stage and operation.
    #[must_use]
    pub fn with_response(self, stage: &str, operation: Operation, response: BackendResponse) -> Self {
        self.push(stage, operation, response);
        self
    }

    /// Makes `status` report the stage as provisioned.
    #[must_use]
    pub fn with_present(self, stage: &StageDescriptor) -> Self {
        let output = stage.exists_signal.markers().join("\n");
        self.with_response(&stage.id, Operation::Status, BackendResponse::success(output))
    }

    /// Makes the plain apply of a stage hit a held lock.
    #[must_use]
    pub fn with_lock_conflict(self, stage: &str) -> Self {
        self.with_response(
            stage,
            Operation::Apply,
            BackendResponse::new(
                Outcome::Conflict { lock_held: true },
                "Error: deploy lock acquired by ci@example.com. Use --force-lock to override",
            ),
        )
    }

    /// Makes an operation fail with the given text.
    #[must_use]
    pub fn with_failure(self, stage: &str, operation: Operation, output: &str) -> Self {
        self.with_response(stage, operation, BackendResponse::failure(output))
    }

    /// Queues a response on a shared backend.
    pub fn push(&self, stage: &str, operation: Operation, response: BackendResponse) {
        self.scripts
            .lock()
            .entry((stage.to_string(), operation))
            .or_default()
            .push_back(response);
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Returns the stages an operation ran for, in call order.
    #[must_use]
    pub fn stages_for(&self, operation: Operation) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.stage.clone())
            .collect()
    }

    /// Counts calls of an operation for a stage.
    #[must_use]
    pub fn count(&self, stage: &str, operation: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.stage == stage && c.operation == operation)
            .count()
    }

    /// Counts mutating calls (apply, destroy, release) across all stages.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| {
                matches!(
                    c.operation,
                    Operation::Apply | Operation::ApplyEscalated | Operation::Destroy | Operation::ReleaseLock
                )
            })
            .count()
    }

    fn respond(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        operation: Operation,
        workload: Option<&str>,
    ) -> BackendResponse {
        self.calls.lock().push(BackendCall {
            stage: stage.id.clone(),
            operation,
            workload: workload.map(str::to_string),
            target: ctx.target.clone(),
            profile: ctx.profile.clone(),
        });

        let mut scripts = self.scripts.lock();
        match scripts.get_mut(&(stage.id.clone(), operation)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| operation.default_response()),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| operation.default_response()),
            None => operation.default_response(),
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn validate(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.respond(stage, ctx, Operation::Validate, None)
    }

    async fn status(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.respond(stage, ctx, Operation::Status, None)
    }

    async fn apply(&self, stage: &StageDescriptor, ctx: &RunContext, escalate: bool) -> BackendResponse {
        let operation = if escalate {
            Operation::ApplyEscalated
        } else {
            Operation::Apply
        };
        self.respond(stage, ctx, operation, None)
    }

    async fn destroy(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.respond(stage, ctx, Operation::Destroy, None)
    }

    async fn trigger_workload(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        workload: &str,
    ) -> BackendResponse {
        self.respond(stage, ctx, Operation::Trigger, Some(workload))
    }

    async fn stop_workload(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        workload: &str,
    ) -> BackendResponse {
        self.respond(stage, ctx, Operation::Stop, Some(workload))
    }

    async fn release_lock(&self, stage: &StageDescriptor, ctx: &RunContext) -> BackendResponse {
        self.respond(stage, ctx, Operation::ReleaseLock, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_calls_succeed() {
        let backend = ScriptedBackend::new();
        let stage = StageDescriptor::new("infra", "bundles/infra");
        let ctx = RunContext::new("dev");

        assert_eq!(backend.validate(&stage, &ctx).await.outcome, Outcome::Success);
        assert_eq!(backend.apply(&stage, &ctx, false).await.outcome, Outcome::Success);
        assert_eq!(backend.stages_for(Operation::Validate), vec!["infra"]);
        assert_eq!(backend.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_drains_then_repeats_last() {
        let backend = ScriptedBackend::new()
            .with_lock_conflict("sync")
            .with_failure("sync", Operation::Apply, "Error: quota");
        let stage = StageDescriptor::new("sync", "bundles/sync");
        let ctx = RunContext::new("dev");

        assert!(backend.apply(&stage, &ctx, false).await.outcome.is_conflict());
        let second = backend.apply(&stage, &ctx, false).await;
        let third = backend.apply(&stage, &ctx, false).await;
        assert_eq!(second, third);
        assert_eq!(second.output, "Error: quota");
        assert_eq!(backend.count("sync", Operation::Apply), 3);
    }

    #[tokio::test]
    async fn test_records_context_identity() {
        let backend = ScriptedBackend::new();
        let stage = StageDescriptor::new("job", "bundles/job");
        let ctx = RunContext::new("prod").with_profile("ops");

        backend.trigger_workload(&stage, &ctx, "ingest").await;
        let call = &backend.calls()[0];
        assert_eq!(call.target, "prod");
        assert_eq!(call.profile.as_deref(), Some("ops"));
        assert_eq!(call.workload.as_deref(), Some("ingest"));
    }
}
