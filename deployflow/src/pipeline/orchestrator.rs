//! The staged deployment driver.
//!
//! One orchestrator owns the stage set, the backend and the readiness gate.
//! Every run takes the caller's [`RunContext`] by `&mut`, records one
//! outcome per stage it touched, and returns a [`RunReport`]. Stage failures
//! are data in the report; `Err` is reserved for runs that could not finish
//! (unknown stage, operator cancellation).

use super::escalation::EscalationPolicy;
use super::idempotency::IdempotencyChecker;
use super::readiness::ReadinessGate;
use super::report::RunReport;
use crate::backend::Backend;
use crate::backup::{BackupSummary, ConfigBackup};
use crate::cancellation::CancellationToken;
use crate::context::RunContext;
use crate::core::{Outcome, RunMode, StageOutcome, StageState};
use crate::errors::DeployError;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::stages::{StageDescriptor, StageSet};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives deploy, teardown and the auxiliary runs over a stage set.
pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    stages: StageSet,
    gate: ReadinessGate,
    backup: Option<ConfigBackup>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl Orchestrator {
    /// Creates an orchestrator with default gate, no backup and no events.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, stages: StageSet) -> Self {
        Self {
            backend,
            stages,
            gate: ReadinessGate::default(),
            backup: None,
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the readiness gate.
    #[must_use]
    pub fn with_gate(mut self, gate: ReadinessGate) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the configuration backup taken before the first mutation.
    #[must_use]
    pub fn with_backup(mut self, backup: ConfigBackup) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares a cancellation token with the caller.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the stage set.
    #[must_use]
    pub fn stages(&self) -> &StageSet {
        &self.stages
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// Validates every stage without mutating anything.
    pub async fn validate_all(&self, ctx: &mut RunContext) -> Result<RunReport, DeployError> {
        self.begin(RunMode::Validate, ctx);
        let stages: Vec<&StageDescriptor> = self.stages.deploy_order().collect();
        self.validate_stages(&stages, ctx).await?;
        Ok(self.finish(RunMode::Validate, ctx, None))
    }

    /// Deploys every stage in dependency order.
    ///
    /// Validation of all stages comes first; any validation failure ends the
    /// run before the first mutation. After that each stage goes through the
    /// existence check, the apply policy and its post-apply trigger. The
    /// first failed stage stops the run and the rest are recorded skipped.
    pub async fn deploy(&self, ctx: &mut RunContext) -> Result<RunReport, DeployError> {
        self.begin(RunMode::Deploy, ctx);
        let stages: Vec<&StageDescriptor> = self.stages.deploy_order().collect();

        if !self.validate_stages(&stages, ctx).await? {
            return Ok(self.finish(RunMode::Deploy, ctx, None));
        }
        let backup = self.take_backup(ctx).await;

        for (i, stage) in stages.iter().enumerate() {
            self.ensure_not_cancelled()?;
            if self.deploy_one(stage, ctx).await? {
                let reason = format!("upstream stage '{}' failed", stage.id);
                for rest in &stages[i + 1..] {
                    self.events.try_emit(
                        names::STAGE_SKIPPED,
                        Some(json!({ "stage": rest.id, "reason": reason })),
                    );
                    ctx.record(&rest.id, StageOutcome::skipped(reason.clone()));
                }
                break;
            }
        }

        Ok(self.finish(RunMode::Deploy, ctx, backup))
    }

    /// Deploys exactly one stage.
    ///
    /// Prerequisites are checked first; a missing one is a warning only.
    pub async fn deploy_stage(&self, id: &str, ctx: &mut RunContext) -> Result<RunReport, DeployError> {
        let stage = self.stage(id)?;
        self.begin(RunMode::DeployStage, ctx);

        if !self.validate_stages(&[stage], ctx).await? {
            return Ok(self.finish(RunMode::DeployStage, ctx, None));
        }
        let backup = self.take_backup(ctx).await;

        if !ctx.is_forced(stage.force) {
            self.check_prerequisites(stage, ctx).await;
        }

        self.ensure_not_cancelled()?;
        self.deploy_one(stage, ctx).await?;

        Ok(self.finish(RunMode::DeployStage, ctx, backup))
    }

    /// Tears down every stage in reverse dependency order.
    ///
    /// Failures are recorded and teardown continues with the next stage.
    pub async fn teardown(&self, stop_services: bool, ctx: &mut RunContext) -> Result<RunReport, DeployError> {
        self.begin(RunMode::Teardown, ctx);
        let stages: Vec<&StageDescriptor> = self.stages.teardown_order().collect();

        if stop_services {
            self.stop_workloads(&stages, ctx).await?;
        }
        for stage in stages {
            self.ensure_not_cancelled()?;
            let outcome = self.destroy_one(stage, ctx).await;
            ctx.record(&stage.id, outcome);
        }

        Ok(self.finish(RunMode::Teardown, ctx, None))
    }

    /// Tears down exactly one stage.
    pub async fn teardown_stage(
        &self,
        id: &str,
        stop_services: bool,
        ctx: &mut RunContext,
    ) -> Result<RunReport, DeployError> {
        let stage = self.stage(id)?;
        self.begin(RunMode::TeardownStage, ctx);

        if stop_services {
            self.stop_workloads(&[stage], ctx).await?;
        }
        self.ensure_not_cancelled()?;
        let outcome = self.destroy_one(stage, ctx).await;
        ctx.record(&stage.id, outcome);

        Ok(self.finish(RunMode::TeardownStage, ctx, None))
    }

    /// Releases stale deployment locks on every stage, best-effort.
    pub async fn clear_locks(&self, ctx: &mut RunContext) -> Result<RunReport, DeployError> {
        self.begin(RunMode::ClearLocks, ctx);

        for stage in self.stages.deploy_order() {
            self.ensure_not_cancelled()?;
            let response = self.backend.release_lock(stage, ctx).await;
            if response.outcome.is_apply_success() {
                info!(stage = %stage.id, "Deployment lock released");
                self.events
                    .try_emit(names::LOCK_RELEASED, Some(json!({ "stage": stage.id })));
            } else {
                warn!(stage = %stage.id, outcome = %response.outcome, "Could not release deployment lock");
                self.events.try_emit(
                    names::LOCK_RELEASE_FAILED,
                    Some(json!({ "stage": stage.id, "outcome": response.outcome })),
                );
            }
        }

        Ok(self.finish(RunMode::ClearLocks, ctx, None))
    }

    /// Starts every stage's workload and waits out its readiness budget.
    pub async fn start_services(&self, ctx: &mut RunContext) -> Result<RunReport, DeployError> {
        self.begin(RunMode::StartServices, ctx);

        for stage in self.stages.deploy_order() {
            if stage.post_apply_trigger.is_none() {
                continue;
            }
            self.ensure_not_cancelled()?;
            self.activate(stage, ctx).await?;
            self.transition(&stage.id, StageState::Done);
        }

        Ok(self.finish(RunMode::StartServices, ctx, None))
    }

    /// Sends a stop signal to every stage's workload, in reverse order.
    pub async fn stop_services(&self, ctx: &mut RunContext) -> Result<RunReport, DeployError> {
        self.begin(RunMode::StopServices, ctx);
        let stages: Vec<&StageDescriptor> = self.stages.teardown_order().collect();
        self.stop_workloads(&stages, ctx).await?;
        Ok(self.finish(RunMode::StopServices, ctx, None))
    }

    fn stage(&self, id: &str) -> Result<&StageDescriptor, DeployError> {
        self.stages
            .get(id)
            .ok_or_else(|| DeployError::UnknownStage(id.to_string()))
    }

    fn ensure_not_cancelled(&self) -> Result<(), DeployError> {
        if self.cancel.is_cancelled() {
            Err(self.cancelled())
        } else {
            Ok(())
        }
    }

    fn cancelled(&self) -> DeployError {
        let reason = self.cancel.reason().unwrap_or_else(|| "cancelled".to_string());
        warn!(%reason, "Run cancelled");
        DeployError::Cancelled(reason)
    }

    fn transition(&self, stage: &str, state: StageState) {
        debug!(stage, %state, "Stage state");
        self.events
            .try_emit(names::STAGE_STATE, Some(json!({ "stage": stage, "state": state })));
    }

    fn begin(&self, mode: RunMode, ctx: &RunContext) {
        info!(
            run_id = %ctx.run_id,
            %mode,
            target = %ctx.target,
            profile = ctx.profile().unwrap_or("-"),
            force = ctx.force,
            "Run started"
        );
        self.events.try_emit(
            names::RUN_STARTED,
            Some(json!({
                "run_id": ctx.run_id,
                "mode": mode,
                "target": ctx.target,
                "profile": ctx.profile,
                "force": ctx.force,
            })),
        );
    }

    fn finish(&self, mode: RunMode, ctx: &RunContext, backup: Option<BackupSummary>) -> RunReport {
        let report = RunReport::from_context(mode, ctx).with_backup(backup);
        match &report.failure {
            Some(failure) => error!(run_id = %ctx.run_id, %mode, stage = %failure.stage, reason = %failure.reason, "Run failed"),
            None => info!(run_id = %ctx.run_id, %mode, stages = report.results.len(), "Run finished"),
        }
        self.events.try_emit(
            names::RUN_FINISHED,
            Some(json!({
                "run_id": ctx.run_id,
                "mode": mode,
                "success": report.is_success(),
                "failed_stage": report.failure.as_ref().map(|f| f.stage.clone()),
            })),
        );
        report
    }

    /// Returns true when every stage passed validation.
    async fn validate_stages(
        &self,
        stages: &[&StageDescriptor],
        ctx: &mut RunContext,
    ) -> Result<bool, DeployError> {
        let mut all_valid = true;

        for stage in stages {
            self.ensure_not_cancelled()?;
            self.transition(&stage.id, StageState::Validating);
            let response = self.backend.validate(stage, ctx).await;

            if response.outcome.is_validation_success() {
                if response.outcome == Outcome::AuthRequired {
                    warn!(stage = %stage.id, "Validation needs credentials, accepting structural check");
                } else {
                    debug!(stage = %stage.id, "Validation passed");
                }
                self.events.try_emit(
                    names::STAGE_VALIDATED,
                    Some(json!({ "stage": stage.id, "outcome": response.outcome })),
                );
            } else {
                all_valid = false;
                error!(stage = %stage.id, outcome = %response.outcome, "Validation failed");
                self.events.try_emit(
                    names::STAGE_VALIDATION_FAILED,
                    Some(json!({ "stage": stage.id, "outcome": response.outcome })),
                );
                self.transition(&stage.id, StageState::Failed);
                ctx.record(
                    &stage.id,
                    StageOutcome::failed(
                        format!("validation {}", response.outcome),
                        response.diagnostic_tail(),
                    ),
                );
            }
        }

        if !all_valid {
            error!(run_id = %ctx.run_id, "Validation failed, nothing was deployed");
        }
        Ok(all_valid)
    }

    async fn take_backup(&self, ctx: &mut RunContext) -> Option<BackupSummary> {
        if ctx.backup_taken {
            return None;
        }
        let backup = self.backup.as_ref()?;
        let summary = backup.snapshot(self.events.as_ref()).await;
        ctx.backup_taken = true;
        Some(summary)
    }

    async fn check_prerequisites(&self, stage: &StageDescriptor, ctx: &RunContext) {
        let checker = IdempotencyChecker::new(self.backend.as_ref());

        for prerequisite in self.stages.prerequisites(&stage.id) {
            if prerequisite.exists_signal.is_empty() {
                debug!(stage = %stage.id, prerequisite = %prerequisite.id, "Prerequisite has no exists signal, not checked");
                continue;
            }
            if !checker.is_present(prerequisite, ctx).await {
                warn!(
                    stage = %stage.id,
                    prerequisite = %prerequisite.id,
                    "Prerequisite does not look deployed, continuing anyway"
                );
                self.events.try_emit(
                    names::PREREQUISITE_MISSING,
                    Some(json!({ "stage": stage.id, "prerequisite": prerequisite.id })),
                );
            }
        }
    }

    /// Runs one stage and records its outcome; returns true if it failed.
    ///
    /// The outcome is recorded before the trigger and readiness wait, so an
    /// applied stage stays in the results when the wait is cancelled.
    async fn deploy_one(&self, stage: &StageDescriptor, ctx: &mut RunContext) -> Result<bool, DeployError> {
        let timer = SpanTimer::start(format!("deploy:{}", stage.id));
        self.transition(&stage.id, StageState::CheckExistence);
        let check = IdempotencyChecker::new(self.backend.as_ref())
            .check(stage, ctx)
            .await;
        if check.should_skip() {
            info!(stage = %stage.id, "Already deployed, skipping");
            self.transition(&stage.id, StageState::Skip);
            self.events
                .try_emit(names::STAGE_EXISTS, Some(json!({ "stage": stage.id })));
            ctx.record(&stage.id, StageOutcome::AlreadyExists);
            return Ok(false);
        }

        self.transition(&stage.id, StageState::Applying);
        let escalate = ctx.is_forced(stage.force);
        info!(stage = %stage.id, escalate, "Deploying stage");
        self.events.try_emit(
            names::STAGE_STARTED,
            Some(json!({ "stage": stage.id, "escalate": escalate })),
        );

        let applied = EscalationPolicy::new(self.backend.as_ref(), self.events.as_ref())
            .apply(stage, ctx)
            .await;
        let outcome = applied.to_stage_outcome();

        if let StageOutcome::Failed { reason, diagnostic } = &outcome {
            error!(stage = %stage.id, %reason, elapsed_ms = timer.elapsed_ms(), "Stage failed");
            self.events.try_emit(
                names::STAGE_FAILED,
                Some(json!({ "stage": stage.id, "reason": reason, "diagnostic": diagnostic })),
            );
            self.transition(&stage.id, StageState::Failed);
        }
        if outcome.is_failure() {
            ctx.record(&stage.id, outcome);
            return Ok(true);
        }

        if outcome == StageOutcome::AlreadyExists {
            info!(stage = %stage.id, "Backend reports the stage already applied");
            self.transition(&stage.id, StageState::Skip);
            self.events
                .try_emit(names::STAGE_EXISTS, Some(json!({ "stage": stage.id })));
            ctx.record(&stage.id, outcome);
            return Ok(false);
        }

        info!(
            stage = %stage.id,
            escalated = applied.escalated(),
            elapsed_ms = timer.elapsed_ms(),
            "Stage deployed"
        );
        self.events.try_emit(
            names::STAGE_DEPLOYED,
            Some(json!({ "stage": stage.id, "escalated": applied.escalated() })),
        );

        ctx.record(&stage.id, outcome);

        self.activate(stage, ctx).await?;
        self.transition(&stage.id, StageState::Done);
        let span = timer.name().to_string();
        debug!(%span, elapsed_ms = timer.finish(), "Stage complete");
        Ok(false)
    }

    /// Fires the stage's workload trigger and waits for readiness.
    ///
    /// An unconfirmed trigger is a warning. A cancelled wait ends the run.
    async fn activate(&self, stage: &StageDescriptor, ctx: &RunContext) -> Result<(), DeployError> {
        let Some(trigger) = &stage.post_apply_trigger else {
            return Ok(());
        };

        self.transition(&stage.id, StageState::Triggering);
        let response = self
            .backend
            .trigger_workload(stage, ctx, &trigger.workload)
            .await;
        if response.outcome.is_apply_success() && trigger.is_confirmed_by(&response.output) {
            info!(stage = %stage.id, workload = %trigger.workload, "Workload started");
            self.events.try_emit(
                names::TRIGGER_STARTED,
                Some(json!({ "stage": stage.id, "workload": trigger.workload })),
            );
        } else {
            warn!(
                stage = %stage.id,
                workload = %trigger.workload,
                outcome = %response.outcome,
                "Workload start not confirmed, start it manually if needed"
            );
            self.events.try_emit(
                names::TRIGGER_UNCONFIRMED,
                Some(json!({
                    "stage": stage.id,
                    "workload": trigger.workload,
                    "diagnostic": response.diagnostic_tail(),
                })),
            );
        }

        if let Some(budget) = stage.readiness_wait {
            self.transition(&stage.id, StageState::AwaitingReadiness);
            let result = self
                .gate
                .wait(&stage.id, budget, &self.cancel, self.events.as_ref())
                .await;
            if !result.is_ready() {
                return Err(self.cancelled());
            }
        }
        Ok(())
    }

    async fn destroy_one(&self, stage: &StageDescriptor, ctx: &RunContext) -> StageOutcome {
        self.transition(&stage.id, StageState::Destroying);
        let response = self.backend.destroy(stage, ctx).await;

        let outcome = match response.outcome {
            Outcome::NotFound => {
                info!(stage = %stage.id, "Nothing to destroy");
                self.events
                    .try_emit(names::TEARDOWN_ABSENT, Some(json!({ "stage": stage.id })));
                StageOutcome::Absent
            }
            ref outcome if outcome.is_destroy_success() => {
                info!(stage = %stage.id, "Stage destroyed");
                self.events
                    .try_emit(names::TEARDOWN_DESTROYED, Some(json!({ "stage": stage.id })));
                StageOutcome::Destroyed
            }
            ref outcome => {
                warn!(stage = %stage.id, %outcome, "Destroy failed, continuing teardown");
                let diagnostic = response.diagnostic_tail();
                self.events.try_emit(
                    names::TEARDOWN_FAILED,
                    Some(json!({ "stage": stage.id, "outcome": outcome, "diagnostic": diagnostic })),
                );
                StageOutcome::failed(format!("destroy {outcome}"), diagnostic)
            }
        };

        let state = if outcome.is_failure() {
            StageState::Failed
        } else {
            StageState::Done
        };
        self.transition(&stage.id, state);
        outcome
    }

    async fn stop_workloads(&self, stages: &[&StageDescriptor], ctx: &RunContext) -> Result<(), DeployError> {
        for stage in stages {
            let Some(trigger) = &stage.post_apply_trigger else {
                continue;
            };
            self.ensure_not_cancelled()?;
            let response = self
                .backend
                .stop_workload(stage, ctx, &trigger.workload)
                .await;
            if response.outcome.is_destroy_success() {
                info!(stage = %stage.id, workload = %trigger.workload, "Workload stopped");
                self.events.try_emit(
                    names::WORKLOAD_STOPPED,
                    Some(json!({ "stage": stage.id, "workload": trigger.workload })),
                );
            } else {
                warn!(
                    stage = %stage.id,
                    workload = %trigger.workload,
                    outcome = %response.outcome,
                    "Could not confirm workload stop"
                );
                self.events.try_emit(
                    names::WORKLOAD_STOP_UNCONFIRMED,
                    Some(json!({ "stage": stage.id, "workload": trigger.workload })),
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.stages.execution_order())
            .field("gate", &self.gate)
            .field("backup", &self.backup)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}
