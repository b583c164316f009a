//! Per-invocation run state.

use crate::core::StageOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded stage result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage id.
    pub stage: String,
    /// What happened to it.
    pub outcome: StageOutcome,
}

/// Ordered, append-only record of stage outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageResults {
    entries: Vec<StageResult>,
}

impl StageResults {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an outcome.
    pub fn record(&mut self, stage: impl Into<String>, outcome: StageOutcome) {
        self.entries.push(StageResult {
            stage: stage.into(),
            outcome,
        });
    }

    /// Returns the most recent outcome for a stage.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StageOutcome> {
        self.entries
            .iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    /// Iterates results in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.entries.iter()
    }

    /// Returns the number of recorded results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the first failed result.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.entries.iter().find(|r| r.outcome.is_failure())
    }
}

/// Mutable state of one orchestrator invocation.
///
/// Constructed once by the caller and passed by `&mut` through the
/// orchestrator; nothing in it survives the process.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Credential profile passed to every backend call.
    pub profile: Option<String>,
    /// Target environment passed to every backend call.
    pub target: String,
    /// Skip idempotency checks and escalate the first apply.
    pub force: bool,
    /// Whether the configuration backup has already been taken.
    pub backup_taken: bool,
    /// Outcomes recorded so far.
    pub stage_results: StageResults,
}

impl RunContext {
    /// Creates a context for a target environment.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            profile: None,
            target: target.into(),
            force: false,
            backup_taken: false,
            stage_results: StageResults::new(),
        }
    }

    /// Sets the profile.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Enables or disables force mode.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Returns the profile, if any.
    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Returns true if a stage should bypass idempotency and escalate.
    #[must_use]
    pub fn is_forced(&self, stage_force: bool) -> bool {
        self.force || stage_force
    }

    /// Records a stage outcome.
    pub fn record(&mut self, stage: impl Into<String>, outcome: StageOutcome) {
        let stage = stage.into();
        tracing::debug!(run_id = %self.run_id, stage = %stage, outcome = %outcome, "Recorded stage outcome");
        self.stage_results.record(stage, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_context_defaults() {
        let ctx = RunContext::new("prod");
        assert_eq!(ctx.target, "prod");
        assert!(ctx.profile().is_none());
        assert!(!ctx.force);
        assert!(!ctx.backup_taken);
        assert!(ctx.stage_results.is_empty());
    }

    #[test]
    fn test_force_is_global_or_per_stage() {
        let ctx = RunContext::new("dev");
        assert!(!ctx.is_forced(false));
        assert!(ctx.is_forced(true));

        let forced = RunContext::new("dev").with_force(true);
        assert!(forced.is_forced(false));
    }

    #[test]
    fn test_results_keep_order() {
        let mut ctx = RunContext::new("dev").with_profile("ops");
        ctx.record("infra", StageOutcome::AlreadyExists);
        ctx.record("job", StageOutcome::Deployed { escalated: false });
        ctx.record("app", StageOutcome::failed("boom", "tail"));

        let order: Vec<_> = ctx.stage_results.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(order, vec!["infra", "job", "app"]);
        assert_eq!(ctx.stage_results.get("job"), Some(&StageOutcome::Deployed { escalated: false }));
        assert_eq!(ctx.stage_results.first_failure().map(|r| r.stage.as_str()), Some("app"));
        assert_eq!(ctx.profile(), Some("ops"));
    }
}
