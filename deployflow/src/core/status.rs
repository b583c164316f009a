//! Stage outcomes, per-stage states and run modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The recorded result of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage was not attempted.
    Skipped {
        /// Why the stage was not attempted.
        reason: String,
    },
    /// The stage was applied.
    Deployed {
        /// Whether the apply needed the conflict-overriding path.
        escalated: bool,
    },
    /// The stage's resources were already present.
    AlreadyExists,
    /// The stage was torn down.
    Destroyed,
    /// Teardown found nothing to remove.
    Absent,
    /// The stage failed.
    Failed {
        /// Short description of the failure.
        reason: String,
        /// Bounded tail of the backend output.
        diagnostic: String,
    },
}

impl StageOutcome {
    /// Creates a skipped outcome.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(reason: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if the stage's resources are in place after this outcome.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        matches!(self, Self::Deployed { .. } | Self::AlreadyExists)
    }

    /// Returns the status prefix used in operator output.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "[SKIP]",
            Self::Deployed { .. } => "[OK]",
            Self::AlreadyExists => "[EXISTS]",
            Self::Destroyed | Self::Absent => "[GONE]",
            Self::Failed { .. } => "[FAIL]",
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Deployed { escalated: false } => write!(f, "deployed"),
            Self::Deployed { escalated: true } => write!(f, "deployed (escalated)"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Absent => write!(f, "absent"),
            Self::Failed { reason, .. } => write!(f, "failed: {reason}"),
        }
    }
}

/// The lifecycle state of a stage while the orchestrator works on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Not yet reached.
    #[default]
    Pending,
    /// Dry-run validation in progress.
    Validating,
    /// Querying the backend for existing resources.
    CheckExistence,
    /// Existing resources found; apply skipped.
    Skip,
    /// Apply in progress.
    Applying,
    /// Workload trigger in progress.
    Triggering,
    /// Readiness gate in progress.
    AwaitingReadiness,
    /// Teardown in progress.
    Destroying,
    /// Finished successfully.
    Done,
    /// Finished with a failure.
    Failed,
}

impl StageState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skip | Self::Done | Self::Failed)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::CheckExistence => "check_existence",
            Self::Skip => "skip",
            Self::Applying => "applying",
            Self::Triggering => "triggering",
            Self::AwaitingReadiness => "awaiting_readiness",
            Self::Destroying => "destroying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What kind of run produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Full deploy of every stage.
    Deploy,
    /// Deploy of a single stage.
    DeployStage,
    /// Validation only.
    Validate,
    /// Full teardown.
    Teardown,
    /// Teardown of a single stage.
    TeardownStage,
    /// Lock release across all stages.
    ClearLocks,
    /// Workload triggers without deploy.
    StartServices,
    /// Workload stop signals without teardown.
    StopServices,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deploy => "deploy",
            Self::DeployStage => "deploy-stage",
            Self::Validate => "validate",
            Self::Teardown => "teardown",
            Self::TeardownStage => "teardown-stage",
            Self::ClearLocks => "clear-locks",
            Self::StartServices => "start-services",
            Self::StopServices => "stop-services",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_outcome_display() {
        assert_eq!(StageOutcome::Deployed { escalated: true }.to_string(), "deployed (escalated)");
        assert_eq!(StageOutcome::AlreadyExists.to_string(), "already exists");
        assert_eq!(StageOutcome::failed("apply refused", "").to_string(), "failed: apply refused");
    }

    #[test]
    fn test_stage_outcome_prefix() {
        assert_eq!(StageOutcome::skipped("upstream").prefix(), "[SKIP]");
        assert_eq!(StageOutcome::Absent.prefix(), "[GONE]");
        assert_eq!(StageOutcome::failed("x", "y").prefix(), "[FAIL]");
    }

    #[test]
    fn test_stage_outcome_predicates() {
        assert!(StageOutcome::AlreadyExists.is_provisioned());
        assert!(StageOutcome::Deployed { escalated: false }.is_provisioned());
        assert!(!StageOutcome::Destroyed.is_provisioned());
        assert!(StageOutcome::failed("x", "y").is_failure());
    }

    #[test]
    fn test_stage_outcome_serialize() {
        let json = serde_json::to_string(&StageOutcome::Deployed { escalated: true }).unwrap();
        assert_eq!(json, r#"{"status":"deployed","escalated":true}"#);
    }

    #[test]
    fn test_stage_state_terminal() {
        assert!(StageState::Done.is_terminal());
        assert!(StageState::Skip.is_terminal());
        assert!(!StageState::Applying.is_terminal());
        assert_eq!(StageState::default(), StageState::Pending);
    }

    #[test]
    fn test_run_mode_display() {
        assert_eq!(RunMode::StartServices.to_string(), "start-services");
    }
}
