//! End-of-run summary.

use crate::backup::BackupSummary;
use crate::context::{RunContext, StageResults};
use crate::core::{RunMode, StageOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The stage that stopped a run, with its diagnostic tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Failed stage id.
    pub stage: String,
    /// Short reason.
    pub reason: String,
    /// Bounded tail of the backend output.
    pub diagnostic: String,
}

/// Summary of one orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run id.
    pub run_id: Uuid,
    /// What kind of run this was.
    pub mode: RunMode,
    /// Target environment.
    pub target: String,
    /// Credential profile, if any.
    pub profile: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the report was built.
    pub finished_at: DateTime<Utc>,
    /// Per-stage outcomes in recording order.
    pub results: StageResults,
    /// First failure, if any.
    pub failure: Option<FailureDetail>,
    /// Backup activity, if a backup was taken in this run.
    pub backup: Option<BackupSummary>,
}

impl RunReport {
    /// Builds a report from the state of a run context.
    #[must_use]
    pub fn from_context(mode: RunMode, ctx: &RunContext) -> Self {
        let failure = ctx.stage_results.first_failure().and_then(|r| match &r.outcome {
            StageOutcome::Failed { reason, diagnostic } => Some(FailureDetail {
                stage: r.stage.clone(),
                reason: reason.clone(),
                diagnostic: diagnostic.clone(),
            }),
            _ => None,
        });

        Self {
            run_id: ctx.run_id,
            mode,
            target: ctx.target.clone(),
            profile: ctx.profile.clone(),
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            results: ctx.stage_results.clone(),
            failure,
            backup: None,
        }
    }

    /// Attaches backup activity.
    #[must_use]
    pub fn with_backup(mut self, backup: Option<BackupSummary>) -> Self {
        self.backup = backup;
        self
    }

    /// Returns true if no stage failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Process exit code for this report.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    /// Renders the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({}, target {})", self.run_id, self.mode, self.target)?;
        for result in self.results.iter() {
            writeln!(f, "  {:<8} {}: {}", result.outcome.prefix(), result.stage, result.outcome)?;
        }

        if let Some(backup) = &self.backup {
            for entry in &backup.created {
                writeln!(
                    f,
                    "  backup {} (sha256 {})",
                    entry.backup.display(),
                    entry.sha256
                )?;
            }
            for failed in &backup.failed {
                writeln!(f, "  backup of {} failed: {}", failed.source.display(), failed.error)?;
            }
        }

        match &self.failure {
            Some(failure) => {
                writeln!(f, "FAILED at stage '{}': {}", failure.stage, failure.reason)?;
                if !failure.diagnostic.is_empty() {
                    writeln!(f, "--- backend output (tail) ---")?;
                    writeln!(f, "{}", failure.diagnostic)?;
                }
                Ok(())
            }
            None => {
                let elapsed = self.finished_at - self.started_at;
                writeln!(f, "Completed in {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)
            }
        }
    }
}
