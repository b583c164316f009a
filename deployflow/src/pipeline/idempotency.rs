//! Pre-apply existence checks.
//!
//! Re-running a deploy must be cheap when most stages are already in place.
//! Rather than keeping a local journal, the checker asks the backend what is
//! deployed right now and compares it against the stage's exists signal.

use crate::backend::Backend;
use crate::context::RunContext;
use crate::core::Outcome;
use crate::stages::StageDescriptor;
use tracing::debug;

/// Result of an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceCheck {
    /// Force mode; the backend was not asked.
    Bypassed,
    /// The stage's resources are already provisioned.
    Present,
    /// The stage needs to be applied.
    Absent,
}

impl ExistenceCheck {
    /// Returns true if apply should be skipped.
    #[must_use]
    pub fn should_skip(&self) -> bool {
        matches!(self, Self::Present)
    }
}

/// Decides whether a stage is already deployed.
#[derive(Clone, Copy)]
pub struct IdempotencyChecker<'a> {
    backend: &'a dyn Backend,
}

impl<'a> IdempotencyChecker<'a> {
    /// Creates a checker over a backend.
    #[must_use]
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Checks a stage, honouring force mode.
    pub async fn check(&self, stage: &StageDescriptor, ctx: &RunContext) -> ExistenceCheck {
        if ctx.is_forced(stage.force) {
            debug!(stage = %stage.id, "Force mode, skipping existence check");
            return ExistenceCheck::Bypassed;
        }
        if self.is_present(stage, ctx).await {
            ExistenceCheck::Present
        } else {
            ExistenceCheck::Absent
        }
    }

    /// Asks the backend whether the stage's resources exist.
    ///
    /// A failed or empty status call counts as "not deployed".
    pub async fn is_present(&self, stage: &StageDescriptor, ctx: &RunContext) -> bool {
        let response = self.backend.status(stage, ctx).await;
        let usable = matches!(response.outcome, Outcome::Success | Outcome::AlreadyExists);
        let present = usable && stage.exists_signal.matches(&response.output);
        debug!(
            stage = %stage.id,
            outcome = %response.outcome,
            present,
            "Existence check"
        );
        present
    }
}
