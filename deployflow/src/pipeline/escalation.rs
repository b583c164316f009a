//! Apply with a single lock-breaking escalation.
//!
//! The only recoverable apply failure is a stale deployment lock. A lock
//! conflict earns exactly one escalated retry; every other failure is
//! terminal on the spot. There is no loop and no backoff.

use crate::backend::Backend;
use crate::context::RunContext;
use crate::core::{BackendResponse, Outcome, StageOutcome};
use crate::events::{names, EventSink};
use crate::stages::StageDescriptor;
use serde_json::json;
use tracing::{info, warn};

/// What to do after one apply attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    /// The stage is applied.
    Succeeded,
    /// Retry once with conflict-overriding semantics.
    Escalate,
    /// Give up.
    Fail,
}

/// Decides the next step after an attempt.
#[must_use]
pub fn decide(outcome: &Outcome, escalated: bool) -> EscalationDecision {
    if outcome.is_apply_success() {
        EscalationDecision::Succeeded
    } else if outcome.is_conflict() && !escalated {
        EscalationDecision::Escalate
    } else {
        EscalationDecision::Fail
    }
}

/// One apply call and its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyAttempt {
    /// Whether the call used the escalated path.
    pub escalate: bool,
    /// The backend response.
    pub response: BackendResponse,
}

/// The full history of applying one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Attempts in call order (one or two).
    pub attempts: Vec<ApplyAttempt>,
}

impl ApplyReport {
    /// Returns the last attempt.
    #[must_use]
    pub fn last(&self) -> Option<&ApplyAttempt> {
        self.attempts.last()
    }

    /// Returns true if the final attempt applied the stage.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.last()
            .is_some_and(|a| a.response.outcome.is_apply_success())
    }

    /// Returns true if the final attempt was escalated.
    #[must_use]
    pub fn escalated(&self) -> bool {
        self.last().is_some_and(|a| a.escalate)
    }

    /// Converts the history into a stage outcome.
    #[must_use]
    pub fn to_stage_outcome(&self) -> StageOutcome {
        match self.last() {
            Some(attempt) if !attempt.escalate && attempt.response.outcome == Outcome::AlreadyExists => {
                StageOutcome::AlreadyExists
            }
            Some(attempt) if attempt.response.outcome.is_apply_success() => StageOutcome::Deployed {
                escalated: attempt.escalate,
            },
            Some(attempt) => {
                let mut reason = format!("apply {}", attempt.response.outcome);
                if attempt.escalate {
                    reason.push_str(" after escalation");
                }
                StageOutcome::failed(reason, attempt.response.diagnostic_tail())
            }
            None => StageOutcome::failed("apply was never attempted", ""),
        }
    }
}

/// Applies stages with at most one escalated retry.
#[derive(Clone, Copy)]
pub struct EscalationPolicy<'a> {
    backend: &'a dyn Backend,
    events: &'a dyn EventSink,
}

impl<'a> EscalationPolicy<'a> {
    /// Creates a policy.
    #[must_use]
    pub fn new(backend: &'a dyn Backend, events: &'a dyn EventSink) -> Self {
        Self { backend, events }
    }

    /// Applies a stage.
    ///
    /// Under force the first attempt is already escalated, so a conflict
    /// there is terminal.
    pub async fn apply(&self, stage: &StageDescriptor, ctx: &RunContext) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut escalate = ctx.is_forced(stage.force);

        loop {
            let response = self.backend.apply(stage, ctx, escalate).await;
            let decision = decide(&response.outcome, escalate);
            let outcome = response.outcome.clone();
            report.attempts.push(ApplyAttempt { escalate, response });

            match decision {
                EscalationDecision::Succeeded | EscalationDecision::Fail => return report,
                EscalationDecision::Escalate => {
                    warn!(stage = %stage.id, %outcome, "Deployment lock conflict, retrying with lock override");
                    self.events.try_emit(
                        names::STAGE_ESCALATED,
                        Some(json!({ "stage": stage.id, "outcome": outcome })),
                    );
                    escalate = true;
                    info!(stage = %stage.id, "Escalated apply");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::events::CollectingEventSink;
    use mockall::predicate::{always, eq};
    use mockall::Sequence;

    fn stage() -> StageDescriptor {
        StageDescriptor::new("sync", "bundles/database-sync")
    }

    fn conflict() -> BackendResponse {
        BackendResponse::new(Outcome::Conflict { lock_held: true }, "Error: deploy lock acquired")
    }

    #[test]
    fn test_decide_table() {
        assert_eq!(decide(&Outcome::Success, false), EscalationDecision::Succeeded);
        assert_eq!(decide(&Outcome::AlreadyExists, true), EscalationDecision::Succeeded);
        assert_eq!(decide(&Outcome::Conflict { lock_held: true }, false), EscalationDecision::Escalate);
        assert_eq!(decide(&Outcome::Conflict { lock_held: true }, true), EscalationDecision::Fail);
        assert_eq!(decide(&Outcome::other("bad yaml"), false), EscalationDecision::Fail);
        assert_eq!(decide(&Outcome::AuthRequired, false), EscalationDecision::Fail);
    }

    #[tokio::test]
    async fn test_conflict_escalates_exactly_once() {
        let mut backend = MockBackend::new();
        let mut seq = Sequence::new();
        backend
            .expect_apply()
            .with(always(), always(), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| conflict());
        backend
            .expect_apply()
            .with(always(), always(), eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| conflict());

        let events = CollectingEventSink::new();
        let policy = EscalationPolicy::new(&backend, &events);
        let report = policy.apply(&stage(), &RunContext::new("dev")).await;

        assert_eq!(report.attempts.len(), 2);
        assert!(!report.succeeded());
        assert!(report.to_stage_outcome().is_failure());
        assert_eq!(events.count(names::STAGE_ESCALATED, Some("sync")), 1);
    }

    #[tokio::test]
    async fn test_conflict_then_success_is_escalated_deploy() {
        let mut backend = MockBackend::new();
        backend
            .expect_apply()
            .returning(|_, _, escalate| {
                if escalate {
                    BackendResponse::success("Deployment complete!")
                } else {
                    conflict()
                }
            });

        let events = CollectingEventSink::new();
        let report = EscalationPolicy::new(&backend, &events)
            .apply(&stage(), &RunContext::new("dev"))
            .await;

        assert_eq!(report.to_stage_outcome(), StageOutcome::Deployed { escalated: true });
    }

    #[tokio::test]
    async fn test_other_failure_never_escalates() {
        let mut backend = MockBackend::new();
        backend
            .expect_apply()
            .with(always(), always(), eq(false))
            .times(1)
            .returning(|_, _, _| BackendResponse::failure("Error: unknown field `taskz`"));
        backend.expect_apply().with(always(), always(), eq(true)).times(0);

        let events = CollectingEventSink::new();
        let report = EscalationPolicy::new(&backend, &events)
            .apply(&stage(), &RunContext::new("dev"))
            .await;

        assert_eq!(report.attempts.len(), 1);
        match report.to_stage_outcome() {
            StageOutcome::Failed { diagnostic, .. } => assert!(diagnostic.contains("taskz")),
            other => panic!("unexpected outcome: {other}"),
        }
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_force_escalates_first_attempt() {
        let mut backend = MockBackend::new();
        backend
            .expect_apply()
            .with(always(), always(), eq(true))
            .times(1)
            .returning(|_, _, _| conflict());

        let events = CollectingEventSink::new();
        let ctx = RunContext::new("dev").with_force(true);
        let report = EscalationPolicy::new(&backend, &events).apply(&stage(), &ctx).await;

        assert_eq!(report.attempts.len(), 1);
        assert!(report.escalated());
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn test_already_exists_apply_is_recorded_as_existing() {
        let mut backend = MockBackend::new();
        backend
            .expect_apply()
            .times(1)
            .returning(|_, _, _| BackendResponse::new(Outcome::AlreadyExists, "already exists"));

        let events = CollectingEventSink::new();
        let report = EscalationPolicy::new(&backend, &events)
            .apply(&stage(), &RunContext::new("dev"))
            .await;

        assert!(report.succeeded());
        assert_eq!(report.to_stage_outcome(), StageOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_already_exists_after_escalation_counts_as_escalated_deploy() {
        let mut backend = MockBackend::new();
        backend.expect_apply().returning(|_, _, escalate| {
            if escalate {
                BackendResponse::new(Outcome::AlreadyExists, "already exists")
            } else {
                conflict()
            }
        });

        let events = CollectingEventSink::new();
        let report = EscalationPolicy::new(&backend, &events)
            .apply(&stage(), &RunContext::new("dev"))
            .await;

        assert_eq!(report.to_stage_outcome(), StageOutcome::Deployed { escalated: true });
    }
}
