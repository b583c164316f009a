//! Event sink system for observability.
//!
//! The orchestrator reports every stage transition through an [`EventSink`].
//! Front ends render these for operators; tests collect them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the orchestrator.
pub mod names {
    /// A run started.
    pub const RUN_STARTED: &str = "run.started";
    /// A run finished.
    pub const RUN_FINISHED: &str = "run.finished";
    /// A stage moved to a new lifecycle state.
    pub const STAGE_STATE: &str = "stage.state";
    /// A stage passed validation.
    pub const STAGE_VALIDATED: &str = "stage.validated";
    /// A stage failed validation.
    pub const STAGE_VALIDATION_FAILED: &str = "stage.validation_failed";
    /// A stage is being applied.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage's resources were already present.
    pub const STAGE_EXISTS: &str = "stage.exists";
    /// A stage was not attempted.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A lock conflict triggered an escalated apply.
    pub const STAGE_ESCALATED: &str = "stage.escalated";
    /// A stage was applied.
    pub const STAGE_DEPLOYED: &str = "stage.deployed";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A prerequisite of a single-stage deploy is missing.
    pub const PREREQUISITE_MISSING: &str = "stage.prerequisite_missing";
    /// A workload was started.
    pub const TRIGGER_STARTED: &str = "trigger.started";
    /// A workload start could not be confirmed.
    pub const TRIGGER_UNCONFIRMED: &str = "trigger.unconfirmed";
    /// A readiness wait began.
    pub const READINESS_STARTED: &str = "readiness.started";
    /// One unit of a readiness wait elapsed.
    pub const READINESS_TICK: &str = "readiness.tick";
    /// A readiness wait completed.
    pub const READINESS_DONE: &str = "readiness.done";
    /// A configuration backup copy was written.
    pub const BACKUP_CREATED: &str = "backup.created";
    /// A configuration backup copy could not be written.
    pub const BACKUP_FAILED: &str = "backup.failed";
    /// A stage was torn down.
    pub const TEARDOWN_DESTROYED: &str = "teardown.destroyed";
    /// A stage had nothing to tear down.
    pub const TEARDOWN_ABSENT: &str = "teardown.absent";
    /// A stage teardown failed.
    pub const TEARDOWN_FAILED: &str = "teardown.failed";
    /// A stop signal was sent to a workload.
    pub const WORKLOAD_STOPPED: &str = "workload.stopped";
    /// A workload stop could not be confirmed.
    pub const WORKLOAD_STOP_UNCONFIRMED: &str = "workload.stop_unconfirmed";
    /// A stale lock was released.
    pub const LOCK_RELEASED: &str = "lock.released";
    /// A lock release attempt failed.
    pub const LOCK_RELEASE_FAILED: &str = "lock.release_failed";
}
