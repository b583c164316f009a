//! Cancellable readiness gate.
//!
//! After a workload is triggered, downstream stages must not start until it
//! has had time to produce data. The gate waits out a fixed budget in ticks,
//! reporting progress on every tick, and stops early when the run is
//! cancelled.

use crate::cancellation::CancellationToken;
use crate::events::{names, EventSink};
use serde_json::json;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default tick duration.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    /// The full budget elapsed.
    Ready {
        /// Ticks waited.
        ticks: u64,
    },
    /// The run was cancelled mid-wait.
    Cancelled {
        /// Ticks completed before cancellation.
        ticks: u64,
    },
}

impl GateResult {
    /// Returns true if the wait ran to completion.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Returns the number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        match self {
            Self::Ready { ticks } | Self::Cancelled { ticks } => *ticks,
        }
    }
}

/// Waits out a readiness budget in fixed ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    tick: Duration,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self { tick: DEFAULT_TICK }
    }
}

impl ReadinessGate {
    /// Creates a gate with a custom tick duration.
    ///
    /// A zero tick is clamped to one millisecond.
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self {
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    /// Returns the tick duration.
    #[must_use]
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Returns how many ticks a budget spans, rounding up.
    #[must_use]
    pub fn ticks_for(&self, budget: Duration) -> u64 {
        let tick = self.tick.as_nanos();
        let ticks = budget.as_nanos().div_ceil(tick);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }

    /// Blocks for `budget`, one tick at a time.
    pub async fn wait(
        &self,
        stage_id: &str,
        budget: Duration,
        token: &CancellationToken,
        events: &dyn EventSink,
    ) -> GateResult {
        let total = self.ticks_for(budget);
        info!(stage = %stage_id, ?budget, ticks = total, "Waiting for workload readiness");
        events.try_emit(
            names::READINESS_STARTED,
            Some(json!({ "stage": stage_id, "ticks": total, "budget_ms": budget.as_millis() })),
        );

        let mut interval = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for done in 0..total {
            if token.is_cancelled() {
                return self.cancelled(stage_id, done, events);
            }
            tokio::select! {
                _ = interval.tick() => {}
                () = token.cancelled() => return self.cancelled(stage_id, done, events),
            }
            let elapsed = done + 1;
            debug!(stage = %stage_id, tick = elapsed, of = total, "Readiness tick");
            events.try_emit(
                names::READINESS_TICK,
                Some(json!({ "stage": stage_id, "tick": elapsed, "of": total })),
            );
        }

        events.try_emit(names::READINESS_DONE, Some(json!({ "stage": stage_id, "ticks": total })));
        GateResult::Ready { ticks: total }
    }

    fn cancelled(&self, stage_id: &str, ticks: u64, events: &dyn EventSink) -> GateResult {
        info!(stage = %stage_id, ticks, "Readiness wait cancelled");
        events.try_emit(
            names::READINESS_DONE,
            Some(json!({ "stage": stage_id, "ticks": ticks, "cancelled": true })),
        );
        GateResult::Cancelled { ticks }
    }
}
