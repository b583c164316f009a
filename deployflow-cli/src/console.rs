//! Operator-facing progress output.

use async_trait::async_trait;
use deployflow::events::{names, EventSink};
use serde_json::Value;
use std::io::Write;

/// Readiness progress is printed every this many ticks.
const TICK_EVERY: u64 = 10;

fn field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("?")
}

/// Renders an event as one console line, or nothing for internal events.
pub fn render(event_type: &str, data: Option<&Value>) -> Option<String> {
    let empty = Value::Null;
    let data = data.unwrap_or(&empty);
    let stage = field(data, "stage");

    let line = match event_type {
        names::STAGE_VALIDATED => format!("[OK] {stage}: validation passed"),
        names::STAGE_VALIDATION_FAILED => format!("[FAIL] {stage}: validation failed"),
        names::STAGE_EXISTS => format!("[EXISTS] {stage}: already deployed, skipping"),
        names::STAGE_STARTED => format!("==> Deploying {stage}"),
        names::STAGE_ESCALATED => format!("[WARN] {stage}: deployment lock held, retrying with lock override"),
        names::STAGE_DEPLOYED => {
            if data.get("escalated").and_then(Value::as_bool) == Some(true) {
                format!("[OK] {stage}: deployed (lock overridden)")
            } else {
                format!("[OK] {stage}: deployed")
            }
        }
        names::STAGE_FAILED => format!("[FAIL] {stage}: {}", field(data, "reason")),
        names::STAGE_SKIPPED => format!("[SKIP] {stage}: {}", field(data, "reason")),
        names::PREREQUISITE_MISSING => format!(
            "[WARN] {stage}: prerequisite '{}' does not look deployed",
            field(data, "prerequisite")
        ),
        names::TRIGGER_STARTED => format!("[OK] {stage}: started {}", field(data, "workload")),
        names::TRIGGER_UNCONFIRMED => format!(
            "[WARN] {stage}: could not confirm {} started, start it manually if needed",
            field(data, "workload")
        ),
        names::READINESS_STARTED => format!(
            "    {stage}: waiting {} ticks for readiness",
            data.get("ticks").and_then(Value::as_u64).unwrap_or(0)
        ),
        names::READINESS_TICK => {
            let tick = data.get("tick").and_then(Value::as_u64).unwrap_or(0);
            let of = data.get("of").and_then(Value::as_u64).unwrap_or(0);
            if tick % TICK_EVERY != 0 || tick == of {
                return None;
            }
            format!("    {stage}: {tick}/{of}")
        }
        names::READINESS_DONE => {
            if data.get("cancelled").and_then(Value::as_bool) == Some(true) {
                format!("[SKIP] {stage}: readiness wait cancelled")
            } else {
                format!("[OK] {stage}: ready")
            }
        }
        names::BACKUP_CREATED => format!("[OK] backup written to {}", field(data, "backup")),
        names::BACKUP_FAILED => format!(
            "[WARN] backup of {} failed: {}",
            field(data, "source"),
            field(data, "error")
        ),
        names::TEARDOWN_DESTROYED => format!("[GONE] {stage}: destroyed"),
        names::TEARDOWN_ABSENT => format!("[GONE] {stage}: nothing deployed"),
        names::TEARDOWN_FAILED => format!("[FAIL] {stage}: destroy failed, continuing"),
        names::WORKLOAD_STOPPED => format!("[OK] {stage}: stopped {}", field(data, "workload")),
        names::WORKLOAD_STOP_UNCONFIRMED => format!(
            "[WARN] {stage}: could not confirm {} stopped",
            field(data, "workload")
        ),
        names::LOCK_RELEASED => format!("[OK] {stage}: lock released"),
        names::LOCK_RELEASE_FAILED => format!("[WARN] {stage}: lock not released"),
        _ => return None,
    };
    Some(line)
}

/// Prints events as status-prefixed lines.
///
/// Lines go to stdout, or to stderr when stdout carries the JSON report.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleEventSink {
    to_stderr: bool,
}

impl ConsoleEventSink {
    /// Creates a console sink.
    pub fn new(to_stderr: bool) -> Self {
        Self { to_stderr }
    }

    fn print(&self, event_type: &str, data: Option<&Value>) {
        let Some(line) = render(event_type, data) else {
            return;
        };
        let result = if self.to_stderr {
            writeln!(std::io::stderr().lock(), "{line}")
        } else {
            writeln!(std::io::stdout().lock(), "{line}")
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Console write failed");
        }
    }
}

#[async_trait]
impl EventSink for ConsoleEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.print(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.print(event_type, data.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_prefixes() {
        let data = json!({ "stage": "sync", "escalated": true });
        assert_eq!(
            render(names::STAGE_DEPLOYED, Some(&data)).unwrap(),
            "[OK] sync: deployed (lock overridden)"
        );
        assert_eq!(
            render(names::STAGE_EXISTS, Some(&json!({ "stage": "infra" }))).unwrap(),
            "[EXISTS] infra: already deployed, skipping"
        );
        assert!(render(names::TEARDOWN_ABSENT, Some(&json!({ "stage": "app" })))
            .unwrap()
            .starts_with("[GONE]"));
    }

    #[test]
    fn test_internal_events_are_silent() {
        assert!(render(names::STAGE_STATE, Some(&json!({ "stage": "x", "state": "applying" }))).is_none());
        assert!(render(names::RUN_STARTED, None).is_none());
    }

    #[test]
    fn test_readiness_ticks_are_sampled() {
        let tick = |t: u64| json!({ "stage": "job", "tick": t, "of": 60 });
        assert!(render(names::READINESS_TICK, Some(&tick(3))).is_none());
        assert_eq!(render(names::READINESS_TICK, Some(&tick(10))).unwrap(), "    job: 10/60");
        assert!(render(names::READINESS_TICK, Some(&tick(60))).is_none());
    }

    #[test]
    fn test_missing_fields_render_placeholder() {
        assert_eq!(render(names::STAGE_FAILED, None).unwrap(), "[FAIL] ?: ?");
    }
}
