//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Trait for sinks that receive orchestrator events.
///
/// Event types are dotted names such as `stage.deployed`; payloads are
/// JSON objects carrying at least the `stage` field for stage events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without blocking.
    ///
    /// Implementations must never panic; errors are logged and dropped.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A collecting event sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Counts events of an exact type, optionally for one stage.
    #[must_use]
    pub fn count(&self, event_type: &str, stage: Option<&str>) -> usize {
        self.events
            .read()
            .iter()
            .filter(|(t, data)| {
                t == event_type
                    && stage.map_or(true, |s| {
                        data.as_ref()
                            .and_then(|d| d.get("stage"))
                            .and_then(serde_json::Value::as_str)
                            == Some(s)
                    })
            })
            .count()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit("test", None).await;
        sink.try_emit("test", Some(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::debug();
        sink.emit("stage.deployed", Some(serde_json::json!({"stage": "job"}))).await;
        sink.try_emit("run.finished", None);
    }

    #[tokio::test]
    async fn test_collecting_sink_filter_and_count() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("readiness.tick", Some(serde_json::json!({"stage": "job"}))).await;
        sink.emit("readiness.tick", Some(serde_json::json!({"stage": "job"}))).await;
        sink.emit("readiness.tick", Some(serde_json::json!({"stage": "pipeline"}))).await;
        sink.try_emit("stage.deployed", Some(serde_json::json!({"stage": "job"})));

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.events_of_type("readiness.").len(), 3);
        assert_eq!(sink.count("readiness.tick", Some("job")), 2);
        assert_eq!(sink.count("readiness.tick", None), 3);
    }
}
