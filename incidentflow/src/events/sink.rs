//! Sinks that mirror appended progress events.

use crate::core::ProgressEvent;
use tracing::{debug, info, Level};

/// Receives a copy of every event the bus appends.
///
/// Called while the job's log is locked, so implementations must be cheap
/// and must never block.
pub trait EventSink: Send + Sync {
    /// Records an event without blocking.
    fn try_emit(&self, event: &ProgressEvent);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: &ProgressEvent) {}
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
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: &ProgressEvent) {
        if self.level == Level::DEBUG {
            debug!(
                job_id = %event.job_id,
                sequence = event.sequence_number,
                event_type = %event.kind,
                payload = %event.payload,
                "Progress event"
            );
        } else {
            info!(
                job_id = %event.job_id,
                sequence = event.sequence_number,
                event_type = %event.kind,
                "Progress event"
            );
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<ProgressEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }

    /// Returns the wire types of all collected events.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|e| e.kind.wire_type().into_owned())
            .collect()
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
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: &ProgressEvent) {
        self.events.write().push(event.clone());
    }
}
