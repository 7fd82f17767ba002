//! Activity log sinks.
//!
//! Every accepted transition is recorded as an [`ActivityEvent`]. Sinks are
//! fire-and-forget: a sink never fails the operation that produced the event.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::model::DomainEvent;
use crate::util::{new_id, SharedClock};

/// Recorded activity entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Event identifier.
    pub event_id: String,
    /// Entity the activity concerns.
    pub entity_id: String,
    /// Entity kind.
    pub entity_type: String,
    /// Dotted activity kind (`post.approved`, `job.stalled`, ...).
    pub kind: String,
    /// Human readable summary.
    pub description: String,
    /// Structured context.
    pub metadata: serde_json::Value,
    /// Record time.
    pub created_at: DateTime<Utc>,
}

/// Destination for activity events.
pub trait ActivitySink: Send + Sync {
    /// Record an event.
    fn record(&self, event: ActivityEvent);
}

/// Bounded in-memory sink for tests and development.
pub struct InMemoryActivitySink {
    events: Mutex<VecDeque<ActivityEvent>>,
    max_events: usize,
}

impl InMemoryActivitySink {
    /// Create a sink keeping at most `max_events` entries; oldest are dropped first.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events of one kind.
    pub fn events_of_kind(&self, kind: &str) -> Vec<ActivityEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl ActivitySink for InMemoryActivitySink {
    fn record(&self, event: ActivityEvent) {
        let mut events = self.events.lock();
        if self.max_events == 0 {
            return;
        }
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that emits events as structured tracing records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivitySink;

impl ActivitySink for TracingActivitySink {
    fn record(&self, event: ActivityEvent) {
        tracing::info!(
            target: "content_pipeline::activity",
            entity_id = %event.entity_id,
            entity_type = %event.entity_type,
            kind = %event.kind,
            metadata = %event.metadata,
            "{}",
            event.description
        );
    }
}

/// Stamps and forwards activity to a sink.
#[derive(Clone)]
pub struct ActivityRecorder {
    sink: Arc<dyn ActivitySink>,
    clock: SharedClock,
}

impl ActivityRecorder {
    /// Create a recorder over `sink`.
    pub fn new(sink: Arc<dyn ActivitySink>, clock: SharedClock) -> Self {
        Self { sink, clock }
    }

    /// Record an arbitrary activity.
    pub fn record(
        &self,
        entity_id: &str,
        kind: &str,
        description: impl Into<String>,
        metadata: serde_json::Value,
    ) {
        let entity_type = kind.split('.').next().unwrap_or(kind).to_string();
        self.sink.record(build_activity_event(
            entity_id,
            entity_type,
            kind,
            description,
            metadata,
            self.clock.now(),
        ));
    }

    /// Record the event of an accepted transition.
    pub fn record_event(&self, event: DomainEvent) {
        self.sink.record(build_activity_event(
            event.entity_id,
            event.entity_type,
            event.kind,
            event.description,
            event.metadata,
            self.clock.now(),
        ));
    }
}

/// Helper to build an activity event from context.
pub fn build_activity_event(
    entity_id: impl Into<String>,
    entity_type: impl Into<String>,
    kind: impl Into<String>,
    description: impl Into<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
) -> ActivityEvent {
    ActivityEvent {
        event_id: new_id("evt"),
        entity_id: entity_id.into(),
        entity_type: entity_type.into(),
        kind: kind.into(),
        description: description.into(),
        metadata,
        created_at,
    }
}
