//! Tests for activity sinks

use std::sync::Arc;

use chrono::Utc;
use content_pipeline::core::{
    build_activity_event, ActivityRecorder, ActivitySink, InMemoryActivitySink,
};
use content_pipeline::util::system_clock;

#[test]
fn test_in_memory_activity_sink() {
    let sink = InMemoryActivitySink::new(10);
    sink.record(build_activity_event(
        "post_1",
        "post",
        "post.approved",
        "approved by editor",
        serde_json::json!({ "by": "editor" }),
        Utc::now(),
    ));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity_id, "post_1");
    assert_eq!(events[0].kind, "post.approved");
    assert_eq!(events[0].metadata["by"], "editor");
    assert!(events[0].event_id.starts_with("evt_"));
}

#[test]
fn test_activity_sink_overflow() {
    let sink = InMemoryActivitySink::new(2);
    for id in ["a", "b", "c"] {
        sink.record(build_activity_event(
            id,
            "post",
            "post.approved",
            "",
            serde_json::Value::Null,
            Utc::now(),
        ));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].entity_id, "b"); // oldest dropped
    assert_eq!(events[1].entity_id, "c");
}

#[test]
fn test_events_of_kind_filters() {
    let sink = Arc::new(InMemoryActivitySink::new(10));
    let recorder = ActivityRecorder::new(sink.clone(), system_clock());
    recorder.record("sp_1", "scheduled_post.failed", "429", serde_json::Value::Null);
    recorder.record("sp_2", "scheduled_post.published", "ok", serde_json::Value::Null);
    recorder.record("sp_3", "scheduled_post.failed", "502", serde_json::Value::Null);

    let failed = sink.events_of_kind("scheduled_post.failed");
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|e| e.entity_type == "scheduled_post"));
}
