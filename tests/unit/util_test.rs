//! Tests for utility functions

use chrono::{Duration, TimeZone, Utc};
use content_pipeline::util::{new_id, Clock, ManualClock, Platform, QueueLane};

#[test]
fn test_queue_lane_ordering() {
    assert!(QueueLane::Critical > QueueLane::Default);
    assert_eq!(QueueLane::Critical.to_string(), "critical");
}

#[test]
fn test_platform_names_round_trip() {
    for platform in Platform::ALL {
        assert_eq!(platform.as_str().parse::<Platform>(), Ok(platform));
    }
    assert_eq!("Twitter".parse::<Platform>(), Ok(Platform::X));
    assert!("myspace".parse::<Platform>().is_err());
}

#[test]
fn test_platform_serde_name() {
    let json = serde_json::to_string(&Platform::LinkedIn).unwrap();
    assert_eq!(json, "\"linkedin\"");
}

#[test]
fn test_new_id_prefix() {
    let a = new_id("post");
    let b = new_id("post");
    assert!(a.starts_with("post_"));
    assert_ne!(a, b);
}

#[test]
fn test_manual_clock() {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    clock.advance(Duration::hours(2));
    assert_eq!(clock.now(), start + Duration::hours(2));
    clock.set(start);
    assert_eq!(clock.now(), start);
}
