use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use rate_governor::models::event::{EventType, LimitEvent};
use rate_governor::persistence::db;
use rate_governor::persistence::event_repo::EventRepo;

async fn repo() -> EventRepo {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    EventRepo::new(db)
}

#[tokio::test]
async fn recorded_event_reads_back() {
    let repo = repo().await;
    let reset = Utc::now() + Duration::hours(5);
    let event = LimitEvent::new(
        EventType::Threshold,
        "pro-20",
        json!({ "units": 41, "allowance": 45 }),
        Some(reset),
    );
    repo.record(&event).await.expect("record");

    let events = repo.recent_events(10).await.expect("list");
    assert_eq!(events.len(), 1);
    let loaded = &events[0];
    assert_eq!(loaded.id, event.id);
    assert_eq!(loaded.event_type, EventType::Threshold);
    assert_eq!(loaded.tier, "pro-20");
    assert_eq!(loaded.usage, json!({ "units": 41, "allowance": 45 }));
    let stored_reset = loaded.reset_time.expect("reset time");
    assert!((stored_reset - reset).num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn recent_events_are_newest_first_and_limited() {
    let repo = repo().await;
    let now = Utc::now();
    let kinds = [
        EventType::Threshold,
        EventType::Resumed,
        EventType::ManualPause,
        EventType::ManualResume,
    ];
    let mut ids = Vec::new();
    for (offset, kind) in (0_i64..).zip(kinds) {
        let mut event = LimitEvent::new(kind, "pro-20", json!({}), None);
        event.timestamp = now - Duration::minutes(10 - offset);
        repo.record(&event).await.expect("record");
        ids.push(event.id);
    }

    let events = repo.recent_events(3).await.expect("list");
    let listed: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(listed, vec![ids[3].as_str(), ids[2].as_str(), ids[1].as_str()]);
    assert_eq!(events[0].event_type, EventType::ManualResume);
    assert!(events[0].reset_time.is_none());
}

#[tokio::test]
async fn events_with_equal_timestamps_keep_insertion_order() {
    let repo = repo().await;
    let stamp = Utc::now();
    let mut first = LimitEvent::new(EventType::RateLimit, "pro-20", json!({}), None);
    first.timestamp = stamp;
    let mut second = LimitEvent::new(EventType::Resumed, "pro-20", json!({}), None);
    second.timestamp = stamp;
    repo.record(&first).await.expect("first");
    repo.record(&second).await.expect("second");

    let events = repo.recent_events(2).await.expect("list");
    assert_eq!(events[0].id, second.id);
    assert_eq!(events[1].id, first.id);
}
