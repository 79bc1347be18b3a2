use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use rate_governor::models::event::{EventType, LimitEvent};
use rate_governor::models::pause::{PauseReason, PauseState, PauseStatus};
use rate_governor::models::session::{
    HeartbeatRequest, RegisterRequest, SessionRecord, SessionStatus,
};
use rate_governor::models::signal::{LimitType, RateLimitSignal};

fn state(resume_in: chrono::Duration) -> (PauseState, chrono::DateTime<Utc>) {
    let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("time");
    (
        PauseState {
            paused_at: now,
            resume_at: now + resume_in,
            reason: PauseReason::Threshold,
        },
        now,
    )
}

#[test]
fn remaining_counts_down_and_clamps_at_zero() {
    let (state, now) = state(chrono::Duration::hours(2));
    assert_eq!(state.remaining(now), Duration::from_secs(7200));
    assert!(!state.is_due(now));

    let later = now + chrono::Duration::hours(3);
    assert_eq!(state.remaining(later), Duration::ZERO);
    assert!(state.is_due(later));
    assert!(state.is_due(state.resume_at));
}

#[test]
fn pause_status_projects_state() {
    let (state, now) = state(chrono::Duration::minutes(90));
    let status = PauseStatus::from_state(Some(&state), now);
    assert!(status.is_paused);
    assert_eq!(status.resume_at, Some(state.resume_at));
    assert_eq!(status.reason, Some(PauseReason::Threshold));
    assert_eq!(status.seconds_until_resume, Some(5400));

    let overdue = PauseStatus::from_state(Some(&state), now + chrono::Duration::hours(2));
    assert_eq!(overdue.seconds_until_resume, Some(0));

    let running = PauseStatus::from_state(None, now);
    assert!(!running.is_paused);
    assert!(running.resume_at.is_none());
    assert!(running.seconds_until_resume.is_none());
}

#[test]
fn enum_wire_names() {
    assert_eq!(json!(PauseReason::RateLimit), json!("RATE_LIMIT"));
    assert_eq!(json!(PauseReason::Manual), json!("MANUAL"));
    assert_eq!(json!(EventType::ManualResume), json!("MANUAL_RESUME"));
    assert_eq!(json!(EventType::Resumed), json!("RESUMED"));
    assert_eq!(json!(LimitType::FiveHour), json!("5_hour"));
    assert_eq!(LimitType::Weekly.as_str(), "weekly");
    assert_eq!(json!(SessionStatus::Completed), json!("completed"));
}

#[test]
fn limit_events_get_unique_prefixed_ids() {
    let a = LimitEvent::new(EventType::Threshold, "pro-20", json!({ "units": 41 }), None);
    let b = LimitEvent::new(EventType::Threshold, "pro-20", json!({ "units": 41 }), None);
    assert!(a.id.starts_with("event:"));
    assert_ne!(a.id, b.id);
    assert_eq!(a.tier, "pro-20");
}

#[test]
fn session_record_from_request() {
    let now = Utc::now();
    let started = now - chrono::Duration::minutes(3);
    let req = RegisterRequest {
        session_id: "s-1".into(),
        working_dir: PathBuf::from("/work/app"),
        pid: Some(4242),
        start_time: Some(started),
    };
    let record = SessionRecord::from_request(&req, now);
    assert_eq!(record.session_id, "s-1");
    assert_eq!(record.working_dir, PathBuf::from("/work/app"));
    assert_eq!(record.pid, Some(4242));
    assert_eq!(record.started_at, started);
    assert_eq!(record.last_activity, now);
    assert_eq!(record.unit_count, 0);
    assert!(record.is_active());
    assert!(record.usage_id.is_none());
}

#[test]
fn registration_payloads_accept_minimal_json() {
    let req: RegisterRequest =
        serde_json::from_value(json!({ "session_id": "s", "working_dir": "/tmp" }))
            .expect("register");
    assert!(req.pid.is_none());
    assert!(req.start_time.is_none());

    let beat: HeartbeatRequest =
        serde_json::from_value(json!({ "session_id": "s", "status": "completed" }))
            .expect("heartbeat");
    assert_eq!(beat.status, Some(SessionStatus::Completed));
    assert!(beat.unit_count.is_none());
}

#[test]
fn signals_without_replay_flag_count_as_live() {
    let signal: RateLimitSignal = serde_json::from_value(json!({
        "rule": "quota_exceeded",
        "limit_type": "5_hour",
        "reset_time": "2026-03-02T15:00:00Z",
        "detected_at": "2026-03-02T10:00:00Z",
        "raw_line": "Error: quota exceeded",
    }))
    .expect("signal");
    assert!(!signal.replayed);
    assert_eq!(signal.limit_type, LimitType::FiveHour);
}
