//! Session registration, heartbeats and end-of-session handling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rate_governor::models::session::{
    EndRequest, HeartbeatRequest, RegisterRequest, SessionStatus,
};
use rate_governor::models::usage::UsageStatus;
use rate_governor::persistence::session_repo::SessionRepo;
use rate_governor::persistence::usage_repo::UsageRepo;
use rate_governor::AppError;

use super::test_helpers::{governor, Fakes};

fn register(id: &str, dir: &str, pid: u32) -> RegisterRequest {
    RegisterRequest {
        session_id: id.into(),
        working_dir: PathBuf::from(dir),
        pid: Some(pid),
        start_time: None,
    }
}

fn heartbeat(id: &str, units: Option<u32>, status: Option<SessionStatus>) -> HeartbeatRequest {
    HeartbeatRequest {
        session_id: id.into(),
        unit_count: units,
        status,
    }
}

#[tokio::test]
async fn register_sets_active_session_and_opens_usage() {
    let fakes = Fakes::new();
    let (gov, db, _cancel) = governor(&fakes).await;

    let resp = gov
        .register_session(register("s-1", "/work/a", 100))
        .await
        .expect("register");
    assert!(resp.success);
    assert_eq!(resp.session_id, "s-1");
    assert!(!resp.pause.is_paused);

    let sessions = SessionRepo::new(Arc::clone(&db));
    assert_eq!(sessions.active_id().await.expect("active").as_deref(), Some("s-1"));
    let record = sessions.get("s-1").await.expect("get").expect("stored");
    assert_eq!(record.status, SessionStatus::Active);
    assert_eq!(record.working_dir, PathBuf::from("/work/a"));

    let usage = UsageRepo::new(db)
        .find_active("s-1")
        .await
        .expect("usage")
        .expect("open row");
    assert_eq!(Some(usage.id), record.usage_id);
    assert_eq!(usage.agent, "claude");
}

#[tokio::test]
async fn register_reports_current_pause() {
    let fakes = Fakes::new();
    let (gov, _db, _cancel) = governor(&fakes).await;
    gov.force_pause(Duration::from_secs(900)).await.expect("pause");

    let resp = gov
        .register_session(register("s-1", "/work/a", 100))
        .await
        .expect("register");
    assert!(resp.pause.is_paused);
    assert!(resp.pause.seconds_until_resume.expect("countdown") > 0);
}

#[tokio::test]
async fn new_registration_supersedes_previous_session() {
    let fakes = Fakes::new();
    let (gov, db, _cancel) = governor(&fakes).await;

    gov.register_session(register("s-1", "/work/a", 100)).await.expect("first");
    gov.register_session(register("s-2", "/work/b", 200)).await.expect("second");

    let sessions = SessionRepo::new(Arc::clone(&db));
    assert_eq!(sessions.active_id().await.expect("active").as_deref(), Some("s-2"));
    let old = sessions.get("s-1").await.expect("get").expect("kept");
    assert_eq!(old.status, SessionStatus::Completed);
    assert_eq!(old.end_reason.as_deref(), Some("superseded"));
    assert!(UsageRepo::new(db).find_active("s-1").await.expect("usage").is_none());

    assert_eq!(gov.list_sessions().await.expect("list").len(), 2);
}

#[tokio::test]
async fn reregistering_same_session_reuses_usage_row() {
    let fakes = Fakes::new();
    let (gov, db, _cancel) = governor(&fakes).await;

    gov.register_session(register("s-1", "/work/a", 100)).await.expect("first");
    gov.register_session(register("s-1", "/work/moved", 101)).await.expect("again");

    let record = SessionRepo::new(Arc::clone(&db))
        .get("s-1")
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(record.status, SessionStatus::Active);
    assert_eq!(record.working_dir, PathBuf::from("/work/moved"));
    assert_eq!(record.pid, Some(101));

    let row = UsageRepo::new(db).find_active("s-1").await.expect("usage").expect("row");
    assert_eq!(Some(row.id), record.usage_id);
}

#[tokio::test]
async fn heartbeat_updates_units_and_returns_status() {
    let fakes = Fakes::new();
    let (gov, db, _cancel) = governor(&fakes).await;
    gov.register_session(register("s-1", "/work/a", 100)).await.expect("register");

    let status = gov
        .heartbeat(heartbeat("s-1", Some(12), None))
        .await
        .expect("heartbeat");
    assert!(!status.is_paused);

    let record = SessionRepo::new(Arc::clone(&db))
        .get("s-1")
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(record.unit_count, 12);
    let row = UsageRepo::new(db).find_active("s-1").await.expect("usage").expect("row");
    assert_eq!(row.units, 12);
}

#[tokio::test]
async fn heartbeat_with_completed_status_ends_session() {
    let fakes = Fakes::new();
    let (gov, db, _cancel) = governor(&fakes).await;
    gov.register_session(register("s-1", "/work/a", 100)).await.expect("register");

    gov.heartbeat(heartbeat("s-1", Some(7), Some(SessionStatus::Completed)))
        .await
        .expect("heartbeat");

    let sessions = SessionRepo::new(Arc::clone(&db));
    assert!(sessions.active_id().await.expect("active").is_none());
    let record = sessions.get("s-1").await.expect("get").expect("stored");
    assert_eq!(record.status, SessionStatus::Completed);

    let usage = UsageRepo::new(db);
    assert!(usage.find_active("s-1").await.expect("usage").is_none());
    let closed = usage
        .get_by_id(record.usage_id.expect("row id"))
        .await
        .expect("usage")
        .expect("row");
    assert_eq!(closed.status, UsageStatus::Completed);
    assert_eq!(closed.units, 7);
    assert!(closed.ended_at.is_some());
}

#[tokio::test]
async fn end_session_records_reason_and_final_units() {
    let fakes = Fakes::new();
    let (gov, db, _cancel) = governor(&fakes).await;
    gov.register_session(register("s-1", "/work/a", 100)).await.expect("register");

    gov.end_session(EndRequest {
        session_id: "s-1".into(),
        reason: Some("user_exit".into()),
        final_unit_count: Some(30),
    })
    .await
    .expect("end");

    let record = SessionRepo::new(Arc::clone(&db))
        .get("s-1")
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(record.end_reason.as_deref(), Some("user_exit"));
    assert_eq!(record.unit_count, 30);

    // Ending twice is harmless.
    gov.end_session(EndRequest {
        session_id: "s-1".into(),
        reason: None,
        final_unit_count: None,
    })
    .await
    .expect("end again");
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let fakes = Fakes::new();
    let (gov, _db, _cancel) = governor(&fakes).await;

    let err = gov
        .heartbeat(heartbeat("ghost", None, None))
        .await
        .expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));

    let err = gov
        .end_session(EndRequest {
            session_id: "ghost".into(),
            reason: None,
            final_unit_count: None,
        })
        .await
        .expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn empty_session_id_is_rejected() {
    let fakes = Fakes::new();
    let (gov, _db, _cancel) = governor(&fakes).await;

    let err = gov
        .register_session(register("  ", "/work/a", 100))
        .await
        .expect_err("empty id");
    assert!(matches!(err, AppError::Api(_)));
    assert!(gov.list_sessions().await.expect("list").is_empty());
}
