//! Resume cascade: registered stdin, registered restart, detected
//! process, then notification.

use std::path::PathBuf;
use std::sync::Arc;

use rate_governor::controller::{
    ControllerSettings, ResumeMethod, ResumeStrategy, SessionController, RESUME_CASCADE,
};
use rate_governor::models::session::{RegisterRequest, SessionRecord};
use rate_governor::persistence::session_repo::SessionRepo;

use super::test_helpers::{memory_db, Fakes};

fn settings() -> ControllerSettings {
    ControllerSettings {
        process_filter: "claude".into(),
        resume_prompt: "continue".into(),
        default_dir: PathBuf::from("/daemon/cwd"),
        agent_binary: "claude".into(),
    }
}

async fn controller(fakes: &Fakes) -> (SessionController, SessionRepo) {
    let db = memory_db().await;
    let sessions = SessionRepo::new(Arc::clone(&db));
    let controller = SessionController::new(SessionRepo::new(db), fakes.backends(), settings());
    (controller, sessions)
}

async fn register(sessions: &SessionRepo, id: &str, dir: &str, pid: u32) {
    let record = SessionRecord::from_request(
        &RegisterRequest {
            session_id: id.into(),
            working_dir: PathBuf::from(dir),
            pid: Some(pid),
            start_time: None,
        },
        chrono::Utc::now(),
    );
    sessions.save(&record).await.expect("save");
    sessions.set_active(Some(id)).await.expect("point");
}

#[test]
fn cascade_order_is_fixed() {
    assert_eq!(
        RESUME_CASCADE,
        [
            ResumeStrategy::RegisteredStdin,
            ResumeStrategy::RegisteredRestart,
            ResumeStrategy::DetectedProcess,
            ResumeStrategy::Notify,
        ]
    );
    assert_eq!(ResumeStrategy::RegisteredStdin.to_string(), "registered_stdin");
    assert_eq!(ResumeStrategy::Notify.to_string(), "notify");
}

#[tokio::test]
async fn live_registered_session_resumes_via_stdin() {
    let fakes = Fakes::new();
    fakes.processes.add(4242, Some("pts/3"));
    let (controller, sessions) = controller(&fakes).await;
    register(&sessions, "s-live", "/work/project", 4242).await;

    let outcome = controller.resume(None).await;

    assert_eq!(outcome.method, ResumeMethod::Stdin);
    assert_eq!(outcome.strategy, ResumeStrategy::RegisteredStdin);
    assert_eq!(outcome.session_id.as_deref(), Some("s-live"));
    assert_eq!(outcome.pid, Some(4242));
    assert_eq!(outcome.target.as_deref(), Some("tty:/dev/pts/3"));
    assert!(outcome.errors.is_empty());
    assert_eq!(fakes.deliveries(), vec![(4242, "continue".to_owned())]);
    assert!(fakes.launches().is_empty());
}

#[tokio::test]
async fn dead_registered_session_restarts_in_its_working_dir() {
    let fakes = Fakes::new();
    *fakes.launcher.next_pid.lock().unwrap() = Some(5151);
    let (controller, sessions) = controller(&fakes).await;
    register(&sessions, "s-dead", "/work/user-project", 4242).await;

    let outcome = controller.resume(None).await;

    assert_eq!(outcome.method, ResumeMethod::Restart);
    assert_eq!(outcome.strategy, ResumeStrategy::RegisteredRestart);
    assert_eq!(outcome.directory, Some(PathBuf::from("/work/user-project")));
    assert_eq!(outcome.pid, Some(5151));
    assert_eq!(
        fakes.launches(),
        vec![(PathBuf::from("/work/user-project"), Some("s-dead".to_owned()))]
    );

    let updated = sessions.get("s-dead").await.expect("get").expect("record");
    assert_eq!(updated.pid, Some(5151));
}

#[tokio::test]
async fn live_pid_without_terminal_falls_back_to_restart() {
    let fakes = Fakes::new();
    fakes.processes.set_alive(4242);
    *fakes.launcher.next_pid.lock().unwrap() = Some(6000);
    let (controller, sessions) = controller(&fakes).await;
    register(&sessions, "s-headless", "/work/headless", 4242).await;

    let outcome = controller.resume(Some("go on")).await;

    assert_eq!(outcome.method, ResumeMethod::Restart);
    assert_eq!(outcome.directory, Some(PathBuf::from("/work/headless")));
    assert!(fakes.deliveries().is_empty());
}

#[tokio::test]
async fn unregistered_live_process_gets_the_prompt() {
    let fakes = Fakes::new();
    fakes.processes.add(900, None);
    fakes.processes.add(901, Some("pts/1"));
    let (controller, _sessions) = controller(&fakes).await;

    let outcome = controller.resume(Some("resume now")).await;

    assert_eq!(outcome.method, ResumeMethod::Stdin);
    assert_eq!(outcome.strategy, ResumeStrategy::DetectedProcess);
    assert_eq!(outcome.pid, Some(901));
    assert!(outcome.session_id.is_none());
    assert_eq!(fakes.deliveries(), vec![(901, "resume now".to_owned())]);
}

#[tokio::test]
async fn no_process_launches_in_daemon_dir_with_history_session() {
    let mut fakes = Fakes::new();
    fakes.history = Some("from-history".into());
    *fakes.launcher.next_pid.lock().unwrap() = Some(777);
    let (controller, _sessions) = controller(&fakes).await;

    let outcome = controller.resume(None).await;

    assert_eq!(outcome.method, ResumeMethod::Restart);
    assert_eq!(outcome.strategy, ResumeStrategy::DetectedProcess);
    assert_eq!(outcome.directory, Some(PathBuf::from("/daemon/cwd")));
    assert_eq!(outcome.session_id.as_deref(), Some("from-history"));
    assert_eq!(
        fakes.launches(),
        vec![(PathBuf::from("/daemon/cwd"), Some("from-history".to_owned()))]
    );
}

#[tokio::test]
async fn nothing_to_resume_falls_through_to_notification() {
    let fakes = Fakes::new();
    let (controller, _sessions) = controller(&fakes).await;

    let outcome = controller.resume(None).await;

    assert_eq!(outcome.method, ResumeMethod::Notification);
    assert_eq!(outcome.strategy, ResumeStrategy::Notify);
    assert!(outcome.session_id.is_none());
    assert_eq!(outcome.errors.len(), 1, "launch failure is carried as context");
    assert!(outcome.errors[0].starts_with("detected_process:"));

    let notes = fakes.notes();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].1.contains("continue"));
}

#[tokio::test]
async fn notification_without_desktop_backend_still_resolves() {
    let fakes = Fakes::new();
    let db = memory_db().await;
    let mut backends = fakes.backends();
    backends.notifier = None;
    let controller = SessionController::new(SessionRepo::new(db), backends, settings());

    let outcome = controller.resume(None).await;
    assert_eq!(outcome.method, ResumeMethod::Notification);
    assert!(fakes.notes().is_empty());
}

#[tokio::test]
async fn every_failed_strategy_is_reported() {
    let fakes = Fakes::new();
    fakes.processes.add(4242, Some("pts/3"));
    *fakes.delivery.fail.lock().unwrap() = true;
    let (controller, sessions) = controller(&fakes).await;
    register(&sessions, "s-1", "/work/p", 4242).await;

    let outcome = controller.resume(None).await;

    assert_eq!(outcome.method, ResumeMethod::Notification);
    assert_eq!(outcome.session_id.as_deref(), Some("s-1"));
    assert_eq!(outcome.directory, Some(PathBuf::from("/work/p")));
    assert_eq!(outcome.errors.len(), 2);
    assert!(outcome.errors[0].starts_with("registered_stdin:"));
    assert!(outcome.errors[1].starts_with("registered_restart:"));
}

#[tokio::test]
async fn strategy_diagnosis_is_read_only() {
    let fakes = Fakes::new();
    let (controller, sessions) = controller(&fakes).await;

    let none = controller.detect_resume_strategy().await.expect("diagnose");
    assert_eq!(none.method, ResumeMethod::Restart);
    assert!(none.session_id.is_none());

    register(&sessions, "s-1", "/work/p", 4242).await;
    let dead = controller.detect_resume_strategy().await.expect("diagnose");
    assert_eq!(dead.method, ResumeMethod::Restart);
    assert_eq!(dead.session_id.as_deref(), Some("s-1"));

    fakes.processes.set_alive(4242);
    let live = controller.detect_resume_strategy().await.expect("diagnose");
    assert_eq!(live.method, ResumeMethod::Stdin);
    assert_eq!(live.pid, Some(4242));

    assert!(fakes.launches().is_empty());
    assert!(fakes.deliveries().is_empty());
}
