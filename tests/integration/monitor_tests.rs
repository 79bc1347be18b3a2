//! Log monitor following real files on disk.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rate_governor::models::pause::PauseReason;
use rate_governor::models::signal::{MonitorCursor, RateLimitSignal};
use rate_governor::monitor::resolve::MonitorTarget;
use rate_governor::monitor::{LogMonitor, MonitorSettings};
use rate_governor::persistence::db::Database;
use rate_governor::persistence::state_repo::{keys, StateRepo};

use super::test_helpers::{governor, memory_db, Fakes};

const RETRY_AFTER_LINE: &str = "[ERROR] Rate limit exceeded. Retry-After: 18000";

fn settings(target: MonitorTarget) -> MonitorSettings {
    MonitorSettings {
        target,
        backlog_lines: 10,
        appear_timeout: Duration::from_secs(10),
        restart_backoff: Duration::from_millis(100),
        poll_interval: Duration::from_millis(50),
    }
}

fn append(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log");
    writeln!(file, "{line}").expect("append");
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.expect("monitor exits");
    }
}

fn start(
    settings: MonitorSettings,
    db: &Arc<Database>,
    tx: mpsc::Sender<RateLimitSignal>,
) -> Running {
    let cancel = CancellationToken::new();
    let handle = LogMonitor::new(settings, StateRepo::new(Arc::clone(db)), tx).spawn(cancel.clone());
    Running { cancel, handle }
}

async fn next_signal(rx: &mut mpsc::Receiver<RateLimitSignal>) -> RateLimitSignal {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("signal within timeout")
        .expect("channel open")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<RateLimitSignal>) {
    let received = tokio::time::timeout(Duration::from_millis(600), rx.recv()).await;
    assert!(received.is_err(), "unexpected signal: {received:?}");
}

#[tokio::test]
async fn appended_rate_limit_line_emits_signal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent.log");
    append(&path, "starting up");
    let db = memory_db().await;

    let (tx, mut rx) = mpsc::channel(8);
    let monitor = start(settings(MonitorTarget::File(path.clone())), &db, tx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    append(&path, "[ERROR] API error: 429 Too Many Requests");

    let signal = next_signal(&mut rx).await;
    assert_eq!(signal.rule, "too_many_requests");
    assert!(signal.raw_line.contains("429"));
    assert!(signal.reset_time > signal.detected_at);
    assert!(!signal.replayed);

    monitor.stop().await;
}

#[tokio::test]
async fn backlog_is_replayed_on_first_attach() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent.log");
    append(&path, "rate limit exceeded, retry-after: 120");
    let db = memory_db().await;

    let (tx, mut rx) = mpsc::channel(8);
    let monitor = start(settings(MonitorTarget::File(path.clone())), &db, tx);

    let signal = next_signal(&mut rx).await;
    assert_eq!(signal.rule, "rate_limit_exceeded");
    assert!(signal.replayed);
    assert_eq!((signal.reset_time - signal.detected_at).num_seconds(), 120);

    monitor.stop().await;

    let cursor: MonitorCursor = StateRepo::new(db)
        .get_state(keys::MONITOR_CURSOR)
        .await
        .expect("state")
        .expect("cursor recorded");
    assert_eq!(cursor.path, path);
    assert_eq!(cursor.offset, std::fs::metadata(&path).expect("meta").len());
}

#[tokio::test]
async fn restart_on_unchanged_file_does_not_repeat_signal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent.log");
    append(&path, "boot");
    append(&path, RETRY_AFTER_LINE);
    let db = memory_db().await;
    let (tx, mut rx) = mpsc::channel(8);

    let first = start(settings(MonitorTarget::File(path.clone())), &db, tx.clone());
    assert_eq!(next_signal(&mut rx).await.raw_line, RETRY_AFTER_LINE);
    first.stop().await;

    let second = start(settings(MonitorTarget::File(path.clone())), &db, tx.clone());
    assert_quiet(&mut rx).await;
    second.stop().await;

    // Lines written while the daemon was down are still picked up.
    append(&path, "some unrelated output");
    append(&path, "Error: quota exceeded");
    let third = start(settings(MonitorTarget::File(path.clone())), &db, tx);
    let signal = next_signal(&mut rx).await;
    assert_eq!(signal.rule, "quota_exceeded");
    assert!(signal.replayed);
    assert_quiet(&mut rx).await;
    third.stop().await;
}

#[tokio::test]
async fn replaced_log_replays_its_backlog() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent.log");
    append(&path, "warming up the session with a long line of output");
    append(&path, RETRY_AFTER_LINE);
    let db = memory_db().await;
    let (tx, mut rx) = mpsc::channel(8);

    let first = start(settings(MonitorTarget::File(path.clone())), &db, tx.clone());
    next_signal(&mut rx).await;
    first.stop().await;

    std::fs::remove_file(&path).expect("remove");
    append(&path, "Error: quota exceeded");

    let second = start(settings(MonitorTarget::File(path.clone())), &db, tx);
    assert_eq!(next_signal(&mut rx).await.rule, "quota_exceeded");
    second.stop().await;
}

#[tokio::test]
async fn restart_neither_moves_nor_recreates_a_pause() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent.log");
    append(&path, RETRY_AFTER_LINE);

    let fakes = Fakes::new();
    let (gov, db, gov_cancel) = governor(&fakes).await;
    let (tx, rx) = mpsc::channel(8);
    let loop_gov = Arc::clone(&gov);
    let loop_cancel = gov_cancel.clone();
    let governor_loop = tokio::spawn(async move { loop_gov.run(rx, loop_cancel).await });

    let first = start(settings(MonitorTarget::File(path.clone())), &db, tx.clone());
    let mut resume_at = None;
    for _ in 0..250 {
        resume_at = gov.pause_status().await.expect("status").resume_at;
        if resume_at.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let resume_at = resume_at.expect("log line pauses");
    assert_eq!(
        gov.pause_status().await.expect("status").reason,
        Some(PauseReason::RateLimit)
    );
    first.stop().await;

    let second = start(settings(MonitorTarget::File(path.clone())), &db, tx.clone());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        gov.pause_status().await.expect("status").resume_at,
        Some(resume_at)
    );
    second.stop().await;

    assert!(gov.force_resume().await.expect("resume"));
    let third = start(settings(MonitorTarget::File(path.clone())), &db, tx);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!gov.pause_status().await.expect("status").is_paused);
    third.stop().await;

    gov_cancel.cancel();
    governor_loop.await.expect("loop exits");
}

#[tokio::test]
async fn follows_newest_file_that_appears_later() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = MonitorTarget::LatestIn {
        dir: dir.path().to_owned(),
        pattern: glob::Pattern::new("*.txt").expect("glob"),
    };
    let db = memory_db().await;

    let (tx, mut rx) = mpsc::channel(8);
    let monitor = start(settings(target), &db, tx);

    tokio::time::sleep(Duration::from_millis(300)).await;
    append(&dir.path().join("ignored.log"), "quota exceeded");
    append(&dir.path().join("session-1.txt"), "Error: quota exceeded");

    let signal = next_signal(&mut rx).await;
    assert_eq!(signal.rule, "quota_exceeded");
    assert!(signal.raw_line.starts_with("Error"));

    monitor.stop().await;
}

#[tokio::test]
async fn removed_file_is_followed_again_once_recreated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("agent.log");
    append(&path, "boot");
    let db = memory_db().await;

    let (tx, mut rx) = mpsc::channel(8);
    let monitor = start(settings(MonitorTarget::File(path.clone())), &db, tx);

    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::remove_file(&path).expect("remove");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!monitor.handle.is_finished(), "monitor survives the removal");

    append(&path, "recreated");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    append(&path, "[ERROR] API error: 429 Too Many Requests");

    let signal = next_signal(&mut rx).await;
    assert_eq!(signal.rule, "too_many_requests");

    monitor.stop().await;
}

#[tokio::test]
async fn file_created_after_appear_timeout_is_picked_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("late.log");
    let db = memory_db().await;

    let mut short = settings(MonitorTarget::File(path.clone()));
    short.appear_timeout = Duration::from_millis(200);
    let (tx, mut rx) = mpsc::channel(8);
    let monitor = start(short, &db, tx);

    // Long enough for at least one attempt to time out and back off.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!monitor.handle.is_finished(), "monitor keeps retrying");

    append(&path, "Error: quota exceeded");
    let signal = next_signal(&mut rx).await;
    assert_eq!(signal.rule, "quota_exceeded");

    monitor.stop().await;
}

#[tokio::test]
async fn cancellation_stops_a_monitor_waiting_for_its_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = memory_db().await;
    let (tx, _rx) = mpsc::channel(8);
    let monitor = start(settings(MonitorTarget::File(dir.path().join("never.log"))), &db, tx);

    tokio::time::sleep(Duration::from_millis(100)).await;
    monitor.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), monitor.handle)
        .await
        .expect("stops promptly")
        .expect("monitor exits");
}
