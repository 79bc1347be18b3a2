//! Background task following the agent log and emitting rate-limit signals.
//!
//! Each watch attempt resolves the target, waits (bounded) for it to exist,
//! replays a short backlog, then reads appended lines on every file-system
//! wake-up or poll tick. Any failure ends the attempt; the task logs it and
//! starts a fresh attempt after a fixed backoff until cancelled.
//!
//! Every forwarded line is recorded as a [`MonitorCursor`] in the state
//! store. Backlog lines at or before the cursor are not replayed again, so
//! re-attaching after a restart does not re-announce a limit that was
//! already handled.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::MonitorConfig;
use crate::models::signal::{MonitorCursor, RateLimitSignal};
use crate::persistence::state_repo::{keys, StateRepo};
use crate::policy::signal::parse_signal_from_text;
use crate::{AppError, Result};

use super::resolve::{resolve_target, MonitorTarget};
use super::tail::TailReader;

/// Interval between existence checks while waiting for the target.
const APPEAR_POLL: Duration = Duration::from_secs(1);

/// Runtime settings for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// What to follow.
    pub target: MonitorTarget,
    /// Lines replayed from the end of the file on attach.
    pub backlog_lines: usize,
    /// Maximum wait for a missing target.
    pub appear_timeout: Duration,
    /// Delay before a new attempt after a failure.
    pub restart_backoff: Duration,
    /// Fallback read interval.
    pub poll_interval: Duration,
}

impl MonitorSettings {
    /// Build settings from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the target cannot be described.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        Ok(Self {
            target: MonitorTarget::from_config(config)?,
            backlog_lines: config.backlog_lines,
            appear_timeout: Duration::from_secs(config.appear_timeout_seconds),
            restart_backoff: Duration::from_secs(config.restart_backoff_seconds),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }
}

/// How a watch attempt ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchEnd {
    /// Shutdown requested or nobody is listening any more.
    Stopped,
    /// A newer file appeared in directory mode.
    Superseded,
}

/// Follows one evolving log source.
pub struct LogMonitor {
    settings: MonitorSettings,
    state: StateRepo,
    signal_tx: mpsc::Sender<RateLimitSignal>,
}

impl LogMonitor {
    /// Create a monitor that sends signals on `signal_tx` and keeps its
    /// cursor in `state`.
    #[must_use]
    pub fn new(
        settings: MonitorSettings,
        state: StateRepo,
        signal_tx: mpsc::Sender<RateLimitSignal>,
    ) -> Self {
        Self {
            settings,
            state,
            signal_tx,
        }
    }

    /// Spawn the monitor loop. It runs until `cancel` fires or the signal
    /// receiver is dropped.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel).instrument(info_span!("log_monitor")))
    }

    async fn run(self, cancel: CancellationToken) {
        info!(watched = ?self.settings.target, "log monitor started");
        loop {
            match self.watch_once(&cancel).await {
                Ok(WatchEnd::Stopped) => break,
                Ok(WatchEnd::Superseded) => {
                    info!("newer log file detected, switching");
                }
                Err(err) => {
                    warn!(
                        %err,
                        backoff_secs = self.settings.restart_backoff.as_secs(),
                        "log watch failed, restarting after backoff"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.settings.restart_backoff) => {}
                    }
                }
            }
        }
        info!("log monitor shutting down");
    }

    async fn watch_once(&self, cancel: &CancellationToken) -> Result<WatchEnd> {
        // ── Resolve and wait for the target ──────────────────
        let Some(path) = self.wait_for_target(cancel).await? else {
            return Ok(WatchEnd::Stopped);
        };

        // ── Attach and replay backlog ────────────────────────
        let (mut reader, backlog) = TailReader::attach(&path, self.settings.backlog_lines).await?;
        let backlog = self.unseen_backlog(&path, reader.offset(), backlog).await;
        info!(path = %path.display(), backlog = backlog.len(), "attached to log file");
        if !self.emit(&path, reader.offset(), &backlog, true).await {
            return Ok(WatchEnd::Stopped);
        }

        // ── Follow appended lines ────────────────────────────
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();
        let _watcher = start_watcher(&path, wake_tx);

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(WatchEnd::Stopped),
                Some(()) = wake_rx.recv() => {}
                _ = poll.tick() => {}
            }

            if !reader.path().exists() {
                return Err(AppError::Monitor(format!(
                    "{} was removed",
                    reader.path().display()
                )));
            }

            let lines = reader.read_new().await?;
            if !self.emit(&path, reader.offset(), &lines, false).await {
                return Ok(WatchEnd::Stopped);
            }

            if self.settings.target.is_directory_mode() {
                if let Some(newest) = resolve_target(&self.settings.target)? {
                    if newest != path {
                        return Ok(WatchEnd::Superseded);
                    }
                }
            }
        }
    }

    /// Poll until the target exists. `Ok(None)` means cancelled.
    async fn wait_for_target(&self, cancel: &CancellationToken) -> Result<Option<PathBuf>> {
        let deadline = Instant::now() + self.settings.appear_timeout;
        let mut logged = false;
        loop {
            if let Some(path) = resolve_target(&self.settings.target)? {
                return Ok(Some(path));
            }
            if Instant::now() >= deadline {
                return Err(AppError::Monitor(format!(
                    "timed out after {}s waiting for {:?}",
                    self.settings.appear_timeout.as_secs(),
                    self.settings.target
                )));
            }
            if !logged {
                info!(watched = ?self.settings.target, "waiting for log file to appear");
                logged = true;
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(None),
                () = tokio::time::sleep(APPEAR_POLL) => {}
            }
        }
    }

    /// Drop backlog lines already forwarded before the last attach.
    ///
    /// `len` is the file length at attach. A different path or a file
    /// shorter than the cursor means the log was replaced, so the whole
    /// backlog is new.
    async fn unseen_backlog(&self, path: &Path, len: u64, mut backlog: Vec<String>) -> Vec<String> {
        let cursor = match self.state.get_state::<MonitorCursor>(keys::MONITOR_CURSOR).await {
            Ok(Some(cursor)) => cursor,
            Ok(None) => return backlog,
            Err(err) => {
                warn!(%err, "cannot read monitor cursor, replaying full backlog");
                return backlog;
            }
        };
        if cursor.path != path || len < cursor.offset {
            return backlog;
        }
        if len == cursor.offset {
            debug!("log unchanged since last signal, skipping backlog");
            return Vec::new();
        }
        match backlog.iter().rposition(|line| line_hash(line) == cursor.line_hash) {
            Some(seen) => backlog.split_off(seen + 1),
            None => backlog,
        }
    }

    /// Parse and forward lines. Returns `false` once the receiver is gone.
    async fn emit(&self, path: &Path, offset: u64, lines: &[String], replayed: bool) -> bool {
        for line in lines {
            let Some(mut signal) = parse_signal_from_text(line, Utc::now()) else {
                continue;
            };
            signal.replayed = replayed;
            info!(
                rule = %signal.rule,
                limit_type = signal.limit_type.as_str(),
                reset_time = %signal.reset_time,
                replayed,
                "rate-limit signal detected"
            );
            if self.signal_tx.send(signal).await.is_err() {
                debug!("signal receiver dropped");
                return false;
            }
            self.remember(path, offset, line).await;
        }
        true
    }

    async fn remember(&self, path: &Path, offset: u64, line: &str) {
        let cursor = MonitorCursor {
            path: path.to_owned(),
            offset,
            line_hash: line_hash(line),
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.state.set_state(keys::MONITOR_CURSOR, Some(&cursor)).await {
            warn!(%err, "failed to persist monitor cursor");
        }
    }
}

/// SHA-256 hex digest of a log line.
fn line_hash(line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(line.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Watch the file's parent directory and forward every event as a wake-up.
/// Returns `None` when the watcher cannot be created; polling still runs.
fn start_watcher(path: &Path, wake_tx: mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let dir = path.parent().unwrap_or(path).to_owned();
    let watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(_) => {
                let _ = wake_tx.send(());
            }
            Err(err) => warn!(%err, "file watcher error"),
        },
    )
    .and_then(|mut watcher| {
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    });

    match watcher {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            let err = AppError::from(err);
            warn!(%err, dir = %dir.display(), "file watcher unavailable, polling only");
            None
        }
    }
}
