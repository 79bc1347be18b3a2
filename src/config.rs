//! Governor configuration parsing and normalization.
//!
//! Every field is optional. Values that are present but unusable are
//! replaced by their documented default and reported with a warning; a
//! bad config file never stops the control loop.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::tier::Tier;
use crate::{AppError, Result};

/// Directory under the project root holding the database and config.
pub const STATE_DIR: &str = ".rate-governor";

const DEFAULT_THRESHOLD: f64 = 0.9;
const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 300;
const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Explicit override of the built-in tier table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Quota window length in seconds.
    pub window_seconds: u64,
    /// Units allowed per window.
    pub units: u32,
    /// Weekly allowance in hours.
    #[serde(default)]
    pub weekly_hours: u32,
}

impl LimitsConfig {
    /// Convert into a [`Tier`] value.
    #[must_use]
    pub fn to_tier(&self) -> Tier {
        Tier {
            window: Duration::from_secs(self.window_seconds),
            units: self.units,
            weekly_hours: self.weekly_hours,
        }
    }
}

/// Preemptive pause and control-loop settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct DaemonConfig {
    /// Whether threshold-based pausing is enabled.
    pub preemptive_pause: bool,
    /// Fraction of the unit allowance that triggers a pause.
    pub preemptive_threshold: f64,
    /// Seconds between periodic quota checks.
    pub check_interval_seconds: u64,
    /// Prompt delivered to the agent when resuming.
    pub resume_prompt: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            preemptive_pause: true,
            preemptive_threshold: DEFAULT_THRESHOLD,
            check_interval_seconds: DEFAULT_CHECK_INTERVAL_SECONDS,
            resume_prompt: "continue".into(),
        }
    }
}

impl DaemonConfig {
    /// Interval between periodic checks.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }
}

/// Log monitor settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct MonitorConfig {
    /// Whether the log monitor runs at all.
    pub enabled: bool,
    /// File to follow, or directory whose newest file is followed.
    pub path: String,
    /// Treat `path` as a directory and follow its newest matching file.
    pub watch_latest: bool,
    /// Glob applied to file names in directory mode.
    pub file_pattern: String,
    /// Lines replayed from the end of the file on attach.
    pub backlog_lines: usize,
    /// Maximum wait for a missing file to appear.
    pub appear_timeout_seconds: u64,
    /// Delay before restarting a failed watch.
    pub restart_backoff_seconds: u64,
    /// Fallback poll interval when no file-system event arrives.
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "~/.claude/debug".into(),
            watch_latest: true,
            file_pattern: "*.txt".into(),
            backlog_lines: 10,
            appear_timeout_seconds: 30,
            restart_backoff_seconds: 5,
            poll_interval_ms: 1000,
        }
    }
}

impl MonitorConfig {
    /// Resolved monitor path with `~/` expanded.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

/// Agent process settings used by the session controller.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    /// Agent CLI binary.
    pub binary: String,
    /// Substring identifying agent processes in the process table.
    pub process_filter: String,
    /// Arguments that make the agent resume its last session.
    pub resume_args: Vec<String>,
    /// Multiplexer (tmux) session that may host the agent.
    pub multiplexer_session: Option<String>,
    /// Agent history file used to recover the last session id.
    pub history_file: String,
    /// Timeout applied to every external command.
    pub command_timeout_seconds: u64,
    /// Whether desktop notifications are attempted.
    pub desktop_notifications: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".into(),
            process_filter: "claude".into(),
            resume_args: vec!["--resume".into()],
            multiplexer_session: None,
            history_file: "~/.claude/history.jsonl".into(),
            command_timeout_seconds: 5,
            desktop_notifications: true,
        }
    }
}

impl AgentConfig {
    /// Timeout for external commands.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// Resolved history file path with `~/` expanded.
    #[must_use]
    pub fn resolved_history_file(&self) -> PathBuf {
        expand_home(&self.history_file)
    }
}

/// Top-level configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct GovernorConfig {
    /// Quota tier name.
    pub tier: String,
    /// Optional explicit limits overriding the tier table.
    pub limits: Option<LimitsConfig>,
    /// Control-loop settings.
    pub daemon: DaemonConfig,
    /// Log monitor settings.
    pub monitor: MonitorConfig,
    /// Agent process settings.
    pub agent: AgentConfig,
    /// Days of event and usage history to keep.
    pub retention_days: u32,
    /// Port for the local HTTP control plane.
    pub http_port: u16,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            tier: "pro-20".into(),
            limits: None,
            daemon: DaemonConfig::default(),
            monitor: MonitorConfig::default(),
            agent: AgentConfig::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
            http_port: 3030,
        }
    }
}

impl GovernorConfig {
    /// Load and normalize configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Load configuration, falling back to defaults when the file is
    /// missing or unparseable.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            warn!(path = %path.display(), "config not found, using defaults");
            return Self::default();
        }
        Self::load_from_path(path).unwrap_or_else(|err| {
            warn!(%err, path = %path.display(), "config unusable, using defaults");
            Self::default()
        })
    }

    /// Parse configuration from a TOML string and normalize values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the TOML cannot be parsed.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.normalize();
        Ok(config)
    }

    /// Path of the state directory for `project_root`.
    #[must_use]
    pub fn state_dir(project_root: &Path) -> PathBuf {
        project_root.join(STATE_DIR)
    }

    /// Path of the `SQLite` database for `project_root`.
    #[must_use]
    pub fn db_path(project_root: &Path) -> PathBuf {
        Self::state_dir(project_root).join("state.db")
    }

    /// Default config file location for `project_root`.
    #[must_use]
    pub fn default_config_path(project_root: &Path) -> PathBuf {
        Self::state_dir(project_root).join("config.toml")
    }

    /// Retention window for events and usage rows.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    fn normalize(&mut self) {
        let threshold = self.daemon.preemptive_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            warn!(
                threshold,
                default = DEFAULT_THRESHOLD,
                "preemptive_threshold must be in (0, 1], using default"
            );
            self.daemon.preemptive_threshold = DEFAULT_THRESHOLD;
        }

        if self.daemon.check_interval_seconds == 0 {
            warn!(
                default = DEFAULT_CHECK_INTERVAL_SECONDS,
                "check_interval_seconds must be positive, using default"
            );
            self.daemon.check_interval_seconds = DEFAULT_CHECK_INTERVAL_SECONDS;
        }

        if self.daemon.resume_prompt.trim().is_empty() {
            warn!("resume_prompt is empty, using default");
            self.daemon.resume_prompt = DaemonConfig::default().resume_prompt;
        }

        if let Some(ref limits) = self.limits {
            if limits.window_seconds == 0 || limits.units == 0 {
                warn!("limits override has a zero window or allowance, ignoring it");
                self.limits = None;
            }
        }

        if self.retention_days == 0 {
            warn!(
                default = DEFAULT_RETENTION_DAYS,
                "retention_days must be positive, using default"
            );
            self.retention_days = DEFAULT_RETENTION_DAYS;
        }

        if glob::Pattern::new(&self.monitor.file_pattern).is_err() {
            warn!(
                pattern = %self.monitor.file_pattern,
                "invalid monitor file_pattern, using default"
            );
            self.monitor.file_pattern = MonitorConfig::default().file_pattern;
        }

        if self.monitor.poll_interval_ms == 0 {
            self.monitor.poll_interval_ms = MonitorConfig::default().poll_interval_ms;
        }

        if self.agent.command_timeout_seconds == 0 {
            self.agent.command_timeout_seconds = AgentConfig::default().command_timeout_seconds;
        }
    }
}

/// Expand a leading `~/` against `$HOME`; other paths are returned as-is.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
