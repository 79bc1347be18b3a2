//! Rate-limit signals extracted from logs or response headers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which quota a signal refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LimitType {
    /// The rolling five-hour window.
    #[serde(rename = "5_hour")]
    FiveHour,
    /// The weekly allowance.
    #[serde(rename = "weekly")]
    Weekly,
    /// The text did not say.
    #[serde(rename = "unknown")]
    Unknown,
}

impl LimitType {
    /// Stable string form used in logs and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveHour => "5_hour",
            Self::Weekly => "weekly",
            Self::Unknown => "unknown",
        }
    }
}

/// A detected rate-limit condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitSignal {
    /// Name of the rule that matched.
    pub rule: String,
    /// Quota the signal refers to.
    pub limit_type: LimitType,
    /// When the quota is expected to reset.
    pub reset_time: DateTime<Utc>,
    /// When the signal was detected.
    pub detected_at: DateTime<Utc>,
    /// The text that produced the signal.
    pub raw_line: String,
    /// Whether the line came from the backlog replayed on attach rather
    /// than being appended while watched.
    #[serde(default)]
    pub replayed: bool,
}

/// Last log line the monitor forwarded as a signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorCursor {
    /// File the line was read from.
    pub path: PathBuf,
    /// Read offset in bytes once the line had been consumed.
    pub offset: u64,
    /// SHA-256 hex digest of the line.
    pub line_hash: String,
    /// When the signal was forwarded.
    pub recorded_at: DateTime<Utc>,
}
