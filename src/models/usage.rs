//! Usage accounting records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status for a usage row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    /// Session still consuming units.
    Active,
    /// Session ended; the row is immutable.
    Completed,
}

/// One row per tracked work session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRecord {
    /// Auto-assigned row identifier.
    pub id: i64,
    /// Identity of the work session feeding this row.
    pub session_id: String,
    /// Agent name.
    pub agent: String,
    /// Session start time.
    pub started_at: DateTime<Utc>,
    /// Session end time; `None` while active.
    pub ended_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: UsageStatus,
    /// Units consumed so far.
    pub units: u32,
}

/// Point-in-time usage figures handed to the policy engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Units consumed in the current window.
    pub units: u32,
    /// When the figures were read.
    pub captured_at: DateTime<Utc>,
}

impl UsageSnapshot {
    /// Snapshot `units` at `captured_at`.
    #[must_use]
    pub fn new(units: u32, captured_at: DateTime<Utc>) -> Self {
        Self { units, captured_at }
    }
}
