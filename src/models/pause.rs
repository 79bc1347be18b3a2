//! Persisted pause state and its public status projection.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the governor paused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseReason {
    /// Usage crossed the preemptive threshold.
    Threshold,
    /// The provider reported a rate limit.
    RateLimit,
    /// An operator forced the pause.
    Manual,
}

/// Singleton pause record. Its absence means the governor is running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseState {
    /// When the pause began.
    pub paused_at: DateTime<Utc>,
    /// Absolute time at which operations resume.
    pub resume_at: DateTime<Utc>,
    /// Cause of the pause.
    pub reason: PauseReason,
}

impl PauseState {
    /// Time left until `resume_at`, zero once it has passed.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.resume_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the resume time has been reached.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.resume_at <= now
    }
}

/// Pause status returned to hooks and the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseStatus {
    /// Whether a pause is in effect.
    pub is_paused: bool,
    /// When the pause began.
    pub paused_at: Option<DateTime<Utc>>,
    /// When operations resume.
    pub resume_at: Option<DateTime<Utc>>,
    /// Cause of the pause.
    pub reason: Option<PauseReason>,
    /// Countdown to `resume_at`, never negative.
    pub seconds_until_resume: Option<i64>,
}

impl PauseStatus {
    /// Project an optional persisted state into a status at `now`.
    #[must_use]
    pub fn from_state(state: Option<&PauseState>, now: DateTime<Utc>) -> Self {
        match state {
            Some(state) => Self {
                is_paused: true,
                paused_at: Some(state.paused_at),
                resume_at: Some(state.resume_at),
                reason: Some(state.reason),
                seconds_until_resume: Some((state.resume_at - now).num_seconds().max(0)),
            },
            None => Self {
                is_paused: false,
                paused_at: None,
                resume_at: None,
                reason: None,
                seconds_until_resume: None,
            },
        }
    }
}
