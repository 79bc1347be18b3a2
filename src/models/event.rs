//! Append-only limit event audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of governance event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Paused because usage crossed the threshold.
    Threshold,
    /// Paused because the provider reported a rate limit.
    RateLimit,
    /// Operations resumed after a pause.
    Resumed,
    /// Operator forced a pause.
    ManualPause,
    /// Operator forced a resume.
    ManualResume,
}

/// Audit record of a pause or resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitEvent {
    /// Unique record identifier (UUID v4 prefixed `event:`).
    pub id: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    pub event_type: EventType,
    /// Tier name in effect.
    pub tier: String,
    /// Usage figures at the time of the event.
    pub usage: serde_json::Value,
    /// Scheduled reset, when the event carries one.
    pub reset_time: Option<DateTime<Utc>>,
}

impl LimitEvent {
    /// Construct a new event stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: EventType,
        tier: impl Into<String>,
        usage: serde_json::Value,
        reset_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: format!("event:{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            event_type,
            tier: tier.into(),
            usage,
            reset_time,
        }
    }
}
