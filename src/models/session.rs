//! Registered agent session records and the registration API payloads.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pause::PauseStatus;

/// Lifecycle status for a registered session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is running and eligible for resume delivery.
    Active,
    /// Session ended or was superseded.
    Completed,
}

/// A session announced by the agent's hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    /// Agent-assigned session identifier.
    pub session_id: String,
    /// Directory the agent runs in.
    pub working_dir: PathBuf,
    /// OS process id of the agent, when known.
    pub pid: Option<u32>,
    /// Session start time.
    pub started_at: DateTime<Utc>,
    /// Time of the last heartbeat.
    pub last_activity: DateTime<Utc>,
    /// Units reported so far.
    pub unit_count: u32,
    /// Current status.
    pub status: SessionStatus,
    /// Usage row fed by this session.
    pub usage_id: Option<i64>,
    /// Why the session ended.
    #[serde(default)]
    pub end_reason: Option<String>,
}

impl SessionRecord {
    /// Construct an active record from a registration request.
    #[must_use]
    pub fn from_request(req: &RegisterRequest, now: DateTime<Utc>) -> Self {
        let started_at = req.start_time.unwrap_or(now);
        Self {
            session_id: req.session_id.clone(),
            working_dir: req.working_dir.clone(),
            pid: req.pid,
            started_at,
            last_activity: now,
            unit_count: 0,
            status: SessionStatus::Active,
            usage_id: None,
            end_reason: None,
        }
    }

    /// Whether the session is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Body of a session registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Agent-assigned session identifier.
    pub session_id: String,
    /// Directory the agent runs in.
    pub working_dir: PathBuf,
    /// OS process id of the agent.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Session start time; defaults to the registration time.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

/// Reply to a registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResponse {
    /// Always `true` when returned.
    pub success: bool,
    /// The registered session.
    pub session_id: String,
    /// Pause status at registration time.
    pub pause: PauseStatus,
}

/// Body of a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRequest {
    /// Session sending the heartbeat.
    pub session_id: String,
    /// Units consumed so far, when reported.
    #[serde(default)]
    pub unit_count: Option<u32>,
    /// Reported status; `completed` ends the session.
    #[serde(default)]
    pub status: Option<SessionStatus>,
}

/// Body of a session end notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndRequest {
    /// Session that ended.
    pub session_id: String,
    /// Free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Final unit count, when reported.
    #[serde(default)]
    pub final_unit_count: Option<u32>,
}
