//! Persistence layer modules.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{AppError, Result};

pub mod db;
pub mod event_repo;
pub mod retention;
pub mod schema;
pub mod session_repo;
pub mod state_repo;
pub mod usage_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Fixed-width RFC 3339 form so stored timestamps sort lexicographically.
pub(crate) fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_time(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}
