//! Limit event repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::event::{EventType, LimitEvent};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_db_time, to_db_time};

/// Append-only repository for limit events.
#[derive(Clone)]
pub struct EventRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    timestamp: String,
    event_type: String,
    tier: String,
    usage_snapshot: String,
    reset_time: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Result<LimitEvent> {
        let event_type = parse_event_type(&self.event_type)?;
        let timestamp = parse_db_time("timestamp", &self.timestamp)?;
        let reset_time = self
            .reset_time
            .as_deref()
            .map(|raw| parse_db_time("reset_time", raw))
            .transpose()?;
        let usage = serde_json::from_str(&self.usage_snapshot)?;

        Ok(LimitEvent {
            id: self.id,
            timestamp,
            event_type,
            tier: self.tier,
            usage,
            reset_time,
        })
    }
}

fn parse_event_type(s: &str) -> Result<EventType> {
    match s {
        "THRESHOLD" => Ok(EventType::Threshold),
        "RATE_LIMIT" => Ok(EventType::RateLimit),
        "RESUMED" => Ok(EventType::Resumed),
        "MANUAL_PAUSE" => Ok(EventType::ManualPause),
        "MANUAL_RESUME" => Ok(EventType::ManualResume),
        other => Err(AppError::Db(format!("invalid event type: {other}"))),
    }
}

fn event_type_str(t: EventType) -> &'static str {
    match t {
        EventType::Threshold => "THRESHOLD",
        EventType::RateLimit => "RATE_LIMIT",
        EventType::Resumed => "RESUMED",
        EventType::ManualPause => "MANUAL_PAUSE",
        EventType::ManualResume => "MANUAL_RESUME",
    }
}

impl EventRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append an event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn record(&self, event: &LimitEvent) -> Result<()> {
        let usage = serde_json::to_string(&event.usage)?;

        sqlx::query(
            "INSERT INTO limit_event (id, timestamp, event_type, tier, usage_snapshot, reset_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&event.id)
        .bind(to_db_time(event.timestamp))
        .bind(event_type_str(event.event_type))
        .bind(&event.tier)
        .bind(usage)
        .bind(event.reset_time.map(to_db_time))
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Most recent events, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is corrupt.
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<LimitEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, timestamp, event_type, tier, usage_snapshot, reset_time
             FROM limit_event
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }
}
