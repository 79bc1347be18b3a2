//! Usage record repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::usage::{UsageRecord, UsageStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_db_time, to_db_time};

/// Repository for per-session usage rows.
#[derive(Clone)]
pub struct UsageRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct UsageRow {
    id: i64,
    session_id: String,
    agent: String,
    started_at: String,
    ended_at: Option<String>,
    status: String,
    units: i64,
}

impl UsageRow {
    fn into_record(self) -> Result<UsageRecord> {
        let status = parse_status(&self.status)?;
        let started_at = parse_db_time("started_at", &self.started_at)?;
        let ended_at = self
            .ended_at
            .as_deref()
            .map(|raw| parse_db_time("ended_at", raw))
            .transpose()?;

        Ok(UsageRecord {
            id: self.id,
            session_id: self.session_id,
            agent: self.agent,
            started_at,
            ended_at,
            status,
            units: units_from_db(self.units)?,
        })
    }
}

fn parse_status(s: &str) -> Result<UsageStatus> {
    match s {
        "active" => Ok(UsageStatus::Active),
        "completed" => Ok(UsageStatus::Completed),
        other => Err(AppError::Db(format!("invalid usage status: {other}"))),
    }
}

fn status_str(s: UsageStatus) -> &'static str {
    match s {
        UsageStatus::Active => "active",
        UsageStatus::Completed => "completed",
    }
}

fn units_from_db(raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| AppError::Db(format!("invalid unit count: {raw}")))
}

impl UsageRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record the start or end of a tracked session.
    ///
    /// With `end` unset a new row is opened, unless `session_id` already has
    /// an in-progress row, whose id is returned instead. With `end` set the
    /// in-progress row for `session_id` is closed. Returns the row id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the statement fails, or if `end` is set and
    /// the session has no in-progress row (including when it is already
    /// completed).
    pub async fn record_session(
        &self,
        agent: &str,
        session_id: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        status: UsageStatus,
        units: u32,
    ) -> Result<i64> {
        let existing = self.find_active(session_id).await?;

        let Some(end) = end else {
            if let Some(row) = existing {
                return Ok(row.id);
            }
            let result = sqlx::query(
                "INSERT INTO usage_record (session_id, agent, started_at, ended_at, status, units)
                 VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
            )
            .bind(session_id)
            .bind(agent)
            .bind(to_db_time(start))
            .bind(status_str(status))
            .bind(i64::from(units))
            .execute(self.db.as_ref())
            .await?;
            return Ok(result.last_insert_rowid());
        };

        let Some(row) = existing else {
            return Err(self.missing_active_row(session_id).await);
        };

        sqlx::query(
            "UPDATE usage_record SET ended_at = ?1, status = ?2, units = ?3
             WHERE id = ?4 AND status = 'active'",
        )
        .bind(to_db_time(end))
        .bind(status_str(status))
        .bind(i64::from(units))
        .bind(row.id)
        .execute(self.db.as_ref())
        .await?;

        Ok(row.id)
    }

    /// Update the unit count of the in-progress row for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails or the session has no
    /// in-progress row.
    pub async fn update_units(&self, session_id: &str, units: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE usage_record SET units = ?1 WHERE session_id = ?2 AND status = 'active'",
        )
        .bind(i64::from(units))
        .bind(session_id)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.missing_active_row(session_id).await);
        }
        Ok(())
    }

    /// Unit count of the most recently started row, or 0 when empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn current_usage(&self) -> Result<u32> {
        let units: Option<i64> = sqlx::query_scalar(
            "SELECT units FROM usage_record ORDER BY started_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(self.db.as_ref())
        .await?;

        units.map_or(Ok(0), units_from_db)
    }

    /// In-progress row for `session_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_active(&self, session_id: &str) -> Result<Option<UsageRecord>> {
        let row: Option<UsageRow> = sqlx::query_as(
            "SELECT id, session_id, agent, started_at, ended_at, status, units
             FROM usage_record
             WHERE session_id = ?1 AND status = 'active'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(UsageRow::into_record).transpose()
    }

    /// Retrieve a row by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<UsageRecord>> {
        let row: Option<UsageRow> = sqlx::query_as(
            "SELECT id, session_id, agent, started_at, ended_at, status, units
             FROM usage_record WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(UsageRow::into_record).transpose()
    }

    async fn missing_active_row(&self, session_id: &str) -> AppError {
        let completed: std::result::Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(
            "SELECT id FROM usage_record WHERE session_id = ?1 AND status = 'completed' LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await;

        match completed {
            Ok(Some(_)) => AppError::Db(format!(
                "usage row for session {session_id} is completed and immutable"
            )),
            Ok(None) => AppError::Db(format!("no in-progress usage row for session {session_id}")),
            Err(err) => err.into(),
        }
    }
}
