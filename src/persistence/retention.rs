//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting limit events and completed usage
//! rows older than the configured retention window. Never touches the
//! key-value state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::db::Database;
use super::to_db_time;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Row counts removed by one purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Deleted `limit_event` rows.
    pub events: u64,
    /// Deleted `usage_record` rows.
    pub usage: u64,
}

/// Spawn the retention purge background task.
///
/// The task runs hourly, starting immediately.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    max_age: chrono::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = cleanup(&db, max_age).await {
                        error!(?err, "retention purge failed");
                    }
                }
            }
        }
    })
}

/// Delete events and completed usage rows older than `now - max_age`.
///
/// In-progress usage rows are kept regardless of age.
///
/// # Errors
///
/// Returns `AppError::Db` if a delete fails.
pub async fn cleanup(db: &Database, max_age: chrono::Duration) -> Result<PurgeReport> {
    let cutoff = to_db_time(Utc::now() - max_age);

    let events = sqlx::query("DELETE FROM limit_event WHERE timestamp < ?1")
        .bind(&cutoff)
        .execute(db)
        .await?
        .rows_affected();

    let usage = sqlx::query(
        "DELETE FROM usage_record
         WHERE status = 'completed' AND COALESCE(ended_at, started_at) < ?1",
    )
    .bind(&cutoff)
    .execute(db)
    .await?
    .rows_affected();

    info!(events, usage, "retention purge completed");
    Ok(PurgeReport { events, usage })
}
