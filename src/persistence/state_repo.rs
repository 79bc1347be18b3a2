//! Key-value state repository backed by the `kv_store` table.
//!
//! Values are stored as JSON text. A row that no longer decodes into the
//! requested type is treated as absent, so a schema change in a stored
//! value degrades to "no state" instead of wedging the caller.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::Result;

use super::db::Database;
use super::to_db_time;

/// Well-known `kv_store` keys.
pub mod keys {
    /// Singleton pause state.
    pub const PAUSE: &str = "pause";
    /// Pointer to the currently active session id.
    pub const ACTIVE_SESSION: &str = "active_session";
    /// Cursor of the last log line forwarded by the monitor.
    pub const MONITOR_CURSOR: &str = "monitor:last_signal";
    /// Prefix of per-session records.
    pub const SESSION_PREFIX: &str = "session:";

    /// Key of the record for session `id`.
    #[must_use]
    pub fn session(id: &str) -> String {
        format!("{SESSION_PREFIX}{id}")
    }
}

/// Repository for JSON values keyed by string.
#[derive(Clone)]
pub struct StateRepo {
    db: Arc<Database>,
}

impl StateRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert `value` under `key`, or delete the key when `value` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if serialization or the statement fails.
    pub async fn set_state<T: Serialize + ?Sized>(&self, key: &str, value: Option<&T>) -> Result<()> {
        let Some(value) = value else {
            sqlx::query("DELETE FROM kv_store WHERE key = ?1")
                .bind(key)
                .execute(self.db.as_ref())
                .await?;
            return Ok(());
        };

        let json = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(json)
        .bind(to_db_time(Utc::now()))
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Read the value under `key`.
    ///
    /// Returns `Ok(None)` when the key is missing or its JSON does not decode
    /// into `T`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.db.as_ref())
            .await?;

        Ok(raw.and_then(|raw| decode(key, &raw)))
    }

    /// All values whose key starts with `prefix`, skipping undecodable rows.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(self.db.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, raw)| decode(&key, &raw))
            .collect())
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, %err, "stored state does not decode, treating as absent");
            None
        }
    }
}
