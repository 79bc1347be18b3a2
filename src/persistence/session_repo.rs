//! Registered session records stored in the key-value table.

use std::sync::Arc;

use crate::models::session::SessionRecord;
use crate::Result;

use super::db::Database;
use super::state_repo::{keys, StateRepo};

/// Repository for `session:<id>` records and the `active_session` pointer.
#[derive(Clone)]
pub struct SessionRepo {
    state: StateRepo,
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            state: StateRepo::new(db),
        }
    }

    /// Insert or replace a session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn save(&self, record: &SessionRecord) -> Result<()> {
        self.state
            .set_state(&keys::session(&record.session_id), Some(record))
            .await
    }

    /// Retrieve a session record by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.state.get_state(&keys::session(session_id)).await
    }

    /// Id the `active_session` pointer refers to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn active_id(&self) -> Result<Option<String>> {
        self.state.get_state(keys::ACTIVE_SESSION).await
    }

    /// Point `active_session` at `session_id`, or clear it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn set_active(&self, session_id: Option<&str>) -> Result<()> {
        self.state.set_state(keys::ACTIVE_SESSION, session_id).await
    }

    /// The record the pointer refers to, if it exists and is still active.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn active(&self) -> Result<Option<SessionRecord>> {
        let Some(id) = self.active_id().await? else {
            return Ok(None);
        };
        Ok(self.get(&id).await?.filter(SessionRecord::is_active))
    }

    /// All stored session records, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<SessionRecord> =
            self.state.scan_prefix(keys::SESSION_PREFIX).await?;
        records.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(records)
    }
}
