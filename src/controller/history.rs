//! Agent history lookup.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde_json::Value;

use crate::{AppError, Result};

use super::BoxFuture;

/// Recovers the agent's last session id.
pub trait HistoryReader: Send + Sync {
    /// Most recent session id, if any is recorded.
    fn last_session_id(&self) -> BoxFuture<'_, Result<Option<String>>>;
}

/// [`HistoryReader`] over the agent's `history.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlHistoryReader {
    path: PathBuf,
}

impl JsonlHistoryReader {
    /// Read history from `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl HistoryReader for JsonlHistoryReader {
    fn last_session_id(&self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            let raw = match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(AppError::Io(format!(
                        "cannot read {}: {err}",
                        self.path.display()
                    )))
                }
            };
            Ok(last_session_id_in(&raw))
        })
    }
}

/// Session id of the last parseable line carrying `session_id` or
/// `sessionId`.
#[must_use]
pub fn last_session_id_in(history: &str) -> Option<String> {
    history.lines().rev().find_map(|line| {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        value
            .get("session_id")
            .or_else(|| value.get("sessionId"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
    })
}
