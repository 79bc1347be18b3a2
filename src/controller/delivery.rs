//! Prompt delivery into a running agent's terminal.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::{AppError, Result};

use super::process::ProcessInfo;
use super::BoxFuture;

/// Where a prompt was delivered.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// Written to the process's controlling terminal device.
    Tty(PathBuf),
    /// Typed into a multiplexer session.
    Multiplexer(String),
}

impl Display for DeliveryTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tty(path) => write!(f, "tty:{}", path.display()),
            Self::Multiplexer(session) => write!(f, "tmux:{session}"),
        }
    }
}

/// Delivers a prompt to a running agent.
pub trait PromptDelivery: Send + Sync {
    /// Deliver `prompt` to `process`. `Ok(None)` means no delivery target
    /// was available.
    fn deliver<'a>(
        &'a self,
        process: &'a ProcessInfo,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<Option<DeliveryTarget>>>;
}

/// [`PromptDelivery`] that writes to the agent's TTY, then falls back to a
/// configured tmux session.
#[derive(Debug, Clone)]
pub struct TerminalDelivery {
    multiplexer_session: Option<String>,
    timeout: Duration,
}

impl TerminalDelivery {
    /// Create a delivery backend.
    #[must_use]
    pub fn new(multiplexer_session: Option<String>, timeout: Duration) -> Self {
        Self {
            multiplexer_session,
            timeout,
        }
    }

    async fn write_tty(tty: &str, prompt: &str) -> Result<PathBuf> {
        let path = PathBuf::from("/dev").join(tty);
        let mut device = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|err| AppError::Process(format!("cannot open {}: {err}", path.display())))?;
        device
            .write_all(format!("{prompt}\n").as_bytes())
            .await
            .map_err(|err| AppError::Process(format!("write to {} failed: {err}", path.display())))?;
        Ok(path)
    }

    async fn send_keys(&self, session: &str, prompt: &str) -> Result<()> {
        let status = tokio::time::timeout(
            self.timeout,
            Command::new("tmux")
                .args(["send-keys", "-t", session, prompt, "Enter"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| AppError::Process("tmux send-keys timed out".into()))?
        .map_err(|err| AppError::Process(format!("failed to run tmux: {err}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(AppError::Process(format!("tmux send-keys exited with {status}")))
        }
    }
}

impl PromptDelivery for TerminalDelivery {
    fn deliver<'a>(
        &'a self,
        process: &'a ProcessInfo,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<Option<DeliveryTarget>>> {
        Box::pin(async move {
            let mut tty_error = None;
            if let Some(ref tty) = process.tty {
                match Self::write_tty(tty, prompt).await {
                    Ok(path) => {
                        info!(pid = process.pid, tty = %path.display(), "prompt written to tty");
                        return Ok(Some(DeliveryTarget::Tty(path)));
                    }
                    Err(err) => {
                        warn!(pid = process.pid, %err, "tty delivery failed");
                        tty_error = Some(err);
                    }
                }
            }

            if let Some(ref session) = self.multiplexer_session {
                self.send_keys(session, prompt).await?;
                info!(pid = process.pid, session, "prompt sent via tmux");
                return Ok(Some(DeliveryTarget::Multiplexer(session.clone())));
            }

            tty_error.map_or(Ok(None), Err)
        })
    }
}
