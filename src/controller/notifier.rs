//! Desktop notifications.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::{AppError, Result};

use super::BoxFuture;

/// Shows a desktop notification.
pub trait DesktopNotifier: Send + Sync {
    /// Show `body` under `title`.
    fn notify<'a>(&'a self, title: &'a str, body: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// [`DesktopNotifier`] using `notify-send` on Linux or `osascript` on macOS.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    timeout: Duration,
}

impl CommandNotifier {
    /// Notifier for the current platform, or `None` where there is no
    /// supported backend.
    #[must_use]
    pub fn for_platform(timeout: Duration) -> Option<Self> {
        (cfg!(target_os = "linux") || cfg!(target_os = "macos")).then_some(Self { timeout })
    }

    fn command(title: &str, body: &str) -> Command {
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                escape_applescript(body),
                escape_applescript(title)
            );
            let mut cmd = Command::new("osascript");
            cmd.args(["-e", &script]);
            cmd
        } else {
            let mut cmd = Command::new("notify-send");
            cmd.args([title, body]);
            cmd
        }
    }
}

impl DesktopNotifier for CommandNotifier {
    fn notify<'a>(&'a self, title: &'a str, body: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let status = tokio::time::timeout(
                self.timeout,
                Self::command(title, body)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .status(),
            )
            .await
            .map_err(|_| AppError::Process("desktop notification timed out".into()))?
            .map_err(|err| AppError::Process(format!("desktop notification failed: {err}")))?;

            if status.success() {
                Ok(())
            } else {
                Err(AppError::Process(format!("notifier exited with {status}")))
            }
        })
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
