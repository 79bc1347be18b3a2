//! Agent process launch.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, info_span, warn, Instrument};

use crate::{AppError, Result};

use super::BoxFuture;

/// Starts a new agent process.
pub trait AgentLauncher: Send + Sync {
    /// Launch the agent in `dir`, resuming `resume_session_id` when given.
    /// Returns the new process id.
    fn launch<'a>(
        &'a self,
        dir: &'a Path,
        resume_session_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<u32>>;
}

/// [`AgentLauncher`] that spawns the agent CLI.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    binary: String,
    resume_args: Vec<String>,
}

impl CommandLauncher {
    /// Create a launcher running `binary resume_args… [session id]`.
    #[must_use]
    pub fn new(binary: String, resume_args: Vec<String>) -> Self {
        Self {
            binary,
            resume_args,
        }
    }
}

impl AgentLauncher for CommandLauncher {
    fn launch<'a>(
        &'a self,
        dir: &'a Path,
        resume_session_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<u32>> {
        let span = info_span!("launch_agent", dir = %dir.display(), binary = %self.binary);
        let fut = async move {
            if !dir.is_dir() {
                return Err(AppError::Process(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }

            let mut cmd = Command::new(&self.binary);
            cmd.args(&self.resume_args)
                .args(resume_session_id)
                .current_dir(dir)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());

            let mut child = cmd.spawn().map_err(|err| {
                AppError::Process(format!("failed to spawn {}: {err}", self.binary))
            })?;
            let pid = child
                .id()
                .ok_or_else(|| AppError::Process(format!("{} exited immediately", self.binary)))?;

            info!(pid, session_id = resume_session_id, "agent process launched");

            // Reap the child so it never lingers as a zombie.
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => info!(pid, %status, "launched agent exited"),
                    Err(err) => warn!(pid, %err, "failed to wait on launched agent"),
                }
            });

            Ok(pid)
        };
        Box::pin(fut.instrument(span))
    }
}
