//! OS process discovery.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::{AppError, Result};

use super::BoxFuture;

/// One row of the process table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessInfo {
    /// Process id.
    pub pid: u32,
    /// Owning user.
    pub user: String,
    /// CPU usage percent.
    pub cpu: f32,
    /// Memory usage percent.
    pub mem: f32,
    /// Controlling terminal relative to `/dev`, when there is one.
    pub tty: Option<String>,
    /// Full command line.
    pub command: String,
}

/// Lists OS processes and checks their liveness.
pub trait ProcessLister: Send + Sync {
    /// Processes whose command line contains `filter`.
    fn list_processes<'a>(&'a self, filter: &'a str) -> BoxFuture<'a, Result<Vec<ProcessInfo>>>;

    /// Whether `pid` refers to a running process.
    fn is_alive(&self, pid: u32) -> bool;
}

/// [`ProcessLister`] backed by `ps`.
#[derive(Debug, Clone)]
pub struct PsProcessLister {
    timeout: Duration,
    exclude: Vec<String>,
}

impl PsProcessLister {
    /// Create a lister that gives `ps` `timeout` to answer and skips
    /// command lines containing any of `exclude`.
    #[must_use]
    pub fn new(timeout: Duration, exclude: Vec<String>) -> Self {
        Self { timeout, exclude }
    }

    async fn run_ps(&self) -> Result<String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("ps")
                .args(["-eo", "pid=,user=,pcpu=,pmem=,tty=,args="])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| AppError::Process(format!("ps timed out after {}s", self.timeout.as_secs())))?
        .map_err(|err| AppError::Process(format!("failed to run ps: {err}")))?;

        if !output.status.success() {
            return Err(AppError::Process(format!("ps exited with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ProcessLister for PsProcessLister {
    fn list_processes<'a>(&'a self, filter: &'a str) -> BoxFuture<'a, Result<Vec<ProcessInfo>>> {
        Box::pin(async move {
            let own_pid = std::process::id();
            let table = self.run_ps().await?;
            let found: Vec<ProcessInfo> = table
                .lines()
                .filter_map(parse_ps_line)
                .filter(|p| p.pid != own_pid)
                .filter(|p| p.command.contains(filter))
                .filter(|p| !self.exclude.iter().any(|ex| p.command.contains(ex.as_str())))
                .collect();
            debug!(filter, count = found.len(), "process scan complete");
            Ok(found)
        })
    }

    fn is_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // Signal 0 only checks existence; EPERM means it exists under another user.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

/// Parse one `ps -eo pid=,user=,pcpu=,pmem=,tty=,args=` line.
#[must_use]
pub fn parse_ps_line(line: &str) -> Option<ProcessInfo> {
    let mut parts = line.split_whitespace();
    let pid = parts.next()?.parse().ok()?;
    let user = parts.next()?.to_owned();
    let cpu = parts.next()?.parse().unwrap_or(0.0);
    let mem = parts.next()?.parse().unwrap_or(0.0);
    let tty = parts.next()?;
    let command = parts.collect::<Vec<_>>().join(" ");
    if command.is_empty() {
        return None;
    }
    let tty = (!tty.starts_with('?') && tty != "-").then(|| tty.to_owned());
    Some(ProcessInfo {
        pid,
        user,
        cpu,
        mem,
        tty,
        command,
    })
}
