//! Resume cascade and pause notification.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{AgentConfig, GovernorConfig};
use crate::models::pause::{PauseReason, PauseState};
use crate::models::session::SessionRecord;
use crate::persistence::session_repo::SessionRepo;
use crate::policy::format_wait;
use crate::Result;

use super::delivery::{PromptDelivery, TerminalDelivery};
use super::history::{HistoryReader, JsonlHistoryReader};
use super::launcher::{AgentLauncher, CommandLauncher};
use super::notifier::{CommandNotifier, DesktopNotifier};
use super::process::{ProcessInfo, ProcessLister, PsProcessLister};

/// One way of bringing the agent back.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStrategy {
    /// Type the prompt into the registered session's live process.
    RegisteredStdin,
    /// Relaunch the registered session in its working directory.
    RegisteredRestart,
    /// Find an agent process by scanning the process table.
    DetectedProcess,
    /// Tell the user to resume by hand.
    Notify,
}

impl Display for ResumeStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RegisteredStdin => "registered_stdin",
            Self::RegisteredRestart => "registered_restart",
            Self::DetectedProcess => "detected_process",
            Self::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// Strategies in the order they are attempted.
pub const RESUME_CASCADE: [ResumeStrategy; 4] = [
    ResumeStrategy::RegisteredStdin,
    ResumeStrategy::RegisteredRestart,
    ResumeStrategy::DetectedProcess,
    ResumeStrategy::Notify,
];

/// How the agent was resumed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMethod {
    /// Prompt delivered to a running process.
    Stdin,
    /// New agent process launched.
    Restart,
    /// Only the user was notified.
    Notification,
}

/// Result of a resume attempt.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResumeOutcome {
    /// How the agent was resumed.
    pub method: ResumeMethod,
    /// Strategy that succeeded.
    pub strategy: ResumeStrategy,
    /// Session that was resumed, when known.
    pub session_id: Option<String>,
    /// Delivery target description, for prompt delivery.
    pub target: Option<String>,
    /// Directory of a relaunched agent.
    pub directory: Option<PathBuf>,
    /// Process that received the prompt or was launched.
    pub pid: Option<u32>,
    /// Failures of the strategies tried before the successful one.
    pub errors: Vec<String>,
}

impl ResumeOutcome {
    fn new(method: ResumeMethod, strategy: ResumeStrategy) -> Self {
        Self {
            method,
            strategy,
            session_id: None,
            target: None,
            directory: None,
            pid: None,
            errors: Vec::new(),
        }
    }
}

/// Read-only prediction of how a resume would proceed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StrategyDiagnosis {
    /// Expected method.
    pub method: ResumeMethod,
    /// Why.
    pub reason: String,
    /// Registered session, if any.
    pub session_id: Option<String>,
    /// Process that would be targeted, if any.
    pub pid: Option<u32>,
}

/// Host capabilities used by the controller.
#[derive(Clone)]
pub struct ControllerBackends {
    /// Process discovery.
    pub processes: Arc<dyn ProcessLister>,
    /// Prompt delivery.
    pub delivery: Arc<dyn PromptDelivery>,
    /// Agent launch.
    pub launcher: Arc<dyn AgentLauncher>,
    /// Desktop notification; `None` means console only.
    pub notifier: Option<Arc<dyn DesktopNotifier>>,
    /// History lookup.
    pub history: Arc<dyn HistoryReader>,
}

impl ControllerBackends {
    /// Real host backends configured from `agent`.
    #[must_use]
    pub fn system(agent: &AgentConfig) -> Self {
        let timeout = agent.command_timeout();
        let notifier = if agent.desktop_notifications {
            CommandNotifier::for_platform(timeout).map(|n| Arc::new(n) as Arc<dyn DesktopNotifier>)
        } else {
            None
        };
        Self {
            processes: Arc::new(PsProcessLister::new(
                timeout,
                vec![env!("CARGO_PKG_NAME").to_owned()],
            )),
            delivery: Arc::new(TerminalDelivery::new(
                agent.multiplexer_session.clone(),
                timeout,
            )),
            launcher: Arc::new(CommandLauncher::new(
                agent.binary.clone(),
                agent.resume_args.clone(),
            )),
            notifier,
            history: Arc::new(JsonlHistoryReader::new(agent.resolved_history_file())),
        }
    }
}

/// Static controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Substring identifying agent processes.
    pub process_filter: String,
    /// Prompt delivered on resume.
    pub resume_prompt: String,
    /// Directory used when launching without a registered session.
    pub default_dir: PathBuf,
    /// Agent binary, shown in manual-resume instructions.
    pub agent_binary: String,
}

impl ControllerSettings {
    /// Settings from configuration; launches without a registered session
    /// happen in `default_dir`.
    #[must_use]
    pub fn from_config(config: &GovernorConfig, default_dir: PathBuf) -> Self {
        Self {
            process_filter: config.agent.process_filter.clone(),
            resume_prompt: config.daemon.resume_prompt.clone(),
            default_dir,
            agent_binary: config.agent.binary.clone(),
        }
    }
}

/// Bridges pause and resume decisions to the agent process.
pub struct SessionController {
    sessions: SessionRepo,
    backends: ControllerBackends,
    settings: ControllerSettings,
}

impl SessionController {
    /// Create a controller.
    #[must_use]
    pub fn new(
        sessions: SessionRepo,
        backends: ControllerBackends,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            sessions,
            backends,
            settings,
        }
    }

    /// Agent processes currently visible.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the process table cannot be read.
    pub async fn detect_processes(&self) -> Result<Vec<ProcessInfo>> {
        self.backends
            .processes
            .list_processes(&self.settings.process_filter)
            .await
    }

    /// Tell the user the agent is paused. Never signals the agent.
    pub async fn notify_pause(&self, state: &PauseState) {
        let wait = format_wait(state.remaining(Utc::now()));
        let cause = match state.reason {
            PauseReason::Threshold => "Usage threshold reached",
            PauseReason::RateLimit => "Rate limit reached",
            PauseReason::Manual => "Paused by operator",
        };
        let body = format!(
            "{cause}. Resuming in {wait} at {}.",
            state.resume_at.format("%Y-%m-%d %H:%M UTC")
        );
        warn!(reason = ?state.reason, resume_at = %state.resume_at, "=== AGENT PAUSED: {body} ===");
        self.desktop("Agent paused", &body).await;
    }

    /// Predict which resume path applies right now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the session store cannot be read, or
    /// `AppError::Process` if the process table cannot be read.
    pub async fn detect_resume_strategy(&self) -> Result<StrategyDiagnosis> {
        if let Some(record) = self.sessions.active().await? {
            let live_pid = record.pid.filter(|pid| self.backends.processes.is_alive(*pid));
            return Ok(match live_pid {
                Some(pid) => StrategyDiagnosis {
                    method: ResumeMethod::Stdin,
                    reason: "registered session process is running".into(),
                    session_id: Some(record.session_id),
                    pid: Some(pid),
                },
                None => StrategyDiagnosis {
                    method: ResumeMethod::Restart,
                    reason: "registered session process is not running".into(),
                    session_id: Some(record.session_id),
                    pid: record.pid,
                },
            });
        }

        let processes = self.detect_processes().await?;
        Ok(match processes.first() {
            Some(process) => StrategyDiagnosis {
                method: ResumeMethod::Stdin,
                reason: "agent process detected".into(),
                session_id: None,
                pid: Some(process.pid),
            },
            None => StrategyDiagnosis {
                method: ResumeMethod::Restart,
                reason: "no agent process found, would launch in default directory".into(),
                session_id: None,
                pid: None,
            },
        })
    }

    /// Run the resume cascade. Always returns an outcome; failed strategies
    /// are recorded in [`ResumeOutcome::errors`].
    pub async fn resume(&self, prompt_override: Option<&str>) -> ResumeOutcome {
        let prompt = prompt_override.unwrap_or(&self.settings.resume_prompt);
        self.run_cascade(prompt)
            .instrument(info_span!("resume_cascade"))
            .await
    }

    async fn run_cascade(&self, prompt: &str) -> ResumeOutcome {
        let mut errors = Vec::new();
        let registered = match self.sessions.active().await {
            Ok(record) => record,
            Err(err) => {
                errors.push(format!("session lookup: {err}"));
                None
            }
        };

        for strategy in RESUME_CASCADE {
            let attempt = match strategy {
                ResumeStrategy::RegisteredStdin => match registered.as_ref() {
                    Some(record) => self.registered_stdin(record, prompt).await,
                    None => Ok(None),
                },
                ResumeStrategy::RegisteredRestart => match registered.as_ref() {
                    Some(record) => self.registered_restart(record).await.map(Some),
                    None => Ok(None),
                },
                ResumeStrategy::DetectedProcess => {
                    if registered.is_some() {
                        Ok(None)
                    } else {
                        self.detected_process(prompt).await
                    }
                }
                ResumeStrategy::Notify => {
                    return self.notify_resume(registered.as_ref(), prompt, errors).await;
                }
            };

            match attempt {
                Ok(Some(mut outcome)) => {
                    outcome.strategy = strategy;
                    outcome.errors = errors;
                    info!(
                        strategy = %strategy,
                        method = ?outcome.method,
                        pid = outcome.pid,
                        failed = outcome.errors.len(),
                        "agent resumed"
                    );
                    return outcome;
                }
                Ok(None) => debug!(strategy = %strategy, "strategy not applicable"),
                Err(err) => {
                    warn!(strategy = %strategy, %err, "resume strategy failed");
                    errors.push(format!("{strategy}: {err}"));
                }
            }
        }

        // The cascade always ends in Notify.
        self.notify_resume(registered.as_ref(), prompt, errors).await
    }

    async fn registered_stdin(
        &self,
        record: &SessionRecord,
        prompt: &str,
    ) -> Result<Option<ResumeOutcome>> {
        let Some(pid) = record
            .pid
            .filter(|pid| self.backends.processes.is_alive(*pid))
        else {
            return Ok(None);
        };

        let processes = self.detect_processes().await?;
        let process = processes
            .into_iter()
            .find(|p| p.pid == pid)
            .unwrap_or_else(|| ProcessInfo {
                pid,
                user: String::new(),
                cpu: 0.0,
                mem: 0.0,
                tty: None,
                command: String::new(),
            });

        let Some(target) = self.backends.delivery.deliver(&process, prompt).await? else {
            return Ok(None);
        };

        let mut outcome = ResumeOutcome::new(ResumeMethod::Stdin, ResumeStrategy::RegisteredStdin);
        outcome.session_id = Some(record.session_id.clone());
        outcome.target = Some(target.to_string());
        outcome.pid = Some(pid);
        Ok(Some(outcome))
    }

    async fn registered_restart(&self, record: &SessionRecord) -> Result<ResumeOutcome> {
        let pid = self
            .backends
            .launcher
            .launch(&record.working_dir, Some(&record.session_id))
            .await?;

        let mut updated = record.clone();
        updated.pid = Some(pid);
        updated.last_activity = Utc::now();
        if let Err(err) = self.sessions.save(&updated).await {
            warn!(session_id = %record.session_id, %err, "failed to record relaunched pid");
        }

        let mut outcome = ResumeOutcome::new(ResumeMethod::Restart, ResumeStrategy::RegisteredRestart);
        outcome.session_id = Some(record.session_id.clone());
        outcome.directory = Some(record.working_dir.clone());
        outcome.pid = Some(pid);
        Ok(outcome)
    }

    async fn detected_process(&self, prompt: &str) -> Result<Option<ResumeOutcome>> {
        let processes = self.detect_processes().await?;

        if processes.is_empty() {
            let session_id = match self.backends.history.last_session_id().await {
                Ok(id) => id,
                Err(err) => {
                    warn!(%err, "agent history unavailable");
                    None
                }
            };
            let dir = &self.settings.default_dir;
            let pid = self
                .backends
                .launcher
                .launch(dir, session_id.as_deref())
                .await?;
            let mut outcome = ResumeOutcome::new(ResumeMethod::Restart, ResumeStrategy::DetectedProcess);
            outcome.session_id = session_id;
            outcome.directory = Some(dir.clone());
            outcome.pid = Some(pid);
            return Ok(Some(outcome));
        }

        // Prefer processes attached to a terminal.
        let mut ordered = processes;
        ordered.sort_by_key(|p| p.tty.is_none());
        let mut last_err = None;
        for process in &ordered {
            match self.backends.delivery.deliver(process, prompt).await {
                Ok(Some(target)) => {
                    let mut outcome =
                        ResumeOutcome::new(ResumeMethod::Stdin, ResumeStrategy::DetectedProcess);
                    outcome.target = Some(target.to_string());
                    outcome.pid = Some(process.pid);
                    return Ok(Some(outcome));
                }
                Ok(None) => {}
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    async fn notify_resume(
        &self,
        registered: Option<&SessionRecord>,
        prompt: &str,
        errors: Vec<String>,
    ) -> ResumeOutcome {
        let body = format!(
            "Quota window has reset. Send `{prompt}` to the agent, or start `{}` again.",
            self.settings.agent_binary
        );
        warn!(failed = errors.len(), "=== READY TO RESUME: {body} ===");
        self.desktop("Agent ready to resume", &body).await;

        let mut outcome = ResumeOutcome::new(ResumeMethod::Notification, ResumeStrategy::Notify);
        outcome.errors = errors;
        outcome.session_id = registered.map(|r| r.session_id.clone());
        outcome.directory = registered.map(|r| r.working_dir.clone());
        outcome
    }

    async fn desktop(&self, title: &str, body: &str) {
        let Some(ref notifier) = self.backends.notifier else {
            return;
        };
        if let Err(err) = notifier.notify(title, body).await {
            warn!(%err, "desktop notification failed");
        }
    }
}

