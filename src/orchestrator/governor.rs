//! Pause/resume control loop.
//!
//! The persisted [`PauseState`] is the only record of whether the agent is
//! paused. Every decision re-reads it, and transitions are serialized by a
//! lock so a timer firing, an incoming signal and an operator command
//! cannot interleave halfway through a transition.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::GovernorConfig;
use crate::controller::process::ProcessInfo;
use crate::controller::{
    ControllerBackends, ControllerSettings, ResumeOutcome, SessionController, StrategyDiagnosis,
};
use crate::models::event::{EventType, LimitEvent};
use crate::models::pause::{PauseReason, PauseState, PauseStatus};
use crate::models::session::{
    EndRequest, HeartbeatRequest, RegisterRequest, RegisterResponse, SessionRecord, SessionStatus,
};
use crate::models::signal::{LimitType, RateLimitSignal};
use crate::models::usage::{UsageSnapshot, UsageStatus};
use crate::persistence::db::Database;
use crate::persistence::event_repo::EventRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::state_repo::{keys, StateRepo};
use crate::persistence::usage_repo::UsageRepo;
use crate::policy::engine::next_weekly_reset;
use crate::policy::headers::{parse_header_signal, RateLimitHeaders};
use crate::policy::{format_wait, PolicyEngine};
use crate::{AppError, Result};

use super::resume_timer::{ArmedResume, ResumeTimer};

/// A timer that fires this close to `resume_at` counts as due.
const RESUME_SLACK: chrono::Duration = chrono::Duration::milliseconds(1000);

/// Static governor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorSettings {
    /// Interval between periodic quota checks.
    pub check_interval: Duration,
    /// Agent name written to usage rows.
    pub agent_name: String,
}

impl GovernorSettings {
    /// Settings from configuration.
    #[must_use]
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            check_interval: config.daemon.check_interval(),
            agent_name: config.agent.binary.clone(),
        }
    }
}

/// Combined diagnostics for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// Pause status.
    pub pause: PauseStatus,
    /// Units in the current window.
    pub units: u32,
    /// Tier in effect.
    pub tier: String,
    /// Units allowed per window.
    pub tier_units: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Preemptive threshold, when configured.
    pub threshold: Option<f64>,
    /// Detected agent processes.
    pub processes: Vec<ProcessInfo>,
    /// Predicted resume path.
    pub strategy: Option<StrategyDiagnosis>,
    /// Problems encountered while gathering diagnostics.
    pub errors: Vec<String>,
}

/// Binds storage, policy, monitor signals and the session controller.
pub struct Governor {
    state: StateRepo,
    events: EventRepo,
    usage: UsageRepo,
    sessions: SessionRepo,
    engine: PolicyEngine,
    controller: SessionController,
    settings: GovernorSettings,
    timer: ResumeTimer,
    timer_rx: Mutex<Option<mpsc::Receiver<DateTime<Utc>>>>,
    transition: tokio::sync::Mutex<()>,
    registry: tokio::sync::Mutex<()>,
}

impl Governor {
    /// Create a governor. Deferred resumes are cancelled with `cancel`.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        engine: PolicyEngine,
        controller: SessionController,
        settings: GovernorSettings,
        cancel: &CancellationToken,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel(4);
        Self {
            state: StateRepo::new(Arc::clone(&db)),
            events: EventRepo::new(Arc::clone(&db)),
            usage: UsageRepo::new(Arc::clone(&db)),
            sessions: SessionRepo::new(db),
            engine,
            controller,
            settings,
            timer: ResumeTimer::new(timer_tx, cancel.clone()),
            timer_rx: Mutex::new(Some(timer_rx)),
            transition: tokio::sync::Mutex::new(()),
            registry: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire a governor from configuration with the given host backends.
    #[must_use]
    pub fn from_config(
        db: Arc<Database>,
        config: &GovernorConfig,
        backends: ControllerBackends,
        default_dir: PathBuf,
        cancel: &CancellationToken,
    ) -> Self {
        let controller = SessionController::new(
            SessionRepo::new(Arc::clone(&db)),
            backends,
            ControllerSettings::from_config(config, default_dir),
        );
        Self::new(
            db,
            PolicyEngine::from_config(config),
            controller,
            GovernorSettings::from_config(config),
            cancel,
        )
    }

    /// The policy engine in use.
    #[must_use]
    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// The pending deferred resume, if any.
    #[must_use]
    pub fn armed_resume(&self) -> Option<ArmedResume> {
        self.timer.armed()
    }

    // ── Control loop ─────────────────────────────────────────

    /// Run until `cancel` fires: periodic checks, monitor signals and
    /// deferred resumes. The first check happens one interval after start.
    pub async fn run(&self, mut signal_rx: mpsc::Receiver<RateLimitSignal>, cancel: CancellationToken) {
        let taken = self
            .timer_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut timer_rx) = taken else {
            error!("governor loop is already running");
            return;
        };

        let period = self.settings.check_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut signals_open = true;

        info!(check_interval_secs = period.as_secs(), "governor loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.check_limits().await {
                        error!(%err, "periodic limit check failed");
                    }
                }
                signal = signal_rx.recv(), if signals_open => match signal {
                    Some(signal) => {
                        if let Err(err) = self.handle_signal(signal).await {
                            error!(%err, "failed to handle rate-limit signal");
                        }
                    }
                    None => {
                        debug!("signal channel closed");
                        signals_open = false;
                    }
                },
                Some(resume_at) = timer_rx.recv() => {
                    debug!(%resume_at, "deferred resume due");
                    if let Err(err) = self.resume_operations("timer").await {
                        error!(%err, "deferred resume failed");
                    }
                }
            }
        }
        self.timer.disarm();
        info!("governor loop shutting down");
    }

    /// Periodic threshold check. Skipped while paused.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if state or usage cannot be read, or the
    /// pause cannot be persisted.
    pub async fn check_limits(&self) -> Result<Option<PauseState>> {
        let _lock = self.transition.lock().await;
        if self.current_pause().await?.is_some() {
            debug!("paused, skipping limit check");
            return Ok(None);
        }

        let now = Utc::now();
        let snapshot = UsageSnapshot::new(self.usage.current_usage().await?, now);
        if !self.engine.should_pause(&snapshot) {
            return Ok(None);
        }

        let resume_at = self.engine.next_reset_time(now);
        let usage = json!({ "units": snapshot.units, "allowance": self.engine.tier().units });
        self.pause_locked(PauseReason::Threshold, resume_at, EventType::Threshold, usage)
            .await
            .map(Some)
    }

    /// React to a rate-limit signal. When already paused the resume time
    /// only moves later, never earlier, and a replayed backlog signal never
    /// moves it at all.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if state cannot be read or written.
    pub async fn handle_signal(&self, signal: RateLimitSignal) -> Result<PauseState> {
        let span = info_span!("handle_signal", rule = %signal.rule, limit_type = signal.limit_type.as_str());
        async move {
            let _lock = self.transition.lock().await;

            if let Some(mut state) = self.current_pause().await? {
                if signal.replayed {
                    debug!(resume_at = %state.resume_at, "replayed signal leaves existing pause as is");
                } else if signal.reset_time > state.resume_at {
                    info!(
                        from = %state.resume_at,
                        to = %signal.reset_time,
                        "extending pause to later reset time"
                    );
                    state.resume_at = signal.reset_time;
                    self.state.set_state(keys::PAUSE, Some(&state)).await?;
                    self.timer.arm(state.resume_at, state.remaining(Utc::now()));
                } else {
                    debug!(resume_at = %state.resume_at, "already paused until later");
                }
                return Ok(state);
            }

            let units = self.usage.current_usage().await?;
            let usage = json!({
                "units": units,
                "rule": signal.rule,
                "limit_type": signal.limit_type,
                "line": signal.raw_line,
            });
            self.pause_locked(PauseReason::RateLimit, signal.reset_time, EventType::RateLimit, usage)
                .await
        }
        .instrument(span)
        .await
    }

    /// Pause until `resume_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the pause cannot be persisted.
    pub async fn pause(
        &self,
        reason: PauseReason,
        resume_at: DateTime<Utc>,
        event_type: EventType,
    ) -> Result<PauseState> {
        let _lock = self.transition.lock().await;
        let units = self.usage.current_usage().await?;
        self.pause_locked(reason, resume_at, event_type, json!({ "units": units }))
            .await
    }

    async fn pause_locked(
        &self,
        reason: PauseReason,
        resume_at: DateTime<Utc>,
        event_type: EventType,
        usage: serde_json::Value,
    ) -> Result<PauseState> {
        let now = Utc::now();
        let state = PauseState {
            paused_at: now,
            resume_at,
            reason,
        };

        // ── Persist before anything else ─────────────────────
        self.state.set_state(keys::PAUSE, Some(&state)).await?;
        let event = LimitEvent::new(event_type, self.engine.tier_name(), usage, Some(resume_at));
        if let Err(err) = self.events.record(&event).await {
            error!(%err, "failed to record pause event");
        }

        // ── Alert and schedule ───────────────────────────────
        self.controller.notify_pause(&state).await;
        let delay = state.remaining(now);
        self.timer.arm(resume_at, delay);

        info!(
            reason = ?reason,
            %resume_at,
            wait = %format_wait(delay),
            "operations paused"
        );
        Ok(state)
    }

    /// Resume if the persisted pause is due. A vanished pause is a no-op;
    /// a pause whose resume time moved later is re-armed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the pause state cannot be read or cleared.
    pub async fn resume_operations(&self, trigger: &str) -> Result<Option<ResumeOutcome>> {
        let span = info_span!("resume_operations", trigger);
        async move {
            let _lock = self.transition.lock().await;

            let Some(state) = self.current_pause().await? else {
                info!("no pause in effect, nothing to resume");
                return Ok(None);
            };

            let now = Utc::now();
            if state.resume_at > now + RESUME_SLACK {
                let remaining = state.remaining(now);
                info!(resume_at = %state.resume_at, wait = %format_wait(remaining), "resume not yet due, re-arming");
                self.timer.arm(state.resume_at, remaining);
                return Ok(None);
            }

            self.state.set_state::<PauseState>(keys::PAUSE, None).await?;
            self.timer.disarm();

            let outcome = self.controller.resume(None).await;
            let units = self.usage.current_usage().await.unwrap_or_default();
            let usage = json!({
                "units": units,
                "method": outcome.method,
                "strategy": outcome.strategy,
                "errors": outcome.errors,
            });
            let event = LimitEvent::new(EventType::Resumed, self.engine.tier_name(), usage, None);
            if let Err(err) = self.events.record(&event).await {
                error!(%err, "failed to record resume event");
            }

            info!(method = ?outcome.method, strategy = %outcome.strategy, "operations resumed");
            Ok(Some(outcome))
        }
        .instrument(span)
        .await
    }

    /// Restore scheduling from persisted state after a restart.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the pause state cannot be read.
    pub async fn recover_on_startup(&self) -> Result<Option<ResumeOutcome>> {
        let Some(state) = self.current_pause().await? else {
            info!("no persisted pause, starting in running state");
            return Ok(None);
        };

        let now = Utc::now();
        if state.is_due(now) {
            info!(resume_at = %state.resume_at, "persisted pause already expired, resuming now");
            return self.resume_operations("startup").await;
        }

        let remaining = state.remaining(now);
        info!(
            resume_at = %state.resume_at,
            wait = %format_wait(remaining),
            "re-arming persisted pause"
        );
        self.timer.arm(state.resume_at, remaining);
        Ok(None)
    }

    // ── Operator overrides ───────────────────────────────────

    /// Pause for `duration`, bypassing the policy engine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` if `duration` reaches past the last
    /// representable timestamp, or `AppError::Db` if the pause cannot be
    /// persisted.
    pub async fn force_pause(&self, duration: Duration) -> Result<PauseState> {
        let delta = chrono::Duration::from_std(duration)
            .map_err(|err| AppError::Api(format!("invalid pause duration: {err}")))?;
        let _lock = self.transition.lock().await;
        let resume_at = Utc::now()
            .checked_add_signed(delta)
            .ok_or_else(|| AppError::Api(format!("pause duration out of range: {duration:?}")))?;
        let units = self.usage.current_usage().await?;
        self.pause_locked(
            PauseReason::Manual,
            resume_at,
            EventType::ManualPause,
            json!({ "units": units }),
        )
        .await
    }

    /// Clear any pause and cancel the deferred resume without running the
    /// resume cascade. Returns whether a pause was cleared.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the pause state cannot be cleared.
    pub async fn force_resume(&self) -> Result<bool> {
        let _lock = self.transition.lock().await;
        let cleared = self.current_pause().await?.is_some();
        self.state.set_state::<PauseState>(keys::PAUSE, None).await?;
        self.timer.disarm();

        let units = self.usage.current_usage().await.unwrap_or_default();
        let event = LimitEvent::new(
            EventType::ManualResume,
            self.engine.tier_name(),
            json!({ "units": units }),
            None,
        );
        if let Err(err) = self.events.record(&event).await {
            error!(%err, "failed to record manual resume event");
        }
        info!(cleared, "manual resume");
        Ok(cleared)
    }

    /// Feed provider response headers through the header policy.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a resulting pause cannot be persisted.
    pub async fn apply_headers(&self, headers: &RateLimitHeaders) -> Result<Option<PauseState>> {
        let Some(trip) = parse_header_signal(headers) else {
            return Ok(None);
        };
        let now = Utc::now();
        let reset = match trip.limit_type {
            LimitType::Weekly => next_weekly_reset(now),
            LimitType::FiveHour | LimitType::Unknown => self.engine.next_reset_time(now),
        };
        self.handle_signal(trip.into_signal(reset, now)).await.map(Some)
    }

    // ── Status ───────────────────────────────────────────────

    /// Current pause status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the pause state cannot be read.
    pub async fn pause_status(&self) -> Result<PauseStatus> {
        let state = self.current_pause().await?;
        Ok(PauseStatus::from_state(state.as_ref(), Utc::now()))
    }

    /// Most recent limit events, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<LimitEvent>> {
        self.events.recent_events(limit).await
    }

    /// All registered sessions, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.sessions.list().await
    }

    /// Record a synthetic completed usage row of `units`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn record_usage(&self, units: u32) -> Result<i64> {
        let session_id = format!("synthetic:{}", Uuid::new_v4());
        let now = Utc::now();
        self.usage
            .record_session("synthetic", &session_id, now, None, UsageStatus::Active, units)
            .await?;
        let id = self
            .usage
            .record_session("synthetic", &session_id, now, Some(now), UsageStatus::Completed, units)
            .await?;
        info!(units, row = id, "synthetic usage recorded");
        Ok(id)
    }

    /// Pause status, usage, tier, processes and resume prediction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if pause state or usage cannot be read.
    pub async fn diagnostics(&self) -> Result<Diagnostics> {
        let pause = self.pause_status().await?;
        let units = self.usage.current_usage().await?;
        let tier = self.engine.tier();
        let mut errors = Vec::new();

        let processes = self.controller.detect_processes().await.unwrap_or_else(|err| {
            errors.push(format!("process detection: {err}"));
            Vec::new()
        });
        let strategy = match self.controller.detect_resume_strategy().await {
            Ok(strategy) => Some(strategy),
            Err(err) => {
                errors.push(format!("strategy detection: {err}"));
                None
            }
        };

        Ok(Diagnostics {
            pause,
            units,
            tier: self.engine.tier_name().to_owned(),
            tier_units: tier.units,
            window_seconds: tier.window_seconds(),
            threshold: self.engine.settings().map(|s| s.threshold),
            processes,
            strategy,
            errors,
        })
    }

    /// Predicted resume path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Process` if detection fails.
    pub async fn detect_resume_strategy(&self) -> Result<StrategyDiagnosis> {
        self.controller.detect_resume_strategy().await
    }

    // ── Session registration ─────────────────────────────────

    /// Register `req` as the active session, completing any other active
    /// session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Api` for an empty session id, or `AppError::Db`
    /// if the session cannot be stored.
    pub async fn register_session(&self, req: RegisterRequest) -> Result<RegisterResponse> {
        if req.session_id.trim().is_empty() {
            return Err(AppError::Api("session_id must not be empty".into()));
        }
        let _lock = self.registry.lock().await;
        let now = Utc::now();

        // ── Supersede the previous active session ────────────
        if let Some(previous) = self.sessions.active_id().await? {
            if previous != req.session_id {
                if let Some(record) = self.sessions.get(&previous).await? {
                    if record.is_active() {
                        info!(session_id = %previous, "superseding previous session");
                        self.complete_session(record, "superseded", None, now).await?;
                    }
                }
            }
        }

        // ── Store the new record ─────────────────────────────
        let mut record = match self.sessions.get(&req.session_id).await? {
            Some(mut existing) if existing.is_active() => {
                existing.working_dir.clone_from(&req.working_dir);
                existing.pid = req.pid.or(existing.pid);
                existing.last_activity = now;
                existing
            }
            _ => SessionRecord::from_request(&req, now),
        };
        let usage_id = self
            .usage
            .record_session(
                &self.settings.agent_name,
                &record.session_id,
                record.started_at,
                None,
                UsageStatus::Active,
                record.unit_count,
            )
            .await?;
        record.usage_id = Some(usage_id);
        self.sessions.save(&record).await?;
        self.sessions.set_active(Some(&record.session_id)).await?;

        info!(
            session_id = %record.session_id,
            pid = record.pid,
            dir = %record.working_dir.display(),
            "session registered"
        );

        Ok(RegisterResponse {
            success: true,
            session_id: record.session_id,
            pause: self.pause_status().await?,
        })
    }

    /// Record activity for a session and return the pause status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or `AppError::Db`
    /// if the session cannot be stored.
    pub async fn heartbeat(&self, req: HeartbeatRequest) -> Result<PauseStatus> {
        let _lock = self.registry.lock().await;
        let mut record = self
            .sessions
            .get(&req.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", req.session_id)))?;

        if record.is_active() {
            let now = Utc::now();
            record.last_activity = now;
            if let Some(units) = req.unit_count {
                record.unit_count = units;
                if let Err(err) = self.usage.update_units(&record.session_id, units).await {
                    warn!(session_id = %record.session_id, %err, "failed to update usage units");
                }
            }

            if req.status == Some(SessionStatus::Completed) {
                self.complete_session(record, "completed", None, now).await?;
            } else {
                self.sessions.save(&record).await?;
            }
        } else {
            debug!(session_id = %record.session_id, "heartbeat for completed session");
        }

        self.pause_status().await
    }

    /// Mark a session completed and close its usage row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or `AppError::Db`
    /// if the session cannot be stored.
    pub async fn end_session(&self, req: EndRequest) -> Result<()> {
        let _lock = self.registry.lock().await;
        let record = self
            .sessions
            .get(&req.session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {}", req.session_id)))?;

        if !record.is_active() {
            debug!(session_id = %record.session_id, "session already completed");
            return Ok(());
        }

        let reason = req.reason.as_deref().unwrap_or("ended");
        self.complete_session(record, reason, req.final_unit_count, Utc::now())
            .await
    }

    async fn complete_session(
        &self,
        mut record: SessionRecord,
        reason: &str,
        final_units: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        record.status = SessionStatus::Completed;
        record.last_activity = now;
        record.end_reason = Some(reason.to_owned());
        if let Some(units) = final_units {
            record.unit_count = units;
        }
        self.sessions.save(&record).await?;

        if let Err(err) = self
            .usage
            .record_session(
                &self.settings.agent_name,
                &record.session_id,
                record.started_at,
                Some(now),
                UsageStatus::Completed,
                record.unit_count,
            )
            .await
        {
            warn!(session_id = %record.session_id, %err, "failed to close usage row");
        }

        if self.sessions.active_id().await?.as_deref() == Some(record.session_id.as_str()) {
            self.sessions.set_active(None).await?;
        }
        info!(session_id = %record.session_id, reason, units = record.unit_count, "session ended");
        Ok(())
    }

    async fn current_pause(&self) -> Result<Option<PauseState>> {
        self.state.get_state(keys::PAUSE).await
    }
}
