#![forbid(unsafe_code)]

//! `rate-governor` daemon binary.
//!
//! Loads the project configuration, opens the state store, restores any
//! persisted pause, then runs the governor loop, the log monitor, the
//! retention sweeper and the HTTP control plane until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rate_governor::controller::ControllerBackends;
use rate_governor::monitor::{LogMonitor, MonitorSettings};
use rate_governor::orchestrator::Governor;
use rate_governor::persistence::state_repo::StateRepo;
use rate_governor::persistence::{db, retention};
use rate_governor::{api, AppError, GovernorConfig, Result};

/// Capacity of the monitor-to-governor signal channel.
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "rate-governor", about = "Rate-limit governor for coding agents", version, long_about = None)]
struct Cli {
    /// Project root holding the `.rate-governor` state directory.
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the control-plane port.
    #[arg(long)]
    http_port: Option<u16>,

    /// Do not follow the agent log.
    #[arg(long)]
    no_monitor: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("rate-governor bootstrap");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let project_root = match args.project_root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let config_path = args
        .config
        .unwrap_or_else(|| GovernorConfig::default_config_path(&project_root));
    let mut config = GovernorConfig::load_or_default(&config_path);
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    info!(
        project_root = %project_root.display(),
        tier = %config.tier,
        "configuration loaded"
    );

    // ── Initialize database ─────────────────────────────
    let db_path = GovernorConfig::db_path(&project_root);
    let db = Arc::new(db::connect(&db_path).await.map_err(|err| {
        error!(%err, path = %db_path.display(), "cannot open state store");
        err
    })?);
    info!(path = %db_path.display(), "database connected");

    let ct = CancellationToken::new();

    // ── Start retention service ──────────────────────────
    let retention_handle =
        retention::spawn_retention_task(Arc::clone(&db), config.retention(), ct.clone());

    // ── Build governor and restore state ────────────────
    let governor = Arc::new(Governor::from_config(
        Arc::clone(&db),
        &config,
        ControllerBackends::system(&config.agent),
        project_root.clone(),
        &ct,
    ));
    if let Err(err) = governor.recover_on_startup().await {
        error!(%err, "failed to restore persisted pause");
    }

    // ── Start log monitor ───────────────────────────────
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    let monitor_handle = if args.no_monitor || !config.monitor.enabled {
        info!("log monitor disabled");
        None
    } else {
        match MonitorSettings::from_config(&config.monitor) {
            Ok(settings) => Some(
                LogMonitor::new(settings, StateRepo::new(Arc::clone(&db)), signal_tx)
                    .spawn(ct.clone()),
            ),
            Err(err) => {
                warn!(%err, "log monitor not started");
                None
            }
        }
    };

    // ── Start governor loop and control plane ───────────
    let loop_governor = Arc::clone(&governor);
    let loop_ct = ct.clone();
    let governor_handle =
        tokio::spawn(async move { loop_governor.run(signal_rx, loop_ct).await });

    let listener = api::bind(config.http_port).await?;
    let api_ct = ct.clone();
    let api_governor = Arc::clone(&governor);
    let api_handle = tokio::spawn(async move {
        if let Err(err) = api::serve(listener, api_governor, api_ct).await {
            error!(%err, "control plane failed");
        }
    });

    info!("rate-governor ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }
    let _ = tokio::join!(governor_handle, api_handle, retention_handle);
    drop(governor);
    db.close().await;
    info!("rate-governor shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
