//! Session controller: bridges governance decisions to the agent process.
//!
//! Process discovery, prompt delivery, agent launch, desktop notification
//! and history lookup are injected capabilities so the resume cascade can
//! be exercised without touching the host.

use std::future::Future;
use std::pin::Pin;

pub mod delivery;
pub mod history;
pub mod launcher;
pub mod notifier;
pub mod process;
pub mod session_controller;

pub use session_controller::{
    ControllerBackends, ControllerSettings, ResumeMethod, ResumeOutcome, ResumeStrategy,
    SessionController, StrategyDiagnosis, RESUME_CASCADE,
};

/// Boxed future returned by capability trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
