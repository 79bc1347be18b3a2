//! Pause/resume orchestration.
//!
//! Binds the state store, policy engine, log monitor signals and session
//! controller into one control loop, plus the deferred resume timer.

pub mod governor;
pub mod resume_timer;

pub use governor::{Diagnostics, Governor, GovernorSettings};
pub use resume_timer::{ArmedResume, ResumeTimer};
