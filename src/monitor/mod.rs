//! Log-file signal monitor.
//!
//! Follows the agent's debug log (a fixed file, or the newest file in a
//! directory) and emits a [`RateLimitSignal`](crate::models::signal::RateLimitSignal)
//! for every appended line that matches a detection rule.

pub mod log_monitor;
pub mod resolve;
pub mod tail;

pub use log_monitor::{LogMonitor, MonitorSettings};
