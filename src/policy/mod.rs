//! Quota policy: tier table, pause decisions, and rate-limit signal parsing.
//!
//! Everything here is pure. The current time is passed in wherever the
//! outcome depends on it.

pub mod engine;
pub mod headers;
pub mod signal;
pub mod tiers;

pub use engine::{format_wait, PolicyEngine, PolicySettings};
