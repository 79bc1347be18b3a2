#![forbid(unsafe_code)]

//! `rate-governor`: keeps an interactive coding agent inside its provider
//! quota by pausing before the limit and resuming when the window resets.

pub mod api;
pub mod config;
pub mod controller;
pub mod errors;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod persistence;
pub mod policy;

pub use config::GovernorConfig;
pub use errors::{AppError, Result};
