//! Domain model module declarations.

pub mod event;
pub mod pause;
pub mod session;
pub mod signal;
pub mod tier;
pub mod usage;
