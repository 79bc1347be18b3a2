//! Quota tier definition.

use std::time::Duration;

/// Static quota configuration for a subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    /// Length of the rolling quota window.
    pub window: Duration,
    /// Units allowed per window.
    pub units: u32,
    /// Weekly allowance in hours.
    pub weekly_hours: u32,
}

impl Tier {
    /// Window length in whole seconds.
    #[must_use]
    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs()
    }

    /// Whether the window spans at least one day and therefore resets on
    /// the weekly boundary.
    #[must_use]
    pub fn is_weekly(&self) -> bool {
        self.window >= Duration::from_secs(24 * 3600)
    }
}
