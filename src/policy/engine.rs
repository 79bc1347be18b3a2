//! Preemptive pause decisions and reset-time computation.

use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use tracing::debug;

use crate::config::GovernorConfig;
use crate::models::tier::Tier;
use crate::models::usage::UsageSnapshot;

use super::tiers;

/// Resolved policy inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySettings {
    /// Name of the tier in effect.
    pub tier_name: String,
    /// Limits in effect.
    pub tier: Tier,
    /// Whether threshold-based pausing is enabled.
    pub preemptive_pause: bool,
    /// Fraction of `tier.units` that triggers a pause.
    pub threshold: f64,
}

impl PolicySettings {
    /// Resolve settings from configuration. An explicit `[limits]` table
    /// overrides the named tier.
    #[must_use]
    pub fn from_config(config: &GovernorConfig) -> Self {
        let tier = config
            .limits
            .as_ref()
            .map_or_else(|| tiers::tier_limits(&config.tier), |limits| limits.to_tier());
        Self {
            tier_name: config.tier.clone(),
            tier,
            preemptive_pause: config.daemon.preemptive_pause,
            threshold: config.daemon.preemptive_threshold,
        }
    }
}

/// Pure quota policy. Without settings the engine never pauses.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEngine {
    settings: Option<PolicySettings>,
}

impl PolicyEngine {
    /// Create an engine from optional settings.
    #[must_use]
    pub fn new(settings: Option<PolicySettings>) -> Self {
        Self { settings }
    }

    /// Create an engine configured from `config`.
    #[must_use]
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(Some(PolicySettings::from_config(config)))
    }

    /// Settings in effect, if any.
    #[must_use]
    pub fn settings(&self) -> Option<&PolicySettings> {
        self.settings.as_ref()
    }

    /// Limits in effect; the fallback tier when unconfigured.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.settings
            .as_ref()
            .map_or_else(|| tiers::tier_limits(tiers::FALLBACK_TIER), |s| s.tier)
    }

    /// Name of the tier in effect.
    #[must_use]
    pub fn tier_name(&self) -> &str {
        self.settings
            .as_ref()
            .map_or(tiers::FALLBACK_TIER, |s| s.tier_name.as_str())
    }

    /// Whether usage has reached the preemptive threshold.
    #[must_use]
    pub fn should_pause(&self, usage: &UsageSnapshot) -> bool {
        let Some(settings) = self.settings.as_ref() else {
            return false;
        };
        if !settings.preemptive_pause {
            return false;
        }
        let trigger = f64::from(settings.tier.units) * settings.threshold;
        let pause = f64::from(usage.units) >= trigger;
        debug!(
            units = usage.units,
            allowance = settings.tier.units,
            trigger,
            pause,
            "threshold check"
        );
        pause
    }

    /// When the current quota window resets.
    ///
    /// Sub-day windows reset `window` after `now`; windows of a day or more
    /// reset at the next Monday 00:00 UTC strictly after `now`.
    #[must_use]
    pub fn next_reset_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tier = self.tier();
        if tier.is_weekly() {
            return next_weekly_reset(now);
        }
        let window = chrono::Duration::from_std(tier.window).unwrap_or(chrono::Duration::hours(5));
        now + window
    }
}

/// Next Monday 00:00 UTC strictly after `now`.
#[must_use]
pub fn next_weekly_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let days_since_monday = i64::from(today.weekday().num_days_from_monday());
    let next_monday = today + chrono::Duration::days(7 - days_since_monday);
    next_monday.and_time(NaiveTime::MIN).and_utc()
}

/// Human-readable wait such as `3h 12m` or `45m`.
#[must_use]
pub fn format_wait(wait: Duration) -> String {
    let secs = wait.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
