//! Built-in subscription tier table.

use std::time::Duration;

use tracing::debug;

use crate::models::tier::Tier;

/// Tier used when a configured name is not in the table.
pub const FALLBACK_TIER: &str = "pro-20";

const FIVE_HOURS: Duration = Duration::from_secs(5 * 3600);

const PRO_20: Tier = Tier {
    window: FIVE_HOURS,
    units: 45,
    weekly_hours: 60,
};

/// Known tiers in ascending capability order.
pub const TIERS: &[(&str, Tier)] = &[
    (FALLBACK_TIER, PRO_20),
    (
        "max-100",
        Tier {
            window: FIVE_HOURS,
            units: 250,
            weekly_hours: 300,
        },
    ),
    (
        "max-200",
        Tier {
            window: FIVE_HOURS,
            units: 800,
            weekly_hours: 1000,
        },
    ),
];

/// Look up a tier by name, if it is known.
#[must_use]
pub fn lookup(name: &str) -> Option<Tier> {
    TIERS
        .iter()
        .find(|(tier_name, _)| *tier_name == name)
        .map(|(_, tier)| *tier)
}

/// Limits for `name`, falling back to [`FALLBACK_TIER`] for unknown names.
#[must_use]
pub fn tier_limits(name: &str) -> Tier {
    if let Some(tier) = lookup(name) {
        return tier;
    }
    debug!(tier = name, fallback = FALLBACK_TIER, "unknown tier, using fallback");
    PRO_20
}
