//! Rate-limit decisions from provider response headers.

use chrono::{DateTime, Utc};

use crate::models::signal::{LimitType, RateLimitSignal};

const REMAINING_5H: &str = "x-ratelimit-remaining-5h";
const LIMIT_5H: &str = "x-ratelimit-limit-5h";
const REMAINING_WEEKLY: &str = "x-ratelimit-remaining-weekly";
const LIMIT_WEEKLY: &str = "x-ratelimit-limit-weekly";

/// Pause when at most 1/10 of the short window remains.
const SHORT_WINDOW_DIVISOR: u64 = 10;
/// Pause when at most 1/20 of the weekly allowance remains.
const WEEKLY_DIVISOR: u64 = 20;

/// Quota figures reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Units left in the short window.
    pub remaining_5h: Option<u64>,
    /// Short-window allowance.
    pub limit_5h: Option<u64>,
    /// Units left this week.
    pub remaining_weekly: Option<u64>,
    /// Weekly allowance.
    pub limit_weekly: Option<u64>,
}

impl RateLimitHeaders {
    /// Collect the known headers from name/value pairs. Names match
    /// case-insensitively; unparseable values are ignored.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let Ok(value) = value.as_ref().trim().parse::<u64>() else {
                continue;
            };
            let slot = match name.as_ref().to_ascii_lowercase().as_str() {
                REMAINING_5H => &mut headers.remaining_5h,
                LIMIT_5H => &mut headers.limit_5h,
                REMAINING_WEEKLY => &mut headers.remaining_weekly,
                LIMIT_WEEKLY => &mut headers.limit_weekly,
                _ => continue,
            };
            *slot = Some(value);
        }
        headers
    }
}

/// A quota found nearly exhausted in response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderTrip {
    /// Which quota tripped.
    pub limit_type: LimitType,
    /// Units left.
    pub remaining: u64,
    /// Allowance.
    pub limit: u64,
}

impl HeaderTrip {
    /// Turn the trip into a signal resetting at `reset_time`.
    #[must_use]
    pub fn into_signal(self, reset_time: DateTime<Utc>, now: DateTime<Utc>) -> RateLimitSignal {
        RateLimitSignal {
            rule: "response_headers".to_owned(),
            limit_type: self.limit_type,
            reset_time,
            detected_at: now,
            raw_line: format!(
                "{} remaining {}/{}",
                self.limit_type.as_str(),
                self.remaining,
                self.limit
            ),
            replayed: false,
        }
    }
}

fn tripped(remaining: Option<u64>, limit: Option<u64>, divisor: u64) -> Option<(u64, u64)> {
    let (remaining, limit) = (remaining?, limit?);
    if limit == 0 {
        return None;
    }
    (remaining.saturating_mul(divisor) <= limit).then_some((remaining, limit))
}

/// Decide whether the headers call for a pause. The weekly quota wins when
/// both trip.
#[must_use]
pub fn parse_header_signal(headers: &RateLimitHeaders) -> Option<HeaderTrip> {
    if let Some((remaining, limit)) =
        tripped(headers.remaining_weekly, headers.limit_weekly, WEEKLY_DIVISOR)
    {
        return Some(HeaderTrip {
            limit_type: LimitType::Weekly,
            remaining,
            limit,
        });
    }
    tripped(headers.remaining_5h, headers.limit_5h, SHORT_WINDOW_DIVISOR).map(
        |(remaining, limit)| HeaderTrip {
            limit_type: LimitType::FiveHour,
            remaining,
            limit,
        },
    )
}
