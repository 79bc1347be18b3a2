//! Rate-limit detection in free-form log text.
//!
//! Detection and reset-time derivation are ordered rule tables; the first
//! matching rule wins. Both tables are matched case-insensitively.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use tracing::error;

use crate::models::signal::{LimitType, RateLimitSignal};

/// A named detection pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalRule {
    /// Rule name recorded on the emitted signal.
    pub name: &'static str,
    /// Case-insensitive regular expression.
    pub pattern: &'static str,
}

/// Detection rules in priority order.
pub const SIGNAL_RULES: &[SignalRule] = &[
    SignalRule {
        name: "rate_limit_exceeded",
        pattern: r"rate[ _-]?limit[ _-]?(exceeded|error)",
    },
    SignalRule {
        name: "account_rate_limit",
        pattern: r"would exceed your account's rate limit",
    },
    SignalRule {
        name: "too_many_requests",
        pattern: r"\b429\b|too many requests",
    },
    SignalRule {
        name: "quota_exceeded",
        pattern: r"quota[ _-]?exceeded",
    },
    SignalRule {
        name: "error_rate_limit",
        pattern: r"\[ERROR\].*rate[ _-]?limit",
    },
    SignalRule {
        name: "retry_after",
        pattern: r"retry-after[:\s]+\d+",
    },
];

/// A named reset-time extraction pattern. The first capture group holds a
/// count of `seconds_per_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRule {
    /// Rule name.
    pub name: &'static str,
    /// Case-insensitive regular expression with one numeric capture.
    pub pattern: &'static str,
    /// Seconds represented by one captured unit.
    pub seconds_per_unit: i64,
}

/// Reset-time rules in priority order.
pub const RESET_RULES: &[ResetRule] = &[
    ResetRule {
        name: "retry_after_seconds",
        pattern: r"retry-after[:\s]+(\d+)",
        seconds_per_unit: 1,
    },
    ResetRule {
        name: "in_hours",
        pattern: r"in\s+(\d+)\s+hours?",
        seconds_per_unit: 3600,
    },
];

/// Reset delay in seconds used when no reset rule matches.
pub const DEFAULT_RESET_SECONDS: i64 = 5 * 3600;

fn compile(name: &str, pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(err) => {
            error!(rule = name, %err, "rule pattern does not compile, skipping");
            None
        }
    }
}

fn signal_regexes() -> &'static [(SignalRule, Regex)] {
    static COMPILED: OnceLock<Vec<(SignalRule, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        SIGNAL_RULES
            .iter()
            .filter_map(|rule| compile(rule.name, rule.pattern).map(|re| (*rule, re)))
            .collect()
    })
}

fn reset_regexes() -> &'static [(ResetRule, Regex)] {
    static COMPILED: OnceLock<Vec<(ResetRule, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RESET_RULES
            .iter()
            .filter_map(|rule| compile(rule.name, rule.pattern).map(|re| (*rule, re)))
            .collect()
    })
}

/// Name of the first rule matching `line`.
#[must_use]
pub fn matching_rule(line: &str) -> Option<&'static str> {
    signal_regexes()
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(rule, _)| rule.name)
}

/// Classify which quota `line` refers to.
#[must_use]
pub fn classify_limit_type(line: &str) -> LimitType {
    let lower = line.to_lowercase();
    if lower.contains("5 hour") || lower.contains("5-hour") {
        LimitType::FiveHour
    } else if lower.contains("week") {
        LimitType::Weekly
    } else {
        LimitType::Unknown
    }
}

/// Reset time announced by `line`, or `now + 5h` when it names none.
#[must_use]
pub fn derive_reset_time(line: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    for (rule, re) in reset_regexes() {
        let delay = re
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|count| count.as_str().parse::<i64>().ok())
            .and_then(|count| count.checked_mul(rule.seconds_per_unit))
            .and_then(chrono::Duration::try_seconds);
        if let Some(reset) = delay.and_then(|delay| now.checked_add_signed(delay)) {
            return reset;
        }
    }
    now + chrono::Duration::seconds(DEFAULT_RESET_SECONDS)
}

/// Parse one log line into a signal, if any detection rule matches.
#[must_use]
pub fn parse_signal_from_text(line: &str, now: DateTime<Utc>) -> Option<RateLimitSignal> {
    let rule = matching_rule(line)?;
    Some(RateLimitSignal {
        rule: rule.to_owned(),
        limit_type: classify_limit_type(line),
        reset_time: derive_reset_time(line, now),
        detected_at: now,
        raw_line: line.to_owned(),
        replayed: false,
    })
}
