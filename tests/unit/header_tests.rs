use chrono::{Duration, Utc};

use rate_governor::models::signal::LimitType;
use rate_governor::policy::headers::{parse_header_signal, RateLimitHeaders};

fn headers(pairs: &[(&str, &str)]) -> RateLimitHeaders {
    RateLimitHeaders::from_pairs(pairs.iter().copied())
}

#[test]
fn header_names_match_case_insensitively() {
    let parsed = headers(&[
        ("X-RateLimit-Remaining-5h", "4"),
        ("x-ratelimit-limit-5h", "45"),
        ("X-RATELIMIT-REMAINING-WEEKLY", "500"),
        ("x-ratelimit-limit-weekly", "1000"),
        ("content-type", "application/json"),
    ]);
    assert_eq!(parsed.remaining_5h, Some(4));
    assert_eq!(parsed.limit_5h, Some(45));
    assert_eq!(parsed.remaining_weekly, Some(500));
    assert_eq!(parsed.limit_weekly, Some(1000));
}

#[test]
fn unparseable_values_are_ignored() {
    let parsed = headers(&[("x-ratelimit-remaining-5h", "soon"), ("x-ratelimit-limit-5h", " 45 ")]);
    assert_eq!(parsed.remaining_5h, None);
    assert_eq!(parsed.limit_5h, Some(45));
}

#[test]
fn short_window_trips_at_ten_percent() {
    let trip = parse_header_signal(&headers(&[
        ("x-ratelimit-remaining-5h", "10"),
        ("x-ratelimit-limit-5h", "100"),
    ]))
    .expect("trip");
    assert_eq!(trip.limit_type, LimitType::FiveHour);
    assert_eq!((trip.remaining, trip.limit), (10, 100));

    assert!(parse_header_signal(&headers(&[
        ("x-ratelimit-remaining-5h", "11"),
        ("x-ratelimit-limit-5h", "100"),
    ]))
    .is_none());
}

#[test]
fn weekly_trips_at_five_percent() {
    let trip = parse_header_signal(&headers(&[
        ("x-ratelimit-remaining-weekly", "50"),
        ("x-ratelimit-limit-weekly", "1000"),
    ]))
    .expect("trip");
    assert_eq!(trip.limit_type, LimitType::Weekly);

    assert!(parse_header_signal(&headers(&[
        ("x-ratelimit-remaining-weekly", "51"),
        ("x-ratelimit-limit-weekly", "1000"),
    ]))
    .is_none());
}

#[test]
fn weekly_wins_when_both_trip() {
    let trip = parse_header_signal(&headers(&[
        ("x-ratelimit-remaining-5h", "0"),
        ("x-ratelimit-limit-5h", "45"),
        ("x-ratelimit-remaining-weekly", "0"),
        ("x-ratelimit-limit-weekly", "1000"),
    ]))
    .expect("trip");
    assert_eq!(trip.limit_type, LimitType::Weekly);
}

#[test]
fn missing_or_zero_limits_never_trip() {
    assert!(parse_header_signal(&RateLimitHeaders::default()).is_none());
    assert!(parse_header_signal(&headers(&[("x-ratelimit-remaining-5h", "0")])).is_none());
    assert!(parse_header_signal(&headers(&[
        ("x-ratelimit-remaining-5h", "0"),
        ("x-ratelimit-limit-5h", "0"),
    ]))
    .is_none());
}

#[test]
fn trip_converts_into_signal() {
    let trip = parse_header_signal(&headers(&[
        ("x-ratelimit-remaining-5h", "2"),
        ("x-ratelimit-limit-5h", "45"),
    ]))
    .expect("trip");
    let now = Utc::now();
    let signal = trip.into_signal(now + Duration::hours(5), now);

    assert_eq!(signal.rule, "response_headers");
    assert_eq!(signal.limit_type, LimitType::FiveHour);
    assert_eq!(signal.reset_time, now + Duration::hours(5));
    assert_eq!(signal.detected_at, now);
    assert_eq!(signal.raw_line, "5_hour remaining 2/45");
}
