use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDate, TimeZone};

use crate::constants::LIVE_WINDOW_MINUTES;
use crate::models::{BucketPreset, ForecastWarning, LiveMetrics, Severity, UsageEvent};

/// Spend-per-refresh-interval alert threshold, in cents.
///
/// The formula multiplies the refresh interval in minutes by the
/// notification percentage and by 100. The units do not line up with what
/// the name of either setting suggests, but the value is what existing
/// installs have tuned their settings against, so it stays.
pub fn spend_alert_threshold_cents(interval_minutes: u64, threshold_percent: f64) -> f64 {
    interval_minutes as f64 * threshold_percent * 100.0
}

fn severity_for(projected_cents: f64, threshold_cents: f64) -> Severity {
    if projected_cents >= 2.0 * threshold_cents {
        Severity::Critical
    } else if projected_cents >= threshold_cents {
        Severity::Warning
    } else {
        Severity::Info
    }
}

fn day_spend_cents(events: &[UsageEvent], offset: FixedOffset) -> BTreeMap<NaiveDate, f64> {
    let mut days: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for ev in events {
        let Some(ms) = ev.occurred_at_ms() else {
            continue;
        };
        let Some(dt) = offset.timestamp_millis_opt(ms as i64).single() else {
            continue;
        };
        *days.entry(dt.date_naive()).or_insert(0.0) += ev.spend_cents();
    }
    days
}

/// Project 30-day spend from the 90th-percentile observed daily spend.
///
/// Returns exactly one warning when any event timestamp parses, none
/// otherwise. When the previous cycle produced the same severity and the
/// same projection (to the cent), its `computed_at` is carried over so an
/// unchanged warning does not look freshly raised.
pub fn forecast_warning(
    events: &[UsageEvent],
    offset: FixedOffset,
    currency: &str,
    interval_minutes: u64,
    threshold_percent: f64,
    previous: Option<&ForecastWarning>,
    now_ms: u64,
) -> Option<ForecastWarning> {
    let days = day_spend_cents(events, offset);
    if days.is_empty() {
        return None;
    }

    let mut values: Vec<f64> = days.values().copied().collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let idx = (0.9 * (values.len() - 1) as f64).floor() as usize;
    let p90 = values[idx];

    let hourly_burn = p90 / 24.0;
    let projected = hourly_burn * 24.0 * 30.0;
    let threshold = spend_alert_threshold_cents(interval_minutes, threshold_percent);
    let severity = severity_for(projected, threshold);

    let computed_at = match previous {
        Some(prev)
            if prev.severity == severity
                && prev.projected_monthly_cents.round() == projected.round() =>
        {
            prev.computed_at_unix_ms
        }
        _ => now_ms,
    };

    Some(ForecastWarning {
        preset: BucketPreset::Daily,
        computed_at_unix_ms: computed_at,
        message: format!(
            "Projected 30-day spend {:.2} {currency} at the current burn rate",
            projected / 100.0
        ),
        severity,
        projected_monthly_cents: projected,
        threshold_cents: threshold,
    })
}

/// Trailing one-hour activity. Always present: with no events in the
/// window the metric reports a zero burn rate instead of disappearing.
pub fn live_metrics(events: &[UsageEvent], now_ms: u64) -> LiveMetrics {
    let window_start = now_ms.saturating_sub(LIVE_WINDOW_MINUTES as u64 * 60_000);

    let mut recent: Vec<(u64, f64)> = events
        .iter()
        .filter_map(|ev| ev.occurred_at_ms().map(|ms| (ms, ev.spend_cents())))
        .filter(|(ms, _)| *ms >= window_start)
        .collect();
    recent.sort_by_key(|(ms, _)| *ms);

    let burn_cents_per_hour: f64 = recent.iter().map(|(_, cents)| cents).sum();
    let sparkline_usd: Vec<f64> = recent
        .iter()
        .map(|(_, cents)| ((cents / 100.0) * 100.0).round() / 100.0)
        .collect();

    LiveMetrics {
        burn_cents_per_hour,
        request_count: recent.len() as u64,
        sparkline_usd,
        window_start_unix_ms: window_start,
        window_end_unix_ms: now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    // 2025-08-20T00:00:00Z
    const AUG_20: u64 = 1_755_648_000_000;
    const DAY: u64 = 86_400_000;

    fn mk_event(ts_ms: u64, cents: i64) -> UsageEvent {
        UsageEvent {
            timestamp: ts_ms.to_string(),
            model: "gpt-5".to_string(),
            price_cents: Some(cents),
            ..UsageEvent::default()
        }
    }

    #[test]
    fn p90_uses_floored_index_over_sorted_days() {
        // Daily spends 100 / 300 / 200: sorted [100, 200, 300], index
        // floor(0.9 * 2) = 1, p90 = 200, projection = 200 * 30 = 6000.
        let events = vec![
            mk_event(AUG_20, 100),
            mk_event(AUG_20 + DAY, 300),
            mk_event(AUG_20 + 2 * DAY, 200),
        ];
        let w = forecast_warning(&events, utc(), "USD", 5, 80.0, None, AUG_20 + 3 * DAY)
            .unwrap();
        assert_eq!(w.projected_monthly_cents, 6000.0);
        assert_eq!(w.threshold_cents, 40_000.0);
        assert_eq!(w.severity, Severity::Info);
        assert_eq!(w.preset, BucketPreset::Daily);
        assert!(w.message.contains("60.00 USD"));
    }

    #[test]
    fn severity_escalates_at_threshold_multiples() {
        let threshold = spend_alert_threshold_cents(5, 80.0);
        assert_eq!(severity_for(threshold - 1.0, threshold), Severity::Info);
        assert_eq!(severity_for(threshold, threshold), Severity::Warning);
        assert_eq!(severity_for(2.0 * threshold, threshold), Severity::Critical);
    }

    #[test]
    fn single_day_projects_thirty_times_its_spend() {
        let events = vec![mk_event(AUG_20, 1500)];
        let w = forecast_warning(&events, utc(), "USD", 5, 80.0, None, AUG_20 + DAY).unwrap();
        assert_eq!(w.projected_monthly_cents, 45_000.0);
        assert_eq!(w.severity, Severity::Warning);
    }

    #[test]
    fn unparseable_only_events_produce_no_warning() {
        let events = vec![UsageEvent {
            timestamp: "garbage".to_string(),
            price_cents: Some(100),
            ..UsageEvent::default()
        }];
        assert!(forecast_warning(&events, utc(), "USD", 5, 80.0, None, AUG_20).is_none());
    }

    #[test]
    fn unchanged_warning_keeps_its_original_timestamp() {
        let events = vec![mk_event(AUG_20, 100)];
        let first = forecast_warning(&events, utc(), "USD", 5, 80.0, None, AUG_20).unwrap();
        let second = forecast_warning(
            &events,
            utc(),
            "USD",
            5,
            80.0,
            Some(&first),
            AUG_20 + 5 * 60_000,
        )
        .unwrap();
        assert_eq!(second.computed_at_unix_ms, first.computed_at_unix_ms);

        // A different projection re-stamps.
        let more = vec![mk_event(AUG_20, 100), mk_event(AUG_20 + 3_600_000, 50)];
        let third = forecast_warning(
            &more,
            utc(),
            "USD",
            5,
            80.0,
            Some(&first),
            AUG_20 + 10 * 60_000,
        )
        .unwrap();
        assert_eq!(third.computed_at_unix_ms, AUG_20 + 10 * 60_000);
    }

    #[test]
    fn live_metrics_cover_the_trailing_hour() {
        let now = AUG_20 + 12 * 3_600_000;
        let events = vec![
            mk_event(now - 2 * 3_600_000, 99), // outside the window
            mk_event(now - 30 * 60_000, 50),
            mk_event(now - 10 * 60_000, 25),
        ];
        let live = live_metrics(&events, now);
        assert_eq!(live.burn_cents_per_hour, 75.0);
        assert_eq!(live.request_count, 2);
        assert_eq!(live.sparkline_usd, vec![0.5, 0.25]);
        assert_eq!(live.window_start_unix_ms, now - 3_600_000);
        assert_eq!(live.window_end_unix_ms, now);
    }

    #[test]
    fn empty_window_reports_zero_burn_placeholder() {
        let now = AUG_20;
        let live = live_metrics(&[], now);
        assert_eq!(live.burn_cents_per_hour, 0.0);
        assert_eq!(live.request_count, 0);
        assert!(live.sparkline_usd.is_empty());
        assert_eq!(live.window_end_unix_ms, now);
    }
}
