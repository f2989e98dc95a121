use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, Months, TimeZone, Timelike};

use crate::constants::SESSION_GAP_MINUTES;
use crate::models::{AggregationRow, BucketPreset, UsageEvent};

fn local_dt(offset: FixedOffset, ms: u64) -> Option<DateTime<FixedOffset>> {
    offset.timestamp_millis_opt(ms as i64).single()
}

/// Start and half-open end of the bucket containing `dt`, in epoch ms.
fn bucket_bounds(preset: BucketPreset, dt: &DateTime<FixedOffset>) -> Option<(u64, u64)> {
    let offset = *dt.offset();
    let date = dt.date_naive();

    let (start, end) = match preset {
        BucketPreset::FiveHour => {
            // Hour floored to a multiple of 5; the last block of the day
            // covers 20:00-01:00 of the next day.
            let hour = dt.hour() - dt.hour() % 5;
            let start = date.and_hms_opt(hour, 0, 0)?;
            (start, start + Duration::hours(5))
        }
        BucketPreset::Daily => {
            let start = date.and_hms_opt(0, 0, 0)?;
            (start, start + Duration::days(1))
        }
        BucketPreset::Weekly => {
            let monday = date.checked_sub_days(Days::new(
                date.weekday().num_days_from_monday() as u64,
            ))?;
            let start = monday.and_hms_opt(0, 0, 0)?;
            (start, start + Duration::days(7))
        }
        BucketPreset::Monthly => {
            let first = date.with_day(1)?;
            let next = first.checked_add_months(Months::new(1))?;
            (first.and_hms_opt(0, 0, 0)?, next.and_hms_opt(0, 0, 0)?)
        }
        BucketPreset::Session | BucketPreset::ProviderTotals => return None,
    };

    let start_ms = offset.from_local_datetime(&start).single()?.timestamp_millis();
    let end_ms = offset.from_local_datetime(&end).single()?.timestamp_millis();
    Some((start_ms.max(0) as u64, end_ms.max(0) as u64))
}

/// One row per non-empty bucket, ascending by bucket start. Events whose
/// timestamp does not parse are left out.
pub fn rows_for_preset(
    events: &[UsageEvent],
    offset: FixedOffset,
    preset: BucketPreset,
) -> Vec<AggregationRow> {
    let mut map: BTreeMap<(u64, u64), (u64, f64)> = BTreeMap::new();
    for ev in events {
        let Some(ms) = ev.occurred_at_ms() else {
            continue;
        };
        let Some(dt) = local_dt(offset, ms) else {
            continue;
        };
        let Some(bounds) = bucket_bounds(preset, &dt) else {
            continue;
        };
        let entry = map.entry(bounds).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += ev.spend_cents();
    }

    map.into_iter()
        .map(|((start, end), (count, cents))| AggregationRow {
            preset,
            start_unix_ms: start,
            end_unix_ms: end,
            request_count: count,
            spend_cents: cents,
            provider: None,
        })
        .collect()
}

/// Split the event stream into work sessions. A gap of strictly more than
/// 30 minutes between consecutive events starts a new session; a session
/// row spans its first to its last event.
pub fn session_rows(events: &[UsageEvent]) -> Vec<AggregationRow> {
    let mut stamped: Vec<(u64, f64)> = events
        .iter()
        .filter_map(|ev| ev.occurred_at_ms().map(|ms| (ms, ev.spend_cents())))
        .collect();
    stamped.sort_by_key(|(ms, _)| *ms);

    let gap_ms = SESSION_GAP_MINUTES as u64 * 60_000;
    let mut rows: Vec<AggregationRow> = Vec::new();

    for (ms, cents) in stamped {
        let split = match rows.last() {
            Some(open) => ms.saturating_sub(open.end_unix_ms) > gap_ms,
            None => true,
        };
        if split {
            rows.push(AggregationRow {
                preset: BucketPreset::Session,
                start_unix_ms: ms,
                end_unix_ms: ms,
                request_count: 0,
                spend_cents: 0.0,
                provider: None,
            });
        }
        if let Some(open) = rows.last_mut() {
            open.end_unix_ms = ms;
            open.request_count += 1;
            open.spend_cents += cents;
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn mk_event(ts_ms: u64, cents: i64) -> UsageEvent {
        UsageEvent {
            timestamp: ts_ms.to_string(),
            model: "claude-4-sonnet".to_string(),
            price_cents: Some(cents),
            ..UsageEvent::default()
        }
    }

    // 2025-08-20T00:00:00Z
    const AUG_20: u64 = 1_755_648_000_000;
    const HOUR: u64 = 3_600_000;

    fn fixture() -> Vec<UsageEvent> {
        vec![
            mk_event(AUG_20 + HOUR, 10),          // Aug 20 01:00
            mk_event(AUG_20 + 14 * HOUR, 20),     // Aug 20 14:00
            mk_event(AUG_20 - HOUR / 2, 5),       // Aug 19 23:30
            UsageEvent {
                timestamp: "garbage".to_string(),
                price_cents: Some(999),
                ..UsageEvent::default()
            },
        ]
    }

    #[test]
    fn daily_rows_ascend_and_sum() {
        let rows = rows_for_preset(&fixture(), utc(), BucketPreset::Daily);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].start_unix_ms, AUG_20 - 24 * HOUR);
        assert_eq!(rows[0].end_unix_ms, AUG_20);
        assert_eq!(rows[0].request_count, 1);
        assert_eq!(rows[0].spend_cents, 5.0);
        assert_eq!(rows[1].start_unix_ms, AUG_20);
        assert_eq!(rows[1].request_count, 2);
        assert_eq!(rows[1].spend_cents, 30.0);
    }

    #[test]
    fn five_hour_blocks_floor_to_multiples_of_five() {
        let rows = rows_for_preset(&fixture(), utc(), BucketPreset::FiveHour);
        let starts: Vec<u64> = rows.iter().map(|r| r.start_unix_ms).collect();
        // 23:30 -> 20:00 block of Aug 19; 01:00 -> 00:00 block; 14:00 -> 10:00 block.
        assert_eq!(
            starts,
            vec![AUG_20 - 4 * HOUR, AUG_20, AUG_20 + 10 * HOUR]
        );
        assert_eq!(rows[0].end_unix_ms, AUG_20 + HOUR);
        // An event at exactly 01:00 falls in the 00:00 block, not the
        // 20:00-01:00 one.
        assert_eq!(rows[1].request_count, 1);
        assert_eq!(rows[1].spend_cents, 10.0);
    }

    #[test]
    fn weekly_rows_start_on_monday() {
        let rows = rows_for_preset(&fixture(), utc(), BucketPreset::Weekly);
        // Aug 19-20 2025 are Tue/Wed of the week starting Mon Aug 18.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_unix_ms, AUG_20 - 2 * 24 * HOUR);
        assert_eq!(rows[0].end_unix_ms, AUG_20 + 5 * 24 * HOUR);
        assert_eq!(rows[0].request_count, 3);
        assert_eq!(rows[0].spend_cents, 35.0);
    }

    #[test]
    fn monthly_rows_cover_the_calendar_month() {
        let rows = rows_for_preset(&fixture(), utc(), BucketPreset::Monthly);
        assert_eq!(rows.len(), 1);
        // 2025-08-01T00:00:00Z
        assert_eq!(rows[0].start_unix_ms, 1_754_006_400_000);
        // 2025-09-01T00:00:00Z
        assert_eq!(rows[0].end_unix_ms, 1_756_684_800_000);
        assert_eq!(rows[0].request_count, 3);
    }

    #[test]
    fn offset_shifts_day_boundaries() {
        // At UTC+2, 23:30Z is already the next local day.
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let rows = rows_for_preset(&fixture(), plus_two, BucketPreset::Daily);
        assert_eq!(rows.len(), 1);
        // Local midnight Aug 20 is 22:00Z on Aug 19.
        assert_eq!(rows[0].start_unix_ms, AUG_20 - 2 * HOUR);
        assert_eq!(rows[0].request_count, 3);
        assert_eq!(rows[0].spend_cents, 35.0);
    }

    #[test]
    fn sessions_split_on_gaps_over_thirty_minutes() {
        let base = AUG_20 + 12 * HOUR;
        let events = vec![
            mk_event(base, 10),
            mk_event(base + 29 * 60_000, 5),  // 29 min later: same session
            mk_event(base + 30 * 60_000, 1),  // exactly 1 min after: same
            mk_event(base + 61 * 60_000, 20), // 31 min gap: new session
        ];
        let rows = session_rows(&events);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].start_unix_ms, base);
        assert_eq!(rows[0].end_unix_ms, base + 30 * 60_000);
        assert_eq!(rows[0].request_count, 3);
        assert_eq!(rows[0].spend_cents, 16.0);
        assert_eq!(rows[1].start_unix_ms, base + 61 * 60_000);
        assert_eq!(rows[1].end_unix_ms, rows[1].start_unix_ms);
        assert_eq!(rows[1].request_count, 1);
    }

    #[test]
    fn a_gap_of_exactly_thirty_minutes_stays_in_one_session() {
        let base = AUG_20;
        let events = vec![mk_event(base, 1), mk_event(base + 30 * 60_000, 2)];
        let rows = session_rows(&events);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].request_count, 2);
    }

    #[test]
    fn no_parseable_events_no_rows() {
        let events = vec![UsageEvent {
            timestamp: "not-a-number".to_string(),
            ..UsageEvent::default()
        }];
        assert!(rows_for_preset(&events, utc(), BucketPreset::Daily).is_empty());
        assert!(session_rows(&events).is_empty());
    }
}
