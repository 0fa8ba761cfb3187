// Recurrence computation tests with pinned Utc reference times

use chrono::{TimeZone, Utc, Weekday};
use fleetdeck::models::{IntervalUnit, Recurrence};
use fleetdeck::scheduler::recurrence::{
    initial_next_run, next_after, next_run_after_fire, normalize_cron,
};

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn hhmm(h: u32, m: u32) -> chrono::NaiveTime {
    chrono::NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

// 2026-08-03 is a Monday.

#[test]
fn daily_next_run_is_smallest_timestamp_at_or_after_now() {
    let rec = Recurrence::Daily { time: hhmm(9, 0) };

    // Before today's slot: fires today.
    let now = utc(2026, 8, 4, 8, 30, 0);
    assert_eq!(next_after(&rec, &now, None), Some(utc(2026, 8, 4, 9, 0, 0)));

    // After today's slot: fires tomorrow.
    let now = utc(2026, 8, 4, 10, 0, 0);
    assert_eq!(next_after(&rec, &now, None), Some(utc(2026, 8, 5, 9, 0, 0)));

    // Exactly at the slot: >= means now itself.
    let now = utc(2026, 8, 4, 9, 0, 0);
    assert_eq!(next_after(&rec, &now, None), Some(now));
}

#[test]
fn daily_after_fire_advances_to_next_day() {
    let rec = Recurrence::Daily { time: hhmm(9, 0) };
    let fired = utc(2026, 8, 4, 9, 0, 0);
    assert_eq!(
        next_run_after_fire(&rec, &fired),
        Some(utc(2026, 8, 5, 9, 0, 0))
    );
}

#[test]
fn weekly_picks_remaining_slot_this_week() {
    // days=[Mon,Wed], time=09:00, now=Tue 10:00 -> Wed 09:00 of the same week.
    let rec = Recurrence::Weekly {
        days: vec![Weekday::Mon, Weekday::Wed],
        time: hhmm(9, 0),
    };
    let now = utc(2026, 8, 4, 10, 0, 0); // Tuesday
    assert_eq!(next_after(&rec, &now, None), Some(utc(2026, 8, 5, 9, 0, 0)));
}

#[test]
fn weekly_wraps_to_following_week() {
    let rec = Recurrence::Weekly {
        days: vec![Weekday::Mon],
        time: hhmm(9, 0),
    };
    // Tuesday: Monday already passed, wrap to next Monday.
    let now = utc(2026, 8, 4, 10, 0, 0);
    assert_eq!(
        next_after(&rec, &now, None),
        Some(utc(2026, 8, 10, 9, 0, 0))
    );

    // Monday after the slot also wraps.
    let now = utc(2026, 8, 3, 9, 0, 1);
    assert_eq!(
        next_after(&rec, &now, None),
        Some(utc(2026, 8, 10, 9, 0, 0))
    );
}

#[test]
fn interval_is_due_relative_to_last_run() {
    // Scenario: interval(5, minutes), last_run=10:00, evaluated at 10:06.
    let rec = Recurrence::Interval {
        every: 5,
        unit: IntervalUnit::Minutes,
    };
    let last = utc(2026, 8, 4, 10, 0, 0);
    let now = utc(2026, 8, 4, 10, 6, 0);

    // The due time is 10:05 (already past -> fires immediately)...
    assert_eq!(
        next_after(&rec, &now, Some(&last)),
        Some(utc(2026, 8, 4, 10, 5, 0))
    );

    // ...and after firing at 10:06 the next run is 10:11, computed from the
    // actual fire time, not the missed ideal 10:05.
    assert_eq!(
        next_run_after_fire(&rec, &now),
        Some(utc(2026, 8, 4, 10, 11, 0))
    );
}

#[test]
fn interval_without_history_counts_from_now() {
    let rec = Recurrence::Interval {
        every: 2,
        unit: IntervalUnit::Hours,
    };
    let now = utc(2026, 8, 4, 10, 0, 0);
    assert_eq!(
        initial_next_run(&rec, &now),
        Some(utc(2026, 8, 4, 12, 0, 0))
    );
}

#[test]
fn cron_next_run_is_strictly_after_now() {
    let rec = Recurrence::Cron {
        expr: "*/15 * * * *".into(),
    };
    let now = utc(2026, 8, 4, 10, 7, 0);
    assert_eq!(
        next_after(&rec, &now, None),
        Some(utc(2026, 8, 4, 10, 15, 0))
    );

    // Exactly on a match: strictly after, so the next slot.
    let now = utc(2026, 8, 4, 10, 15, 0);
    assert_eq!(
        next_after(&rec, &now, None),
        Some(utc(2026, 8, 4, 10, 30, 0))
    );
}

#[test]
fn cron_daily_expression() {
    let rec = Recurrence::Cron {
        expr: "30 3 * * *".into(),
    };
    let now = utc(2026, 8, 4, 4, 0, 0);
    assert_eq!(next_after(&rec, &now, None), Some(utc(2026, 8, 5, 3, 30, 0)));
}

#[test]
fn next_run_after_fire_is_always_strictly_later() {
    let fired = utc(2026, 8, 4, 9, 0, 0);
    let recs = [
        Recurrence::Interval {
            every: 1,
            unit: IntervalUnit::Seconds,
        },
        Recurrence::Daily { time: hhmm(9, 0) },
        Recurrence::Weekly {
            days: vec![Weekday::Tue],
            time: hhmm(9, 0),
        },
        Recurrence::Cron {
            expr: "0 9 * * *".into(),
        },
    ];
    for rec in &recs {
        let next = next_run_after_fire(rec, &fired).expect("next run");
        assert!(next > fired, "{rec:?} produced non-advancing next run");
    }
}

#[test]
fn normalize_cron_accepts_five_fields_only() {
    assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
    assert!(normalize_cron("* * * *").is_err());
    assert!(normalize_cron("0 * * * * *").is_err());
}
