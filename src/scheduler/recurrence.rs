// Recurrence computation. Pure functions over chrono types, generic over the
// timezone so tests can pin Utc while production runs Local.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone};

use crate::models::Recurrence;

/// The `cron` crate wants a seconds field; the job definition carries the
/// classic 5-field form (minute hour day-of-month month day-of-week).
pub fn normalize_cron(expr: &str) -> Result<String, String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "cron expression must have 5 fields, got {}",
            fields.len()
        ));
    }
    Ok(format!("0 {}", fields.join(" ")))
}

/// Smallest due time evaluated from `now`:
/// - interval: `last_run` (or `now`) + N x unit
/// - daily: smallest timestamp >= `now` with the given time-of-day
/// - weekly: smallest timestamp >= `now` on one of the given weekdays at the
///   given time-of-day, wrapping to the following week when needed
/// - cron: smallest timestamp strictly after `now` matching the expression
pub fn next_after<Tz: TimeZone>(
    recurrence: &Recurrence,
    now: &DateTime<Tz>,
    last_run: Option<&DateTime<Tz>>,
) -> Option<DateTime<Tz>> {
    match recurrence {
        Recurrence::Interval { every, unit } => {
            let base = last_run.cloned().unwrap_or_else(|| now.clone());
            Some(base + Duration::seconds(unit.to_seconds(*every) as i64))
        }
        Recurrence::Daily { time } => next_time_of_day(now, *time, |_| true),
        Recurrence::Weekly { days, time } => {
            next_time_of_day(now, *time, |date| days.contains(&date.weekday()))
        }
        Recurrence::Cron { expr } => {
            let normalized = normalize_cron(expr).ok()?;
            let schedule = cron::Schedule::from_str(&normalized).ok()?;
            schedule.after(now).next()
        }
    }
}

/// First due time for a job with no history, evaluated from `now`.
pub fn initial_next_run<Tz: TimeZone>(
    recurrence: &Recurrence,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    next_after(recurrence, now, None)
}

/// Due time following a fire at `fired_at`. Always strictly after the fire:
/// computed from the actual fire time, never from the missed ideal time, so
/// catch-up fires cannot stack or drift.
pub fn next_run_after_fire<Tz: TimeZone>(
    recurrence: &Recurrence,
    fired_at: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let just_after = fired_at.clone() + Duration::seconds(1);
    next_after(recurrence, &just_after, Some(fired_at))
}

fn next_time_of_day<Tz, F>(now: &DateTime<Tz>, time: NaiveTime, day_ok: F) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    F: Fn(NaiveDate) -> bool,
{
    let tz = now.timezone();
    for offset in 0..=7u64 {
        let Some(date) = now.date_naive().checked_add_days(Days::new(offset)) else {
            continue;
        };
        if !day_ok(date) {
            continue;
        }
        // A DST gap can make the local wall time nonexistent; skip that day.
        let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() else {
            continue;
        };
        if candidate >= *now {
            return Some(candidate);
        }
    }
    None
}
