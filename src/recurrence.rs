//! Recurrence rules: human-readable descriptions and next-occurrence math.
//!
//! All arithmetic runs on UTC wall-clock time and preserves the time of day of
//! the previous occurrence. Monthly and yearly steps clamp to the last day of
//! shorter months (Jan 31 + 1 month = Feb 28/29).

use crate::error::ActionError;
use crate::types::{Frequency, Recurrence};
use anyhow::Result;
use chrono::{DateTime, Datelike, Days, Months, NaiveDateTime, TimeZone, Utc, Weekday};

const WEEKDAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Check a rule and normalize its weekday list (sorted, deduplicated, weekly only).
pub fn normalize(mut rule: Recurrence) -> Result<Recurrence> {
    if rule.interval == 0 || rule.interval > 365 {
        return Err(ActionError::invalid_value("interval", "Interval must be between 1 and 365").into());
    }
    if let Some(day) = rule.days_of_week.iter().find(|d| **d > 6) {
        return Err(ActionError::invalid_value(
            "days_of_week",
            format!("Weekday {} out of range (0 = Monday .. 6 = Sunday)", day),
        )
        .into());
    }

    if rule.frequency == Frequency::Weekly {
        rule.days_of_week.sort_unstable();
        rule.days_of_week.dedup();
    } else {
        rule.days_of_week.clear();
    }
    Ok(rule)
}

fn unit(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Daily => "day",
        Frequency::Weekly => "week",
        Frequency::Monthly => "month",
        Frequency::Yearly => "year",
    }
}

/// Describe a rule, e.g. "Every 2 weeks on Mon, Thu until Mar 1, 2027".
pub fn describe(rule: &Recurrence) -> String {
    let weekdays_only = rule.frequency == Frequency::Weekly
        && rule.interval == 1
        && rule.days_of_week == [0, 1, 2, 3, 4];

    let mut text = if weekdays_only {
        "Every weekday".to_string()
    } else if rule.interval == 1 {
        format!("Every {}", unit(rule.frequency))
    } else {
        format!("Every {} {}s", rule.interval, unit(rule.frequency))
    };

    if rule.frequency == Frequency::Weekly && !rule.days_of_week.is_empty() && !weekdays_only {
        let names: Vec<&str> = rule
            .days_of_week
            .iter()
            .filter_map(|d| WEEKDAY_NAMES.get(*d as usize).copied())
            .collect();
        text.push_str(" on ");
        text.push_str(&names.join(", "));
    }

    if let Some(end) = rule.end_date.and_then(|ms| Utc.timestamp_millis_opt(ms).single()) {
        text.push_str(&format!(" until {}", end.format("%b %-d, %Y")));
    }

    text
}

fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_monday() as u8
}

fn next_weekly(from: NaiveDateTime, interval: u32, days: &[u8]) -> Option<NaiveDateTime> {
    if days.is_empty() {
        return from.checked_add_days(Days::new(7 * interval as u64));
    }

    // Remaining days of the current week first.
    let today = weekday_index(from.weekday());
    if let Some(day) = days.iter().find(|d| **d > today) {
        return from.checked_add_days(Days::new((*day - today) as u64));
    }

    // Otherwise the first listed day, `interval` weeks after this week's Monday.
    let monday = from.checked_sub_days(Days::new(today as u64))?;
    let target_week = monday.checked_add_days(Days::new(7 * interval as u64))?;
    target_week.checked_add_days(Days::new(days[0] as u64))
}

/// The occurrence following `from` (epoch ms), or `None` once past the end date.
pub fn next_occurrence(rule: &Recurrence, from: i64) -> Option<i64> {
    let from: DateTime<Utc> = Utc.timestamp_millis_opt(from).single()?;
    let naive = from.naive_utc();
    let interval = rule.interval.max(1);

    let next = match rule.frequency {
        Frequency::Daily => naive.checked_add_days(Days::new(interval as u64)),
        Frequency::Weekly => next_weekly(naive, interval, &rule.days_of_week),
        Frequency::Monthly => naive.checked_add_months(Months::new(interval)),
        Frequency::Yearly => naive.checked_add_months(Months::new(interval.checked_mul(12)?)),
    }?;

    let next_ms = next.and_utc().timestamp_millis();
    match rule.end_date {
        Some(end) if next_ms > end => None,
        _ => Some(next_ms),
    }
}
