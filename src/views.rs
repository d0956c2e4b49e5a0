//! Derived task views: today, upcoming and overdue.
//!
//! Pure filters over an already loaded task list. Days are calendar days in
//! the time zone of `now`, so a task due at 23:30 local time is "today" until
//! midnight regardless of its UTC date.

use crate::types::Task;
use chrono::{DateTime, Days, NaiveDate, TimeZone};
use serde::Serialize;
use std::cmp::Reverse;

/// Tasks grouped for the home page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskGroups {
    pub overdue: Vec<Task>,
    pub today: Vec<Task>,
    pub upcoming: Vec<Task>,
}

/// Calendar day of an epoch-ms timestamp in the given zone.
pub fn local_day<Tz: TimeZone>(ms: i64, tz: &Tz) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.date_naive())
}

fn due_day<Tz: TimeZone>(task: &Task, now: &DateTime<Tz>) -> Option<NaiveDate> {
    task.due_date.and_then(|ms| local_day(ms, &now.timezone()))
}

/// Due on the current local day. Done tasks count too.
pub fn is_due_today<Tz: TimeZone>(task: &Task, now: &DateTime<Tz>) -> bool {
    due_day(task, now) == Some(now.date_naive())
}

/// Due on a day before today and not done.
pub fn is_overdue<Tz: TimeZone>(task: &Task, now: &DateTime<Tz>) -> bool {
    !task.status.is_done() && due_day(task, now).is_some_and(|day| day < now.date_naive())
}

/// Due within `days` days after today and not done.
pub fn is_upcoming<Tz: TimeZone>(task: &Task, now: &DateTime<Tz>, days: u32) -> bool {
    if task.status.is_done() {
        return false;
    }
    let today = now.date_naive();
    let Some(horizon) = today.checked_add_days(Days::new(days as u64)) else {
        return false;
    };
    due_day(task, now).is_some_and(|day| day > today && day <= horizon)
}

/// Earliest due first, higher priority first on ties.
fn sort_by_due(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| (t.due_date, Reverse(t.priority), t.created_at));
}

pub fn today<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks.iter().filter(|t| is_due_today(t, now)).cloned().collect();
    // Open tasks above finished ones.
    out.sort_by_key(|t| (t.status.is_done(), t.due_date, Reverse(t.priority), t.created_at));
    out
}

pub fn overdue<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks.iter().filter(|t| is_overdue(t, now)).cloned().collect();
    sort_by_due(&mut out);
    out
}

pub fn upcoming<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>, days: u32) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .iter()
        .filter(|t| is_upcoming(t, now, days))
        .cloned()
        .collect();
    sort_by_due(&mut out);
    out
}

/// All three groups in one pass over the input.
pub fn group_tasks<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>, upcoming_days: u32) -> TaskGroups {
    TaskGroups {
        overdue: overdue(tasks, now),
        today: today(tasks, now),
        upcoming: upcoming(tasks, now, upcoming_days),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, TaskStatus};
    use chrono::{FixedOffset, Utc};

    fn task(id: &str, due: Option<DateTime<FixedOffset>>, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            user_id: "u".to_string(),
            project_id: None,
            title: id.to_string(),
            description: None,
            status,
            priority: Priority::Medium,
            due_date: due.map(|d| d.timestamp_millis()),
            completed_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn at(tz: &FixedOffset, y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        tz.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn today_uses_local_calendar_day() {
        // UTC-5: 23:30 local on the 18th is already the 19th in UTC.
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = at(&tz, 2026, 10, 18, 9, 0);
        let late = task("late", Some(at(&tz, 2026, 10, 18, 23, 30)), TaskStatus::Todo);

        assert!(is_due_today(&late, &now));
        assert!(!is_overdue(&late, &now));

        // Seen from UTC the same instant falls on the 19th, so it is upcoming.
        let now_utc = now.with_timezone(&Utc);
        assert!(!is_due_today(&late, &now_utc));
        assert!(is_upcoming(&late, &now_utc, 7));
    }

    #[test]
    fn overdue_is_strictly_before_today_and_open() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let now = at(&tz, 2026, 10, 18, 0, 5);
        let yesterday = task("y", Some(at(&tz, 2026, 10, 17, 23, 59)), TaskStatus::Todo);
        let earlier_today = task("t", Some(at(&tz, 2026, 10, 18, 0, 0)), TaskStatus::Todo);
        let done = task("d", Some(at(&tz, 2026, 10, 1, 12, 0)), TaskStatus::Done);

        assert!(is_overdue(&yesterday, &now));
        assert!(!is_overdue(&earlier_today, &now));
        assert!(is_due_today(&earlier_today, &now));
        assert!(!is_overdue(&done, &now));
    }

    #[test]
    fn upcoming_respects_horizon_and_excludes_today() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = at(&tz, 2026, 10, 18, 12, 0);
        let tasks = vec![
            task("today", Some(at(&tz, 2026, 10, 18, 18, 0)), TaskStatus::Todo),
            task("tomorrow", Some(at(&tz, 2026, 10, 19, 8, 0)), TaskStatus::InProgress),
            task("week", Some(at(&tz, 2026, 10, 25, 8, 0)), TaskStatus::Todo),
            task("later", Some(at(&tz, 2026, 10, 26, 8, 0)), TaskStatus::Todo),
            task("none", None, TaskStatus::Todo),
        ];

        let ids: Vec<String> = upcoming(&tasks, &now, 7).into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["tomorrow", "week"]);
    }

    #[test]
    fn group_tasks_sorts_each_group() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let now = at(&tz, 2026, 10, 18, 12, 0);
        let mut urgent = task("urgent", Some(at(&tz, 2026, 10, 16, 9, 0)), TaskStatus::Todo);
        urgent.priority = Priority::High;
        let tasks = vec![
            task("old", Some(at(&tz, 2026, 10, 10, 9, 0)), TaskStatus::Todo),
            task("same-time", Some(at(&tz, 2026, 10, 16, 9, 0)), TaskStatus::Todo),
            urgent,
            task("done-today", Some(at(&tz, 2026, 10, 18, 9, 0)), TaskStatus::Done),
            task("open-today", Some(at(&tz, 2026, 10, 18, 10, 0)), TaskStatus::Todo),
        ];

        let groups = group_tasks(&tasks, &now, 7);
        let overdue: Vec<&str> = groups.overdue.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(overdue, vec!["old", "urgent", "same-time"]);
        let today: Vec<&str> = groups.today.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(today, vec!["open-today", "done-today"]);
        assert!(groups.upcoming.is_empty());
    }
}
