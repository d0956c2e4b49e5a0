//! Recurrence rule storage and next-occurrence spawning.

use super::{Database, new_id, now_ms, task_owned_by};
use crate::error::ActionError;
use crate::recurrence::{next_occurrence, normalize};
use crate::types::{Recurrence, Task};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

fn parse_recurrence_row(row: &Row) -> rusqlite::Result<Recurrence> {
    let frequency: String = row.get("frequency")?;
    let days_json: Option<String> = row.get("days_of_week")?;

    Ok(Recurrence {
        task_id: row.get("task_id")?,
        frequency: frequency.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        interval: row.get("interval")?,
        days_of_week: days_json
            .map(|s| serde_json::from_str(&s).unwrap_or_default())
            .unwrap_or_default(),
        end_date: row.get("end_date")?,
    })
}

fn get_recurrence_internal(conn: &Connection, task_id: &str) -> Result<Option<Recurrence>> {
    let rule = conn
        .query_row(
            "SELECT * FROM recurrence WHERE task_id = ?1",
            params![task_id],
            parse_recurrence_row,
        )
        .optional()?;
    Ok(rule)
}

/// Create the next occurrence of a just-completed recurring task.
///
/// The copy keeps title, description, project, priority and tags, and takes
/// over the recurrence rule so only the newest occurrence carries it. Returns
/// the new task id, or `None` if the task does not recur or the rule ended.
pub(crate) fn spawn_next_occurrence(conn: &Connection, task: &Task) -> Result<Option<String>> {
    let Some(rule) = get_recurrence_internal(conn, &task.id)? else {
        return Ok(None);
    };

    let now = now_ms();
    let base = task.due_date.or(task.completed_at).unwrap_or(now);
    let Some(next_due) = next_occurrence(&rule, base) else {
        debug!(task_id = %task.id, "Recurrence ended");
        return Ok(None);
    };

    let next_id = new_id();
    conn.execute(
        "INSERT INTO tasks (id, user_id, project_id, title, description, status, priority,
                            due_date, completed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'todo', ?6, ?7, NULL, ?8, ?8)",
        params![
            next_id,
            task.user_id,
            task.project_id,
            task.title,
            task.description,
            task.priority.as_str(),
            next_due,
            now,
        ],
    )?;
    conn.execute(
        "INSERT INTO task_tags (task_id, tag_id)
         SELECT ?1, tag_id FROM task_tags WHERE task_id = ?2",
        params![next_id, task.id],
    )?;
    conn.execute(
        "UPDATE recurrence SET task_id = ?1 WHERE task_id = ?2",
        params![next_id, task.id],
    )?;

    Ok(Some(next_id))
}

impl Database {
    /// Attach or replace the recurrence rule of a task.
    pub fn set_recurrence(&self, user_id: &str, rule: Recurrence) -> Result<Recurrence> {
        let rule = normalize(rule)?;
        let days_json = if rule.days_of_week.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&rule.days_of_week)?)
        };

        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, &rule.task_id)? {
                return Err(ActionError::not_found("Task", &rule.task_id).into());
            }
            conn.execute(
                "INSERT INTO recurrence (task_id, frequency, interval, days_of_week, end_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task_id) DO UPDATE SET
                    frequency = excluded.frequency,
                    interval = excluded.interval,
                    days_of_week = excluded.days_of_week,
                    end_date = excluded.end_date",
                params![
                    rule.task_id,
                    rule.frequency.as_str(),
                    rule.interval,
                    days_json,
                    rule.end_date,
                ],
            )?;
            Ok(())
        })?;

        Ok(rule)
    }

    pub fn get_recurrence(&self, user_id: &str, task_id: &str) -> Result<Option<Recurrence>> {
        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            get_recurrence_internal(conn, task_id)
        })
    }

    /// Remove the recurrence rule of a task. Clearing a task without one is a no-op.
    pub fn clear_recurrence(&self, user_id: &str, task_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            conn.execute("DELETE FROM recurrence WHERE task_id = ?1", params![task_id])?;
            Ok(())
        })
    }
}
