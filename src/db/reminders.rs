//! Reminder storage and the due-reminder queries behind email dispatch and
//! browser notifications.

use super::{Database, new_id, now_ms, task_owned_by};
use crate::error::ActionError;
use crate::types::{DueReminder, Reminder, ReminderChannel};
use anyhow::Result;
use rusqlite::{Row, params};
use tracing::debug;

fn parse_reminder_row(row: &Row) -> rusqlite::Result<Reminder> {
    let channel: String = row.get("channel")?;
    Ok(Reminder {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        user_id: row.get("user_id")?,
        remind_at: row.get("remind_at")?,
        channel: channel.parse().unwrap_or_default(),
        sent_at: row.get("sent_at")?,
        notified_at: row.get("notified_at")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_due_row(row: &Row) -> rusqlite::Result<DueReminder> {
    Ok(DueReminder {
        reminder: parse_reminder_row(row)?,
        task_title: row.get("task_title")?,
        username: row.get("username")?,
        email: row.get("email")?,
    })
}

const DUE_SELECT: &str = "SELECT r.*, t.title AS task_title, u.username, u.email
     FROM reminders r
     INNER JOIN tasks t ON r.task_id = t.id
     INNER JOIN users u ON r.user_id = u.id";

impl Database {
    pub fn create_reminder(
        &self,
        user_id: &str,
        task_id: &str,
        remind_at: i64,
        channel: ReminderChannel,
    ) -> Result<Reminder> {
        if remind_at <= 0 {
            return Err(ActionError::invalid_value("remind_at", "Reminder time is required").into());
        }

        let reminder = Reminder {
            id: new_id(),
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            remind_at,
            channel,
            sent_at: None,
            notified_at: None,
            created_at: now_ms(),
        };

        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            conn.execute(
                "INSERT INTO reminders (id, task_id, user_id, remind_at, channel, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    reminder.id,
                    reminder.task_id,
                    reminder.user_id,
                    reminder.remind_at,
                    reminder.channel.as_str(),
                    reminder.created_at,
                ],
            )?;
            Ok(())
        })?;

        debug!(reminder_id = %reminder.id, task_id = %task_id, "Reminder created");
        Ok(reminder)
    }

    pub fn list_task_reminders(&self, user_id: &str, task_id: &str) -> Result<Vec<Reminder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM reminders WHERE task_id = ?1 AND user_id = ?2 ORDER BY remind_at",
            )?;
            let reminders = stmt
                .query_map(params![task_id, user_id], parse_reminder_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(reminders)
        })
    }

    /// Reminders that have not fired yet on either channel.
    pub fn list_pending_reminders(&self, user_id: &str) -> Result<Vec<Reminder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM reminders
                 WHERE user_id = ?1 AND sent_at IS NULL AND notified_at IS NULL
                 ORDER BY remind_at",
            )?;
            let reminders = stmt
                .query_map(params![user_id], parse_reminder_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(reminders)
        })
    }

    pub fn delete_reminder(&self, user_id: &str, reminder_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM reminders WHERE id = ?1 AND user_id = ?2",
                params![reminder_id, user_id],
            )?;
            if deleted == 0 {
                return Err(ActionError::not_found("Reminder", reminder_id).into());
            }
            Ok(())
        })
    }

    /// Email reminders due at `now` and not sent yet, oldest first.
    /// Reminders on finished tasks are skipped.
    pub fn due_email_reminders(&self, now: i64, limit: u32) -> Result<Vec<DueReminder>> {
        let sql = format!(
            "{} WHERE r.channel = 'email' AND r.sent_at IS NULL AND r.remind_at <= ?1
               AND t.status != 'done'
             ORDER BY r.remind_at LIMIT ?2",
            DUE_SELECT
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let due = stmt
                .query_map(params![now, limit], parse_due_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(due)
        })
    }

    /// Record that an email reminder went out. Returns false if it was
    /// already marked.
    pub fn mark_reminder_sent(&self, reminder_id: &str, sent_at: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE reminders SET sent_at = ?1 WHERE id = ?2 AND sent_at IS NULL",
                params![sent_at, reminder_id],
            )?;
            Ok(updated == 1)
        })
    }

    /// Browser reminders due for `user_id`, each returned exactly once.
    ///
    /// The rows are stamped with `notified_at` in the same transaction, so a
    /// reload or a second tab does not show them again.
    pub fn take_due_notifications(&self, user_id: &str, now: i64) -> Result<Vec<DueReminder>> {
        let sql = format!(
            "{} WHERE r.user_id = ?1 AND r.channel = 'browser' AND r.notified_at IS NULL
               AND r.remind_at <= ?2 AND t.status != 'done'
             ORDER BY r.remind_at",
            DUE_SELECT
        );
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut due = {
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![user_id, now], parse_due_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            for item in &mut due {
                tx.execute(
                    "UPDATE reminders SET notified_at = ?1 WHERE id = ?2",
                    params![now, item.reminder.id],
                )?;
                item.reminder.notified_at = Some(now);
            }
            tx.commit()?;
            Ok(due)
        })
    }
}
