//! Outbound notifications: email dispatch and the reminder poller.
//!
//! Email reminders are delivered at-least-once. A reminder is marked sent only
//! after the sender returns, so a crash in between can repeat it but a marked
//! reminder never goes out again.

use crate::config::RemindersConfig;
use crate::db::{Database, now_ms};
use crate::types::DueReminder;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivers email on behalf of the planner.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "Email dispatched"
        );
        Ok(())
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    /// Reminders whose owner has no email address. They are marked sent.
    pub skipped: usize,
}

fn reminder_email(due: &DueReminder, to: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: format!("Reminder: {}", due.task_title),
        body: format!(
            "Hi {},\n\nThis is your reminder for \"{}\".\n",
            due.username, due.task_title
        ),
    }
}

/// Send every email reminder due at `now`, up to `batch` of them.
///
/// A failed send leaves the reminder unmarked so the next pass retries it.
pub async fn dispatch_due_reminders(
    db: &Database,
    sender: &dyn EmailSender,
    now: i64,
    batch: u32,
) -> Result<DispatchSummary> {
    let due = db.due_email_reminders(now, batch)?;
    let mut summary = DispatchSummary::default();

    for item in &due {
        let reminder_id = &item.reminder.id;
        let Some(to) = item.email.as_deref().filter(|e| !e.trim().is_empty()) else {
            warn!(reminder_id = %reminder_id, user = %item.username, "No email address, dropping reminder");
            db.mark_reminder_sent(reminder_id, now)?;
            summary.skipped += 1;
            continue;
        };

        match sender.send(&reminder_email(item, to)).await {
            Ok(()) => {
                db.mark_reminder_sent(reminder_id, now)?;
                summary.sent += 1;
            }
            Err(e) => {
                warn!(reminder_id = %reminder_id, error = %e, "Failed to send reminder");
                summary.failed += 1;
            }
        }
    }

    if !due.is_empty() {
        info!(
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Reminder dispatch pass finished"
        );
    }
    Ok(summary)
}

/// Run [`dispatch_due_reminders`] on an interval until `shutdown` fires.
pub fn spawn_reminder_poller(
    db: Arc<Database>,
    sender: Arc<dyn EmailSender>,
    config: RemindersConfig,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    let period = Duration::from_secs(config.poll_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        info!(every_secs = period.as_secs(), "Reminder poller started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Polling for due reminders");
                    if let Err(e) =
                        dispatch_due_reminders(&db, sender.as_ref(), now_ms(), config.batch_size).await
                    {
                        warn!(error = %e, "Reminder dispatch failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("Reminder poller stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn log_sender_accepts_messages() {
        let message = EmailMessage {
            to: "a@example.com".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
        };
        assert!(LogEmailSender.send(&message).await.is_ok());
    }

    #[tokio::test]
    async fn empty_queue_sends_nothing() {
        let db = Database::open_in_memory().unwrap();
        let sender = RecordingSender::default();
        let summary = dispatch_due_reminders(&db, &sender, now_ms(), 10).await.unwrap();
        assert_eq!(summary, DispatchSummary::default());
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
