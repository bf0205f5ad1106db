//! Activity reminders computed on the client.
//!
//! For each activity four reminders are derived from its absolute start and
//! end times: shortly before start, at start, shortly before end, and at
//! end. Only reminders still in the future get a timer. Rescheduling cancels
//! every pending timer first, and dropping the scheduler cancels them too.
//! Nothing here is durable: reminders only fire while the client runs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::models::notification::{Notification, NotificationKind};
use crate::notification::parse::extract_delimited;

/// Minutes ahead of start and end at which the "soon" reminders fire.
pub const LEAD_MINUTES: i64 = 15;

fn lead_time() -> chrono::Duration {
    chrono::Duration::minutes(LEAD_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledActivity {
    pub id: String,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub activity_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub due_at: DateTime<Utc>,
}

impl Reminder {
    /// Local notification for the session feed. The activity title is
    /// bracketed in the message so downstream extraction finds it.
    pub fn to_notification(&self) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            title: self.title.clone(),
            message: self.message.clone(),
            project: None,
            recipient_email: None,
            actor_email: None,
            activity_title: extract_delimited(&self.message),
            is_read: false,
            created_at: self.due_at,
        }
    }
}

fn reminder(activity: &ScheduledActivity, kind: NotificationKind, due_at: DateTime<Utc>) -> Option<Reminder> {
    let name = &activity.title;
    let message = match kind {
        NotificationKind::ActivityStartingSoon => {
            format!("Your activity [{}] starts in {} minutes.", name, LEAD_MINUTES)
        }
        NotificationKind::ActivityStarted => format!("Your activity [{}] has started.", name),
        NotificationKind::ActivityEndingSoon => {
            format!("Your activity [{}] ends in {} minutes.", name, LEAD_MINUTES)
        }
        NotificationKind::ActivityEnded => format!("Your activity [{}] has ended.", name),
        _ => return None,
    };
    Some(Reminder {
        activity_id: activity.id.clone(),
        kind,
        title: kind.title()?.to_string(),
        message,
        due_at,
    })
}

/// Every reminder for `activities` that is still due after `now`, soonest
/// first.
pub fn plan(activities: &[ScheduledActivity], now: DateTime<Utc>) -> Vec<Reminder> {
    let mut reminders: Vec<Reminder> = activities
        .iter()
        .filter(|a| a.ends_at >= a.starts_at)
        .flat_map(|a| {
            [
                (NotificationKind::ActivityStartingSoon, a.starts_at - lead_time()),
                (NotificationKind::ActivityStarted, a.starts_at),
                (NotificationKind::ActivityEndingSoon, a.ends_at - lead_time()),
                (NotificationKind::ActivityEnded, a.ends_at),
            ]
            .into_iter()
            .filter(|(_, due)| *due > now)
            .filter_map(move |(kind, due)| reminder(a, kind, due))
        })
        .collect();
    reminders.sort_by(|a, b| a.due_at.cmp(&b.due_at));
    reminders
}

pub struct ReminderScheduler {
    tx: mpsc::UnboundedSender<Reminder>,
    timers: Vec<JoinHandle<()>>,
}

impl ReminderScheduler {
    pub fn new(tx: mpsc::UnboundedSender<Reminder>) -> Self {
        Self {
            tx,
            timers: Vec::new(),
        }
    }

    /// Replace all pending timers with ones for `activities`. Returns how
    /// many timers were started.
    pub fn schedule(&mut self, activities: &[ScheduledActivity], now: DateTime<Utc>) -> usize {
        self.cancel();
        for r in plan(activities, now) {
            let delay = (r.due_at - now).to_std().unwrap_or_default();
            let tx = self.tx.clone();
            self.timers.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                debug!(activity_id = %r.activity_id, title = %r.title, "reminder due");
                let _ = tx.send(r);
            }));
        }
        self.timers.len()
    }

    pub fn cancel(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    /// Timers that have not fired yet.
    pub fn pending(&self) -> usize {
        self.timers.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
