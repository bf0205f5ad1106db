//! Email subject/body rendering, keyed on the notification kind.

use crate::models::notification::{Notification, NotificationKind};

use super::parse::{extract_delimited, GENERIC_ACTIVITY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

/// Render `n` for email. Unknown kinds fall back to the title as subject and
/// the message as body.
pub fn render(n: &Notification, base_url: &str) -> RenderedMail {
    let activity = activity_name(n);
    let (subject, path) = match n.kind() {
        NotificationKind::JoinRequestApproved => (
            "Your join request was approved".to_string(),
            Some("participant/projects"),
        ),
        NotificationKind::JoinRequestDeclined => (
            "Your join request was declined".to_string(),
            Some("participant/projects"),
        ),
        NotificationKind::ProjectApproved => (
            "Your project proposal was approved".to_string(),
            Some("leader/projects"),
        ),
        NotificationKind::ProjectRejected => (
            "Your project proposal was not approved".to_string(),
            Some("leader/projects"),
        ),
        NotificationKind::ScheduleUpdated => (
            format!("Schedule updated: {}", activity),
            Some("participant/activities"),
        ),
        NotificationKind::AttendanceRecorded => (
            format!("Attendance recorded for {}", activity),
            Some("participant/activities"),
        ),
        NotificationKind::ActivityStartingSoon => (
            format!("Reminder: {} starts soon", activity),
            Some("participant/activities"),
        ),
        NotificationKind::ActivityStarted => (
            format!("{} has started", capitalize(&activity)),
            Some("participant/activities"),
        ),
        NotificationKind::ActivityEndingSoon => (
            format!("Reminder: {} ends soon", activity),
            Some("participant/activities"),
        ),
        NotificationKind::ActivityEnded => (
            format!("{} has ended", capitalize(&activity)),
            Some("participant/activities"),
        ),
        _ => (n.title.clone(), None),
    };

    let body = match path {
        Some(path) => format!("{}\n\nOpen the portal: {}", n.message, link(base_url, path)),
        None => n.message.clone(),
    };

    RenderedMail { subject, body }
}

/// Structured title first, then whatever sits between delimiters in the
/// message, then a generic phrase.
fn activity_name(n: &Notification) -> String {
    n.activity_title
        .clone()
        .or_else(|| extract_delimited(&n.message))
        .unwrap_or_else(|| GENERIC_ACTIVITY.to_string())
}

fn link(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
