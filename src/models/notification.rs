use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub project: Option<String>,
    pub recipient_email: Option<String>,
    /// Participant the notification is about, resolved once at creation.
    pub actor_email: Option<String>,
    pub activity_title: Option<String>,
    #[serde(rename = "read")]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        NotificationKind::from_title(&self.title)
    }
}

/// A validated notification that has not been persisted yet.
#[derive(Debug, Clone, Default)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    pub project: Option<String>,
    pub recipient_email: Option<String>,
    pub actor_email: Option<String>,
    pub activity_title: Option<String>,
}

/// Event type carried by a notification's `title`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    ProjectCreated,
    ProjectApproved,
    ProjectRejected,
    JoinRequest,
    JoinRequestApproved,
    JoinRequestDeclined,
    ActivityJoin,
    ScheduleUpdated,
    AttendanceRecorded,
    ActivityStartingSoon,
    ActivityStarted,
    ActivityEndingSoon,
    ActivityEnded,
    Other,
}

impl NotificationKind {
    const TITLES: &'static [(NotificationKind, &'static str)] = &[
        (NotificationKind::ProjectCreated, "New project created"),
        (NotificationKind::ProjectApproved, "Project approved"),
        (NotificationKind::ProjectRejected, "Project rejected"),
        (NotificationKind::JoinRequest, "Join request"),
        (NotificationKind::JoinRequestApproved, "Join request approved"),
        (NotificationKind::JoinRequestDeclined, "Join request declined"),
        (NotificationKind::ActivityJoin, "Activity join"),
        (NotificationKind::ScheduleUpdated, "Schedule updated"),
        (NotificationKind::AttendanceRecorded, "Attendance recorded"),
        (NotificationKind::ActivityStartingSoon, "Activity Starting Soon"),
        (NotificationKind::ActivityStarted, "Activity Started"),
        (NotificationKind::ActivityEndingSoon, "Activity Ending Soon"),
        (NotificationKind::ActivityEnded, "Activity Ended"),
    ];

    /// Exact (trimmed) title match; anything unknown is `Other`.
    pub fn from_title(title: &str) -> Self {
        let title = title.trim();
        Self::TITLES
            .iter()
            .find(|(_, t)| *t == title)
            .map(|(kind, _)| *kind)
            .unwrap_or(NotificationKind::Other)
    }

    pub fn title(self) -> Option<&'static str> {
        Self::TITLES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, t)| *t)
    }

    /// Participant-facing activity reminders.
    pub fn is_reminder(self) -> bool {
        matches!(
            self,
            NotificationKind::ActivityStartingSoon
                | NotificationKind::ActivityStarted
                | NotificationKind::ActivityEndingSoon
                | NotificationKind::ActivityEnded
        )
    }

    /// A leader's answer to a join request.
    pub fn is_join_response(self) -> bool {
        matches!(
            self,
            NotificationKind::JoinRequestApproved | NotificationKind::JoinRequestDeclined
        )
    }
}

/// Wire form of a notification on the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_title: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl From<&Notification> for NotificationPayload {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            title: n.title.clone(),
            message: n.message.clone(),
            project_id: n.project.clone(),
            recipient_email: n.recipient_email.clone(),
            actor_email: n.actor_email.clone(),
            activity_title: n.activity_title.clone(),
            timestamp: n.created_at,
            read: n.is_read,
        }
    }
}

impl From<NotificationPayload> for Notification {
    fn from(p: NotificationPayload) -> Self {
        Self {
            id: p.id,
            title: p.title,
            message: p.message,
            project: p.project_id,
            recipient_email: p.recipient_email,
            actor_email: p.actor_email,
            activity_title: p.activity_title,
            is_read: p.read,
            created_at: p.timestamp,
        }
    }
}
