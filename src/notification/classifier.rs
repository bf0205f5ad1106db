//! Audience rules: which notifications a viewer sees and which ones toast.
//!
//! The same predicates back the server-side list query and the client-side
//! live feed, so both paths always agree for a given (notification, viewer)
//! pair. Everything here is pure.

use std::collections::HashSet;

use crate::models::notification::{Notification, NotificationKind};
use crate::store::ListScope;

use super::parse::{extract_email, mentions_email, same_email};

/// Message prefix of attendance confirmations sent to a single participant.
const ATTENDANCE_MARKER: &str = "Your attendance for activity";

/// Titles that only concern leaders and administrators.
const PARTICIPANT_HIDDEN: &[NotificationKind] = &[
    NotificationKind::ProjectCreated,
    NotificationKind::JoinRequest,
    NotificationKind::ProjectApproved,
    NotificationKind::ActivityJoin,
];

const REMINDERS: &[NotificationKind] = &[
    NotificationKind::ActivityStartingSoon,
    NotificationKind::ActivityStarted,
    NotificationKind::ActivityEndingSoon,
    NotificationKind::ActivityEnded,
];

/// Stored and listed, but never toasted.
const TOAST_SUPPRESSED: &[NotificationKind] = &[NotificationKind::AttendanceRecorded];

/// Who is looking at the notification feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Admin,
    Leader {
        email: Option<String>,
        project_ids: HashSet<String>,
    },
    Participant {
        email: String,
    },
}

impl Viewer {
    pub fn leader<I>(email: Option<String>, project_ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Viewer::Leader {
            email,
            project_ids: project_ids.into_iter().collect(),
        }
    }

    pub fn participant(email: impl Into<String>) -> Self {
        Viewer::Participant {
            email: email.into(),
        }
    }

    /// Whether `n` belongs in this viewer's feed, judged on its own.
    pub fn is_relevant(&self, n: &Notification) -> bool {
        let kind = n.kind();
        match self {
            Viewer::Admin => !kind.is_reminder() && !is_attendance_message(n),
            Viewer::Leader { email, project_ids } => {
                if kind.is_reminder() || is_attendance_message(n) {
                    return false;
                }
                let owns_project = n
                    .project
                    .as_ref()
                    .is_some_and(|p| project_ids.contains(p));
                let addressed = match (email, &n.recipient_email) {
                    (Some(me), Some(to)) => same_email(me, to),
                    _ => false,
                };
                owns_project || addressed
            }
            Viewer::Participant { email } => {
                // reminders bypass every other participant rule
                if kind.is_reminder() {
                    return true;
                }
                if PARTICIPANT_HIDDEN.contains(&kind) {
                    return false;
                }
                mentions_email(&n.message, email)
                    || n.actor_email.as_deref().is_some_and(|a| same_email(a, email))
                    || (kind == NotificationKind::ScheduleUpdated
                        && n.recipient_email
                            .as_deref()
                            .is_some_and(|to| same_email(to, email)))
            }
        }
    }

    /// Relevant and allowed to raise a toast.
    pub fn should_toast(&self, n: &Notification) -> bool {
        self.is_relevant(n) && !TOAST_SUPPRESSED.contains(&n.kind())
    }

    /// The feed for this viewer, using `list` itself to resolve which join
    /// requests have already been answered.
    pub fn visible<'a>(&self, list: &'a [Notification]) -> Vec<&'a Notification> {
        self.visible_with(list, list)
    }

    /// Like [`Viewer::visible`], with join-request answers looked up in
    /// `responses` (which may come from outside the viewer's own scope).
    pub fn visible_with<'a>(
        &self,
        list: &'a [Notification],
        responses: &[Notification],
    ) -> Vec<&'a Notification> {
        list.iter()
            .filter(|n| self.is_relevant(n))
            .filter(|n| match self {
                Viewer::Participant { .. } => true,
                _ => n.kind() != NotificationKind::JoinRequest
                    || is_pending_join_request(n, responses),
            })
            .collect()
    }

    /// Store-level filter for this viewer's list query. Always a superset
    /// of what [`Viewer::is_relevant`] accepts, and exact for participants.
    pub fn scope(&self) -> ListScope {
        match self {
            Viewer::Admin => ListScope::All,
            Viewer::Leader { email, project_ids } => ListScope::Matching {
                recipient_email: email.clone(),
                project_ids: project_ids.iter().cloned().collect(),
                titles: Vec::new(),
            },
            Viewer::Participant { email } => ListScope::Participant {
                email: email.clone(),
                always_titles: titles(REMINDERS),
                hidden_titles: titles(PARTICIPANT_HIDDEN),
                recipient_titles: titles(&[NotificationKind::ScheduleUpdated]),
            },
        }
    }

    /// Scope holding the notifications that can answer a join request.
    pub fn response_scope() -> ListScope {
        ListScope::Matching {
            recipient_email: None,
            project_ids: Vec::new(),
            titles: titles(&[
                NotificationKind::JoinRequestApproved,
                NotificationKind::JoinRequestDeclined,
            ]),
        }
    }
}

fn titles(kinds: &[NotificationKind]) -> Vec<String> {
    kinds
        .iter()
        .filter_map(|k| k.title())
        .map(String::from)
        .collect()
}

fn is_attendance_message(n: &Notification) -> bool {
    n.message.contains(ATTENDANCE_MARKER)
}

/// Participant a join request or join response is about.
fn subject_email(n: &Notification) -> Option<String> {
    n.actor_email
        .clone()
        .or_else(|| extract_email(&n.message))
        .or_else(|| n.recipient_email.clone())
}

/// A join request stays pending until an approval or decline for the same
/// participant (and the same project, when both carry one) shows up at or
/// after the request's creation time.
pub fn is_pending_join_request(request: &Notification, responses: &[Notification]) -> bool {
    if request.kind() != NotificationKind::JoinRequest {
        return false;
    }
    let Some(requester) = subject_email(request) else {
        return true;
    };

    !responses.iter().any(|response| {
        response.kind().is_join_response()
            && response.created_at >= request.created_at
            && subject_email(response).is_some_and(|e| same_email(&e, &requester))
            && match (&response.project, &request.project) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn notif(title: &str, message: &str) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            project: None,
            recipient_email: None,
            actor_email: None,
            activity_title: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    fn leader() -> Viewer {
        Viewer::leader(Some("lead@x.com".into()), vec!["P1".to_string()])
    }

    #[test]
    fn test_participant_never_sees_leader_titles() {
        let me = Viewer::participant("p@x.com");
        let created = notif("New project created", "p@x.com created new project");
        assert!(!me.is_relevant(&created));
        let join = notif("Join request", "p@x.com wants to join");
        assert!(!me.is_relevant(&join));
    }

    #[test]
    fn test_participant_always_sees_reminders() {
        let me = Viewer::participant("p@x.com");
        assert!(me.is_relevant(&notif("Activity Started", "")));
        assert!(me.is_relevant(&notif("Activity Started", "someone-else@x.com only")));
        assert!(me.is_relevant(&notif("Activity Ending Soon", "Your activity [Cleanup] ends soon")));
    }

    #[test]
    fn test_participant_self_relevance_by_message() {
        let approved = notif(
            "Join request approved",
            "p@x.com - Your request to join \"Proj\" was approved.",
        );
        assert!(Viewer::participant("p@x.com").is_relevant(&approved));
        assert!(!Viewer::participant("q@x.com").is_relevant(&approved));
    }

    #[test]
    fn test_participant_schedule_update_uses_recipient_field() {
        let mut update = notif("Schedule updated", "The schedule of [Cleanup] changed");
        update.recipient_email = Some("p@x.com".into());
        assert!(Viewer::participant("p@x.com").is_relevant(&update));
        assert!(!Viewer::participant("q@x.com").is_relevant(&update));

        // the recipient field only counts for schedule updates
        let mut other = notif("Project rejected", "Your proposal was rejected");
        other.recipient_email = Some("p@x.com".into());
        assert!(!Viewer::participant("p@x.com").is_relevant(&other));
    }

    #[test]
    fn test_admin_excludes_reminders_and_attendance() {
        let admin = Viewer::Admin;
        assert!(!admin.is_relevant(&notif("Activity Starting Soon", "soon")));
        assert!(!admin.is_relevant(&notif(
            "Attendance recorded",
            "Your attendance for activity [Cleanup] was recorded"
        )));
        assert!(admin.is_relevant(&notif("New project created", "leader@x.com created new project")));
        assert!(admin.is_relevant(&notif("Join request", "p@x.com wants to join")));
    }

    #[test]
    fn test_leader_scope_by_project_or_recipient() {
        let mut own = notif("Join request", "p@x.com wants to join");
        own.project = Some("P1".into());
        let mut foreign = notif("Join request", "p@x.com wants to join");
        foreign.project = Some("P2".into());
        let mut addressed = notif("Project approved", "Your project was approved");
        addressed.recipient_email = Some("LEAD@x.com".into());

        assert!(leader().is_relevant(&own));
        assert!(!leader().is_relevant(&foreign));
        assert!(leader().is_relevant(&addressed));
    }

    #[test]
    fn test_toast_suppressed_for_attendance_kind() {
        let mut n = notif("Attendance recorded", "p@x.com checked in at [Cleanup]");
        n.actor_email = Some("p@x.com".into());
        let me = Viewer::participant("p@x.com");
        assert!(me.is_relevant(&n));
        assert!(!me.should_toast(&n));
    }

    #[test]
    fn test_join_request_pending_until_answered() {
        let mut request = notif("Join request", "p@x.com wants to join");
        request.project = Some("P1".into());
        assert!(is_pending_join_request(&request, &[]));

        let mut approval = notif(
            "Join request approved",
            "p@x.com - Your request to join \"Proj\" was approved.",
        );
        approval.recipient_email = Some("p@x.com".into());
        approval.created_at = request.created_at + Duration::seconds(5);
        assert!(!is_pending_join_request(&request, &[approval.clone()]));

        // an answer for someone else does not count
        let mut other = approval.clone();
        other.message = "q@x.com - Your request to join \"Proj\" was approved.".into();
        other.recipient_email = Some("q@x.com".into());
        assert!(is_pending_join_request(&request, &[other]));
    }

    #[test]
    fn test_join_response_for_other_project_does_not_answer() {
        let mut request = notif("Join request", "p@x.com wants to join");
        request.project = Some("P1".into());
        let mut decline = notif("Join request declined", "p@x.com - declined");
        decline.project = Some("P2".into());
        decline.created_at = request.created_at + Duration::seconds(1);
        assert!(is_pending_join_request(&request, &[decline]));
    }

    #[test]
    fn test_older_response_does_not_answer_new_request() {
        let mut old_decline = notif("Join request declined", "p@x.com - declined");
        old_decline.project = Some("P1".into());
        let mut request = notif("Join request", "p@x.com wants to join");
        request.project = Some("P1".into());
        request.created_at = old_decline.created_at + Duration::minutes(10);
        assert!(is_pending_join_request(&request, &[old_decline]));
    }

    #[test]
    fn test_visible_hides_answered_requests_for_leader_only() {
        let mut request = notif("Join request", "p@x.com wants to join");
        request.project = Some("P1".into());
        let mut approval = notif("Join request approved", "p@x.com - approved");
        approval.project = Some("P1".into());
        approval.created_at = request.created_at + Duration::seconds(1);
        let list = vec![approval.clone(), request.clone()];

        let seen: Vec<Uuid> = leader().visible(&list).iter().map(|n| n.id).collect();
        assert_eq!(seen, vec![approval.id]);
    }

    #[test]
    fn test_leader_without_projects_or_email_scopes_to_nothing() {
        let nobody = Viewer::leader(None, Vec::<String>::new());
        let mut n = notif("Join request", "p@x.com wants to join");
        n.project = Some("P1".into());
        assert!(!nobody.is_relevant(&n));
        assert!(!nobody.scope().matches(&n));
        assert!(Viewer::Admin.scope().matches(&n));
    }

    #[test]
    fn test_participant_scope_agrees_with_relevance() {
        let me = Viewer::participant("p@x.com");
        let scope = me.scope();

        let mut by_actor = notif("Attendance recorded", "checked in at [Cleanup]");
        by_actor.actor_email = Some("P@x.com".into());
        let mut schedule = notif("Schedule updated", "The schedule of [Cleanup] changed");
        schedule.recipient_email = Some("p@x.com".into());
        let mut misaddressed = notif("Project rejected", "Your proposal was rejected");
        misaddressed.recipient_email = Some("p@x.com".into());
        let samples = vec![
            notif("Activity Ended", "Your activity [Cleanup] has ended."),
            notif("Join request approved", "p@x.com - approved"),
            notif("Join request declined", "q@x.com - declined"),
            notif("Join request", "p@x.com wants to join"),
            notif("New project created", "p@x.com created new project"),
            notif("Something else", "hello P@X.COM"),
            by_actor,
            schedule,
            misaddressed,
        ];
        for n in &samples {
            assert_eq!(scope.matches(n), me.is_relevant(n), "disagreement on {:?}", n.title);
        }
    }
}
