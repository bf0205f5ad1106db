pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::notification::{NewNotification, Notification};
use crate::notification::parse::{mentions_email, same_email};

/// Which notifications a list or bulk update touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    /// No restriction (administrator view).
    All,
    /// Records matching ANY of the given criteria. Empty criteria match nothing.
    Matching {
        recipient_email: Option<String>,
        project_ids: Vec<String>,
        titles: Vec<String>,
    },
    /// A participant's feed: everything under `always_titles`, plus records
    /// outside `hidden_titles` that name `email` as actor, mention it in the
    /// message, or address it as recipient under one of `recipient_titles`.
    Participant {
        email: String,
        always_titles: Vec<String>,
        hidden_titles: Vec<String>,
        recipient_titles: Vec<String>,
    },
}

impl ListScope {
    pub fn matches(&self, n: &Notification) -> bool {
        match self {
            ListScope::All => true,
            ListScope::Matching {
                recipient_email,
                project_ids,
                titles,
            } => {
                let by_recipient = match (recipient_email, &n.recipient_email) {
                    (Some(want), Some(have)) => same_email(want, have),
                    _ => false,
                };
                let by_project = n.project.as_ref().is_some_and(|p| project_ids.contains(p));
                let by_title = titles.iter().any(|t| t == &n.title);
                by_recipient || by_project || by_title
            }
            ListScope::Participant {
                email,
                always_titles,
                hidden_titles,
                recipient_titles,
            } => {
                if has_title(always_titles, n) {
                    return true;
                }
                if email.trim().is_empty() || has_title(hidden_titles, n) {
                    return false;
                }
                n.actor_email.as_deref().is_some_and(|a| same_email(a, email))
                    || mentions_email(&n.message, email)
                    || (has_title(recipient_titles, n)
                        && n.recipient_email
                            .as_deref()
                            .is_some_and(|to| same_email(to, email)))
            }
        }
    }
}

fn has_title(titles: &[String], n: &Notification) -> bool {
    titles.iter().any(|t| t == &n.title)
}

/// Outcome of marking a single notification read.
#[derive(Debug, Clone)]
pub struct MarkedRead {
    pub notification: Notification,
    /// False when it was already read.
    pub changed: bool,
}

/// Durable notification records.
/// Implementations: PgStore (Postgres), MemoryStore (in-process).
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a record, assigning its id and creation time.
    async fn insert(&self, new: NewNotification) -> anyhow::Result<Notification>;

    /// Newest first: skip `offset` matching records, then return at most
    /// `limit`.
    async fn list(
        &self,
        scope: &ListScope,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<Notification>>;

    /// `None` when the id is unknown.
    async fn mark_read(&self, id: Uuid) -> anyhow::Result<Option<MarkedRead>>;

    /// Returns the ids that went from unread to read.
    async fn mark_all_read(&self, scope: &ListScope) -> anyhow::Result<Vec<Uuid>>;
}

/// Lookup of the projects a leader owns. The project schema lives outside
/// this service.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn projects_led_by(&self, leader_id: &str) -> anyhow::Result<Vec<String>>;
}
