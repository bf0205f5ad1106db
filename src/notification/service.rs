//! Create → broadcast → email orchestration, plus the read-side queries.
//!
//! The store write is the only step that can fail a request. Once it
//! succeeds the broadcast and the email are fired without waiting on them,
//! and nothing they do can undo the record or change the response.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::event::{ReadPayload, ServerEvent};
use crate::models::notification::{NewNotification, Notification, NotificationKind};
use crate::realtime::broadcast::Broadcaster;
use crate::store::{NotificationStore, ProjectDirectory};

use super::classifier::Viewer;
use super::email::EmailChannel;
use super::parse::{extract_delimited, extract_email};
use super::templates;

/// Page size of every list response.
pub const PAGE_SIZE: usize = 50;

/// Stored records fetched per round while filling a page.
const SCAN_BATCH: usize = 200;

/// Body of `POST /notifications`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotification {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_title: Option<String>,
}

impl CreateNotification {
    /// Trim and validate, resolving the structured fields from the message
    /// when the caller did not supply them.
    pub fn validate(self) -> Result<NewNotification, AppError> {
        let title = self.title.trim().to_string();
        let message = self.message.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("title must not be empty".into()));
        }
        if message.is_empty() {
            return Err(AppError::Validation("message must not be empty".into()));
        }

        let kind = NotificationKind::from_title(&title);
        let actor_email = clean(self.actor_email)
            .map(|e| e.to_ascii_lowercase())
            .or_else(|| extract_email(&message));
        let activity_title = clean(self.activity_title).or_else(|| {
            if concerns_activity(kind) {
                extract_delimited(&message)
            } else {
                None
            }
        });

        Ok(NewNotification {
            title,
            message,
            project: clean(self.project),
            recipient_email: clean(self.recipient_email),
            actor_email,
            activity_title,
        })
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn concerns_activity(kind: NotificationKind) -> bool {
    kind.is_reminder()
        || matches!(
            kind,
            NotificationKind::ScheduleUpdated
                | NotificationKind::AttendanceRecorded
                | NotificationKind::ActivityJoin
        )
}

/// Query parameters that select a viewer for list / mark-all / count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_email: Option<String>,
}

impl Audience {
    fn is_leader(&self) -> bool {
        self.leader_id.is_some() || self.leader_email.is_some()
    }
}

#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn ProjectDirectory>,
    broadcaster: Broadcaster,
    email: EmailChannel,
    base_url: String,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn ProjectDirectory>,
        broadcaster: Broadcaster,
        email: EmailChannel,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            broadcaster,
            email,
            base_url: base_url.into(),
        }
    }

    pub async fn create(&self, req: CreateNotification) -> Result<Notification, AppError> {
        let new = req.validate()?;
        let record = self.store.insert(new).await?;
        info!(id = %record.id, title = %record.title, project = ?record.project, "notification created");

        self.broadcaster.publish_notification(&record);

        if let Some(to) = &record.recipient_email {
            let mail = templates::render(&record, &self.base_url);
            self.email.dispatch(to.clone(), mail.subject, mail.body);
        }

        Ok(record)
    }

    /// Turn request parameters into a viewer. Leader parameters win over a
    /// participant email; no parameters means the administrator view.
    pub async fn resolve_viewer(&self, audience: &Audience) -> Result<Viewer, AppError> {
        if audience.is_leader() {
            let projects = match &audience.leader_id {
                Some(id) => self.directory.projects_led_by(id).await?,
                None => Vec::new(),
            };
            debug!(leader_id = ?audience.leader_id, projects = projects.len(), "resolved leader projects");
            return Ok(Viewer::leader(clean(audience.leader_email.clone()), projects));
        }
        match clean(audience.participant_email.clone()) {
            Some(email) => Ok(Viewer::participant(email)),
            None => Ok(Viewer::Admin),
        }
    }

    /// The viewer's feed: newest first, at most [`PAGE_SIZE`].
    ///
    /// The store narrows by scope; audience rules and join-request answers
    /// are applied per batch until a full page is visible or the scope runs
    /// out.
    pub async fn list(&self, viewer: &Viewer) -> Result<Vec<Notification>, AppError> {
        let scope = viewer.scope();
        let mut answers = JoinAnswers::default();
        let mut seen = HashSet::new();
        let mut page = Vec::new();
        let mut offset = 0;

        loop {
            let batch = self.store.list(&scope, offset, SCAN_BATCH).await?;
            offset += batch.len();
            let exhausted = batch.len() < SCAN_BATCH;

            if !matches!(viewer, Viewer::Participant { .. }) {
                let oldest_request = batch
                    .iter()
                    .filter(|n| n.kind() == NotificationKind::JoinRequest)
                    .map(|n| n.created_at)
                    .min();
                if let Some(since) = oldest_request {
                    answers.reach_back(self.store.as_ref(), since).await?;
                }
            }

            // a concurrent insert shifts offsets by one; skip the repeat
            let fresh: Vec<Notification> =
                batch.into_iter().filter(|n| seen.insert(n.id)).collect();
            page.extend(viewer.visible_with(&fresh, &answers.items).into_iter().cloned());

            if page.len() >= PAGE_SIZE || exhausted {
                break;
            }
        }

        page.truncate(PAGE_SIZE);
        Ok(page)
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<Notification, AppError> {
        let marked = self.store.mark_read(id).await?.ok_or(AppError::NotFound(id))?;
        if marked.changed {
            self.broadcaster
                .publish(ServerEvent::NotificationRead(ReadPayload { ids: vec![id] }));
        }
        Ok(marked.notification)
    }

    /// Mark everything in the viewer's scope read. Returns how many changed.
    pub async fn mark_all_read(&self, viewer: &Viewer) -> Result<usize, AppError> {
        let ids = self.store.mark_all_read(&viewer.scope()).await?;
        if !ids.is_empty() {
            info!(count = ids.len(), "notifications marked read");
            self.broadcaster
                .publish(ServerEvent::NotificationRead(ReadPayload { ids: ids.clone() }));
        }
        Ok(ids.len())
    }

    pub async fn count_unread(&self, viewer: &Viewer) -> Result<usize, AppError> {
        Ok(self.list(viewer).await?.iter().filter(|n| !n.is_read).count())
    }
}

/// Join-request answers loaded newest first, as far back as needed.
#[derive(Default)]
struct JoinAnswers {
    items: Vec<Notification>,
    offset: usize,
    exhausted: bool,
}

impl JoinAnswers {
    /// Load answers until every one created at or after `since` is present.
    async fn reach_back(
        &mut self,
        store: &dyn NotificationStore,
        since: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let scope = Viewer::response_scope();
        while !self.exhausted && self.items.last().map_or(true, |n| n.created_at >= since) {
            let batch = store.list(&scope, self.offset, SCAN_BATCH).await?;
            self.offset += batch.len();
            self.exhausted = batch.len() < SCAN_BATCH;
            self.items.extend(batch);
        }
        Ok(())
    }
}
