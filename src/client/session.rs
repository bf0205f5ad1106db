//! Per-viewer notification state on the client.
//!
//! Reconciles the authoritative list (fetched on every connect) with the
//! broadcast tail. Broadcasts are "add if unseen": an id is only ever
//! added, and toasted, once for the lifetime of the session.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::notification::{Notification, NotificationKind};
use crate::notification::classifier::{is_pending_join_request, Viewer};

use super::ReadSync;

/// How long a toast stays fully visible.
pub const TOAST_VISIBLE_FOR: Duration = Duration::from_secs(5);
/// Length of the exit animation before the toast is gone.
pub const TOAST_EXIT_FOR: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: Uuid,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastState {
    Hidden,
    Visible { toast: Toast, until: Instant },
    Hiding { toast: Toast, until: Instant },
}

/// What happened to a broadcast notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Already in the session; nothing changed.
    Duplicate,
    /// Not for this viewer. Remembered so it is not reconsidered.
    Irrelevant,
    /// Added to the feed without a toast.
    Added,
    /// Added and toasted.
    Toasted,
}

pub struct NotificationSession {
    viewer: Viewer,
    /// newest first
    items: Vec<Notification>,
    seen: HashSet<Uuid>,
    /// client-side reminders; kept across hydrates, never synced
    local: HashSet<Uuid>,
    last_toasted: Option<Uuid>,
    toast: ToastState,
    sync: Option<Arc<dyn ReadSync>>,
}

impl NotificationSession {
    pub fn new(viewer: Viewer) -> Self {
        Self {
            viewer,
            items: Vec::new(),
            seen: HashSet::new(),
            local: HashSet::new(),
            last_toasted: None,
            toast: ToastState::Hidden,
            sync: None,
        }
    }

    /// Push read changes to the server through `sync`.
    pub fn with_sync(mut self, sync: Arc<dyn ReadSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Replace server state with an authoritative list, keeping reminders
    /// raised on this client. Never toasts.
    pub fn hydrate(&mut self, list: Vec<Notification>) {
        self.seen.extend(list.iter().map(|n| n.id));
        let mut items: Vec<Notification> = self
            .viewer
            .visible(&list)
            .into_iter()
            .cloned()
            .collect();
        items.extend(
            self.items
                .iter()
                .filter(|n| self.local.contains(&n.id))
                .cloned(),
        );
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!(count = items.len(), "session hydrated");
        self.items = items;
    }

    /// Apply a `notification:new` broadcast received at `now`.
    pub fn on_broadcast(&mut self, n: Notification, now: Instant) -> Arrival {
        if !self.seen.insert(n.id) {
            return Arrival::Duplicate;
        }

        // an answer settles a pending request even when the answer itself
        // is outside this feed
        if n.kind().is_join_response() && !matches!(self.viewer, Viewer::Participant { .. }) {
            let answer = std::slice::from_ref(&n);
            self.items.retain(|item| {
                item.kind() != NotificationKind::JoinRequest
                    || is_pending_join_request(item, answer)
            });
        }

        if !self.viewer.is_relevant(&n) {
            return Arrival::Irrelevant;
        }

        let toast = self.viewer.should_toast(&n) && self.last_toasted != Some(n.id);
        let pos = self
            .items
            .iter()
            .position(|item| item.created_at <= n.created_at)
            .unwrap_or(self.items.len());

        if toast {
            self.last_toasted = Some(n.id);
            self.toast = ToastState::Visible {
                toast: Toast {
                    id: n.id,
                    title: n.title.clone(),
                    message: n.message.clone(),
                },
                until: now + TOAST_VISIBLE_FOR,
            };
        }
        self.items.insert(pos, n);

        if toast {
            Arrival::Toasted
        } else {
            Arrival::Added
        }
    }

    /// Raise a notification produced on this client, such as a fired
    /// [`Reminder`](super::reminders::Reminder).
    pub fn on_local(&mut self, n: Notification, now: Instant) -> Arrival {
        self.local.insert(n.id);
        self.on_broadcast(n, now)
    }

    /// Apply a `notification:read` broadcast.
    pub fn on_read(&mut self, ids: &[Uuid]) {
        for item in self.items.iter_mut().filter(|n| ids.contains(&n.id)) {
            item.is_read = true;
        }
    }

    /// Optimistically mark one notification read. Returns whether it changed.
    pub fn mark_read(&mut self, id: Uuid) -> bool {
        let Some(item) = self.items.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if item.is_read {
            return false;
        }
        item.is_read = true;
        if self.local.contains(&id) {
            return true;
        }

        if let Some(sync) = self.sync.clone() {
            tokio::spawn(async move {
                if let Err(e) = sync.mark_read(id).await {
                    warn!(%id, "failed to sync read state: {:#}", e);
                }
            });
        }
        true
    }

    /// Optimistically mark the whole feed read. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for item in self.items.iter_mut().filter(|n| !n.is_read) {
            item.is_read = true;
            changed += 1;
        }

        if let Some(sync) = self.sync.clone() {
            tokio::spawn(async move {
                if let Err(e) = sync.mark_all_read().await {
                    warn!("failed to sync read-all: {:#}", e);
                }
            });
        }
        changed
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.items.iter().any(|n| n.id == id)
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.is_read).count()
    }

    pub fn toast(&self) -> &ToastState {
        &self.toast
    }

    /// Start the exit animation early (user closed the toast).
    pub fn dismiss_toast(&mut self, now: Instant) {
        if let ToastState::Visible { toast, .. } = &self.toast {
            self.toast = ToastState::Hiding {
                toast: toast.clone(),
                until: now + TOAST_EXIT_FOR,
            };
        }
    }

    /// Advance the toast timers to `now`.
    pub fn tick(&mut self, now: Instant) {
        loop {
            self.toast = match &self.toast {
                ToastState::Visible { toast, until } if now >= *until => ToastState::Hiding {
                    toast: toast.clone(),
                    until: *until + TOAST_EXIT_FOR,
                },
                ToastState::Hiding { until, .. } if now >= *until => ToastState::Hidden,
                _ => return,
            };
        }
    }
}
