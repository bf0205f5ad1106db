//! In-process store, used when no database is configured and by tests.
//!
//! Records are kept in insertion order; timestamps are clamped so they never
//! go backwards, which keeps "newest first" identical to reverse insertion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ListScope, MarkedRead, NotificationStore, ProjectDirectory};
use crate::models::notification::{NewNotification, Notification};

#[derive(Clone, Default)]
pub struct MemoryStore(Arc<RwLock<Vec<Notification>>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let mut rows = self.0.write().await;
        let now = Utc::now();
        let created_at = match rows.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };
        let record = Notification {
            id: Uuid::new_v4(),
            title: new.title,
            message: new.message,
            project: new.project,
            recipient_email: new.recipient_email,
            actor_email: new.actor_email,
            activity_title: new.activity_title,
            is_read: false,
            created_at,
        };
        rows.push(record.clone());
        Ok(record)
    }

    async fn list(
        &self,
        scope: &ListScope,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = self.0.read().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|n| scope.matches(n))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: Uuid) -> anyhow::Result<Option<MarkedRead>> {
        let mut rows = self.0.write().await;
        Ok(rows.iter_mut().find(|n| n.id == id).map(|n| {
            let changed = !n.is_read;
            n.is_read = true;
            MarkedRead {
                notification: n.clone(),
                changed,
            }
        }))
    }

    async fn mark_all_read(&self, scope: &ListScope) -> anyhow::Result<Vec<Uuid>> {
        let mut rows = self.0.write().await;
        let mut changed = Vec::new();
        for n in rows.iter_mut().filter(|n| !n.is_read && scope.matches(n)) {
            n.is_read = true;
            changed.push(n.id);
        }
        Ok(changed)
    }
}

/// Fixed leader → projects mapping.
#[derive(Clone, Default)]
pub struct StaticDirectory(Arc<HashMap<String, Vec<String>>>);

impl StaticDirectory {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        Self(Arc::new(entries))
    }
}

#[async_trait]
impl ProjectDirectory for StaticDirectory {
    async fn projects_led_by(&self, leader_id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.0.get(leader_id).cloned().unwrap_or_default())
    }
}
