use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use super::{ListScope, MarkedRead, NotificationStore, ProjectDirectory};
use crate::models::notification::{NewNotification, Notification};

const NOTIFICATION_COLUMNS: &str =
    "id, title, message, project, recipient_email, actor_email, activity_title, is_read, created_at";

/// Scope predicate shared by list and bulk update. `$1` admits everything,
/// `$2`..`$4` are the OR-ed recipient / project / title criteria and `$5`..`$8`
/// describe a participant feed (`$5` empty when unused).
const SCOPE_PREDICATE: &str = r#"($1
    OR lower(recipient_email) = lower($2)
    OR project = ANY($3)
    OR title = ANY($4)
    OR ($5 <> '' AND (
        title = ANY($6)
        OR (title <> ALL($7) AND (
            lower(actor_email) = lower($5)
            OR strpos(lower(message), lower($5)) > 0
            OR (title = ANY($8) AND lower(recipient_email) = lower($5))
        ))
    )))"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(Default)]
struct ScopeBinds {
    all: bool,
    recipient_email: Option<String>,
    project_ids: Vec<String>,
    titles: Vec<String>,
    participant_email: String,
    always_titles: Vec<String>,
    hidden_titles: Vec<String>,
    recipient_titles: Vec<String>,
}

impl From<&ListScope> for ScopeBinds {
    fn from(scope: &ListScope) -> Self {
        match scope {
            ListScope::All => Self {
                all: true,
                ..Default::default()
            },
            ListScope::Matching {
                recipient_email,
                project_ids,
                titles,
            } => Self {
                recipient_email: recipient_email.clone(),
                project_ids: project_ids.clone(),
                titles: titles.clone(),
                ..Default::default()
            },
            ListScope::Participant {
                email,
                always_titles,
                hidden_titles,
                recipient_titles,
            } => Self {
                participant_email: email.trim().to_string(),
                always_titles: always_titles.clone(),
                hidden_titles: hidden_titles.clone(),
                recipient_titles: recipient_titles.clone(),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"INSERT INTO notifications (title, message, project, recipient_email, actor_email, activity_title)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {}"#,
            NOTIFICATION_COLUMNS
        ))
        .bind(&new.title)
        .bind(&new.message)
        .bind(&new.project)
        .bind(&new.recipient_email)
        .bind(&new.actor_email)
        .bind(&new.activity_title)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(
        &self,
        scope: &ListScope,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<Notification>> {
        let binds = ScopeBinds::from(scope);
        let rows = sqlx::query_as::<_, Notification>(&format!(
            r#"SELECT {}
               FROM notifications
               WHERE {}
               ORDER BY created_at DESC, seq DESC
               LIMIT $9 OFFSET $10"#,
            NOTIFICATION_COLUMNS, SCOPE_PREDICATE
        ))
        .bind(binds.all)
        .bind(binds.recipient_email)
        .bind(binds.project_ids)
        .bind(binds.titles)
        .bind(binds.participant_email)
        .bind(binds.always_titles)
        .bind(binds.hidden_titles)
        .bind(binds.recipient_titles)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_read(&self, id: Uuid) -> anyhow::Result<Option<MarkedRead>> {
        let row = sqlx::query(
            r#"WITH prev AS (
                   SELECT id, is_read AS was_read FROM notifications WHERE id = $1 FOR UPDATE
               )
               UPDATE notifications n SET is_read = true
               FROM prev
               WHERE n.id = prev.id
               RETURNING n.id, n.title, n.message, n.project, n.recipient_email, n.actor_email,
                         n.activity_title, n.is_read, n.created_at, NOT prev.was_read AS changed"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(MarkedRead {
                notification: Notification::from_row(&row)?,
                changed: row.try_get("changed")?,
            })),
            None => Ok(None),
        }
    }

    async fn mark_all_read(&self, scope: &ListScope) -> anyhow::Result<Vec<Uuid>> {
        let binds = ScopeBinds::from(scope);
        let ids = sqlx::query_scalar::<_, Uuid>(&format!(
            r#"UPDATE notifications SET is_read = true
               WHERE is_read = false AND {}
               RETURNING id"#,
            SCOPE_PREDICATE
        ))
        .bind(binds.all)
        .bind(binds.recipient_email)
        .bind(binds.project_ids)
        .bind(binds.titles)
        .bind(binds.participant_email)
        .bind(binds.always_titles)
        .bind(binds.hidden_titles)
        .bind(binds.recipient_titles)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ProjectDirectory for PgStore {
    async fn projects_led_by(&self, leader_id: &str) -> anyhow::Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM projects WHERE leader_id = $1 ORDER BY id",
        )
        .bind(leader_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
