use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::notification::Notification;
use crate::notification::service::{Audience, CreateNotification};
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersResponse {
    pub user_ids: Vec<String>,
}

/// GET /notifications: the caller's feed, newest first
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(audience): Query<Audience>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let viewer = state.notifications.resolve_viewer(&audience).await?;
    Ok(Json(state.notifications.list(&viewer).await?))
}

/// POST /notifications: create, broadcast, email
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateNotification>,
) -> Result<impl IntoResponse, AppError> {
    let created = state.notifications.create(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.notifications.mark_read(id).await?))
}

/// POST /notifications/mark-read-all
pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    Query(audience): Query<Audience>,
) -> Result<Json<serde_json::Value>, AppError> {
    let viewer = state.notifications.resolve_viewer(&audience).await?;
    let updated = state.notifications.mark_all_read(&viewer).await?;
    Ok(Json(json!({ "success": true, "updated": updated })))
}

/// GET /notifications/unread
pub async fn count_unread_notifications(
    State(state): State<Arc<AppState>>,
    Query(audience): Query<Audience>,
) -> Result<Json<serde_json::Value>, AppError> {
    let viewer = state.notifications.resolve_viewer(&audience).await?;
    let count = state.notifications.count_unread(&viewer).await?;
    Ok(Json(json!({ "count": count })))
}

/// GET /auth/online-users
pub async fn online_users(State(state): State<Arc<AppState>>) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        user_ids: state.presence.list_online(),
    })
}
