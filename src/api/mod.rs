use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, patch, post},
    Router,
};

use crate::AppState;

pub mod handlers;

/// REST surface. Mounted at the root by [`crate::app`].
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/notifications",
            get(handlers::list_notifications).post(handlers::create_notification),
        )
        .route(
            "/notifications/unread",
            get(handlers::count_unread_notifications),
        )
        .route(
            "/notifications/mark-read-all",
            post(handlers::mark_all_notifications_read),
        )
        .route(
            "/notifications/:id/read",
            patch(handlers::mark_notification_read),
        )
        .route("/auth/online-users", get(handlers::online_users))
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
