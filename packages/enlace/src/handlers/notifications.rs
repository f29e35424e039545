use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthUser;
use crate::services::ServiceError;

pub async fn list_notifications_handler(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let notifications = state.notifications.list_for_user(user.user_id).await?;
    Ok(Json(notifications))
}

pub async fn mark_notification_read_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.notifications.mark_as_read(user.user_id, id).await?;
    state.metrics.notification_read();
    Ok((StatusCode::OK, "Notification Read"))
}
