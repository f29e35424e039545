use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::AppState;
use crate::auth::AuthUser;
use crate::identity::VerifiedIdentity;
use crate::models::CreateUserRequest;

/// Provision the verified caller. Idempotent: an already provisioned caller
/// gets their existing record back.
pub async fn create_user_handler(
    State(state): State<AppState>,
    identity: VerifiedIdentity,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    let email = if req.email.is_empty() {
        identity.email.clone().unwrap_or_default()
    } else {
        req.email
    };

    match state
        .repository
        .create_user(&identity.external_id, &req.name, &email)
        .await
    {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => {
            error!("Failed to register user: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_current_user_handler(State(state): State<AppState>, user: AuthUser) -> Response {
    match state.repository.get_user(user.user_id).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to get user: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
