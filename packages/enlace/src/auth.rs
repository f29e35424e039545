//! Bearer authentication for the REST API.
//!
//! The middleware verifies the `Authorization: Bearer` token and stores the
//! resulting [`VerifiedIdentity`] in request extensions. Handlers then use
//! either `VerifiedIdentity` (caller may not be provisioned yet) or
//! [`AuthUser`] (caller must map to a stored user).

use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::AppState;
use crate::gateway::bearer_token;
use crate::identity::{IdentityError, VerifiedIdentity};

// =============================================================================
// Auth Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization header missing")]
    MissingHeader,
    #[error("Invalid token format")]
    InvalidFormat,
    #[error("Invalid authentication token")]
    InvalidToken,
    #[error("User not registered")]
    UnknownUser,
    #[error("Failed to resolve user")]
    Lookup(#[source] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::Lookup(e) => {
                error!("User lookup failed: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// =============================================================================
// Auth Middleware
// =============================================================================

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(raw) = request.headers().get(header::AUTHORIZATION) else {
        return AuthError::MissingHeader.into_response();
    };
    if raw.to_str().map_or(true, |v| !v.starts_with("Bearer ")) {
        return AuthError::InvalidFormat.into_response();
    }
    let Some(token) = bearer_token(request.headers()) else {
        return AuthError::InvalidFormat.into_response();
    };

    match state.verifier.verify(token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(IdentityError::Missing) => AuthError::InvalidFormat.into_response(),
        Err(IdentityError::Invalid(reason)) => {
            debug!(reason = %reason, "Rejected bearer token");
            AuthError::InvalidToken.into_response()
        }
    }
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// The verified caller, set by [`auth_middleware`].
impl<S> FromRequestParts<S> for VerifiedIdentity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VerifiedIdentity>()
            .cloned()
            .ok_or(AuthError::MissingHeader)
    }
}

/// A verified caller that is also a provisioned user.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub identity: VerifiedIdentity,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = VerifiedIdentity::from_request_parts(parts, state).await?;
        let user_id = state
            .repository
            .get_user_id_by_external_id(&identity.external_id)
            .await
            .map_err(AuthError::Lookup)?
            .ok_or(AuthError::UnknownUser)?;

        Ok(AuthUser { user_id, identity })
    }
}
