//! Admission for real-time connections.
//!
//! Resolves an upgrade request's credential to an internal user id. Every
//! failure is answered with `401 Unauthorized` and a plain-text reason, and
//! never touches the hub.

use axum::{
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::identity::{IdentityError, IdentityLookup, IdentityVerifier};

#[derive(Debug, thiserror::Error)]
pub enum GatewayRejection {
    #[error("Missing token")]
    MissingCredential,
    #[error("Invalid token")]
    InvalidCredential,
    #[error("User not found")]
    UnknownUser,
    #[error("Unable to resolve user")]
    LookupFailed,
}

impl IntoResponse for GatewayRejection {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Pick the credential from `?token=` first, then `Authorization: Bearer`.
pub fn credential_from_request(query_token: Option<String>, headers: &HeaderMap) -> Option<String> {
    query_token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers).map(str::to_string))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn authenticate<V, L>(
    verifier: &V,
    lookup: &L,
    credential: Option<&str>,
) -> Result<Uuid, GatewayRejection>
where
    V: IdentityVerifier + ?Sized,
    L: IdentityLookup,
{
    let raw = credential.ok_or(GatewayRejection::MissingCredential)?;

    let identity = verifier.verify(raw).map_err(|e| match e {
        IdentityError::Missing => GatewayRejection::MissingCredential,
        IdentityError::Invalid(reason) => {
            warn!(reason = %reason, "Rejected upgrade: invalid credential");
            GatewayRejection::InvalidCredential
        }
    })?;

    match lookup.resolve_internal_id(&identity.external_id).await {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => {
            warn!(external_id = %identity.external_id, "Rejected upgrade: unknown user");
            Err(GatewayRejection::UnknownUser)
        }
        Err(e) => {
            error!(external_id = %identity.external_id, "User lookup failed: {:#}", e);
            Err(GatewayRejection::LookupFailed)
        }
    }
}
