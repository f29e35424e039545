//! Identity: who is calling, and which internal user that is.
//!
//! Verification turns a raw bearer credential into an external identity.
//! Lookup maps that external identity to the internal user id the hub and
//! the store key on. Both sit behind traits so the gateway and handlers can
//! be exercised without a real token issuer.

use anyhow::Result;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::future::Future;
use uuid::Uuid;

use crate::config::AuthConfig;

/// A credential that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Stable identifier issued by the identity provider (`sub`).
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("missing credential")]
    Missing,
    #[error("invalid credential: {0}")]
    Invalid(String),
}

pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, raw: &str) -> Result<VerifiedIdentity, IdentityError>;
}

pub trait IdentityLookup: Send + Sync {
    /// `Ok(None)` when the identity is valid but has no user yet.
    fn resolve_internal_id(
        &self,
        external_id: &str,
    ) -> impl Future<Output = Result<Option<Uuid>>> + Send;
}

/// Claims accepted in bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// HS256 JWT verification with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // A configured claim must be present, not merely correct when present
        let mut required = vec!["exp", "sub"];
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match &config.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, raw: &str) -> Result<VerifiedIdentity, IdentityError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentityError::Missing);
        }

        let data = decode::<Claims>(raw, &self.key, &self.validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "token expired".to_string(),
                ErrorKind::InvalidIssuer => "unexpected issuer".to_string(),
                ErrorKind::InvalidAudience => "unexpected audience".to_string(),
                _ => e.to_string(),
            };
            IdentityError::Invalid(reason)
        })?;

        if data.claims.sub.is_empty() {
            return Err(IdentityError::Invalid("empty subject".into()));
        }

        Ok(VerifiedIdentity {
            external_id: data.claims.sub,
            email: data.claims.email,
            name: data.claims.name,
        })
    }
}

/// Mint a token the way the identity provider would. Test-only.
#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, sub: &str, ttl_secs: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let claims = Claims {
        sub: sub.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
        email: Some(format!("{}@example.com", sub)),
        name: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
