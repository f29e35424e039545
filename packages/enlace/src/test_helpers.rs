use std::sync::Arc;

use crate::AppState;
use crate::config::{AuthConfig, HubFileConfig, PushConfig};
use crate::db::Database;
use crate::identity::{JwtVerifier, issue_test_token};
use crate::models::User;

pub const TEST_SECRET: &str = "enlace-test-secret";

/// Build a fully-wired `AppState` backed by an in-memory SQLite database,
/// a live hub and a JWT verifier keyed with [`TEST_SECRET`].
pub async fn test_app_state() -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    let verifier = JwtVerifier::new(&AuthConfig {
        jwt_secret: TEST_SECRET.into(),
        issuer: None,
        audience: None,
    });

    AppState::new(
        Database { pool },
        Arc::new(verifier),
        &PushConfig::from_file(&HubFileConfig::default()),
    )
}

/// `Authorization` header value for a caller with the given subject.
pub fn bearer(sub: &str) -> String {
    format!("Bearer {}", issue_test_token(TEST_SECRET, sub, 3600))
}

/// Provision a user whose external id is `sub`.
pub async fn create_test_user(state: &AppState, sub: &str) -> User {
    state
        .repository
        .create_user(sub, sub, &format!("{}@example.com", sub))
        .await
        .unwrap()
}
