use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::info;
use uuid::Uuid;

use crate::identity::IdentityLookup;
use crate::models::User;

use super::{Repository, parse_uuid};

fn user_from_row(r: &SqliteRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(r.get("id"), "users.id")?,
        external_id: r.get("external_id"),
        name: r.get("name"),
        email: r.get("email"),
        created_at: r.get("created_at"),
    })
}

impl Repository {
    /// Provision a user for an external identity. Calling again with the same
    /// external id returns the existing row unchanged.
    pub async fn create_user(&self, external_id: &str, name: &str, email: &str) -> Result<User> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, external_id, name, email, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(external_id)
        .bind(name)
        .bind(email)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to create user")?;

        if result.rows_affected() > 0 {
            info!(external_id = %external_id, "User created");
        }

        self.get_user_by_external_id(external_id)
            .await?
            .context("User missing after insert")
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, external_id, name, email, created_at FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, external_id, name, email, created_at FROM users WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_user_id_by_external_id(&self, external_id: &str) -> Result<Option<Uuid>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up user id")?;

        id.as_deref().map(|id| parse_uuid(id, "users.id")).transpose()
    }
}

impl IdentityLookup for Repository {
    async fn resolve_internal_id(&self, external_id: &str) -> Result<Option<Uuid>> {
        self.get_user_id_by_external_id(external_id).await
    }
}
