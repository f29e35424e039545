// Repository layer: each table group lives in its own file with `impl Repository`.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

mod notifications;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct Repository {
    pub(crate) pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Ids are stored as hyphenated TEXT.
fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid uuid in column {}: {}", column, raw))
}

fn parse_optional_uuid(raw: Option<String>, column: &str) -> Result<Option<Uuid>> {
    raw.as_deref().map(|r| parse_uuid(r, column)).transpose()
}
