use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use enlace_hub::{NotificationKind, NotificationStatus};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::models::{CreateNotification, Notification};

use super::{Repository, parse_optional_uuid, parse_uuid};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, content, related_project_id, related_task_id, status, created_at";

fn notification_from_row(r: &SqliteRow) -> Result<Notification> {
    let kind: String = r.get("type");
    let status: String = r.get("status");
    let created_at: i64 = r.get("created_at");

    Ok(Notification {
        id: parse_uuid(r.get("id"), "notifications.id")?,
        user_id: parse_uuid(r.get("user_id"), "notifications.user_id")?,
        kind: kind.parse::<NotificationKind>()?,
        content: r.get("content"),
        project_id: parse_optional_uuid(r.get("related_project_id"), "related_project_id")?,
        task_id: parse_optional_uuid(r.get("related_task_id"), "related_task_id")?,
        status: status.parse::<NotificationStatus>()?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at)
            .with_context(|| format!("Invalid created_at: {}", created_at))?,
    })
}

impl Repository {
    /// Insert a notification and return the row as stored, including its
    /// generated id, default status and timestamp.
    pub async fn create_notification(&self, req: &CreateNotification) -> Result<Notification> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, type, content, related_project_id, related_task_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(req.user_id.to_string())
        .bind(req.kind.as_str())
        .bind(&req.content)
        .bind(req.project_id.map(|p| p.to_string()))
        .bind(req.task_id.map(|t| t.to_string()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to create notification")?;

        self.get_notification(id)
            .await?
            .context("Notification missing after insert")
    }

    pub async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = ?",
            NOTIFICATION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    /// All notifications for a user, newest first.
    pub async fn list_notifications_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list notifications")?;

        rows.iter().map(notification_from_row).collect()
    }

    /// Returns false when no such notification exists.
    pub async fn mark_notification_read(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE notifications SET status = ? WHERE id = ?")
            .bind(NotificationStatus::Read.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to mark notification read")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::test_helpers::test_repository;

    use super::*;

    fn request(user_id: Uuid, content: &str) -> CreateNotification {
        CreateNotification {
            user_id,
            kind: NotificationKind::TaskAssigned,
            content: content.to_string(),
            project_id: Some(Uuid::new_v4()),
            task_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_returns_persisted_row() {
        let repo = test_repository().await;
        let user = repo.create_user("ext", "Ada", "ada@example.com").await.unwrap();

        let req = request(user.id, "You were assigned a task");
        let created = repo.create_notification(&req).await.unwrap();
        assert_eq!(created.user_id, user.id);
        assert_eq!(created.kind, NotificationKind::TaskAssigned);
        assert_eq!(created.content, "You were assigned a task");
        assert_eq!(created.project_id, req.project_id);
        assert!(created.task_id.is_none());
        assert_eq!(created.status, NotificationStatus::Unread);

        let fetched = repo.get_notification(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_for_unknown_user_fails() {
        let repo = test_repository().await;
        assert!(repo.create_notification(&request(Uuid::new_v4(), "x")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_newest_first_and_scoped_to_user() {
        let repo = test_repository().await;
        let ada = repo.create_user("ada", "Ada", "ada@example.com").await.unwrap();
        let bo = repo.create_user("bo", "Bo", "bo@example.com").await.unwrap();

        for i in 0..3 {
            repo.create_notification(&request(ada.id, &format!("ada-{}", i)))
                .await
                .unwrap();
        }
        repo.create_notification(&request(bo.id, "bo-0")).await.unwrap();

        let listed = repo.list_notifications_for_user(ada.id).await.unwrap();
        let contents: Vec<_> = listed.iter().map(|n| n.content.as_str()).collect();
        assert_eq!(contents, vec!["ada-2", "ada-1", "ada-0"]);

        assert_eq!(repo.list_notifications_for_user(bo.id).await.unwrap().len(), 1);
        assert!(
            repo.list_notifications_for_user(Uuid::new_v4())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_mark_notification_read() {
        let repo = test_repository().await;
        let user = repo.create_user("ext", "Ada", "ada@example.com").await.unwrap();
        let created = repo.create_notification(&request(user.id, "x")).await.unwrap();

        assert!(repo.mark_notification_read(created.id).await.unwrap());
        let fetched = repo.get_notification(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, NotificationStatus::Read);

        // Marking twice is harmless
        assert!(repo.mark_notification_read(created.id).await.unwrap());
        assert!(!repo.mark_notification_read(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_kind_in_row_is_an_error() {
        let repo = test_repository().await;
        let user = repo.create_user("ext", "Ada", "ada@example.com").await.unwrap();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO notifications (id, user_id, type, content, created_at) VALUES (?, ?, 'mention', 'x', 0)",
        )
        .bind(id.to_string())
        .bind(user.id.to_string())
        .execute(&repo.pool)
        .await
        .unwrap();

        assert!(repo.get_notification(id).await.is_err());
    }
}
