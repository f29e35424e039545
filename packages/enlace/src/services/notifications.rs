use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use enlace_hub::{HubHandle, NotificationKind};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::metrics::ServerMetrics;
use crate::models::{CreateNotification, Notification};
use crate::repository::Repository;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Internal(e) => {
                error!("Internal error: {:#}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal error" })),
                )
                    .into_response();
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Persists notifications and pushes them to live recipients.
///
/// The store is authoritative: a notification exists once the insert
/// succeeds, and the push that follows is best effort. Notifications are
/// only produced in-process, by the task, invitation and comment flows;
/// there is no HTTP route that creates one.
#[derive(Clone)]
pub struct NotificationService {
    repository: Arc<Repository>,
    hub: HubHandle,
    metrics: Arc<ServerMetrics>,
}

impl NotificationService {
    pub fn new(repository: Arc<Repository>, hub: HubHandle, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            repository,
            hub,
            metrics,
        }
    }

    /// A task was (re)assigned. Assigning a task to yourself notifies nobody.
    pub async fn notify_task_assigned(
        &self,
        assigned_by: Uuid,
        assignee: Uuid,
        project_id: Uuid,
        task_id: Uuid,
        task_title: &str,
    ) -> Result<Option<Notification>, ServiceError> {
        if assignee == assigned_by {
            return Ok(None);
        }
        self.create(CreateNotification {
            user_id: assignee,
            kind: NotificationKind::TaskAssigned,
            content: format!("You have been assigned to task: {}", task_title),
            project_id: Some(project_id),
            task_id: Some(task_id),
        })
        .await
        .map(Some)
    }

    pub async fn notify_project_invitation(
        &self,
        invitee: Uuid,
        project_id: Uuid,
        project_name: &str,
    ) -> Result<Notification, ServiceError> {
        self.create(CreateNotification {
            user_id: invitee,
            kind: NotificationKind::ProjectInvitation,
            content: format!("You have been invited to join the project: {}", project_name),
            project_id: Some(project_id),
            task_id: None,
        })
        .await
    }

    /// Someone commented on a task. Commenting on your own task notifies
    /// nobody.
    pub async fn notify_comment_added(
        &self,
        author: Uuid,
        recipient: Uuid,
        project_id: Uuid,
        task_id: Uuid,
        task_title: &str,
    ) -> Result<Option<Notification>, ServiceError> {
        if recipient == author {
            return Ok(None);
        }
        self.create(CreateNotification {
            user_id: recipient,
            kind: NotificationKind::CommentAdded,
            content: format!("New comment on task: {}", task_title),
            project_id: Some(project_id),
            task_id: Some(task_id),
        })
        .await
        .map(Some)
    }

    pub async fn create(&self, req: CreateNotification) -> Result<Notification, ServiceError> {
        if self.repository.get_user(req.user_id).await?.is_none() {
            return Err(ServiceError::NotFound("recipient"));
        }

        let notification = self.repository.create_notification(&req).await?;
        self.metrics.notification_created();
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            kind = %notification.kind,
            "Notification created"
        );

        if !self.hub.deliver(notification.clone()) {
            debug!(notification_id = %notification.id, "Hub closed, skipping push");
        }

        Ok(notification)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>, ServiceError> {
        Ok(self.repository.list_notifications_for_user(user_id).await?)
    }

    /// Only the recipient may mark a notification as read.
    pub async fn mark_as_read(&self, caller: Uuid, notification_id: Uuid) -> Result<(), ServiceError> {
        let notification = self
            .repository
            .get_notification(notification_id)
            .await?
            .ok_or(ServiceError::NotFound("notification"))?;

        if notification.user_id != caller {
            return Err(ServiceError::Forbidden(
                "only the recipient can update the notification status",
            ));
        }

        self.repository.mark_notification_read(notification_id).await?;
        debug!(notification_id = %notification_id, user_id = %caller, "Notification read");
        Ok(())
    }
}
