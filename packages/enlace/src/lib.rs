//! Enlace - notification service
//!
//! Persists notifications in SQLite, serves them over a small REST API and
//! pushes each one to its recipient's live WebSocket connection through
//! [`enlace_hub`].

use anyhow::{Context, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use enlace_hub::{Hub, HubHandle, PumpConfig};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

pub mod auth;
pub mod config;
pub mod db;
pub mod gateway;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod services;

#[cfg(test)]
pub(crate) mod test_helpers;

use crate::config::PushConfig;
use crate::db::Database;
use crate::identity::IdentityVerifier;
use crate::metrics::ServerMetrics;
use crate::repository::Repository;
use crate::services::NotificationService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub repository: Arc<Repository>,
    pub notifications: NotificationService,
    /// Live connection registry
    pub hub: HubHandle,
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Heartbeat settings for new connections
    pub pump_config: PumpConfig,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    /// Wire the services together and start the hub event loop.
    pub fn new(db: Database, verifier: Arc<dyn IdentityVerifier>, push: &PushConfig) -> Self {
        let repository = Arc::new(Repository::new(db.pool.clone()));
        let hub = Hub::spawn(push.hub.clone());
        let metrics = Arc::new(ServerMetrics::new());
        let notifications =
            NotificationService::new(repository.clone(), hub.clone(), metrics.clone());

        Self {
            db: Arc::new(db),
            repository,
            notifications,
            hub,
            verifier,
            pump_config: push.pumps.clone(),
            metrics,
        }
    }
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

/// Permissive when no origins are configured.
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    if allowed_origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("Invalid allowed origin: {}", o))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    // Everything here requires a verified bearer token
    let api = Router::new()
        .route("/api/v1/users", post(handlers::create_user_handler))
        .route("/api/v1/users/me", get(handlers::get_current_user_handler))
        .route(
            "/api/v1/notifications",
            get(handlers::list_notifications_handler),
        )
        .route(
            "/api/v1/notifications/{id}/read",
            post(handlers::mark_notification_read_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(api)
        // Authenticates itself from ?token= or the Authorization header
        .route(
            "/api/v1/notifications/ws",
            get(handlers::notifications_websocket_handler),
        )
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_permissive_when_empty() {
        assert!(cors_layer(&[]).is_ok());
    }

    #[test]
    fn test_cors_layer_rejects_invalid_origin() {
        assert!(cors_layer(&["https://ok.example".into()]).is_ok());
        assert!(cors_layer(&["bad\norigin".into()]).is_err());
    }
}
