//! Server metrics for observability
//!
//! Provides runtime metrics for monitoring server health and performance.
//! Push-path counters live in the hub itself (`HubStatsSnapshot`); these cover the
//! HTTP and gateway side.

use enlace_hub::HubStatsSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Upgrade requests turned away by the gateway
    pub rejected_upgrades: AtomicU64,

    // Notification metrics
    /// Notifications persisted through the API
    pub notifications_created: AtomicU64,
    /// Notifications marked as read
    pub notifications_read: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn upgrade_rejected(&self) {
        self.rejected_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_created(&self) {
        self.notifications_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_read(&self) {
        self.notifications_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                rejected: self.rejected_upgrades.load(Ordering::Relaxed),
            },
            notifications: NotificationMetrics {
                created: self.notifications_created.load(Ordering::Relaxed),
                read: self.notifications_read.load(Ordering::Relaxed),
            },
        }
    }
}

/// Snapshot of server metrics (serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub notifications: NotificationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMetrics {
    pub created: u64,
    pub read: u64,
}

/// Body of `GET /metrics`: server counters plus the hub's push counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub server: MetricsSnapshot,
    pub hub: HubStatsSnapshot,
}

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub uptime_secs: u64,
}
