pub mod health;
pub mod notifications;
pub mod users;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use notifications::{list_notifications_handler, mark_notification_read_handler};
pub use users::{create_user_handler, get_current_user_handler};
pub use websocket::notifications_websocket_handler;
