pub mod notifications;

pub use notifications::{NotificationService, ServiceError};
