//! Enlace Hub - real-time notification fan-out
//!
//! Keeps track of which users currently hold a live connection and pushes
//! persisted notifications to them. Delivery is best effort: an offline
//! recipient or a full per-connection queue drops the push, and clients
//! reconcile against the store when they reconnect.
//!
//! The crate knows nothing about HTTP or WebSockets. A transport plugs in as
//! a `Sink<Frame>` for outbound frames and a `Stream` of [`Inbound`] frames.
//!
//! # Example
//!
//! ```no_run
//! use enlace_hub::{Hub, HubConfig, PumpConfig};
//! use futures::channel::mpsc;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Hub::spawn(HubConfig::default());
//!
//!     let user_id = Uuid::new_v4();
//!     let connection = hub.register(user_id).await.unwrap();
//!
//!     // Any Sink<Frame> / Stream<Item = Result<Inbound, E>> pair works
//!     let (sink, _frames) = mpsc::unbounded();
//!     let (_inbound_tx, inbound) = mpsc::unbounded::<Result<enlace_hub::Inbound, String>>();
//!
//!     let pumps = connection.spawn_pumps(hub.clone(), sink, inbound, PumpConfig::default());
//!     pumps.join().await;
//! }
//! ```

mod connection;
mod error;
mod event;
mod hub;

pub use connection::{Connection, ConnectionId, Frame, Inbound, PumpConfig, Pumps};
pub use error::HubError;
pub use event::{NotificationEvent, NotificationKind, NotificationStatus, UnknownVariant};
pub use hub::{DEFAULT_QUEUE_CAPACITY, Hub, HubConfig, HubHandle, HubStatsSnapshot};
