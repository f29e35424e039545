//! Registry + event loop.
//!
//! The [`Hub`] task is the only owner of the registry (user id → live
//! connection). Every mutation and lookup goes through its command channel,
//! so register / unregister / deliver are linearized without locking the map.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionId};
use crate::error::HubError;
use crate::event::NotificationEvent;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Events buffered per connection before new ones are dropped for that
    /// recipient.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Commands accepted by the event loop
pub(crate) enum HubCommand {
    Register {
        user_id: Uuid,
        respond_to: oneshot::Sender<Connection>,
    },
    Unregister {
        user_id: Uuid,
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },
    Deliver {
        event: NotificationEvent,
    },
    Broadcast {
        event: NotificationEvent,
    },
    IsConnected {
        user_id: Uuid,
        respond_to: oneshot::Sender<bool>,
    },
    ConnectedUsers {
        respond_to: oneshot::Sender<Vec<Uuid>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Counters shared between the event loop and every handle. Only the loop
/// writes them; handles read through [`HubStatsSnapshot`].
#[derive(Debug, Default)]
pub(crate) struct HubStats {
    live_connections: AtomicU64,
    registered: AtomicU64,
    evicted: AtomicU64,
    unregistered: AtomicU64,
    delivered: AtomicU64,
    dropped_offline: AtomicU64,
    dropped_full: AtomicU64,
    broadcasts: AtomicU64,
}

impl HubStats {
    pub(crate) fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            live_connections: self.live_connections.load(Ordering::Relaxed),
            registered: self.registered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_offline: self.dropped_offline.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStatsSnapshot {
    pub live_connections: u64,
    pub registered: u64,
    pub evicted: u64,
    pub unregistered: u64,
    pub delivered: u64,
    pub dropped_offline: u64,
    pub dropped_full: u64,
    pub broadcasts: u64,
}

/// Registry entry. Dropping `queue` is what closes the connection's outbound
/// queue, and the registry holds the only sender.
struct Registered {
    connection_id: ConnectionId,
    queue: mpsc::Sender<NotificationEvent>,
}

/// The event loop. Construct with [`Hub::spawn`] and talk to it through the
/// returned [`HubHandle`].
pub struct Hub {
    registry: HashMap<Uuid, Registered>,
    receiver: mpsc::UnboundedReceiver<HubCommand>,
    config: HubConfig,
    stats: Arc<HubStats>,
    next_connection_id: u64,
}

impl Hub {
    /// Spawn the event loop on the current runtime.
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(HubStats::default());

        let mut hub = Hub {
            registry: HashMap::new(),
            receiver,
            config: HubConfig {
                queue_capacity: config.queue_capacity.max(1),
            },
            stats: stats.clone(),
            next_connection_id: 1,
        };

        tokio::spawn(async move { hub.run().await });

        HubHandle { sender, stats }
    }

    async fn run(&mut self) {
        info!(
            queue_capacity = self.config.queue_capacity,
            "Notification hub started"
        );

        while let Some(command) = self.receiver.recv().await {
            match command {
                HubCommand::Register {
                    user_id,
                    respond_to,
                } => {
                    let connection = self.handle_register(user_id);
                    if let Err(connection) = respond_to.send(connection) {
                        // Caller went away before the ack; undo so no entry
                        // lingers without pumps.
                        self.handle_unregister(connection.user_id(), connection.id());
                    }
                }
                HubCommand::Unregister {
                    user_id,
                    connection_id,
                    respond_to,
                } => {
                    let removed = self.handle_unregister(user_id, connection_id);
                    let _ = respond_to.send(removed);
                }
                HubCommand::Deliver { event } => self.handle_deliver(event),
                HubCommand::Broadcast { event } => self.handle_broadcast(event),
                HubCommand::IsConnected {
                    user_id,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.registry.contains_key(&user_id));
                }
                HubCommand::ConnectedUsers { respond_to } => {
                    let _ = respond_to.send(self.registry.keys().copied().collect());
                }
                HubCommand::Shutdown { respond_to } => {
                    self.receiver.close();
                    self.drain();
                    let _ = respond_to.send(());
                    break;
                }
            }
        }

        self.drain();
        info!("Notification hub stopped");
    }

    fn handle_register(&mut self, user_id: Uuid) -> Connection {
        let connection_id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        let (queue, outbound) = mpsc::channel(self.config.queue_capacity);

        let previous = self.registry.insert(
            user_id,
            Registered {
                connection_id,
                queue,
            },
        );

        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = previous {
            // Last connection wins; dropping the old sender ends its writer pump.
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            info!(
                user_id = %user_id,
                conn_id = %connection_id,
                evicted_conn_id = %previous.connection_id,
                "Replaced existing connection"
            );
            drop(previous);
        } else {
            info!(user_id = %user_id, conn_id = %connection_id, "Connection registered");
        }
        self.update_live_count();

        Connection::new(connection_id, user_id, outbound)
    }

    fn handle_unregister(&mut self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        match self.registry.get(&user_id) {
            Some(entry) if entry.connection_id == connection_id => {
                self.registry.remove(&user_id);
                self.stats.unregistered.fetch_add(1, Ordering::Relaxed);
                self.update_live_count();
                info!(user_id = %user_id, conn_id = %connection_id, "Connection unregistered");
                true
            }
            Some(entry) => {
                debug!(
                    user_id = %user_id,
                    conn_id = %connection_id,
                    current_conn_id = %entry.connection_id,
                    "Ignoring unregister from superseded connection"
                );
                false
            }
            None => {
                debug!(user_id = %user_id, conn_id = %connection_id, "Connection already unregistered");
                false
            }
        }
    }

    fn handle_deliver(&mut self, event: NotificationEvent) {
        let user_id = event.user_id;
        let Some(entry) = self.registry.get(&user_id) else {
            self.stats.dropped_offline.fetch_add(1, Ordering::Relaxed);
            debug!(
                user_id = %user_id,
                notification_id = %event.id,
                "Recipient not connected, skipping push"
            );
            return;
        };

        let connection_id = entry.connection_id;
        if Self::enqueue(&self.stats, entry, event) {
            debug!(user_id = %user_id, conn_id = %connection_id, "Notification queued");
        }
    }

    fn handle_broadcast(&mut self, event: NotificationEvent) {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        let mut queued = 0usize;
        for entry in self.registry.values() {
            if Self::enqueue(&self.stats, entry, event.clone()) {
                queued += 1;
            }
        }
        debug!(
            notification_id = %event.id,
            recipients = queued,
            "Broadcast queued"
        );
    }

    /// Non-blocking enqueue. A full queue drops the event for this recipient
    /// only; the loop never waits on a slow consumer.
    fn enqueue(stats: &HubStats, entry: &Registered, event: NotificationEvent) -> bool {
        match entry.queue.try_send(event) {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                stats.dropped_full.fetch_add(1, Ordering::Relaxed);
                warn!(
                    user_id = %event.user_id,
                    conn_id = %entry.connection_id,
                    notification_id = %event.id,
                    "Outbound queue full, dropping notification"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                // Writer pump already exited; its reader will unregister.
                stats.dropped_offline.fetch_add(1, Ordering::Relaxed);
                debug!(
                    user_id = %event.user_id,
                    conn_id = %entry.connection_id,
                    "Writer pump gone, dropping notification"
                );
                false
            }
        }
    }

    fn drain(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        info!(
            connections = self.registry.len(),
            "Closing all live connections"
        );
        self.registry.clear();
        self.update_live_count();
    }

    fn update_live_count(&self) {
        self.stats
            .live_connections
            .store(self.registry.len() as u64, Ordering::Relaxed);
    }
}

/// Cloneable handle to the hub's event loop.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::UnboundedSender<HubCommand>,
    stats: Arc<HubStats>,
}

impl HubHandle {
    /// Register a new connection for `user_id`, evicting any previous one.
    ///
    /// Returns once the registry has been updated, so a `deliver` issued
    /// afterwards is guaranteed to see the new connection.
    pub async fn register(&self, user_id: Uuid) -> Result<Connection, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::Register {
                user_id,
                respond_to: tx,
            })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Remove the registry entry for `user_id` if it still belongs to
    /// `connection_id`. Returns `true` only for the call that removed it.
    pub async fn unregister(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(HubCommand::Unregister {
                user_id,
                connection_id,
                respond_to: tx,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Push `event` to its recipient's live connection, if any.
    ///
    /// Never waits. Returns `false` only when the hub has shut down; an
    /// offline recipient is not an error.
    pub fn deliver(&self, event: NotificationEvent) -> bool {
        self.sender.send(HubCommand::Deliver { event }).is_ok()
    }

    /// Push `event` to every live connection.
    pub fn broadcast(&self, event: NotificationEvent) -> bool {
        self.sender.send(HubCommand::Broadcast { event }).is_ok()
    }

    pub async fn is_connected(&self, user_id: Uuid) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::IsConnected {
                user_id,
                respond_to: tx,
            })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn connected_users(&self) -> Result<Vec<Uuid>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::ConnectedUsers { respond_to: tx })
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Close every live connection's queue and stop the event loop.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(HubCommand::Shutdown { respond_to: tx })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Point-in-time copy of the hub counters.
    ///
    /// The live counters stay private to the event loop:
    ///
    /// ```compile_fail
    /// use enlace_hub::HubStats;
    /// ```
    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NotificationKind, NotificationStatus};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn event_for(user_id: Uuid, content: &str) -> NotificationEvent {
        NotificationEvent {
            id: Uuid::new_v4(),
            user_id,
            kind: NotificationKind::TaskAssigned,
            content: content.to_string(),
            project_id: None,
            task_id: None,
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
        }
    }

    async fn recv(conn: &mut Connection) -> Option<NotificationEvent> {
        timeout(Duration::from_secs(1), conn.recv())
            .await
            .expect("timed out waiting for outbound queue")
    }

    #[tokio::test]
    async fn test_deliver_reaches_registered_connection() {
        let hub = Hub::spawn(HubConfig::default());
        let user = Uuid::new_v4();
        let mut conn = hub.register(user).await.unwrap();

        assert!(hub.deliver(event_for(user, "X")));
        let got = recv(&mut conn).await.unwrap();
        assert_eq!(got.content, "X");
        assert_eq!(got.kind, NotificationKind::TaskAssigned);
    }

    #[tokio::test]
    async fn test_second_registration_evicts_first() {
        let hub = Hub::spawn(HubConfig::default());
        let user = Uuid::new_v4();
        let mut first = hub.register(user).await.unwrap();
        let mut second = hub.register(user).await.unwrap();
        assert_ne!(first.id(), second.id());

        // The superseded queue is closed
        assert!(recv(&mut first).await.is_none());

        hub.deliver(event_for(user, "only for the second"));
        assert_eq!(recv(&mut second).await.unwrap().content, "only for the second");

        let stats = hub.stats();
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.live_connections, 1);
    }

    #[tokio::test]
    async fn test_deliver_to_offline_user_is_silent() {
        let hub = Hub::spawn(HubConfig::default());
        let online = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let mut conn = hub.register(online).await.unwrap();

        assert!(hub.deliver(event_for(offline, "nobody home")));
        // Round-trip through the loop so the deliver has been processed
        assert!(!hub.is_connected(offline).await.unwrap());

        assert_eq!(hub.stats().dropped_offline, 1);
        assert!(conn.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_fifo_per_connection() {
        let hub = Hub::spawn(HubConfig::default());
        let user = Uuid::new_v4();
        let mut conn = hub.register(user).await.unwrap();

        for i in 0..10 {
            hub.deliver(event_for(user, &format!("e{}", i)));
        }
        for i in 0..10 {
            assert_eq!(recv(&mut conn).await.unwrap().content, format!("e{}", i));
        }
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = Hub::spawn(HubConfig::default());
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut conn = hub.register(user).await.unwrap();
        let mut other_conn = hub.register(other).await.unwrap();

        assert!(hub.unregister(user, conn.id()).await);
        assert!(!hub.unregister(user, conn.id()).await);

        assert!(recv(&mut conn).await.is_none());
        assert!(!hub.is_connected(user).await.unwrap());

        // Other identities are untouched
        assert!(hub.is_connected(other).await.unwrap());
        hub.deliver(event_for(other, "still here"));
        assert_eq!(recv(&mut other_conn).await.unwrap().content, "still here");
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_connection() {
        let hub = Hub::spawn(HubConfig::default());
        let user = Uuid::new_v4();
        let old = hub.register(user).await.unwrap();
        let mut new = hub.register(user).await.unwrap();

        assert!(!hub.unregister(user, old.id()).await);
        assert!(hub.is_connected(user).await.unwrap());

        hub.deliver(event_for(user, "after stale unregister"));
        assert_eq!(
            recv(&mut new).await.unwrap().content,
            "after stale unregister"
        );
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_stalling_others() {
        let hub = Hub::spawn(HubConfig { queue_capacity: 2 });
        let slow = Uuid::new_v4();
        let fast = Uuid::new_v4();
        let mut slow_conn = hub.register(slow).await.unwrap();
        let mut fast_conn = hub.register(fast).await.unwrap();

        for i in 0..5 {
            hub.deliver(event_for(slow, &format!("s{}", i)));
        }
        hub.deliver(event_for(fast, "f0"));

        assert_eq!(recv(&mut fast_conn).await.unwrap().content, "f0");

        // Only the first two fit
        assert_eq!(recv(&mut slow_conn).await.unwrap().content, "s0");
        assert_eq!(recv(&mut slow_conn).await.unwrap().content, "s1");
        assert!(slow_conn.try_recv().is_none());
        assert_eq!(hub.stats().dropped_full, 3);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_arrive_exactly_once() {
        let hub = Hub::spawn(HubConfig {
            queue_capacity: 1024,
        });
        let user = Uuid::new_v4();
        let mut conn = hub.register(user).await.unwrap();

        let mut tasks = Vec::new();
        for caller in 0..8 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for seq in 0..25 {
                    hub.deliver(event_for(user, &format!("{}:{}", caller, seq)));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut last_seq: HashMap<u32, i64> = HashMap::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let event = recv(&mut conn).await.unwrap();
            assert!(seen.insert(event.content.clone()), "duplicate {}", event.content);
            let (caller, seq) = event.content.split_once(':').unwrap();
            let caller: u32 = caller.parse().unwrap();
            let seq: i64 = seq.parse().unwrap();
            let prev = last_seq.entry(caller).or_insert(-1);
            assert!(seq > *prev, "per-caller order violated");
            *prev = seq;
        }
        assert!(conn.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let hub = Hub::spawn(HubConfig::default());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut conn_a = hub.register(a).await.unwrap();
        let mut conn_b = hub.register(b).await.unwrap();

        hub.broadcast(event_for(Uuid::nil(), "maintenance at noon"));

        assert_eq!(recv(&mut conn_a).await.unwrap().content, "maintenance at noon");
        assert_eq!(recv(&mut conn_b).await.unwrap().content, "maintenance at noon");
        assert_eq!(hub.stats().broadcasts, 1);
    }

    #[tokio::test]
    async fn test_connected_users() {
        let hub = Hub::spawn(HubConfig::default());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _conn_a = hub.register(a).await.unwrap();
        let _conn_b = hub.register(b).await.unwrap();

        let mut users = hub.connected_users().await.unwrap();
        users.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(users, expected);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues_and_rejects_new_work() {
        let hub = Hub::spawn(HubConfig::default());
        let user = Uuid::new_v4();
        let mut conn = hub.register(user).await.unwrap();

        hub.shutdown().await;

        assert!(recv(&mut conn).await.is_none());
        assert_eq!(hub.register(user).await.unwrap_err(), HubError::Closed);
        assert!(!hub.deliver(event_for(user, "too late")));
        assert!(!hub.unregister(user, conn.id()).await);
        assert!(hub.is_closed());
    }
}
