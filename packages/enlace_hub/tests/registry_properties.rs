use proptest::prelude::*;
use std::collections::HashMap;

use chrono::Utc;
use enlace_hub::{
    Connection, ConnectionId, Hub, HubConfig, NotificationEvent, NotificationKind,
    NotificationStatus,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Unregister(usize),
    UnregisterStale(usize),
    Deliver(usize),
}

const USERS: usize = 3;

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => (0..USERS).prop_map(Op::Register),
        1 => (0..USERS).prop_map(Op::Unregister),
        1 => (0..USERS).prop_map(Op::UnregisterStale),
        3 => (0..USERS).prop_map(Op::Deliver),
    ]
}

fn event(user_id: Uuid, seq: usize) -> NotificationEvent {
    NotificationEvent {
        id: Uuid::new_v4(),
        user_id,
        kind: NotificationKind::CommentAdded,
        content: seq.to_string(),
        project_id: None,
        task_id: None,
        status: NotificationStatus::Unread,
        created_at: Utc::now(),
    }
}

/// Drain a connection whose queue is known to be closed, returning the
/// contents in arrival order.
async fn drain_closed(mut connection: Connection) -> Vec<String> {
    let mut contents = Vec::new();
    while let Some(event) = connection.recv().await {
        contents.push(event.content);
    }
    contents
}

struct Live {
    connection: Connection,
    expected: Vec<String>,
}

proptest! {
    /// Any interleaving of register / unregister / deliver leaves the hub in
    /// the state a last-connection-wins map predicts, with every superseded
    /// or unregistered queue closed after exactly the events it was sent.
    #[test]
    fn registry_matches_last_connection_wins_model(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let hub = Hub::spawn(HubConfig { queue_capacity: 64 });
            let users: Vec<Uuid> = (0..USERS).map(|_| Uuid::new_v4()).collect();
            let mut live: HashMap<usize, Live> = HashMap::new();
            let mut stale: HashMap<usize, ConnectionId> = HashMap::new();

            for (seq, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Register(u) => {
                        let connection = hub.register(users[u]).await.unwrap();
                        if let Some(old) = live.remove(&u) {
                            stale.insert(u, old.connection.id());
                            assert_eq!(drain_closed(old.connection).await, old.expected);
                        }
                        live.insert(u, Live { connection, expected: Vec::new() });
                    }
                    Op::Unregister(u) => {
                        if let Some(current) = live.remove(&u) {
                            let id = current.connection.id();
                            assert!(hub.unregister(users[u], id).await);
                            assert!(!hub.unregister(users[u], id).await);
                            stale.insert(u, id);
                            assert_eq!(drain_closed(current.connection).await, current.expected);
                        }
                    }
                    Op::UnregisterStale(u) => {
                        if let Some(id) = stale.get(&u) {
                            assert!(!hub.unregister(users[u], *id).await);
                        }
                    }
                    Op::Deliver(u) => {
                        assert!(hub.deliver(event(users[u], seq)));
                        if let Some(current) = live.get_mut(&u) {
                            current.expected.push(seq.to_string());
                        }
                    }
                }
            }

            for (u, user_id) in users.iter().enumerate() {
                assert_eq!(hub.is_connected(*user_id).await.unwrap(), live.contains_key(&u));
            }

            // The is_connected round trips above ordered every earlier deliver
            for (_, mut current) in live {
                let mut received = Vec::new();
                while let Some(event) = current.connection.try_recv() {
                    received.push(event.content);
                }
                assert_eq!(received, current.expected);
            }

            let stats = hub.stats();
            assert_eq!(stats.dropped_full, 0);
        });
    }
}
