//! Connection lifecycle and the per-connection reader/writer pumps.
//!
//! A [`Connection`] is handed out by [`HubHandle::register`]. It owns the
//! receiving half of the outbound queue; the hub owns the only sender. The
//! pumps bridge that queue to any transport expressed as a
//! `Sink<Frame>` plus a `Stream` of [`Inbound`] frames.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::NotificationEvent;
use crate::hub::HubHandle;

/// Identifies one registration. A user who reconnects gets a new id, which is
/// how stale unregisters are told apart from current ones.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound transport frames produced by the writer pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Close,
}

/// Inbound frames as seen by the reader pump. Clients send no application
/// messages, so everything except a close is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Message,
    Close,
}

#[derive(Clone, Debug, Default)]
pub struct PumpConfig {
    /// Send [`Frame::Ping`] on this interval so half-open transports surface
    /// as write errors. `None` disables heartbeats.
    pub ping_interval: Option<Duration>,
}

/// One live session for a single user.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user_id: Uuid,
    outbound: mpsc::Receiver<NotificationEvent>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        user_id: Uuid,
        outbound: mpsc::Receiver<NotificationEvent>,
    ) -> Self {
        Self {
            id,
            user_id,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Next queued event; `None` once the hub has closed the queue.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<NotificationEvent> {
        self.outbound.try_recv().ok()
    }

    /// Spawn exactly one reader and one writer task for this connection.
    ///
    /// The two share a cancellation token: when either finishes, the other
    /// stops. The reader always performs the single `unregister` call.
    pub fn spawn_pumps<S, R, E>(
        self,
        hub: HubHandle,
        sink: S,
        stream: R,
        config: PumpConfig,
    ) -> Pumps
    where
        S: Sink<Frame> + Send + Unpin + 'static,
        S::Error: fmt::Display + Send,
        R: Stream<Item = Result<Inbound, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        let Connection {
            id,
            user_id,
            outbound,
        } = self;
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_pump(stream, hub, id, user_id, cancel.clone()));
        let writer = tokio::spawn(write_pump(
            outbound,
            sink,
            id,
            user_id,
            config.ping_interval,
            cancel,
        ));

        Pumps { reader, writer }
    }
}

/// Join handles for a connection's pumps.
pub struct Pumps {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl Pumps {
    /// Wait for both pumps to finish.
    pub async fn join(self) {
        if let Err(e) = self.reader.await {
            error!("Reader pump panicked: {}", e);
        }
        if let Err(e) = self.writer.await {
            error!("Writer pump panicked: {}", e);
        }
    }
}

async fn read_pump<R, E>(
    mut stream: R,
    hub: HubHandle,
    conn_id: ConnectionId,
    user_id: Uuid,
    cancel: CancellationToken,
) where
    R: Stream<Item = Result<Inbound, E>> + Send + Unpin,
    E: fmt::Display + Send,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(conn_id = %conn_id, "Reader pump cancelled");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Inbound::Message)) => {
                    debug!(conn_id = %conn_id, "Discarding inbound frame");
                }
                Some(Ok(Inbound::Close)) => {
                    info!(user_id = %user_id, conn_id = %conn_id, "Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    info!(user_id = %user_id, conn_id = %conn_id, "Connection read error: {}", e);
                    break;
                }
                None => {
                    info!(user_id = %user_id, conn_id = %conn_id, "Connection ended");
                    break;
                }
            }
        }
    }

    hub.unregister(user_id, conn_id).await;
    cancel.cancel();
}

async fn write_pump<S>(
    mut outbound: mpsc::Receiver<NotificationEvent>,
    mut sink: S,
    conn_id: ConnectionId,
    user_id: Uuid,
    ping_interval: Option<Duration>,
    cancel: CancellationToken,
) where
    S: Sink<Frame> + Send + Unpin,
    S::Error: fmt::Display + Send,
{
    let mut heartbeat = ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(conn_id = %conn_id, "Writer pump cancelled");
                break;
            }
            next = outbound.recv() => {
                let Some(event) = next else {
                    debug!(conn_id = %conn_id, "Outbound queue closed");
                    let _ = sink.send(Frame::Close).await;
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        error!(
                            conn_id = %conn_id,
                            notification_id = %event.id,
                            "Failed to serialize notification: {}", e
                        );
                        continue;
                    }
                };
                if let Err(e) = sink.send(Frame::Text(json)).await {
                    warn!(user_id = %user_id, conn_id = %conn_id, "Write failed: {}", e);
                    break;
                }
                debug!(conn_id = %conn_id, notification_id = %event.id, "Notification sent");
            }
            _ = tick(&mut heartbeat) => {
                if let Err(e) = sink.send(Frame::Ping).await {
                    warn!(user_id = %user_id, conn_id = %conn_id, "Heartbeat failed: {}", e);
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    cancel.cancel();
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
    }

    #[test]
    fn pump_config_defaults_to_no_heartbeat() {
        assert!(PumpConfig::default().ping_interval.is_none());
    }
}
