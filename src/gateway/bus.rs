use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::event::LifecycleEvent;

/// Ceiling on how long one recipient may stall a delivery. A send that
/// does not complete within this window counts as a connection failure.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection buffer. A consumer that stops draining fills this up
/// and then starts hitting [`SEND_TIMEOUT`].
pub const CONNECTION_BUFFER: usize = 32;

/// Opaque handle identifying one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Central pub/sub hub: holds the set of live observer connections and
/// fans every published event out to all of them.
///
/// Delivery is at-least-once to connections registered at publish time.
/// The recipient set is a point-in-time snapshot taken before the
/// fan-out, so a connection registered mid-broadcast may or may not see
/// that particular event — an accepted race, not a bug. There is no
/// replay: a new joiner starts empty and reconstructs state only from
/// events arriving after registration.
pub struct EventBus {
    connections: Mutex<HashMap<ConnectionId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Channel pair sized for one connection. The sender side goes to
    /// [`register`](Self::register); the receiver side feeds the socket.
    pub fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(CONNECTION_BUFFER)
    }

    /// Add a live connection; the returned handle deregisters it.
    pub async fn register(&self, sender: mpsc::Sender<String>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.lock().await.insert(id, sender);
        tracing::debug!(connection = id.0, "Observer connection registered");
        id
    }

    /// Remove a connection. Safe to call for an id already evicted by a
    /// failed send.
    pub async fn deregister(&self, id: ConnectionId) {
        if self.connections.lock().await.remove(&id).is_some() {
            tracing::debug!(connection = id.0, "Observer connection deregistered");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Broadcast an event to every connection registered right now.
    ///
    /// The registry lock is held only to snapshot the recipient set —
    /// never across a send — so slow consumers cannot delay new
    /// registrations. A send that fails or times out evicts that one
    /// connection and never affects delivery to the others. Returns the
    /// number of successful deliveries.
    pub async fn publish(&self, event: &LifecycleEvent) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize lifecycle event");
                return 0;
            }
        };

        let snapshot: Vec<(ConnectionId, mpsc::Sender<String>)> = {
            let connections = self.connections.lock().await;
            connections.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            match tx.send_timeout(payload.clone(), SEND_TIMEOUT).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection = id.0,
                        error = %e,
                        "Broadcast send failed; evicting connection"
                    );
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.lock().await;
            for id in dead {
                connections.remove(&id);
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn working_event(slot: u8) -> LifecycleEvent {
        LifecycleEvent::AgentStartWorking { agent_id: slot }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_registered_connections() {
        let bus = EventBus::new();
        let (tx1, mut rx1) = EventBus::channel();
        let (tx2, mut rx2) = EventBus::channel();
        bus.register(tx1).await;
        bus.register(tx2).await;

        let delivered = bus.publish(&working_event(3)).await;
        assert_eq!(delivered, 2);

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(a.contains("agent_start_working"));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_publish_with_no_connections_is_a_no_op() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&working_event(1)).await, 0);
    }

    #[tokio::test]
    async fn test_deregistered_connection_receives_nothing() {
        let bus = EventBus::new();
        let (tx, mut rx) = EventBus::channel();
        let id = bus.register(tx).await;
        bus.deregister(id).await;

        assert_eq!(bus.publish(&working_event(1)).await, 0);
        // Sender dropped on deregistration; the channel closes.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_deregister_twice_is_harmless() {
        let bus = EventBus::new();
        let (tx, _rx) = EventBus::channel();
        let id = bus.register(tx).await;
        bus.deregister(id).await;
        bus.deregister(id).await;
        assert_eq!(bus.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_connection_is_evicted_on_publish() {
        let bus = EventBus::new();
        let (tx, rx) = EventBus::channel();
        bus.register(tx).await;
        drop(rx); // observer went away without deregistering

        assert_eq!(bus.publish(&working_event(2)).await, 0);
        assert_eq!(bus.connection_count().await, 0);
    }

    // Broadcast isolation: a permanently blocked consumer must neither
    // stall delivery to healthy ones nor survive the publish.
    #[tokio::test(start_paused = true)]
    async fn test_blocked_connection_does_not_stall_the_others() {
        let bus = EventBus::new();

        // A connection with a full single-slot buffer that is never
        // drained: every further send times out.
        let (blocked_tx, _blocked_rx) = mpsc::channel::<String>(1);
        blocked_tx.send("stuffed".to_string()).await.unwrap();
        bus.register(blocked_tx).await;

        let (tx1, mut rx1) = EventBus::channel();
        let (tx2, mut rx2) = EventBus::channel();
        bus.register(tx1).await;
        bus.register(tx2).await;

        let delivered = bus.publish(&working_event(5)).await;
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        // The blocked connection was removed from the registry.
        assert_eq!(bus.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_registration_during_fanout_does_not_deadlock() {
        let bus = std::sync::Arc::new(EventBus::new());
        let (tx, mut rx) = EventBus::channel();
        bus.register(tx).await;

        let publisher = {
            let bus = std::sync::Arc::clone(&bus);
            tokio::spawn(async move {
                for slot in 1..=9 {
                    bus.publish(&working_event(slot)).await;
                }
            })
        };
        let registrar = {
            let bus = std::sync::Arc::clone(&bus);
            tokio::spawn(async move {
                for _ in 0..5 {
                    let (tx, _rx) = EventBus::channel();
                    let id = bus.register(tx).await;
                    bus.deregister(id).await;
                }
            })
        };

        publisher.await.unwrap();
        registrar.await.unwrap();
        // The original connection saw every event published.
        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 9);
    }
}
