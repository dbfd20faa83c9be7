use crate::broadcast::queue::DropOldestQueue;
use crate::broadcast::{ConnectionId, ConnectionState, DeliveryError, SlotEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Events held between publishers and the delivery loop.
    pub queue_capacity: usize,
    /// Per-connection buffer between the hub and the connection's writer.
    pub subscriber_buffer: usize,
    /// Upper bound on one send to one connection.
    pub send_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    pub queued: usize,
    pub subscribers: usize,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Outcome of delivering one event to the subscriber snapshot.
#[derive(Debug, Default)]
pub struct DeliveryRound {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, DeliveryError)>,
    /// Connections that disconnected while this round was in flight.
    pub departed: usize,
}

/// Receiving half handed to a connection on `connect`.
#[derive(Debug)]
pub struct Subscription {
    id: ConnectionId,
    receiver: mpsc::Receiver<SlotEvent>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next event, or `None` once the hub has dropped this connection.
    pub async fn recv(&mut self) -> Option<SlotEvent> {
        self.receiver.recv().await
    }
}

/// Registry entry. Dropping `open` wakes any round still sending to this
/// connection.
#[derive(Debug)]
struct Connection {
    sender: mpsc::Sender<SlotEvent>,
    open: watch::Sender<()>,
}

/// Process-wide fan-out. Publishers push into a drop-oldest queue; one
/// delivery loop drains it in order and sends each event to every open
/// connection.
#[derive(Debug)]
pub struct BroadcastHub {
    queue: DropOldestQueue<SlotEvent>,
    subscribers: Mutex<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    settings: HubSettings,
}

impl BroadcastHub {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            queue: DropOldestQueue::new(settings.queue_capacity),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            settings,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event for delivery. Never blocks; a full queue loses its
    /// oldest event.
    pub fn publish(&self, event: SlotEvent) {
        if let Some(evicted) = self.queue.push(event) {
            debug!(
                slot_id = evicted.slot_id(),
                capacity = self.queue.capacity(),
                "Broadcast queue full, dropped oldest event"
            );
        }
    }

    pub fn connect(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.settings.subscriber_buffer.max(1));
        let (open, _) = watch::channel(());
        let subscribers = {
            let mut registry = self.registry();
            registry.insert(id, Connection { sender, open });
            registry.len()
        };
        info!(connection_id = id, subscribers, "Subscriber connected");
        Subscription { id, receiver }
    }

    /// Remove a connection. Safe to repeat; returns whether it was still open.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            info!(connection_id = id, "Subscriber disconnected");
        }
        removed
    }

    pub fn connection_state(&self, id: ConnectionId) -> ConnectionState {
        if self.registry().contains_key(&id) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            queued: self.queue.len(),
            subscribers: self.subscriber_count(),
            dropped: self.queue.dropped(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Wait for the next queued event and run one delivery round for it.
    pub async fn deliver_next(&self) -> DeliveryRound {
        let event = self.queue.pop().await;
        self.deliver(&event).await
    }

    async fn deliver(&self, event: &SlotEvent) -> DeliveryRound {
        let snapshot: Vec<(ConnectionId, mpsc::Sender<SlotEvent>, watch::Receiver<()>)> = self
            .registry()
            .iter()
            .map(|(id, connection)| (*id, connection.sender.clone(), connection.open.subscribe()))
            .collect();

        let mut round = DeliveryRound::default();
        for (id, sender, mut open) in snapshot {
            let timeout = self.settings.send_timeout;
            let send = tokio::time::timeout(timeout, sender.send(event.clone()));
            // `changed` only resolves once `disconnect` drops the watch sender.
            let result = tokio::select! {
                sent = send => match sent {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(DeliveryError::Closed),
                    Err(_) => Err(DeliveryError::Timeout(timeout)),
                },
                _ = open.changed() => {
                    debug!(connection_id = id, "Subscriber left during delivery");
                    round.departed += 1;
                    continue;
                }
            };
            match result {
                Ok(()) => round.delivered += 1,
                Err(err) => {
                    warn!(connection_id = id, error = %err, "Failed to deliver event");
                    round.failed.push((id, err));
                }
            }
        }

        for (id, _) in &round.failed {
            self.disconnect(*id);
        }
        self.delivered
            .fetch_add(round.delivered as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(round.failed.len() as u64, Ordering::Relaxed);
        round
    }

    /// Run the delivery loop until `shutdown` turns true or its sender goes away.
    pub fn spawn_delivery_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        info!(
            queue_capacity = self.queue.capacity(),
            send_timeout_ms = self.settings.send_timeout.as_millis() as u64,
            "Starting broadcast delivery loop"
        );
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    round = self.deliver_next() => {
                        debug!(
                            delivered = round.delivered,
                            failed = round.failed.len(),
                            "Delivery round complete"
                        );
                    }
                }
            }
            info!("Broadcast delivery loop stopped");
        })
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SlotStatus;

    fn event(n: usize) -> SlotEvent {
        SlotEvent::SlotUpdate {
            slot_id: format!("S-{n:03}"),
            status: SlotStatus::Occupied,
            timestamp: n.to_string(),
        }
    }

    #[tokio::test]
    async fn round_delivers_to_every_open_subscriber() {
        let hub = BroadcastHub::default();
        let mut first = hub.connect();
        let mut second = hub.connect();

        hub.publish(event(1));
        let round = hub.deliver_next().await;

        assert_eq!(round.delivered, 2);
        assert!(round.failed.is_empty());
        assert_eq!(first.recv().await, Some(event(1)));
        assert_eq!(second.recv().await, Some(event(1)));
    }

    #[tokio::test]
    async fn closed_receiver_is_removed_after_round() {
        let hub = BroadcastHub::default();
        let mut alive = hub.connect();
        let dead = hub.connect();
        let dead_id = dead.id();
        drop(dead);

        hub.publish(event(1));
        let round = hub.deliver_next().await;

        assert_eq!(round.delivered, 1);
        assert_eq!(round.failed, vec![(dead_id, DeliveryError::Closed)]);
        assert_eq!(hub.connection_state(dead_id), ConnectionState::Closed);
        assert_eq!(hub.connection_state(alive.id()), ConnectionState::Open);
        assert_eq!(alive.recv().await, Some(event(1)));
        assert_eq!(hub.stats().failed, 1);
    }

    #[tokio::test]
    async fn stalled_subscriber_times_out_without_blocking_others() {
        let hub = BroadcastHub::new(HubSettings {
            queue_capacity: 10,
            subscriber_buffer: 1,
            send_timeout: Duration::from_millis(30),
        });
        let mut reader = hub.connect();
        let stalled = hub.connect();

        hub.publish(event(1));
        hub.publish(event(2));
        let first = hub.deliver_next().await;
        assert_eq!(first.delivered, 2);
        assert_eq!(reader.recv().await, Some(event(1)));

        // The stalled buffer still holds event 1, so event 2 cannot fit.
        let second = hub.deliver_next().await;

        assert_eq!(second.delivered, 1);
        assert!(matches!(
            second.failed.as_slice(),
            [(id, DeliveryError::Timeout(_))] if *id == stalled.id()
        ));
        assert_eq!(reader.recv().await, Some(event(2)));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let hub = BroadcastHub::default();
        let subscription = hub.connect();

        assert!(hub.disconnect(subscription.id()));
        assert!(!hub.disconnect(subscription.id()));
        assert_eq!(hub.connection_state(subscription.id()), ConnectionState::Closed);
    }

    #[test]
    fn publish_without_subscribers_counts_overflow() {
        let hub = BroadcastHub::new(HubSettings {
            queue_capacity: 2,
            ..HubSettings::default()
        });

        for n in 0..5 {
            hub.publish(event(n));
        }

        let stats = hub.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.subscribers, 0);
    }
}
