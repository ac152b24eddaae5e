//! In-process event bus (§4.I): one publisher, N per-subscriber queues.
//!
//! Grounded in the per-subscriber bounded channel pattern this lineage
//! uses for session fan-out: `try_send`, and any enqueue that would
//! block or signals channel closure removes that subscriber. This is
//! deliberately not `tokio::sync::broadcast` — broadcast has no way to
//! drop one slow subscriber without affecting the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ghx_proto::{BusEnvelope, BusEvent};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Sending half of one subscriber's channel.
pub type SubscriberSender = mpsc::Sender<BusEnvelope>;
/// Receiving half of one subscriber's channel, handed to the caller of
/// [`EventBus::subscribe`].
pub type SubscriberReceiver = mpsc::Receiver<BusEnvelope>;

/// Default per-subscriber channel capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;
/// Idle duration after which a heartbeat envelope is published.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Construct one subscriber's channel pair.
#[must_use]
pub fn subscriber_channel(buffer: usize) -> (SubscriberSender, SubscriberReceiver) {
    mpsc::channel(buffer)
}

/// The bus itself: a registry of subscriber senders, guarded by a plain
/// mutex since every operation here is non-blocking (`try_send`) and
/// never held across an await point.
pub struct EventBus {
    subscribers: Mutex<HashMap<Uuid, SubscriberSender>>,
    last_publish: Mutex<Instant>,
}

impl EventBus {
    /// A bus with no subscribers yet.
    #[must_use]
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(HashMap::new()), last_publish: Mutex::new(Instant::now()) }
    }

    /// Register a new subscriber and deliver it a `connected` envelope.
    /// Returns its id (for later [`EventBus::unsubscribe`]) and the
    /// receiving half of its channel.
    pub fn subscribe(&self) -> (Uuid, SubscriberReceiver) {
        let (tx, rx) = subscriber_channel(DEFAULT_SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();
        let _ = tx.try_send(BusEnvelope::now(BusEvent::Connected));
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).insert(id, tx);
        (id, rx)
    }

    /// Explicitly drop a subscriber, e.g. when its HTTP connection
    /// closes from the client side.
    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    /// Enqueue `event` on every subscriber's channel. A subscriber whose
    /// channel is full (slow consumer) or closed is removed.
    pub fn publish(&self, event: BusEvent) {
        let envelope = BusEnvelope::now(event);
        *self.last_publish.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();

        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|id, tx| match tx.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = %id, "slow consumer, dropping subscription");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Current subscriber count, for diagnostics.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Seconds elapsed since the last `publish` call.
    #[must_use]
    pub fn seconds_since_last_publish(&self) -> u64 {
        self.last_publish.lock().unwrap_or_else(|e| e.into_inner()).elapsed().as_secs()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Dedicated task: publish a heartbeat envelope whenever the bus has
/// been idle for [`HEARTBEAT_INTERVAL`]. Runs until the process exits.
pub async fn run_heartbeat(bus: Arc<EventBus>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        if bus.seconds_since_last_publish() >= HEARTBEAT_INTERVAL.as_secs() {
            bus.publish(BusEvent::Heartbeat);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_delivers_connected_envelope_first() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe();
        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, BusEvent::Connected));
    }

    #[tokio::test]
    async fn publish_delivers_to_every_subscriber_in_order() {
        let bus = EventBus::new();
        let (_id_a, mut rx_a) = bus.subscribe();
        let (_id_b, mut rx_b) = bus.subscribe();
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        bus.publish(BusEvent::JobStatusChange {
            job_id: "job-1".to_string(),
            status: ghx_proto::JobStatus::Running,
            node_name: None,
        });
        bus.publish(BusEvent::DiagnosticResultsUpdated);

        let first_a = rx_a.recv().await.unwrap();
        let second_a = rx_a.recv().await.unwrap();
        assert!(matches!(first_a.event, BusEvent::JobStatusChange { .. }));
        assert!(matches!(second_a.event, BusEvent::DiagnosticResultsUpdated));

        let first_b = rx_b.recv().await.unwrap();
        assert!(matches!(first_b.event, BusEvent::JobStatusChange { .. }));
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_without_affecting_others() {
        let bus = EventBus::new();
        let (_slow_id, mut slow_rx) = bus.subscribe();
        let (_fast_id, mut fast_rx) = bus.subscribe();
        slow_rx.recv().await.unwrap();
        fast_rx.recv().await.unwrap();

        assert_eq!(bus.subscriber_count(), 2);
        for _ in 0..(DEFAULT_SUBSCRIBER_BUFFER + 1) {
            bus.publish(BusEvent::DiagnosticResultsUpdated);
        }
        // The slow subscriber never drained its queue and should have
        // been evicted once its buffer filled.
        assert_eq!(bus.subscriber_count(), 1);

        // The fast subscriber, having drained, is still registered and
        // can keep receiving.
        fast_rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_removes_without_waiting_for_a_failed_send() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe();
        rx.recv().await.unwrap();
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
