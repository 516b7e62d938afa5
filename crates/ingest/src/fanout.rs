//! In-process publish/subscribe for live viewers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full
//! queue drops that subscriber's copy of the event, a closed one is removed.
//! There is no replay; a viewer that missed events re-reads state.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use {
    courier_metrics::{counter, fanout as fanout_metrics, gauge, labels},
    courier_protocol::{Message, events},
    dashmap::DashMap,
    tokio::sync::mpsc::{self, error::TrySendError},
    tracing::debug,
};

// ── Topics ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanoutTopic {
    NewMessage,
    StatusUpdate,
}

impl FanoutTopic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewMessage => events::NEW_MESSAGE,
            Self::StatusUpdate => events::STATUS_UPDATE,
        }
    }
}

/// One notification: the topic, the full message, and a bus-wide sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutEvent {
    pub topic: FanoutTopic,
    pub message: Message,
    pub seq: u64,
}

// ── Bus ──────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct BusInner {
    subscribers: DashMap<u64, mpsc::Sender<FanoutEvent>>,
    next_subscriber: AtomicU64,
    seq: AtomicU64,
    dropped: AtomicU64,
    capacity: usize,
}

/// Cheap to clone; clones share subscribers.
#[derive(Debug, Clone)]
pub struct FanoutBus {
    inner: Arc<BusInner>,
}

impl Default for FanoutBus {
    fn default() -> Self {
        Self::new(courier_protocol::DEFAULT_FANOUT_CAPACITY)
    }
}

impl FanoutBus {
    /// `capacity` is the per-subscriber queue depth (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                next_subscriber: AtomicU64::new(1),
                seq: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a subscriber. Events published after this returns are
    /// queued for it; dropping the handle unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.subscribers.insert(id, tx);
        gauge!(fanout_metrics::SUBSCRIBERS).set(self.inner.subscribers.len() as f64);
        debug!(subscriber = id, "fanout subscriber registered");
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Dispatch to every subscriber without waiting. Returns how many
    /// subscribers accepted the event.
    pub fn publish(&self, topic: FanoutTopic, message: &Message) -> usize {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let event = FanoutEvent {
            topic,
            message: message.clone(),
            seq,
        };
        counter!(fanout_metrics::PUBLISHED_TOTAL, labels::TOPIC => topic.as_str()).increment(1);

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.inner.subscribers.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    counter!(fanout_metrics::DROPPED_TOTAL).increment(1);
                    debug!(
                        subscriber = *entry.key(),
                        seq,
                        event = topic.as_str(),
                        message_id = %message.id,
                        "subscriber queue full, dropping event"
                    );
                },
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        // Removing while holding a shard read guard would deadlock.
        if !closed.is_empty() {
            for id in closed {
                self.inner.subscribers.remove(&id);
            }
            gauge!(fanout_metrics::SUBSCRIBERS).set(self.inner.subscribers.len() as f64);
        }

        debug!(event = topic.as_str(), seq, delivered, message_id = %message.id, "published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Deliveries dropped to backpressure since the bus was created.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

// ── Subscription ─────────────────────────────────────────────────────────────

/// Receiving end of one subscriber's queue.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<FanoutEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<FanoutEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FanoutEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
            gauge!(fanout_metrics::SUBSCRIBERS).set(bus.subscribers.len() as f64);
            debug!(subscriber = self.id, "fanout subscriber removed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::DateTime,
        courier_protocol::{Direction, MessageKind, MessageStatus},
        std::time::Duration,
    };

    fn message(id: &str) -> Message {
        let at = DateTime::from_timestamp(1_703_123_456, 0).unwrap();
        Message {
            id: id.into(),
            correlation_id: None,
            conversation_id: "555".into(),
            from: "555".into(),
            to: "biz".into(),
            display_name: None,
            direction: Direction::Inbound,
            kind: MessageKind::Text,
            body: "hi".into(),
            status: MessageStatus::Sent,
            sent_at: at,
            status_at: None,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn every_subscriber_gets_each_event() {
        let bus = FanoutBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(FanoutTopic::NewMessage, &message("m1")), 2);
        assert_eq!(bus.publish(FanoutTopic::StatusUpdate, &message("m1")), 2);

        for sub in [&mut a, &mut b] {
            let first = sub.recv().await.unwrap();
            assert_eq!(first.topic, FanoutTopic::NewMessage);
            assert_eq!(first.seq, 1);
            let second = sub.recv().await.unwrap();
            assert_eq!(second.topic, FanoutTopic::StatusUpdate);
            assert_eq!(second.seq, 2);
        }
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let bus = FanoutBus::new(2);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for i in 0..5 {
            bus.publish(FanoutTopic::NewMessage, &message(&format!("m{i}")));
            // `fast` keeps up.
            assert!(fast.try_recv().is_some());
        }
        assert_eq!(bus.dropped_total(), 3);

        let kept: Vec<_> = std::iter::from_fn(|| slow.try_recv())
            .map(|e| e.message.id)
            .collect();
        assert_eq!(kept, ["m0", "m1"]);
    }

    #[tokio::test]
    async fn publish_with_stalled_subscriber_returns_promptly() {
        let bus = FanoutBus::new(1);
        let _stalled = bus.subscribe();
        let result = tokio::time::timeout(Duration::from_millis(500), async {
            for i in 0..10_000 {
                bus.publish(FanoutTopic::NewMessage, &message(&i.to_string()));
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(bus.dropped_total(), 9_999);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = FanoutBus::new(4);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(FanoutTopic::NewMessage, &message("m1")), 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = FanoutBus::default();
        assert_eq!(bus.publish(FanoutTopic::NewMessage, &message("m1")), 0);
        assert_eq!(bus.dropped_total(), 0);
    }
}
