//! Message persistence boundary.

use std::sync::atomic::{AtomicI64, Ordering};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    courier_protocol::{Message, MessageStatus, timestamp},
    dashmap::{DashMap, mapref::entry::Entry},
};

use crate::error::Result;

/// Result of an insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was created; carries the stored message with `created_at` set.
    Inserted(Message),
    /// A row with the same id already existed; carries it unchanged.
    Existing(Message),
}

/// Result of a status compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// Rank was not lower than the stored one; status and `status_at` written.
    Applied(Message),
    /// Rank was lower than the stored one; nothing written.
    Stale(Message),
}

/// Storage used by the ingestion pipeline.
///
/// Implementations must make `insert_if_absent` atomic per id and
/// `advance_status` an atomic compare-and-set on the status rank, so
/// concurrent callers never duplicate a row or regress a status.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert unless the id exists. The store assigns `created_at`.
    async fn insert_if_absent(&self, message: Message) -> Result<InsertOutcome>;

    async fn get(&self, id: &str) -> Result<Option<Message>>;

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Message>>;

    /// Move `id` to `status` if that does not lower its rank.
    /// Returns `None` when no such message exists.
    async fn advance_status(
        &self,
        id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>>;

    /// Every message, ascending by `(created_at, id)`.
    async fn list_all(&self) -> Result<Vec<Message>>;

    /// One conversation, ascending by `(created_at, id)`.
    async fn list_conversation(&self, conversation_id: &str) -> Result<Vec<Message>>;
}

// ── Clock ────────────────────────────────────────────────────────────────────

/// Strictly increasing microsecond clock for `created_at`.
///
/// Wall time can repeat or step backwards; two inserts must still get
/// distinct, ordered stamps.
#[derive(Debug, Default)]
pub struct StoreClock {
    last: AtomicI64,
}

impl StoreClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never returns a value at or below a previously returned one.
    pub fn now(&self) -> DateTime<Utc> {
        let wall = timestamp::to_micros(&Utc::now());
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return timestamp::from_micros(next).unwrap_or_else(Utc::now),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Make sure future stamps land after `at` (e.g. rows loaded from disk).
    pub fn observe(&self, at: &DateTime<Utc>) {
        self.last
            .fetch_max(timestamp::to_micros(at), Ordering::AcqRel);
    }
}

/// Sort key shared by every listing.
pub fn chronological(a: &Message, b: &Message) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Process-local store. Per-id atomicity comes from the shard lock held by
/// `DashMap::entry` / `get_mut`.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: DashMap<String, Message>,
    /// correlation id → message id
    by_correlation: DashMap<String, String>,
    clock: StoreClock,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert_if_absent(&self, mut message: Message) -> Result<InsertOutcome> {
        match self.messages.entry(message.id.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                message.created_at = self.clock.now();
                if let Some(correlation_id) = &message.correlation_id {
                    self.by_correlation
                        .entry(correlation_id.clone())
                        .or_insert_with(|| message.id.clone());
                }
                slot.insert(message.clone());
                Ok(InsertOutcome::Inserted(message))
            },
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        Ok(self.messages.get(id).map(|m| m.value().clone()))
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Message>> {
        let Some(id) = self.by_correlation.get(correlation_id).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        self.get(&id).await
    }

    async fn advance_status(
        &self,
        id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>> {
        let Some(mut row) = self.messages.get_mut(id) else {
            return Ok(None);
        };
        if !row.status.admits(status) {
            return Ok(Some(StatusChange::Stale(row.clone())));
        }
        row.status = status;
        row.status_at = Some(at);
        Ok(Some(StatusChange::Applied(row.clone())))
    }

    async fn list_all(&self) -> Result<Vec<Message>> {
        let mut all: Vec<Message> = self.messages.iter().map(|r| r.value().clone()).collect();
        all.sort_by(chronological);
        Ok(all)
    }

    async fn list_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut list: Vec<Message> = self
            .messages
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .map(|r| r.value().clone())
            .collect();
        list.sort_by(chronological);
        Ok(list)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        courier_protocol::{Direction, MessageKind},
        std::sync::Arc,
    };

    fn message(id: &str, conversation: &str) -> Message {
        let at = DateTime::from_timestamp(1_703_123_456, 0).unwrap();
        Message {
            id: id.into(),
            correlation_id: None,
            conversation_id: conversation.into(),
            from: conversation.into(),
            to: "biz".into(),
            display_name: None,
            direction: Direction::Inbound,
            kind: MessageKind::Text,
            body: format!("body of {id}"),
            status: MessageStatus::Sent,
            sent_at: at,
            status_at: None,
            created_at: at,
        }
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let clock = StoreClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn clock_observes_future_rows() {
        let clock = StoreClock::new();
        let future = Utc::now() + chrono::Duration::hours(1);
        clock.observe(&future);
        assert!(clock.now() > future);
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_id() {
        let store = InMemoryMessageStore::new();
        let first = store.insert_if_absent(message("m1", "555")).await.unwrap();
        let InsertOutcome::Inserted(stored) = first else {
            panic!("expected insert");
        };

        let mut dup = message("m1", "555");
        dup.body = "other".into();
        let second = store.insert_if_absent(dup).await.unwrap();
        assert_eq!(second, InsertOutcome::Existing(stored.clone()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m1").await.unwrap().unwrap().body, "body of m1");
    }

    #[tokio::test]
    async fn created_at_is_store_assigned_and_ordered() {
        let store = InMemoryMessageStore::new();
        for id in ["c", "a", "b"] {
            store.insert_if_absent(message(id, "555")).await.unwrap();
        }
        let ids: Vec<_> = store
            .list_conversation("555")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn correlation_index() {
        let store = InMemoryMessageStore::new();
        let mut msg = message("m1", "555");
        msg.correlation_id = Some("corr".into());
        store.insert_if_absent(msg).await.unwrap();

        assert_eq!(
            store.find_by_correlation_id("corr").await.unwrap().unwrap().id,
            "m1"
        );
        assert!(store.find_by_correlation_id("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn advance_status_never_regresses() {
        let store = InMemoryMessageStore::new();
        store.insert_if_absent(message("m1", "555")).await.unwrap();
        let at = Utc::now();

        let change = store
            .advance_status("m1", MessageStatus::Read, at)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(change, StatusChange::Applied(ref m) if m.status == MessageStatus::Read));

        let change = store
            .advance_status("m1", MessageStatus::Delivered, at)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(change, StatusChange::Stale(ref m) if m.status == MessageStatus::Read));

        assert!(
            store
                .advance_status("missing", MessageStatus::Read, at)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn concurrent_status_updates_end_at_max_rank() {
        let store = Arc::new(InMemoryMessageStore::new());
        store.insert_if_absent(message("m1", "555")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..60 {
            let store = Arc::clone(&store);
            let status = match i % 3 {
                0 => MessageStatus::Sent,
                1 => MessageStatus::Delivered,
                _ => MessageStatus::Read,
            };
            handles.push(tokio::spawn(async move {
                store.advance_status("m1", status, Utc::now()).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(
            store.get("m1").await.unwrap().unwrap().status,
            MessageStatus::Read
        );
    }
}
