//! Applies normalized events to the store and publishes what changed.
//!
//! Every effect is "write, then publish": a publish only follows a committed
//! write, and every committed change is published. Store failures surface as
//! [`Error::StoreUnavailable`]; everything else is absorbed and counted.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    chrono::Utc,
    courier_metrics::{counter, histogram, ingest as ingest_metrics},
    courier_protocol::{Direction, Message, MessageKind},
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{Error, Result},
    event::{InboundEvent, NewMessageEvent, StatusEvent},
    fanout::{FanoutBus, FanoutTopic},
    normalizer,
    store::{InsertOutcome, MessageStore, StatusChange},
};

/// Outcome of a status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Written and published.
    Applied(Message),
    /// Would have lowered the status; no write, no publish.
    Stale(Message),
    /// No stored message matched by id or correlation id.
    Unmatched,
}

impl StatusOutcome {
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Applied(m) | Self::Stale(m) => Some(m),
            Self::Unmatched => None,
        }
    }
}

/// Outcome of one [`InboundEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(Message),
    Duplicate(Message),
    Status(StatusOutcome),
}

/// Per-payload counts, returned to the webhook caller.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub accepted: u64,
    pub duplicates: u64,
    pub status_applied: u64,
    pub status_stale: u64,
    pub unmatched: u64,
    pub malformed: u64,
    pub unsupported: u64,
    pub unrecognized: u64,
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// Process-lifetime diagnostic counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    unsupported: AtomicU64,
    unrecognized: AtomicU64,
    unknown_references: AtomicU64,
    status_applied: AtomicU64,
    status_stale: AtomicU64,
    store_errors: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatsSnapshot {
    pub accepted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub unsupported: u64,
    pub unrecognized: u64,
    pub unknown_references: u64,
    pub status_applied: u64,
    pub status_stale: u64,
    pub store_errors: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        IngestStatsSnapshot {
            accepted: load(&self.accepted),
            duplicates: load(&self.duplicates),
            malformed: load(&self.malformed),
            unsupported: load(&self.unsupported),
            unrecognized: load(&self.unrecognized),
            unknown_references: load(&self.unknown_references),
            status_applied: load(&self.status_applied),
            status_stale: load(&self.status_stale),
            store_errors: load(&self.store_errors),
        }
    }

    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn MessageStore>,
    bus: FanoutBus,
    stats: Arc<IngestStats>,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn MessageStore>, bus: FanoutBus) -> Self {
        Self {
            store,
            bus,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn bus(&self) -> &FanoutBus {
        &self.bus
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Insert a message unless its id is already stored.
    ///
    /// Returns the stored record: the new one, or the existing one unchanged
    /// for a duplicate (which is not published again).
    pub async fn ingest_new_message(&self, event: NewMessageEvent) -> Result<Message> {
        match self.apply_new_message(event).await? {
            InsertOutcome::Inserted(m) | InsertOutcome::Existing(m) => Ok(m),
        }
    }

    /// Apply a delivery/read confirmation.
    ///
    /// The target is looked up by id, then through the correlation index.
    /// Rank may stay equal (the timestamp is refreshed) or rise, never fall.
    pub async fn ingest_status_update(&self, event: StatusEvent) -> Result<StatusOutcome> {
        let Some(target) = self.resolve_target(&event).await? else {
            return Ok(self.unmatched(&event));
        };

        let change = self
            .guard(self.store.advance_status(&target.id, event.status, event.timestamp))
            .await?;
        match change {
            Some(StatusChange::Applied(message)) => {
                IngestStats::bump(&self.stats.status_applied, 1);
                counter!(ingest_metrics::STATUS_APPLIED_TOTAL).increment(1);
                debug!(message_id = %message.id, status = %message.status, "status applied");
                self.bus.publish(FanoutTopic::StatusUpdate, &message);
                Ok(StatusOutcome::Applied(message))
            },
            Some(StatusChange::Stale(message)) => {
                IngestStats::bump(&self.stats.status_stale, 1);
                counter!(ingest_metrics::STATUS_STALE_TOTAL).increment(1);
                debug!(
                    message_id = %message.id,
                    current = %message.status,
                    incoming = %event.status,
                    "ignoring status regression"
                );
                Ok(StatusOutcome::Stale(message))
            },
            None => Ok(self.unmatched(&event)),
        }
    }

    pub async fn ingest(&self, event: InboundEvent) -> Result<IngestOutcome> {
        match event {
            InboundEvent::NewMessage(e) => Ok(match self.apply_new_message(e).await? {
                InsertOutcome::Inserted(m) => IngestOutcome::Accepted(m),
                InsertOutcome::Existing(m) => IngestOutcome::Duplicate(m),
            }),
            InboundEvent::Status(e) => Ok(IngestOutcome::Status(self.ingest_status_update(e).await?)),
        }
    }

    /// Normalize a raw provider payload and apply every event in it.
    ///
    /// Stops at the first store failure; events before it stay applied and
    /// a retried payload replays idempotently.
    pub async fn ingest_payload(&self, payload: &Value) -> Result<IngestReport> {
        let started = Instant::now();
        counter!(ingest_metrics::ENVELOPES_TOTAL).increment(1);

        let normalized = normalizer::normalize(payload, Utc::now());
        let mut report = IngestReport {
            malformed: normalized.malformed,
            unsupported: normalized.unsupported,
            unrecognized: normalized.unrecognized,
            ..Default::default()
        };
        self.count_dropped(&report);

        for event in normalized.events {
            match self.ingest(event).await? {
                IngestOutcome::Accepted(_) => report.accepted += 1,
                IngestOutcome::Duplicate(_) => report.duplicates += 1,
                IngestOutcome::Status(StatusOutcome::Applied(_)) => report.status_applied += 1,
                IngestOutcome::Status(StatusOutcome::Stale(_)) => report.status_stale += 1,
                IngestOutcome::Status(StatusOutcome::Unmatched) => report.unmatched += 1,
            }
        }

        histogram!(ingest_metrics::ENVELOPE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        debug!(?report, "payload ingested");
        Ok(report)
    }

    /// Create a locally-originated outbound text message and ingest it.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
        sender_id: Option<&str>,
    ) -> Result<Message> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(Error::malformed("conversation id is required"));
        }
        if body.trim().is_empty() {
            return Err(Error::malformed("message body is empty"));
        }

        let event = NewMessageEvent {
            id: format!("local.{}", uuid::Uuid::new_v4()),
            correlation_id: None,
            conversation_id: conversation_id.to_string(),
            from: sender_id
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("local")
                .to_string(),
            to: conversation_id.to_string(),
            display_name: None,
            direction: Direction::Outbound,
            kind: MessageKind::Text,
            body: body.to_string(),
            sent_at: Utc::now(),
        };
        let message = self.ingest_new_message(event).await?;
        info!(message_id = %message.id, conversation_id, "outbound message stored");
        Ok(message)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn apply_new_message(&self, event: NewMessageEvent) -> Result<InsertOutcome> {
        let outcome = self
            .guard(self.store.insert_if_absent(event.into_message()))
            .await?;
        match &outcome {
            InsertOutcome::Inserted(message) => {
                IngestStats::bump(&self.stats.accepted, 1);
                counter!(ingest_metrics::MESSAGES_ACCEPTED_TOTAL).increment(1);
                debug!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    "message stored"
                );
                self.bus.publish(FanoutTopic::NewMessage, message);
            },
            InsertOutcome::Existing(message) => {
                IngestStats::bump(&self.stats.duplicates, 1);
                counter!(ingest_metrics::DUPLICATES_TOTAL).increment(1);
                debug!(message_id = %message.id, "duplicate message ignored");
            },
        }
        Ok(outcome)
    }

    async fn resolve_target(&self, event: &StatusEvent) -> Result<Option<Message>> {
        if let Some(found) = self.guard(self.store.get(&event.id)).await? {
            return Ok(Some(found));
        }
        let mut keys = vec![event.id.as_str()];
        if let Some(correlation_id) = event.correlation_id.as_deref()
            && correlation_id != event.id
        {
            keys.insert(0, correlation_id);
        }
        for key in keys {
            if let Some(found) = self.guard(self.store.find_by_correlation_id(key)).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn unmatched(&self, event: &StatusEvent) -> StatusOutcome {
        IngestStats::bump(&self.stats.unknown_references, 1);
        counter!(ingest_metrics::UNKNOWN_REFERENCE_TOTAL).increment(1);
        let err = Error::unknown_reference(&event.id);
        warn!(status = %event.status, error = %err, "dropping status event");
        StatusOutcome::Unmatched
    }

    fn count_dropped(&self, report: &IngestReport) {
        IngestStats::bump(&self.stats.malformed, report.malformed);
        IngestStats::bump(&self.stats.unsupported, report.unsupported);
        IngestStats::bump(&self.stats.unrecognized, report.unrecognized);
        counter!(ingest_metrics::MALFORMED_TOTAL).increment(report.malformed);
        counter!(ingest_metrics::UNSUPPORTED_TOTAL).increment(report.unsupported);
        counter!(ingest_metrics::UNRECOGNIZED_TOTAL).increment(report.unrecognized);
    }

    /// Count and log store failures on the way out.
    async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        fut.await.inspect_err(|e| {
            if e.is_retryable() {
                IngestStats::bump(&self.stats.store_errors, 1);
                counter!(ingest_metrics::STORE_ERRORS_TOTAL).increment(1);
            }
            error!(error = %e, "message store call failed");
        })
    }
}
