//! Metric name and label definitions.
//!
//! Centralized so the recorder configuration, the handlers and the docs agree
//! on what is exported.

/// Webhook / ingestion metrics
pub mod ingest {
    /// Provider envelopes received on the webhook
    pub const ENVELOPES_TOTAL: &str = "courier_ingest_envelopes_total";
    /// New messages persisted for the first time
    pub const MESSAGES_ACCEPTED_TOTAL: &str = "courier_ingest_messages_accepted_total";
    /// New-message events whose id was already stored
    pub const DUPLICATES_TOTAL: &str = "courier_ingest_duplicates_total";
    /// Units dropped for missing required fields
    pub const MALFORMED_TOTAL: &str = "courier_ingest_malformed_total";
    /// Units of a message kind the engine does not carry
    pub const UNSUPPORTED_TOTAL: &str = "courier_ingest_unsupported_total";
    /// Payloads with no recognizable envelope shape
    pub const UNRECOGNIZED_TOTAL: &str = "courier_ingest_unrecognized_total";
    /// Status events referencing no stored message
    pub const UNKNOWN_REFERENCE_TOTAL: &str = "courier_ingest_unknown_reference_total";
    /// Status events applied to a stored message
    pub const STATUS_APPLIED_TOTAL: &str = "courier_ingest_status_applied_total";
    /// Status events that would have lowered the stored status
    pub const STATUS_STALE_TOTAL: &str = "courier_ingest_status_stale_total";
    /// Store failures surfaced to the caller
    pub const STORE_ERRORS_TOTAL: &str = "courier_ingest_store_errors_total";
    /// Time spent applying one envelope, in seconds
    pub const ENVELOPE_DURATION_SECONDS: &str = "courier_ingest_envelope_duration_seconds";
}

/// Fanout bus metrics
pub mod fanout {
    /// Events published on the bus
    pub const PUBLISHED_TOTAL: &str = "courier_fanout_published_total";
    /// Per-subscriber deliveries dropped because the queue was full
    pub const DROPPED_TOTAL: &str = "courier_fanout_dropped_total";
    /// Currently registered subscribers
    pub const SUBSCRIBERS: &str = "courier_fanout_subscribers";
}

/// Pairing / session gate metrics
pub mod pairing {
    /// Pairing sessions created
    pub const INITIATED_TOTAL: &str = "courier_pairing_initiated_total";
    /// Pairing sessions confirmed
    pub const CONFIRMED_TOTAL: &str = "courier_pairing_confirmed_total";
    /// Confirm attempts on an expired pending session
    pub const EXPIRED_TOTAL: &str = "courier_pairing_expired_total";
    /// Read requests rejected for lack of a paired session
    pub const UNAUTHORIZED_TOTAL: &str = "courier_pairing_unauthorized_total";
}

/// Common label keys
pub mod labels {
    pub const TOPIC: &str = "topic";
}

/// Histogram buckets
pub mod buckets {
    /// Envelope processing is store-bound; most land well under 100ms.
    pub const ENVELOPE_DURATION: [f64; 10] =
        [0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];
}
