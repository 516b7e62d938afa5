//! Wire types shared by the ingestion engine, the gateway and the CLI.
//!
//! Everything that crosses a process boundary lives here: the canonical
//! [`Message`] record, derived [`ConversationSummary`] views, pairing status,
//! and the [`EventFrame`] pushed to live subscribers. Provider timestamps are
//! interpreted exclusively through [`timestamp`].

pub mod message;
pub mod timestamp;

use serde::{Deserialize, Serialize};

pub use message::{
    ConversationSummary, Direction, Message, MessageKind, MessageStatus, ParseStatusError,
};

// ── Constants ────────────────────────────────────────────────────────────────

/// Upper bound for a webhook request body.
pub const MAX_WEBHOOK_BYTES: usize = 10 * 1024 * 1024; // 10 MB
/// Default per-subscriber fanout queue depth.
pub const DEFAULT_FANOUT_CAPACITY: usize = 256;
/// Default lifetime of an unconfirmed pairing session.
pub const DEFAULT_PAIRING_TTL_SECS: u64 = 15 * 60;

// ── Event names ──────────────────────────────────────────────────────────────

pub mod events {
    /// A message was persisted for the first time.
    pub const NEW_MESSAGE: &str = "new_message";
    /// A stored message changed delivery status.
    pub const STATUS_UPDATE: &str = "status_update";
    /// First frame on every subscription, sent once the subscriber is live.
    pub const CONNECTED: &str = "connected";
}

// ── Pairing ──────────────────────────────────────────────────────────────────

/// Pairing session state. `Paired` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStatus {
    Pending,
    Paired,
}

impl PairStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paired => "paired",
        }
    }
}

impl std::str::FromStr for PairStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paired" => Ok(Self::Paired),
            other => Err(format!("unknown pair status: {other}")),
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Gateway → subscriber server-push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub r#type: String, // always "event"
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value, seq: u64) -> Self {
        Self {
            r#type: "event".into(),
            event: event.into(),
            payload: Some(payload),
            seq: Some(seq),
        }
    }
}
