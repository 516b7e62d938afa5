use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

// ── Status ───────────────────────────────────────────────────────────────────

/// Delivery status of a message. Variants are declared in rank order so the
/// derived `Ord` matches the only legal direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// `sent` = 0, `delivered` = 1, `read` = 2.
    pub fn rank(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Whether moving from `self` to `next` keeps the status non-decreasing.
    pub fn admits(self, next: Self) -> bool {
        next.rank() >= self.rank()
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for MessageStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

// ── Kind / direction ─────────────────────────────────────────────────────────

/// Payload kind. Only text is carried today; new kinds get their own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum MessageKind {
    Text,
}

impl MessageKind {
    /// Map a provider `type` tag to a supported kind.
    pub fn from_provider(tag: &str) -> Option<Self> {
        match tag {
            "text" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
        }
    }
}

/// Whether the counterparty sent the message (`Inbound`) or we did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

/// A stored message. `id` is the provider-assigned dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub conversation_id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub direction: Direction,
    pub kind: MessageKind,
    pub body: String,
    pub status: MessageStatus,
    pub sent_at: DateTime<Utc>,
    /// Provider time of the most recent status confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_at: Option<DateTime<Utc>>,
    /// Store-assigned; orders messages within a conversation.
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Inbound and not yet read.
    pub fn is_unread(&self) -> bool {
        self.is_inbound() && self.status != MessageStatus::Read
    }
}

/// Per-counterparty view derived from the message set on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub display_name: String,
    pub last_message: Message,
    pub message_count: u64,
    pub unread_count: u64,
}
