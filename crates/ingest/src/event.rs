//! Canonical inbound events produced by the normalizer.

use {
    chrono::{DateTime, Utc},
    courier_protocol::{Direction, Message, MessageKind, MessageStatus},
};

/// One unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    NewMessage(NewMessageEvent),
    Status(StatusEvent),
}

impl InboundEvent {
    /// Identifier the event refers to, for logs.
    pub fn reference(&self) -> &str {
        match self {
            Self::NewMessage(e) => &e.id,
            Self::Status(e) => &e.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageEvent {
    pub id: String,
    pub correlation_id: Option<String>,
    pub conversation_id: String,
    pub from: String,
    pub to: String,
    pub display_name: Option<String>,
    pub direction: Direction,
    pub kind: MessageKind,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl NewMessageEvent {
    /// Build the row to insert. `created_at` is a placeholder the store
    /// replaces with its own clock.
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            correlation_id: self.correlation_id,
            conversation_id: self.conversation_id,
            from: self.from,
            to: self.to,
            display_name: self.display_name,
            direction: self.direction,
            kind: self.kind,
            body: self.body,
            status: MessageStatus::Sent,
            sent_at: self.sent_at,
            status_at: None,
            created_at: self.sent_at,
        }
    }
}

/// Delivery/read confirmation. `id` may be either the message id or its
/// correlation id; the pipeline tries both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub id: String,
    pub correlation_id: Option<String>,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub recipient_id: Option<String>,
}
