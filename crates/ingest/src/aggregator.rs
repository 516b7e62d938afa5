//! Per-conversation views derived from the message set on every read.

use std::{collections::HashMap, sync::Arc};

use courier_protocol::{ConversationSummary, Message};

use crate::{
    error::Result,
    normalizer::fallback_display_name,
    store::{MessageStore, chronological},
};

/// Group messages by counterparty, most recently active conversation first.
///
/// `lastMessage` is the maximum by `(created_at, id)`; the display name is
/// the earliest one any message carries, else the synthesized fallback.
pub fn summarize(mut messages: Vec<Message>) -> Vec<ConversationSummary> {
    messages.sort_by(chronological);

    let mut groups: HashMap<String, Vec<Message>> = HashMap::new();
    for message in messages {
        groups
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    let mut summaries: Vec<ConversationSummary> = groups
        .into_iter()
        .filter_map(|(conversation_id, group)| {
            let display_name = group
                .iter()
                .find_map(|m| m.display_name.clone())
                .unwrap_or_else(|| fallback_display_name(&conversation_id));
            let message_count = group.len() as u64;
            let unread_count = group.iter().filter(|m| m.is_unread()).count() as u64;
            let last_message = group.into_iter().next_back()?;
            Some(ConversationSummary {
                conversation_id,
                display_name,
                last_message,
                message_count,
                unread_count,
            })
        })
        .collect();

    summaries.sort_by(|a, b| chronological(&b.last_message, &a.last_message));
    summaries
}

/// Read-side facade over a [`MessageStore`].
#[derive(Clone)]
pub struct ConversationAggregator {
    store: Arc<dyn MessageStore>,
}

impl ConversationAggregator {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(summarize(self.store.list_all().await?))
    }

    /// Chronological (oldest first), every status included.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut messages = self.store.list_conversation(conversation_id).await?;
        messages.sort_by(chronological);
        Ok(messages)
    }

    pub async fn list_messages(&self) -> Result<Vec<Message>> {
        let mut messages = self.store.list_all().await?;
        messages.sort_by(chronological);
        Ok(messages)
    }
}
