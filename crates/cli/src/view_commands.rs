//! `courier conversations` / `courier history`: read-only views of the store.

use {
    courier_config::CourierConfig,
    courier_gateway::Stores,
    courier_ingest::ConversationAggregator,
    courier_protocol::{ConversationSummary, Direction, Message, timestamp},
};

const PREVIEW_CHARS: usize = 48;

pub async fn conversations(config: &CourierConfig) -> anyhow::Result<()> {
    let aggregator = open_aggregator(config).await?;
    let summaries = aggregator.list_conversations().await?;
    if summaries.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    for summary in &summaries {
        println!("{}", summary_line(summary));
    }
    Ok(())
}

pub async fn history(config: &CourierConfig, conversation_id: &str) -> anyhow::Result<()> {
    let aggregator = open_aggregator(config).await?;
    let messages = aggregator.get_conversation(conversation_id).await?;
    if messages.is_empty() {
        println!("No messages for {conversation_id}.");
        return Ok(());
    }
    for message in &messages {
        println!("{}", history_line(message));
    }
    Ok(())
}

async fn open_aggregator(config: &CourierConfig) -> anyhow::Result<ConversationAggregator> {
    let stores = Stores::open(&config.storage).await?;
    Ok(ConversationAggregator::new(stores.messages))
}

fn summary_line(summary: &ConversationSummary) -> String {
    let unread = if summary.unread_count > 0 {
        format!(" ({} unread)", summary.unread_count)
    } else {
        String::new()
    };
    format!(
        "{}  {} <{}>  {} msgs{}  {}",
        timestamp::format_display(&summary.last_message.created_at),
        summary.display_name,
        summary.conversation_id,
        summary.message_count,
        unread,
        preview(&summary.last_message.body),
    )
}

fn history_line(message: &Message) -> String {
    let arrow = match message.direction {
        Direction::Inbound => "<-",
        Direction::Outbound => "->",
    };
    format!(
        "{}  {arrow} {}  [{}]",
        timestamp::format_display(&message.sent_at),
        message.body,
        message.status.as_str(),
    )
}

fn preview(body: &str) -> String {
    let line = body.lines().next().unwrap_or("");
    if line.chars().count() > PREVIEW_CHARS || body.contains('\n') {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
