//! Read and send endpoints behind the session gate.

use {
    axum::{
        extract::{Path, State, rejection::JsonRejection},
        response::Json,
    },
    courier_protocol::{ConversationSummary, Message},
    serde::Deserialize,
};

use crate::{api_error::ApiError, server::AppState, webhook::run_detached};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(alias = "wa_id")]
    conversation_id: String,
    #[serde(alias = "text")]
    body: String,
    #[serde(default, alias = "user_number")]
    sender_id: Option<String>,
}

/// `GET /api/conversations`
pub async fn list_conversations_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(state.gateway.aggregator.list_conversations().await?))
}

/// `GET /api/conversations/{conversation_id}`
pub async fn get_conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(
        state
            .gateway
            .aggregator
            .get_conversation(&conversation_id)
            .await?,
    ))
}

/// `GET /api/messages`
pub async fn list_messages_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.gateway.aggregator.list_messages().await?))
}

/// `POST /api/messages`
pub async fn send_message_handler(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let pipeline = state.gateway.pipeline.clone();
    let message = run_detached(async move {
        pipeline
            .send_message(
                &request.conversation_id,
                &request.body,
                request.sender_id.as_deref(),
            )
            .await
    })
    .await?;
    Ok(Json(message))
}
