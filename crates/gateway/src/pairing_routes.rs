//! Pairing and session endpoints.

use {
    axum::{
        extract::{Query, State, rejection::JsonRejection},
        http::{HeaderMap, header},
        response::{IntoResponse, Json, Response},
    },
    courier_protocol::PairStatus,
    serde::{Deserialize, Serialize},
};

use crate::{
    api_error::ApiError,
    auth_middleware::{clear_session_cookie, session_cookie, session_token},
    server::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    sid: String,
    code: String,
    qr_payload: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    sid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    sid: String,
}

/// `POST /api/pairing/init`
pub async fn pairing_init_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let gate = &state.gateway.gate;
    let session = gate.init().await?;
    Ok(Json(InitResponse {
        qr_payload: gate.qr_payload(&session),
        sid: session.sid,
        code: session.code,
        expires_at: session.expires_at,
    })
    .into_response())
}

/// `GET /api/pairing/status?sid=..`
pub async fn pairing_status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sid = query
        .sid
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("sid is required".into()))?;
    let status = state.gateway.gate.status(&sid).await?;
    Ok(Json(serde_json::json!({ "status": status })))
}

/// `POST /api/pairing/confirm {sid}`: pairs the session and binds the
/// caller's cookie to it.
pub async fn pairing_confirm_handler(
    State(state): State<AppState>,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let session = state.gateway.gate.confirm(&request.sid).await?;
    let cookie = session_cookie(&state.gateway.settings, &session.sid);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "status": PairStatus::Paired })),
    )
        .into_response())
}

/// `GET /api/session`
pub async fn session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let paired = match session_token(&headers, &state.gateway.settings.cookie_name) {
        Some(token) => state.gateway.gate.authorize(token).await?,
        None => false,
    };
    Ok(Json(serde_json::json!({ "paired": paired })))
}

/// `POST /api/auth/logout`
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers, &state.gateway.settings.cookie_name) {
        state.gateway.gate.logout(token).await?;
    }
    Ok((
        [(header::SET_COOKIE, clear_session_cookie(&state.gateway.settings))],
        Json(serde_json::json!({ "ok": true })),
    )
        .into_response())
}
