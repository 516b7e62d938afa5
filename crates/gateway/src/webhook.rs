//! Provider webhook: subscription handshake, signature check, ingestion.

use {
    axum::{
        body::Bytes,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    courier_ingest::IngestReport,
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    tracing::{debug, info, warn},
};

use crate::{api_error::ApiError, server::AppState};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` of the raw body.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Verify an `X-Hub-Signature-256` value against the raw body.
pub fn verify_signature(body: &[u8], signature_header: &str, app_secret: &str) -> bool {
    let Some(expected) = signature_header.strip_prefix("sha256=") else {
        warn!("invalid signature header format (missing sha256= prefix)");
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        warn!("signature header is not hex");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        warn!("failed to create HMAC");
        return false;
    };
    mac.update(body);
    // `verify_slice` compares in constant time.
    mac.verify_slice(&expected).is_ok()
}

/// Echo `challenge` when `mode` is `subscribe` and the token matches.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    verify_token: &str,
) -> Option<String> {
    let mode = mode?;
    let token = token?;
    let challenge = challenge?;

    (mode == "subscribe" && token == verify_token).then(|| challenge.to_string())
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    status: &'static str,
    #[serde(flatten)]
    report: IngestReport,
}

/// `GET /api/webhook`: subscription handshake.
pub async fn webhook_verify_handler(
    State(state): State<AppState>,
    Query(query): Query<SubscriptionQuery>,
) -> Response {
    let Some(expected) = state.gateway.settings.verify_token.as_deref() else {
        return (StatusCode::FORBIDDEN, "webhook verification is not configured").into_response();
    };
    match verify_subscription(
        query.mode.as_deref(),
        query.verify_token.as_deref(),
        query.challenge.as_deref(),
        expected,
    ) {
        Some(challenge) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        },
        None => {
            warn!("webhook subscription verification failed");
            (StatusCode::FORBIDDEN, "verification failed").into_response()
        },
    }
}

/// `POST /api/webhook`: ingest a provider payload.
///
/// Acknowledges with 200 whatever the payload contained; only a store
/// failure (503) asks the provider to retry.
pub async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, Response> {
    if let Some(secret) = state.gateway.settings.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(&body, signature, secret) {
            warn!("rejecting webhook with invalid signature");
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "invalid signature"})),
            )
                .into_response());
        }
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
        warn!(error = %e, "webhook body is not JSON");
        serde_json::Value::Null
    });

    let pipeline = state.gateway.pipeline.clone();
    let report = run_detached(async move { pipeline.ingest_payload(&payload).await })
        .await
        .map_err(IntoResponse::into_response)?;
    debug!(?report, "webhook processed");

    serde_json::to_value(WebhookAck {
        status: "success",
        report,
    })
    .map(Json)
    .map_err(|e| ApiError::Internal(e.to_string()).into_response())
}

/// Run an ingestion future on its own task so a dropped request cannot
/// abort a store write midway.
pub(crate) async fn run_detached<T, F>(fut: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = courier_ingest::Result<T>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::Internal(format!("ingest task failed: {e}"))),
    }
}
