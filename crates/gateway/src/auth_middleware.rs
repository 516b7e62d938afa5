use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use {
    courier_metrics::{counter, pairing as pairing_metrics},
    tracing::debug,
};

use crate::{
    api_error::ApiError,
    server::AppState,
    state::{GatewaySettings, GatewayState},
};

/// Axum extractor that resolves the caller's paired session token.
/// Rejects with 401 when there is none.
pub struct AuthSession(pub String);

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
    Arc<GatewayState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gw = Arc::<GatewayState>::from_ref(state);
        authorize_headers(&gw, &parts.headers)
            .await
            .map(AuthSession)
    }
}

/// Middleware that protects conversation routes behind a paired session.
pub async fn require_session(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match authorize_headers(&state.gateway, request.headers()).await {
        Ok(_) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Session cookie first, then `Authorization: Bearer <sid>`.
pub fn session_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| parse_cookie(h, cookie_name));
    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    })
}

async fn authorize_headers(gw: &GatewayState, headers: &HeaderMap) -> Result<String, ApiError> {
    if let Some(token) = session_token(headers, &gw.settings.cookie_name)
        && gw.gate.authorize(token).await?
    {
        return Ok(token.to_string());
    }
    counter!(pairing_metrics::UNAUTHORIZED_TOTAL).increment(1);
    debug!("rejecting request without a paired session");
    Err(ApiError::Unauthorized)
}

/// Parse a specific cookie value from a Cookie header string.
pub fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    for part in header.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(name)
            && let Some(value) = value.strip_prefix('=')
        {
            return Some(value);
        }
    }
    None
}

/// `Set-Cookie` value binding the browser to `sid`.
pub fn session_cookie(settings: &GatewaySettings, sid: &str) -> String {
    let mut cookie = format!(
        "{}={sid}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        settings.cookie_name, settings.cookie_max_age_secs
    );
    if settings.secure_cookie {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie(settings: &GatewaySettings) -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        settings.cookie_name
    )
}
