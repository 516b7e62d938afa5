#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests over a real listener: pairing, webhook intake,
//! conversation reads and live WebSocket fanout.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    hmac::{Hmac, Mac},
    serde_json::{Value, json},
    sha2::Sha256,
    tokio::net::TcpListener,
    tokio_tungstenite::{
        connect_async,
        tungstenite::{Message as WsMessage, client::IntoClientRequest, http::HeaderValue},
    },
};

use {
    courier_config::CourierConfig,
    courier_gateway::{GatewayState, build_gateway_app},
};

async fn start_server(config: CourierConfig) -> (SocketAddr, Arc<GatewayState>) {
    let state = GatewayState::in_memory(&config);
    let app = build_gateway_app(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn start_default_server() -> SocketAddr {
    start_server(CourierConfig::default()).await.0
}

/// Run the pairing handshake and return the session cookie header value.
async fn pair(client: &reqwest::Client, addr: SocketAddr) -> String {
    let init: Value = client
        .post(format!("http://{addr}/api/pairing/init"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sid = init["sid"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("http://{addr}/api/pairing/confirm"))
        .json(&json!({ "sid": sid }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    set_cookie.split(';').next().unwrap().to_string()
}

fn text_message(id: &str, from: &str, body: &str, ts: i64) -> Value {
    json!({
        "entry": [{
            "changes": [{
                "field": "messages",
                "value": {
                    "metadata": { "display_phone_number": "15550000000" },
                    "contacts": [{ "wa_id": from, "profile": { "name": "Alice" } }],
                    "messages": [{
                        "id": id,
                        "from": from,
                        "timestamp": ts.to_string(),
                        "type": "text",
                        "text": { "body": body }
                    }]
                }
            }]
        }]
    })
}

fn status_payload(id: &str, status: &str, ts: i64) -> Value {
    json!({
        "statuses": [{
            "id": id,
            "status": status,
            "timestamp": ts.to_string(),
            "recipient_id": "15551234567"
        }]
    })
}

async fn post_webhook(client: &reqwest::Client, addr: SocketAddr, payload: &Value) -> Value {
    let resp = client
        .post(format!("http://{addr}/api/webhook"))
        .json(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

async fn get_json(client: &reqwest::Client, url: String, cookie: &str) -> Value {
    let resp = client
        .get(url)
        .header("Cookie", cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

// ── Pairing ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pairing_flow_issues_session_cookie() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();

    let init: Value = client
        .post(format!("http://{addr}/api/pairing/init"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sid = init["sid"].as_str().unwrap();
    let code = init["code"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(init["qrPayload"].as_str().unwrap().contains(sid));

    let status: Value = client
        .get(format!("http://{addr}/api/pairing/status?sid={sid}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "pending");

    let resp = client
        .post(format!("http://{addr}/api/pairing/confirm"))
        .json(&json!({ "sid": sid }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let set_cookie = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with(&format!("courier_session={sid}")));
    assert!(set_cookie.contains("HttpOnly"));

    let status: Value = client
        .get(format!("http://{addr}/api/pairing/status?sid={sid}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "paired");

    let session: Value = get_json(
        &client,
        format!("http://{addr}/api/session"),
        &format!("courier_session={sid}"),
    )
    .await;
    assert_eq!(session["paired"], true);
}

#[tokio::test]
async fn unknown_pairing_session_is_not_found() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/api/pairing/status?sid=nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("http://{addr}/api/pairing/confirm"))
        .json(&json!({ "sid": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(format!("http://{addr}/api/pairing/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn expired_pairing_cannot_be_confirmed() {
    let mut config = CourierConfig::default();
    config.pairing.ttl_secs = 0;
    let (addr, _state) = start_server(config).await;
    let client = reqwest::Client::new();

    let init: Value = client
        .post(format!("http://{addr}/api/pairing/init"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let resp = client
        .post(format!("http://{addr}/api/pairing/confirm"))
        .json(&json!({ "sid": init["sid"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 410);
}

#[tokio::test]
async fn protected_routes_require_session() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();

    for path in ["/api/conversations", "/api/messages", "/api/conversations/123"] {
        let resp = client
            .get(format!("http://{addr}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401, "{path}");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "not authenticated");
    }

    // A pending (unconfirmed) sid is not a session.
    let init: Value = client
        .post(format!("http://{addr}/api/pairing/init"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let resp = client
        .get(format!("http://{addr}/api/conversations"))
        .header("Cookie", format!("courier_session={}", init["sid"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn bearer_token_is_accepted() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;
    let sid = cookie.trim_start_matches("courier_session=");

    let resp = client
        .get(format!("http://{addr}/api/messages"))
        .bearer_auth(sid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn logout_revokes_session() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;

    let resp = client
        .post(format!("http://{addr}/api/auth/logout"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["set-cookie"].to_str().unwrap().contains("Max-Age=0"));

    let resp = client
        .get(format!("http://{addr}/api/conversations"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

// ── Webhook + conversations ──────────────────────────────────────────────────

#[tokio::test]
async fn webhook_message_shows_up_in_conversations() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;

    let ack = post_webhook(
        &client,
        addr,
        &text_message("wamid.1", "15551234567", "hello", 1_703_123_456),
    )
    .await;
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["accepted"], 1);

    post_webhook(
        &client,
        addr,
        &text_message("wamid.2", "15551234567", "again", 1_703_123_500),
    )
    .await;

    let conversations = get_json(&client, format!("http://{addr}/api/conversations"), &cookie).await;
    let list = conversations.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["conversationId"], "15551234567");
    assert_eq!(list[0]["displayName"], "Alice");
    assert_eq!(list[0]["messageCount"], 2);
    assert_eq!(list[0]["unreadCount"], 2);
    assert_eq!(list[0]["lastMessage"]["body"], "again");

    let history = get_json(
        &client,
        format!("http://{addr}/api/conversations/15551234567"),
        &cookie,
    )
    .await;
    let bodies: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["hello", "again"]);
}

#[tokio::test]
async fn duplicate_delivery_is_stored_once() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;
    let payload = text_message("wamid.dup", "15550001111", "once", 1_703_123_456);

    let first = post_webhook(&client, addr, &payload).await;
    let second = post_webhook(&client, addr, &payload).await;
    assert_eq!(first["accepted"], 1);
    assert_eq!(second["accepted"], 0);
    assert_eq!(second["duplicates"], 1);

    let messages = get_json(&client, format!("http://{addr}/api/messages"), &cookie).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn status_never_regresses() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;

    post_webhook(
        &client,
        addr,
        &text_message("wamid.s", "15550002222", "hi", 1_703_123_456),
    )
    .await;
    let read = post_webhook(&client, addr, &status_payload("wamid.s", "read", 1_703_123_600)).await;
    assert_eq!(read["statusApplied"], 1);
    let late = post_webhook(
        &client,
        addr,
        &status_payload("wamid.s", "delivered", 1_703_123_550),
    )
    .await;
    assert_eq!(late["statusStale"], 1);

    let history = get_json(
        &client,
        format!("http://{addr}/api/conversations/15550002222"),
        &cookie,
    )
    .await;
    assert_eq!(history[0]["status"], "read");

    let conversations = get_json(&client, format!("http://{addr}/api/conversations"), &cookie).await;
    assert_eq!(conversations[0]["unreadCount"], 0);
}

#[tokio::test]
async fn unmatched_status_and_garbage_are_acknowledged() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();

    let ack = post_webhook(&client, addr, &status_payload("ghost", "read", 1_703_123_456)).await;
    assert_eq!(ack["unmatched"], 1);

    let resp = client
        .post(format!("http://{addr}/api/webhook"))
        .body("not json at all")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["accepted"], 0);
}

#[tokio::test]
async fn send_message_is_listed_as_outbound() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;

    let resp = client
        .post(format!("http://{addr}/api/messages"))
        .header("Cookie", &cookie)
        .json(&json!({ "wa_id": "15553334444", "text": "on my way" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let sent: Value = resp.json().await.unwrap();
    assert_eq!(sent["direction"], "outbound");
    assert_eq!(sent["status"], "sent");
    assert!(sent["id"].as_str().unwrap().starts_with("local."));

    let resp = client
        .post(format!("http://{addr}/api/messages"))
        .header("Cookie", &cookie)
        .json(&json!({ "conversationId": "15553334444", "body": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ── Webhook verification ─────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_handshake() {
    let mut config = CourierConfig::default();
    config.webhook.verify_token = Some("s3cret".into());
    let (addr, _state) = start_server(config).await;
    let client = reqwest::Client::new();

    let ok = client
        .get(format!(
            "http://{addr}/api/webhook?hub.mode=subscribe&hub.verify_token=s3cret&hub.challenge=42"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    assert_eq!(ok.text().await.unwrap(), "42");

    let bad = client
        .get(format!(
            "http://{addr}/api/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=42"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 403);
}

#[tokio::test]
async fn signed_webhooks_are_checked() {
    let mut config = CourierConfig::default();
    config.webhook.app_secret = Some("app-secret".into());
    let (addr, state) = start_server(config).await;
    let client = reqwest::Client::new();

    let body = serde_json::to_vec(&text_message("wamid.sig", "15559990000", "signed", 1_703_123_456))
        .unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"app-secret").unwrap();
    mac.update(&body);
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let unsigned = client
        .post(format!("http://{addr}/api/webhook"))
        .header("content-type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(unsigned.status(), 401);
    assert!(state.pipeline.store().get("wamid.sig").await.unwrap().is_none());

    let signed = client
        .post(format!("http://{addr}/api/webhook"))
        .header("content-type", "application/json")
        .header("x-hub-signature-256", signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(signed.status(), 200);
    assert!(state.pipeline.store().get("wamid.sig").await.unwrap().is_some());
}

// ── Live fanout ──────────────────────────────────────────────────────────────

async fn next_frame<S>(ws: &mut S) -> Value
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn ws_requires_session() {
    let addr = start_default_server().await;
    let err = connect_async(format!("ws://{addr}/ws")).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn ws_streams_new_messages_and_status_updates() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Cookie", HeaderValue::from_str(&cookie).unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();

    let hello = next_frame(&mut ws).await;
    assert_eq!(hello["type"], "event");
    assert_eq!(hello["event"], "connected");

    post_webhook(
        &client,
        addr,
        &text_message("wamid.live", "15557778888", "live", 1_703_123_456),
    )
    .await;
    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["event"], "new_message");
    assert_eq!(frame["payload"]["id"], "wamid.live");
    assert_eq!(frame["payload"]["body"], "live");
    let first_seq = frame["seq"].as_u64().unwrap();

    // Duplicates are not re-announced; the next frame is the status change.
    post_webhook(
        &client,
        addr,
        &text_message("wamid.live", "15557778888", "live", 1_703_123_456),
    )
    .await;
    post_webhook(
        &client,
        addr,
        &status_payload("wamid.live", "delivered", 1_703_123_500),
    )
    .await;
    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["event"], "status_update");
    assert_eq!(frame["payload"]["status"], "delivered");
    assert!(frame["seq"].as_u64().unwrap() > first_seq);

    ws.send(WsMessage::Close(None)).await.unwrap();
}

#[tokio::test]
async fn ws_closes_when_session_logs_out() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    let cookie = pair(&client, addr).await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Cookie", HeaderValue::from_str(&cookie).unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();
    assert_eq!(next_frame(&mut ws).await["event"], "connected");

    let resp = client
        .post(format!("http://{addr}/api/auth/logout"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    post_webhook(
        &client,
        addr,
        &text_message("wamid.after", "15556665555", "after logout", 1_703_123_456),
    )
    .await;

    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("socket stayed open after logout");
        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                panic!("frame delivered after logout: {frame}");
            },
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {},
        }
    }
}

// ── Health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_counters() {
    let addr = start_default_server().await;
    let client = reqwest::Client::new();
    post_webhook(
        &client,
        addr,
        &text_message("wamid.h", "15551110000", "x", 1_703_123_456),
    )
    .await;

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["ingest"]["accepted"], 1);
    assert_eq!(health["ingest"]["unknownReferences"], 0);
    assert_eq!(health["fanoutDropped"], 0);
    assert_eq!(health["subscribers"], 0);

    // No recorder installed in tests.
    let metrics = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(metrics.status(), 503);
}
