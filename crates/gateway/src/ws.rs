//! Live subscription channel: forwards fanout events as `EventFrame`s.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        extract::{
            ConnectInfo, State, WebSocketUpgrade,
            ws::{Message as WsMessage, WebSocket},
        },
        response::IntoResponse,
    },
    courier_ingest::FanoutEvent,
    courier_protocol::{EventFrame, events},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::broadcast::error::RecvError,
    tracing::{debug, info, warn},
};

use crate::{auth_middleware::AuthSession, server::AppState, state::GatewayState};

/// `GET /ws`: upgrade for a paired viewer.
pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    AuthSession(sid): AuthSession,
    State(state): State<AppState>,
) -> impl IntoResponse {
    debug!(sid = %sid, remote = %addr, "ws: upgrade accepted");
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, sid, addr))
}

fn frame_for(event: &FanoutEvent) -> Option<String> {
    let payload = serde_json::to_value(&event.message).ok()?;
    let frame = EventFrame::new(event.topic.as_str(), payload, event.seq);
    serde_json::to_string(&frame).ok()
}

/// Handle a single WebSocket connection: subscribe, announce, forward until
/// either side goes away or the session `sid` is logged out.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    sid: String,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, remote_ip = %remote_addr.ip(), "ws: new connection");

    // Subscribe before announcing, so nothing published after the
    // `connected` frame is missed.
    let mut revocations = state.gate.revocations();
    let mut subscription = state.bus().subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // A logout between the upgrade check and the subscription above
    // would otherwise go unnoticed.
    if !still_paired(&state, &sid).await {
        let _ = ws_tx.send(WsMessage::Close(None)).await;
        return;
    }

    let hello = EventFrame::new(
        events::CONNECTED,
        serde_json::json!({ "connId": conn_id, "version": state.version }),
        0,
    );
    let Ok(hello) = serde_json::to_string(&hello) else {
        return;
    };
    if ws_tx.send(WsMessage::Text(hello.into())).await.is_err() {
        debug!(conn_id = %conn_id, "ws: closed before hello");
        return;
    }

    loop {
        tokio::select! {
            // Revocation wins over any event queued at the same time.
            biased;

            revoked = revocations.recv() => {
                let closed = match revoked {
                    Ok(revoked_sid) => revoked_sid == sid,
                    Err(RecvError::Lagged(_)) => !still_paired(&state, &sid).await,
                    Err(RecvError::Closed) => true,
                };
                if closed {
                    info!(conn_id = %conn_id, "ws: session logged out, closing");
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Some(text) = frame_for(&event) else {
                    warn!(conn_id = %conn_id, seq = event.seq, "failed to serialize event frame");
                    continue;
                };
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    debug!(conn_id = %conn_id, "ws: write failed");
                    break;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Ping(data))) => {
                    if ws_tx.send(WsMessage::Pong(data)).await.is_err() {
                        break;
                    }
                },
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                // Viewers only listen; anything else is ignored.
                Some(Ok(_)) => {},
            },
        }
    }

    info!(conn_id = %conn_id, subscriber = subscription.id(), "ws: connection closed");
}

async fn still_paired(state: &GatewayState, sid: &str) -> bool {
    match state.gate.authorize(sid).await {
        Ok(paired) => paired,
        Err(e) => {
            warn!(error = %e, "ws: session check failed");
            false
        },
    }
}
