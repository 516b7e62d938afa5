use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{DefaultBodyLimit, FromRef, State},
        http::{StatusCode, header},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    courier_config::CourierConfig,
    courier_metrics::{MetricsRecorderConfig, init_metrics},
    courier_protocol::MAX_WEBHOOK_BYTES,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{
    auth_middleware::require_session,
    conversation_routes::{
        get_conversation_handler, list_conversations_handler, list_messages_handler,
        send_message_handler,
    },
    pairing_routes::{
        logout_handler, pairing_confirm_handler, pairing_init_handler, pairing_status_handler,
        session_handler,
    },
    state::GatewayState,
    storage::Stores,
    webhook::{webhook_handler, webhook_verify_handler},
    ws::ws_upgrade_handler,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

impl FromRef<AppState> for Arc<GatewayState> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.gateway)
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_state = AppState { gateway: state };

    // Conversation reads and sends require a paired session.
    let protected = Router::new()
        .route("/api/conversations", get(list_conversations_handler))
        .route(
            "/api/conversations/{conversation_id}",
            get(get_conversation_handler),
        )
        .route(
            "/api/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(prometheus_metrics_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route(
            "/api/webhook",
            get(webhook_verify_handler).post(webhook_handler),
        )
        .route("/api/pairing/init", post(pairing_init_handler))
        .route("/api/pairing/status", get(pairing_status_handler))
        .route("/api/pairing/confirm", post(pairing_confirm_handler))
        .route("/api/session", get(session_handler))
        .route("/api/auth/logout", post(logout_handler))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open storage, install metrics, and serve until Ctrl-C.
pub async fn start_gateway(config: CourierConfig) -> anyhow::Result<()> {
    let metrics_handle = if config.metrics.enabled && config.metrics.prometheus {
        init_metrics(MetricsRecorderConfig {
            enabled: true,
            global_labels: Vec::new(),
        })
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to install metrics recorder");
            None
        })
    } else {
        None
    };

    let stores = Stores::open(&config.storage).await?;
    let state = GatewayState::new(stores, &config, metrics_handle);
    let app = build_gateway_app(Arc::clone(&state));

    let listener =
        tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port)).await?;
    let addr = listener.local_addr()?;

    // Startup banner.
    let storage = match config.storage.backend {
        courier_config::StorageBackend::Sqlite => {
            format!("sqlite {}", config.storage.resolved_database_path().display())
        },
        courier_config::StorageBackend::Memory => "memory".to_string(),
    };
    let lines = [
        format!("courier gateway v{}", state.version),
        format!("listening on http://{addr}"),
        format!("storage: {storage}"),
        format!(
            "pairing window: {}s, fanout queue: {}",
            config.pairing.ttl_secs, config.fanout.queue_capacity
        ),
        format!(
            "webhook: verify token {}, signature check {}",
            on_off(state.settings.verify_token.is_some()),
            on_off(state.settings.app_secret.is_some()),
        ),
        format!("metrics: {}", on_off(state.metrics_handle.is_some())),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("gateway stopped");
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gw = &state.gateway;
    Json(serde_json::json!({
        "status": "ok",
        "version": gw.version,
        "subscribers": gw.bus().subscriber_count(),
        "fanoutDropped": gw.bus().dropped_total(),
        "ingest": gw.pipeline.stats().snapshot(),
    }))
}

/// Prometheus text exposition; unauthenticated so scrapers can reach it.
async fn prometheus_metrics_handler(State(state): State<AppState>) -> Response {
    match state.gateway.metrics_handle.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not enabled").into_response(),
    }
}
