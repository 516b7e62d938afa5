//! HTTP/WebSocket gateway for the courier ingestion engine.
//!
//! Lifecycle:
//! 1. Load config, open storage (SQLite or in-memory)
//! 2. Build the ingestion pipeline, fanout bus and session gate
//! 3. Serve the webhook, pairing, conversation and `/ws` routes
//!
//! Conversation reads, sends and live subscriptions require a paired
//! session; the webhook and pairing endpoints are public.

pub mod api_error;
pub mod auth_middleware;
pub mod conversation_routes;
pub mod message_store;
pub mod pairing;
pub mod pairing_routes;
pub mod server;
pub mod session_store;
pub mod state;
pub mod storage;
pub mod webhook;
pub mod ws;

pub use {
    server::{AppState, build_gateway_app, start_gateway},
    state::GatewayState,
    storage::Stores,
};
