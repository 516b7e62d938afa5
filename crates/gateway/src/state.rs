use std::{sync::Arc, time::Duration};

use {
    courier_config::CourierConfig,
    courier_ingest::{ConversationAggregator, FanoutBus, IngestPipeline},
    courier_metrics::MetricsHandle,
};

use crate::{pairing::SessionGate, storage::Stores};

/// Request-independent knobs the handlers need.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub cookie_name: String,
    pub cookie_max_age_secs: u64,
    pub secure_cookie: bool,
    /// Enables the webhook subscription handshake.
    pub verify_token: Option<String>,
    /// Enables `X-Hub-Signature-256` verification.
    pub app_secret: Option<String>,
}

impl GatewaySettings {
    pub fn from_config(config: &CourierConfig) -> Self {
        Self {
            cookie_name: config.pairing.cookie_name.clone(),
            cookie_max_age_secs: config.pairing.cookie_max_age_secs,
            secure_cookie: config.pairing.secure_cookie,
            verify_token: config.webhook.verify_token.clone().filter(|t| !t.is_empty()),
            app_secret: config.webhook.app_secret.clone().filter(|s| !s.is_empty()),
        }
    }
}

/// Shared gateway state (wrapped in `Arc` for use across async tasks).
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    pub pipeline: IngestPipeline,
    pub aggregator: ConversationAggregator,
    pub gate: SessionGate,
    pub settings: GatewaySettings,
    /// Installed Prometheus recorder, if any.
    pub metrics_handle: Option<MetricsHandle>,
}

impl GatewayState {
    pub fn new(
        stores: Stores,
        config: &CourierConfig,
        metrics_handle: Option<MetricsHandle>,
    ) -> Arc<Self> {
        let bus = FanoutBus::new(config.fanout.queue_capacity);
        let gate = SessionGate::new(
            stores.sessions,
            Duration::from_secs(config.pairing.ttl_secs),
            config.pairing.qr_scheme.clone(),
        );
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pipeline: IngestPipeline::new(stores.messages.clone(), bus),
            aggregator: ConversationAggregator::new(stores.messages),
            gate,
            settings: GatewaySettings::from_config(config),
            metrics_handle,
        })
    }

    /// Everything in process memory; used by tests.
    pub fn in_memory(config: &CourierConfig) -> Arc<Self> {
        Self::new(Stores::in_memory(), config, None)
    }

    pub fn bus(&self) -> &FanoutBus {
        self.pipeline.bus()
    }
}
