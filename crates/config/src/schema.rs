//! Config schema types (server, storage, pairing, fanout, webhook, metrics).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pairing: PairingConfig,
    pub fanout: FanoutConfig,
    pub webhook: WebhookConfig,
    pub metrics: MetricsConfig,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Process-local maps; everything is lost on restart.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite file. Defaults to `<data_dir>/courier.db`.
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// The database file to open, falling back to the data directory.
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("courier.db"))
    }
}

/// Pairing handshake and session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// How long an unconfirmed pairing session stays confirmable.
    pub ttl_secs: u64,
    /// Prefix of the QR payload; `?sid=..&code=..` is appended.
    pub qr_scheme: String,
    pub cookie_name: String,
    pub cookie_max_age_secs: u64,
    /// Mark the session cookie `Secure` (enable behind TLS).
    pub secure_cookie: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            qr_scheme: "courier://pair".into(),
            cookie_name: "courier_session".into(),
            cookie_max_age_secs: 7 * 24 * 60 * 60,
            secure_cookie: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Bounded queue depth per subscriber; overflow is dropped.
    pub queue_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

/// Provider webhook settings. Both fields are optional; leaving them unset
/// disables the subscription handshake and signature checks respectively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Serve the Prometheus text format on `/metrics`.
    pub prometheus: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus: true,
        }
    }
}
