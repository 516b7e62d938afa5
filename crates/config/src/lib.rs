//! Configuration loading with env substitution and overrides.
//!
//! Config files: `courier.toml`, `courier.yaml`, `courier.yml` or `courier.json`,
//! searched in `./` then the user config directory. `${VAR}` and
//! `${VAR:-default}` placeholders are expanded before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file,
        load_config,
    },
    schema::{
        CourierConfig, FanoutConfig, MetricsConfig, PairingConfig, ServerConfig, StorageBackend,
        StorageConfig, WebhookConfig,
    },
};
