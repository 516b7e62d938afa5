use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::{CourierConfig, StorageBackend},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CourierConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{toml,yaml,yml,json}`
/// 2. `<user config dir>/courier.{toml,yaml,yml,json}`
///
/// Returns `CourierConfig::default()` if nothing is found or parsing fails.
pub fn discover_and_load() -> CourierConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    CourierConfig::default()
}

/// First existing config file in the standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// User-global config directory (e.g. `~/.config/courier/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "courier").map(|d| d.config_dir().to_path_buf())
}

/// Data directory for the SQLite database; `./.courier` when no home exists.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "courier")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

/// Apply `COURIER_*` overrides on top of a loaded config.
///
/// Takes a lookup so callers (and tests) decide where values come from.
pub fn apply_env_overrides(
    mut config: CourierConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> CourierConfig {
    if let Some(bind) = lookup("COURIER_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = lookup("COURIER_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(value = %port, "ignoring invalid COURIER_PORT"),
        }
    }
    if let Some(db) = lookup("COURIER_DB") {
        if db == ":memory:" {
            config.storage.backend = StorageBackend::Memory;
        } else {
            config.storage.backend = StorageBackend::Sqlite;
            config.storage.database_path = Some(PathBuf::from(db));
        }
    }
    if let Some(token) = lookup("COURIER_WEBHOOK_VERIFY_TOKEN") {
        config.webhook.verify_token = Some(token);
    }
    if let Some(secret) = lookup("COURIER_WEBHOOK_APP_SECRET") {
        config.webhook.app_secret = Some(secret);
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CourierConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
