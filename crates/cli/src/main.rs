mod replay_commands;
mod view_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    courier_config::{CourierConfig, StorageBackend},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "courier", about = "Courier: chat message ingestion gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (skips discovery of ./courier.toml and the user config dir).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// SQLite database file, or `:memory:` for a process-local store.
    #[arg(long, global = true)]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Feed recorded webhook payloads through the ingestion pipeline.
    Replay {
        /// JSON files holding one envelope or an array of envelopes.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List conversations, most recent first.
    Conversations,
    /// Print the message history of one conversation.
    History { conversation_id: String },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// File (or discovered) config, then `COURIER_*` env, then CLI flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<CourierConfig> {
    let config = match cli.config {
        Some(ref path) => courier_config::load_config(path)?,
        None => courier_config::discover_and_load(),
    };
    let mut config = courier_config::apply_env_overrides(config, |name| std::env::var(name).ok());

    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref db) = cli.db {
        if db == ":memory:" {
            config.storage.backend = StorageBackend::Memory;
        } else {
            config.storage.backend = StorageBackend::Sqlite;
            config.storage.database_path = Some(PathBuf::from(db));
        }
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = resolve_config(&cli)?;
    info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

    match cli.command {
        None | Some(Commands::Serve) => courier_gateway::start_gateway(config).await,
        Some(Commands::Replay { files }) => replay_commands::replay(&config, &files).await,
        Some(Commands::Conversations) => view_commands::conversations(&config).await,
        Some(Commands::History { conversation_id }) => {
            view_commands::history(&config, &conversation_id).await
        },
    }
}
