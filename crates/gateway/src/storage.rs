//! Opens the message and session stores selected by configuration.

use std::sync::Arc;

use {
    anyhow::Context,
    courier_config::{StorageBackend, StorageConfig},
    courier_ingest::{InMemoryMessageStore, MessageStore},
    sqlx::SqlitePool,
    tracing::info,
};

use crate::{
    message_store::SqliteMessageStore,
    pairing::{InMemorySessionStore, SessionStore},
    session_store::SqliteSessionStore,
};

/// Both stores behind their traits.
#[derive(Clone)]
pub struct Stores {
    pub messages: Arc<dyn MessageStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            messages: Arc::new(InMemoryMessageStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
        }
    }

    /// Both stores on one SQLite pool, schema created if missing.
    pub async fn sqlite(pool: SqlitePool) -> anyhow::Result<Self> {
        let messages = SqliteMessageStore::open(pool.clone())
            .await
            .context("failed to init messages table")?;
        SqliteSessionStore::init(&pool)
            .await
            .context("failed to init pairing_sessions table")?;
        Ok(Self {
            messages: Arc::new(messages),
            sessions: Arc::new(SqliteSessionStore::new(pool)),
        })
    }

    pub async fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        match config.backend {
            StorageBackend::Memory => {
                info!("storage: in-memory (nothing survives a restart)");
                Ok(Self::in_memory())
            },
            StorageBackend::Sqlite => {
                let db_path = config.resolved_database_path();
                if let Some(parent) = db_path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
                let pool = SqlitePool::connect(&db_url)
                    .await
                    .with_context(|| format!("failed to open {}", db_path.display()))?;
                info!(path = %db_path.display(), "storage: sqlite");
                Self::sqlite(pool).await
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_sqlite_file_and_reopens_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            database_path: Some(dir.path().join("nested").join("courier.db")),
        };

        let stores = Stores::open(&config).await.unwrap();
        let pipeline = courier_ingest::IngestPipeline::new(
            stores.messages.clone(),
            courier_ingest::FanoutBus::default(),
        );
        pipeline.send_message("555", "persisted", None).await.unwrap();
        drop(pipeline);
        drop(stores);

        let reopened = Stores::open(&config).await.unwrap();
        let all = reopened.messages.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body, "persisted");
    }

    #[tokio::test]
    async fn memory_backend_starts_empty() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            database_path: None,
        };
        let stores = Stores::open(&config).await.unwrap();
        assert!(stores.messages.list_all().await.unwrap().is_empty());
        assert!(stores.sessions.get("nope").await.unwrap().is_none());
    }
}
