use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    courier_ingest::{Error, InsertOutcome, MessageStore, Result, StatusChange, StoreClock},
    courier_protocol::{Direction, Message, MessageKind, MessageStatus, timestamp},
    sqlx::SqlitePool,
};

/// Internal row type for sqlx mapping. Instants are stored as microseconds.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    correlation_id: Option<String>,
    conversation_id: String,
    sender: String,
    recipient: String,
    display_name: Option<String>,
    direction: String,
    kind: String,
    body: String,
    status: String,
    sent_at: i64,
    status_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(r: MessageRow) -> Result<Self> {
        let instant = |micros: i64| {
            timestamp::from_micros(micros)
                .ok_or_else(|| Error::invalid_record(format!("{}: bad instant {micros}", r.id)))
        };
        Ok(Self {
            direction: Direction::parse(&r.direction)
                .ok_or_else(|| Error::invalid_record(format!("{}: direction {}", r.id, r.direction)))?,
            kind: MessageKind::from_provider(&r.kind)
                .ok_or_else(|| Error::invalid_record(format!("{}: kind {}", r.id, r.kind)))?,
            status: r
                .status
                .parse::<MessageStatus>()
                .map_err(|e| Error::invalid_record(format!("{}: {e}", r.id)))?,
            sent_at: instant(r.sent_at)?,
            status_at: r.status_at.map(instant).transpose()?,
            created_at: instant(r.created_at)?,
            id: r.id,
            correlation_id: r.correlation_id,
            conversation_id: r.conversation_id,
            from: r.sender,
            to: r.recipient,
            display_name: r.display_name,
            body: r.body,
        })
    }
}

fn unavailable(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Error {
    let context = context.into();
    move |e| Error::store_unavailable(context, e)
}

fn micros(at: &DateTime<Utc>) -> i64 {
    timestamp::to_micros(at)
}

/// SQLite-backed message store.
pub struct SqliteMessageStore {
    pool: SqlitePool,
    clock: StoreClock,
}

impl SqliteMessageStore {
    /// Create the schema if needed and seed the clock past every stored row.
    pub async fn open(pool: SqlitePool) -> anyhow::Result<Self> {
        Self::init(&pool).await?;
        let clock = StoreClock::new();
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM messages")
            .fetch_one(&pool)
            .await?;
        if let Some(at) = latest.and_then(timestamp::from_micros) {
            clock.observe(&at);
        }
        Ok(Self { pool, clock })
    }

    /// Initialize the messages table schema.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id              TEXT    PRIMARY KEY,
                correlation_id  TEXT,
                conversation_id TEXT    NOT NULL,
                sender          TEXT    NOT NULL,
                recipient       TEXT    NOT NULL,
                display_name    TEXT,
                direction       TEXT    NOT NULL,
                kind            TEXT    NOT NULL,
                body            TEXT    NOT NULL,
                status          TEXT    NOT NULL,
                status_rank     INTEGER NOT NULL,
                sent_at         INTEGER NOT NULL,
                status_at       INTEGER,
                created_at      INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
             ON messages (conversation_id, created_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_correlation
             ON messages (correlation_id) WHERE correlation_id IS NOT NULL",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert_if_absent(&self, mut message: Message) -> Result<InsertOutcome> {
        message.created_at = self.clock.now();
        let inserted = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages
             (id, correlation_id, conversation_id, sender, recipient, display_name,
              direction, kind, body, status, status_rank, sent_at, status_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING
             RETURNING *",
        )
        .bind(&message.id)
        .bind(&message.correlation_id)
        .bind(&message.conversation_id)
        .bind(&message.from)
        .bind(&message.to)
        .bind(&message.display_name)
        .bind(message.direction.as_str())
        .bind(message.kind.as_str())
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(i64::from(message.status.rank()))
        .bind(micros(&message.sent_at))
        .bind(message.status_at.as_ref().map(micros))
        .bind(micros(&message.created_at))
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable(format!("insert message {}", message.id)))?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(row.try_into()?));
        }
        match self.get(&message.id).await? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(Error::invalid_record(format!(
                "{}: conflict on insert but row not found",
                message.id
            ))),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable(format!("get message {id}")))?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE correlation_id = ? ORDER BY created_at LIMIT 1",
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable(format!("find by correlation id {correlation_id}")))?;
        row.map(TryInto::try_into).transpose()
    }

    async fn advance_status(
        &self,
        id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<StatusChange>> {
        let rank = i64::from(status.rank());
        // Single-statement compare-and-set on the rank.
        let applied = sqlx::query_as::<_, MessageRow>(
            "UPDATE messages SET status = ?, status_rank = ?, status_at = ?
             WHERE id = ? AND status_rank <= ?
             RETURNING *",
        )
        .bind(status.as_str())
        .bind(rank)
        .bind(micros(&at))
        .bind(id)
        .bind(rank)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable(format!("advance status of {id}")))?;

        if let Some(row) = applied {
            return Ok(Some(StatusChange::Applied(row.try_into()?)));
        }
        Ok(self.get(id).await?.map(StatusChange::Stale))
    }

    async fn list_all(&self) -> Result<Vec<Message>> {
        let rows =
            sqlx::query_as::<_, MessageRow>("SELECT * FROM messages ORDER BY created_at, id")
                .fetch_all(&self.pool)
                .await
                .map_err(unavailable("list messages"))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_conversation(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at, id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable(format!("list conversation {conversation_id}")))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
