use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    courier_protocol::{PairStatus, timestamp},
    sqlx::SqlitePool,
};

use crate::pairing::{Error, PairingSession, Result, SessionStore};

#[derive(sqlx::FromRow)]
struct SessionRow {
    sid: String,
    code: String,
    status: String,
    created_at: i64,
    expires_at: i64,
    paired_at: Option<i64>,
}

impl TryFrom<SessionRow> for PairingSession {
    type Error = Error;

    fn try_from(r: SessionRow) -> Result<Self> {
        let bad = |what: &str| {
            Error::store(
                format!("decode session {}", r.sid),
                std::io::Error::new(std::io::ErrorKind::InvalidData, what.to_string()),
            )
        };
        let instant = |micros: i64| timestamp::from_micros(micros).ok_or_else(|| bad("instant"));
        Ok(Self {
            status: r.status.parse::<PairStatus>().map_err(|e| bad(e.as_str()))?,
            created_at: instant(r.created_at)?,
            expires_at: instant(r.expires_at)?,
            paired_at: r.paired_at.map(instant).transpose()?,
            sid: r.sid,
            code: r.code,
        })
    }
}

fn failed(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Error {
    let context = context.into();
    move |e| Error::store(context, e)
}

/// SQLite-backed pairing session store.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the pairing_sessions table schema.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pairing_sessions (
                sid        TEXT    PRIMARY KEY,
                code       TEXT    NOT NULL,
                status     TEXT    NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                paired_at  INTEGER
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &PairingSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO pairing_sessions (sid, code, status, created_at, expires_at, paired_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.sid)
        .bind(&session.code)
        .bind(session.status.as_str())
        .bind(timestamp::to_micros(&session.created_at))
        .bind(timestamp::to_micros(&session.expires_at))
        .bind(session.paired_at.as_ref().map(timestamp::to_micros))
        .execute(&self.pool)
        .await
        .map_err(failed("insert session"))?;
        Ok(())
    }

    async fn get(&self, sid: &str) -> Result<Option<PairingSession>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM pairing_sessions WHERE sid = ?")
            .bind(sid)
            .fetch_optional(&self.pool)
            .await
            .map_err(failed("get session"))?;
        row.map(TryInto::try_into).transpose()
    }

    async fn mark_paired(&self, sid: &str, now: DateTime<Utc>) -> Result<Option<PairingSession>> {
        let now = timestamp::to_micros(&now);
        sqlx::query(
            "UPDATE pairing_sessions SET status = 'paired', paired_at = ?
             WHERE sid = ? AND status = 'pending' AND expires_at > ?",
        )
        .bind(now)
        .bind(sid)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(failed("confirm session"))?;
        self.get(sid).await
    }

    async fn delete(&self, sid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pairing_sessions WHERE sid = ?")
            .bind(sid)
            .execute(&self.pool)
            .await
            .map_err(failed("delete session"))?;
        Ok(result.rows_affected() > 0)
    }
}
