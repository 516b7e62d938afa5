//! Pairing session state machine gating access to conversation reads.
//!
//! `init` creates a `pending` session with a short confirmation window;
//! `confirm` moves it to `paired` exactly once. The session cookie carries
//! the `sid`, and a paired session stays authorized until logout; expiry
//! only bounds the pending window and is checked lazily.

use std::{error::Error as StdError, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    courier_metrics::{counter, pairing as pairing_metrics},
    courier_protocol::PairStatus,
    dashmap::DashMap,
    rand::Rng,
    serde::Serialize,
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
};

/// Upper bound on the confirmation window; longer configured values are capped.
pub const MAX_PAIRING_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const REVOCATION_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pairing session not found")]
    SessionNotFound,

    #[error("pairing session expired")]
    PairingExpired,

    #[error("session store failed: {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn store(context: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Store {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingSession {
    pub sid: String,
    /// Six-digit code shown next to the QR for manual entry.
    pub code: String,
    pub status: PairStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paired_at: Option<DateTime<Utc>>,
}

impl PairingSession {
    /// Pending and past its confirmation window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PairStatus::Pending && now >= self.expires_at
    }
}

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &PairingSession) -> Result<()>;

    async fn get(&self, sid: &str) -> Result<Option<PairingSession>>;

    /// Set `paired` if the session is pending and `now < expires_at`.
    /// Returns the row as it stands afterwards, or `None` if absent.
    async fn mark_paired(&self, sid: &str, now: DateTime<Utc>) -> Result<Option<PairingSession>>;

    /// Returns whether a row was removed.
    async fn delete(&self, sid: &str) -> Result<bool>;
}

// ── In-memory store ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, PairingSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &PairingSession) -> Result<()> {
        self.sessions.insert(session.sid.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, sid: &str) -> Result<Option<PairingSession>> {
        Ok(self.sessions.get(sid).map(|s| s.value().clone()))
    }

    async fn mark_paired(&self, sid: &str, now: DateTime<Utc>) -> Result<Option<PairingSession>> {
        let Some(mut session) = self.sessions.get_mut(sid) else {
            return Ok(None);
        };
        if session.status == PairStatus::Pending && now < session.expires_at {
            session.status = PairStatus::Paired;
            session.paired_at = Some(now);
        }
        Ok(Some(session.clone()))
    }

    async fn delete(&self, sid: &str) -> Result<bool> {
        Ok(self.sessions.remove(sid).is_some())
    }
}

// ── Gate ────────────────────────────────────────────────────────────────────

pub struct SessionGate {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    qr_scheme: String,
    /// Fires the sid of every session removed by `logout`.
    revoked: broadcast::Sender<String>,
}

impl SessionGate {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration, qr_scheme: impl Into<String>) -> Self {
        if ttl > MAX_PAIRING_TTL {
            warn!(
                ttl_secs = ttl.as_secs(),
                max_secs = MAX_PAIRING_TTL.as_secs(),
                "pairing ttl too long, capping"
            );
        }
        let ttl = ttl.min(MAX_PAIRING_TTL);
        let (revoked, _) = broadcast::channel(REVOCATION_CAPACITY);
        Self {
            store,
            ttl,
            qr_scheme: qr_scheme.into(),
            revoked,
        }
    }

    /// Create a new pending session.
    pub async fn init(&self) -> Result<PairingSession> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::minutes(15));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(now);
        let session = PairingSession {
            sid: uuid::Uuid::new_v4().simple().to_string(),
            code: rand::rng().random_range(100_000..1_000_000).to_string(),
            status: PairStatus::Pending,
            created_at: now,
            expires_at,
            paired_at: None,
        };
        self.store.insert(&session).await?;
        counter!(pairing_metrics::INITIATED_TOTAL).increment(1);
        debug!(sid = %session.sid, expires_at = %session.expires_at, "pairing session created");
        Ok(session)
    }

    /// Payload encoded into the QR shown by the initiating client.
    pub fn qr_payload(&self, session: &PairingSession) -> String {
        format!("{}?sid={}&code={}", self.qr_scheme, session.sid, session.code)
    }

    /// Expired pending sessions are reported as not found.
    pub async fn status(&self, sid: &str) -> Result<PairStatus> {
        match self.store.get(sid).await? {
            Some(session) if !session.is_expired(Utc::now()) => Ok(session.status),
            _ => Err(Error::SessionNotFound),
        }
    }

    /// Move a pending session to `paired`. Confirming a paired session is a
    /// no-op returning it unchanged.
    pub async fn confirm(&self, sid: &str) -> Result<PairingSession> {
        let now = Utc::now();
        let session = self.store.get(sid).await?.ok_or(Error::SessionNotFound)?;
        if session.status == PairStatus::Paired {
            return Ok(session);
        }
        if session.is_expired(now) {
            counter!(pairing_metrics::EXPIRED_TOTAL).increment(1);
            debug!(sid, "confirm on expired pairing session");
            return Err(Error::PairingExpired);
        }

        let updated = self
            .store
            .mark_paired(sid, now)
            .await?
            .ok_or(Error::SessionNotFound)?;
        if updated.status != PairStatus::Paired {
            counter!(pairing_metrics::EXPIRED_TOTAL).increment(1);
            return Err(Error::PairingExpired);
        }
        counter!(pairing_metrics::CONFIRMED_TOTAL).increment(1);
        info!(sid, "pairing session confirmed");
        Ok(updated)
    }

    /// Whether `token` names a paired session.
    pub async fn authorize(&self, token: &str) -> Result<bool> {
        if token.is_empty() {
            return Ok(false);
        }
        Ok(matches!(
            self.store.get(token).await?,
            Some(PairingSession {
                status: PairStatus::Paired,
                ..
            })
        ))
    }

    /// Drop the binding for `token`. Returns whether one existed.
    pub async fn logout(&self, token: &str) -> Result<bool> {
        let removed = self.store.delete(token).await?;
        if removed {
            info!(sid = token, "session logged out");
            // No receivers just means no live connections for anyone.
            let _ = self.revoked.send(token.to_string());
        }
        Ok(removed)
    }

    /// Sids removed by `logout` from now on. Long-lived connections hold
    /// one of these and close when their own sid shows up.
    pub fn revocations(&self) -> broadcast::Receiver<String> {
        self.revoked.subscribe()
    }
}
