use std::error::Error as StdError;

/// Crate-wide result type for ingestion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed ingestion errors.
///
/// Only [`Error::StoreUnavailable`] is meant to reach an upstream caller;
/// the other variants are absorbed by the pipeline (logged and counted).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A provider unit lacks a required field.
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// A status event names no stored message (by id or correlation id).
    #[error("unknown message reference: {reference}")]
    UnknownMessageReference { reference: String },

    /// The message store failed; the caller should retry.
    #[error("store unavailable: {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A stored row could not be mapped back into a message.
    #[error("invalid stored record: {message}")]
    InvalidRecord { message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::MalformedEvent {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_reference(reference: impl std::fmt::Display) -> Self {
        Self::UnknownMessageReference {
            reference: reference.to_string(),
        }
    }

    #[must_use]
    pub fn store_unavailable(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::StoreUnavailable {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn invalid_record(message: impl std::fmt::Display) -> Self {
        Self::InvalidRecord {
            message: message.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}
