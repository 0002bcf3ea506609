//! Error types for the ingestion pipeline.

use crate::backend::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the producer, the consumer and their helpers.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request carried no file.
    #[error("no file uploaded")]
    InputMissing,

    /// A record of the input could not be read. `record` is 1-based and
    /// excludes the header row.
    #[error("parse CSV record #{record}: {message}")]
    Parse { record: u64, message: String },

    /// The broker refused a chunk or stayed unreachable after retries.
    #[error("publish chunk #{chunk}: {source}")]
    Publish { chunk: usize, source: BackendError },

    /// A queued payload could not be decompressed or parsed.
    ///
    /// `raw` holds the decompressed text when decompression itself succeeded.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String, raw: Option<String> },

    /// The store rejected a batch.
    #[error("insert {rows} rows: {source}")]
    Insert { rows: usize, source: BackendError },

    #[error("append to failure log {}: {source}", path.display())]
    FailureLog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IngestError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
            raw: None,
        }
    }

    /// Whether the caller sent something unusable, as opposed to a failure on our side.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InputMissing | Self::Parse { .. })
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
