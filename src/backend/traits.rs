//! Core traits for the external systems the pipeline talks to.
//!
//! Every trait is async and object-safe (via `async-trait`) so the producer and
//! consumer can hold them as `Arc<dyn ...>` and tests can swap in the in-memory
//! fakes from [`crate::backend::fake`].

use crate::model::InsertRecord;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Core Error Type
// ============================================================================

/// Provider-agnostic error raised by queue, cache and store adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection refused, reset or dropped.
    Network,
    /// The operation or a pool checkout took too long.
    Timeout,
    /// The service is up but refuses work for now (channel closed, broker blocked).
    Unavailable,
    /// Queue, key or table does not exist.
    NotFound,
    /// The service understood the request and refused it (constraint violation, publish nack).
    Rejected,
    InvalidInput,
    Other,
}

impl ErrorKind {
    /// Whether retrying the same operation later can reasonably succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Unavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::NotFound => "not found",
            Self::Rejected => "rejected",
            Self::InvalidInput => "invalid input",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl BackendError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

// ============================================================================
// QueueClient - durable message broker
// ============================================================================

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Remove the message from the queue.
    async fn ack(&self) -> BackendResult<()>;

    /// Refuse the message. With `requeue` it becomes available for redelivery,
    /// otherwise the broker drops it or routes it to its dead-letter target.
    async fn nack(&self, requeue: bool) -> BackendResult<()>;
}

/// A message handed to a subscriber. It stays owned by the broker until
/// [`Delivery::ack`] or [`Delivery::nack`] consumes it.
pub struct Delivery {
    payload: Bytes,
    redelivered: bool,
    attempt: Option<u32>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        payload: Bytes,
        redelivered: bool,
        attempt: Option<u32>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            payload,
            redelivered,
            attempt,
            acker,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Set by the broker when this message was delivered before.
    #[must_use]
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// 1-based delivery attempt, when the broker tracks it.
    #[must_use]
    pub fn attempt(&self) -> Option<u32> {
        self.attempt
    }

    /// # Errors
    ///
    /// Returns an error if the channel the message arrived on is gone.
    pub async fn ack(self) -> BackendResult<()> {
        self.acker.ack().await
    }

    /// # Errors
    ///
    /// Returns an error if the channel the message arrived on is gone.
    pub async fn nack(self, requeue: bool) -> BackendResult<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Infinite stream of deliveries for one subscription.
pub type DeliveryStream = BoxStream<'static, BackendResult<Delivery>>;

/// Thin contract over a durable, at-least-once message broker.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Declare a durable queue. Declaring an existing queue with the same
    /// flags is a no-op, so producers and consumers both call this.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker is unreachable or the queue exists with
    /// conflicting flags.
    async fn declare_queue(&self, queue: &str) -> BackendResult<()>;

    /// Publish a persistent message. Resolves once the broker confirmed it.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker is unreachable or refuses the message.
    async fn publish(&self, queue: &str, payload: Bytes) -> BackendResult<()>;

    /// Start consuming with at most `prefetch` unacknowledged deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue doesn't exist or the broker is unreachable.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> BackendResult<DeliveryStream>;
}

// ============================================================================
// CacheStore - key-value cache
// ============================================================================

/// The subset of a key-value cache the pipeline needs: it only ever deletes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// List every key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if there's a connection issue.
    async fn scan_prefix(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Delete the given keys, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if there's a connection issue.
    async fn delete(&self, keys: &[String]) -> BackendResult<u64>;
}

// ============================================================================
// UserStore - relational target table
// ============================================================================

/// The relational table rows end up in.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert every record with a single multi-row statement.
    ///
    /// Either the whole batch is written or none of it is.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection could be acquired or the statement
    /// was rejected.
    async fn insert_users(&self, records: &[InsertRecord]) -> BackendResult<u64>;
}
