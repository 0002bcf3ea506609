//! Abstractions over the external systems the pipeline depends on.
//!
//! Each trait represents one collaborator and comes with an in-memory fake:
//!
//! - [`QueueClient`] - durable broker with at-least-once delivery ([`FakeQueue`],
//!   [`amqp::AmqpQueue`] with feature `amqp`)
//! - [`CacheStore`] - key-value cache the producer invalidates ([`FakeCache`],
//!   [`redis::RedisCache`] with feature `redis`)
//! - [`UserStore`] - relational target table ([`FakeStore`],
//!   [`mysql::MySqlStore`] with feature `mysql`)
//!
//! ## Design Principles
//!
//! ### Explicitly owned clients
//! Nothing here connects on import or keeps global state. Callers build a
//! client, wrap it in an `Arc` and hand it to the producer or consumer, which
//! makes connection lifecycle the caller's responsibility.
//!
//! ### One error type
//! Adapters translate their driver errors into [`BackendError`], whose
//! [`ErrorKind`] decides whether [`helpers::retry_with_backoff`] retries.
//!
//! ## Usage Patterns
//!
//! ```
//! use bulkload::backend::*;
//! use bytes::Bytes;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), BackendError> {
//! let queue = FakeQueue::new();
//! queue.declare_queue("work").await?;
//! queue.publish("work", Bytes::from_static(b"task")).await?;
//! assert_eq!(queue.ready_len("work"), 1);
//! # Ok(())
//! # }
//! ```

pub mod fake;
pub mod helpers;
pub mod traits;

#[cfg_attr(docsrs, doc(cfg(feature = "amqp")))]
#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
#[cfg(feature = "redis")]
pub mod redis;

#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
#[cfg(feature = "mysql")]
pub mod mysql;

pub use fake::*;
pub use helpers::{RetryConfig, retry_with_backoff};
pub use traits::*;

/// Delete every cache key under `prefix`.
///
/// Returns the number of keys removed; zero when nothing matched.
///
/// # Errors
///
/// Returns an error if the cache cannot be scanned or the delete fails.
pub async fn invalidate_prefix(cache: &dyn CacheStore, prefix: &str) -> BackendResult<usize> {
    let keys = cache.scan_prefix(prefix).await?;
    if keys.is_empty() {
        return Ok(0);
    }
    let removed = cache.delete(&keys).await?;
    Ok(usize::try_from(removed).unwrap_or(usize::MAX))
}
