//! Redis implementation of [`CacheStore`] over a `deadpool-redis` pool.

use crate::backend::traits::{BackendError, BackendResult, CacheStore, ErrorKind};
use async_trait::async_trait;
use deadpool_redis::redis::{ErrorKind as RedisErrorKind, RedisError, cmd};
use deadpool_redis::{Config, Pool, PoolError, Runtime};

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Keys per `DEL` command.
const DELETE_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid Redis URL.
    pub fn connect(url: &str) -> BackendResult<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BackendError::new(ErrorKind::InvalidInput, e.to_string()))?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    /// Walks the keyspace with `SCAN MATCH` so a large cache never blocks the
    /// server the way `KEYS` would.
    async fn scan_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.pool.get().await.map_err(map_pool)?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(map_redis)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> BackendResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await.map_err(map_pool)?;
        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            let n: u64 = cmd("DEL")
                .arg(batch)
                .query_async(&mut conn)
                .await
                .map_err(map_redis)?;
            removed += n;
        }
        Ok(removed)
    }
}

/// Escape glob metacharacters so the prefix is matched literally.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn map_redis(err: RedisError) -> BackendError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        ErrorKind::Network
    } else if matches!(err.kind(), RedisErrorKind::BusyLoadingError | RedisErrorKind::TryAgain) {
        ErrorKind::Unavailable
    } else {
        ErrorKind::Other
    };
    BackendError::new(kind, err.to_string())
}

fn map_pool(err: PoolError) -> BackendError {
    match err {
        PoolError::Backend(e) => map_redis(e),
        PoolError::Timeout(_) => {
            BackendError::new(ErrorKind::Timeout, "redis pool checkout timed out")
        }
        other => BackendError::new(ErrorKind::Unavailable, other.to_string()),
    }
}
