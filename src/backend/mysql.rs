//! MySQL implementation of [`UserStore`] over an `sqlx` pool.

use crate::backend::traits::{BackendError, BackendResult, ErrorKind, UserStore};
use crate::model::{InsertRecord, MAX_CHUNK_ROWS, TARGET_COLUMNS};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, QueryBuilder};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Open a bounded pool. Checking a connection out waits at most
    /// `acquire_timeout` before failing with [`ErrorKind::Timeout`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> BackendResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(map_sqlx)?;
        info!(max_connections, "connected to MySQL");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn insert_prefix() -> String {
    format!("INSERT INTO users ({}) ", TARGET_COLUMNS.join(", "))
}

#[async_trait]
impl UserStore for MySqlStore {
    async fn insert_users(&self, records: &[InsertRecord]) -> BackendResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        if records.len() > MAX_CHUNK_ROWS {
            return Err(BackendError::new(
                ErrorKind::InvalidInput,
                format!(
                    "{} rows exceed the placeholder limit of one statement",
                    records.len()
                ),
            ));
        }
        let mut qb = QueryBuilder::<MySql>::new(insert_prefix());
        qb.push_values(records, |mut b, rec| {
            b.push_bind(rec.name.clone())
                .push_bind(rec.age.clone())
                .push_bind(rec.country.clone())
                .push_bind(rec.subscription_type.clone())
                .push_bind(rec.watch_time_hours.clone())
                .push_bind(rec.favorite_genre.clone())
                .push_bind(rec.last_login.clone());
        });
        let result = qb.build().execute(&self.pool).await.map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}

fn map_sqlx(err: sqlx::Error) -> BackendError {
    let kind = match &err {
        sqlx::Error::PoolTimedOut => ErrorKind::Timeout,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => ErrorKind::Network,
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => ErrorKind::Unavailable,
        sqlx::Error::Database(_) => ErrorKind::Rejected,
        sqlx::Error::Configuration(_) => ErrorKind::InvalidInput,
        _ => ErrorKind::Other,
    };
    BackendError::new(kind, err.to_string())
}
