//! Fixtures and helpers for testing the pipeline without external services.
//!
//! Pair these with the in-memory fakes in [`crate::backend`]:
//!
//! - **Fixtures**: sample user rows and CSV files ([`write_user_csv`],
//!   [`sample_users`])
//! - **Assertions**: inspect what a producer left on a
//!   [`FakeQueue`](crate::backend::FakeQueue)
//!   ([`assert_chunk_sizes`], [`assert_users_in_order`])
//! - **Waiting**: [`wait_until`] for conditions reached by a background consumer
//!
//! # Quick Start
//!
//! ```
//! use bulkload::backend::{FakeCache, FakeQueue};
//! use bulkload::config::PipelineConfig;
//! use bulkload::producer::{IngestProducer, Upload};
//! use bulkload::testing::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let path = write_user_csv(dir.path(), "users.csv", 25)?;
//!
//! let queue = FakeQueue::new();
//! let config = PipelineConfig { chunk_size: 10, row_buffer: 10, ..PipelineConfig::default() };
//! let cache = Arc::new(FakeCache::new());
//! let producer = IngestProducer::new(Arc::new(queue.clone()), cache, config).await?;
//! producer.submit(Some(Upload::from_path(path))).await?;
//!
//! assert_chunk_sizes(&queue, "csv_chunk_queue", &[10, 10, 5]);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

use std::time::Duration;

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
///
/// Returns whether the condition was met.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
