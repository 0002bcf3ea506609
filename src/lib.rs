//! # bulkload
//!
//! A **bulk ingestion pipeline** for delimited user records. Uploaded CSV files
//! are streamed into compressed chunks on a durable queue, and a consumer
//! drains the queue into a relational table with one multi-row insert per
//! chunk. The request that submitted a file returns as soon as its chunks are
//! queued.
//!
//! ## Key Features
//!
//! - **Backpressure-aware streaming** - a bounded channel keeps memory at
//!   `chunk_size + row_buffer` rows regardless of file size
//! - **Chunk compression** - gzip by default, zstd behind a feature, detected
//!   by magic bytes on the way back
//! - **At-least-once delivery** - messages leave the queue only on ack; a
//!   failed chunk is logged and requeued
//! - **Failure isolation** - one bad chunk never affects another
//! - **Cache coherence** - the cache namespace is invalidated after each upload
//! - **Pluggable backends** - AMQP, Redis and MySQL adapters behind features,
//!   in-memory fakes for tests
//!
//! ## Quick Start
//!
//! ```
//! use bulkload::backend::{FakeCache, FakeQueue, FakeStore};
//! use bulkload::config::PipelineConfig;
//! use bulkload::consumer::{DeliveryOutcome, IngestConsumer};
//! use bulkload::failure_log::FailureLog;
//! use bulkload::producer::{IngestProducer, Upload};
//! use bulkload::testing::write_user_csv;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let config = PipelineConfig {
//!     failure_log_path: dir.path().join("failed.log"),
//!     ..PipelineConfig::default()
//! };
//!
//! let queue = FakeQueue::new();
//! let store = FakeStore::new();
//!
//! // Producer: file -> chunks on the queue
//! let producer =
//!     IngestProducer::new(Arc::new(queue.clone()), Arc::new(FakeCache::new()), config.clone())
//!         .await?;
//! let csv = write_user_csv(dir.path(), "users.csv", 2500)?;
//! let report = producer.submit(Some(Upload::from_path(csv))).await?;
//! assert_eq!(report.chunks, 3);
//!
//! // Consumer: chunks -> store
//! let log = Arc::new(FailureLog::open(&config.failure_log_path).await?);
//! let consumer =
//!     IngestConsumer::new(Arc::new(queue.clone()), Arc::new(store.clone()), log, config)?;
//! let shutdown = CancellationToken::new();
//! let stop = shutdown.clone();
//! let watched = store.clone();
//! tokio::spawn(async move {
//!     let timeout = std::time::Duration::from_secs(5);
//!     bulkload::testing::wait_until(timeout, || watched.len() == 2500).await;
//!     stop.cancel();
//! });
//! consumer.run(shutdown).await?;
//! assert_eq!(store.len(), 2500);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`codec`] - chunk to compressed bytes and back
//! - [`io`] - streaming CSV rows and compression codecs
//! - [`backend`] - queue, cache and store traits with fakes and adapters
//! - [`producer`] - upload to queued chunks
//! - [`consumer`] - queued chunks to inserted rows
//! - [`failure_log`] - durable NDJSON record of failed chunks
//! - [`config`] - pipeline settings with `BULKLOAD_*` overrides
//! - [`http`] - multipart upload endpoint (feature `http`)
//!
//! ## Feature Flags
//!
//! - `compression-zstd` (default) - zstd chunk and upload compression
//! - `amqp` - RabbitMQ queue via `lapin`
//! - `redis` - Redis cache via `deadpool-redis`
//! - `mysql` - MySQL store via `sqlx`
//! - `http` - axum upload endpoint
//! - `server` - all of the above plus the `bulkload` binary

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod failure_log;
pub mod io;
pub mod model;
pub mod producer;
pub mod telemetry;
pub mod testing;

#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
#[cfg(feature = "http")]
pub mod http;

pub use codec::ChunkCodec;
pub use config::PipelineConfig;
pub use consumer::{DeliveryOutcome, IngestConsumer};
pub use error::{IngestError, Result};
pub use failure_log::FailureLog;
pub use model::{Chunk, FailedInsertEntry, InsertRecord, RawRow, SubmitReport};
pub use producer::{IngestProducer, Upload};
