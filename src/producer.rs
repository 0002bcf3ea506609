//! Upload side of the pipeline: file to chunks on the queue.
//!
//! A blocking task parses the file and feeds rows into a bounded channel. The
//! publishing task drains the channel into a chunk buffer and, whenever the
//! buffer is full, encodes and publishes it. While a publish is awaiting the
//! broker's confirm nothing is received, so once the channel fills up the
//! reader blocks. At most `chunk_size + row_buffer` rows are in memory at any
//! time, whatever the size of the file.

use crate::backend::{CacheStore, QueueClient, invalidate_prefix, retry_with_backoff};
use crate::codec::ChunkCodec;
use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::io::csv::RowReader;
use crate::model::{Chunk, RawRow, SubmitReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A file the intake layer has already written to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub path: PathBuf,
    /// Name the client sent, for log lines only.
    pub original_name: String,
}

impl Upload {
    pub fn new(path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_name: original_name.into(),
        }
    }

    /// Use the file name of `path` as the original name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            original_name,
        }
    }
}

/// Rows and chunks handed to the queue by one [`IngestProducer::publish_rows`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Published {
    pub chunks: usize,
    pub rows: usize,
}

pub struct IngestProducer {
    queue: Arc<dyn QueueClient>,
    cache: Arc<dyn CacheStore>,
    codec: ChunkCodec,
    config: PipelineConfig,
}

impl IngestProducer {
    /// Validate `config` and declare the work queue.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for an invalid configuration and
    /// [`IngestError::Backend`] if the queue cannot be declared.
    pub async fn new(
        queue: Arc<dyn QueueClient>,
        cache: Arc<dyn CacheStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let codec = ChunkCodec::named(&config.compression)?;
        queue.declare_queue(&config.queue_name).await?;
        info!(
            queue = %config.queue_name,
            chunk_size = config.chunk_size,
            row_buffer = config.row_buffer,
            compression = codec.compression(),
            "producer ready"
        );
        Ok(Self {
            queue,
            cache,
            codec,
            config,
        })
    }

    #[must_use]
    pub fn with_codec(mut self, codec: ChunkCodec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stream an uploaded file onto the queue.
    ///
    /// Resolves once every chunk has been confirmed by the broker; it never
    /// waits for the consumer. On success the file is deleted and the cache
    /// namespace is invalidated. Neither cleanup step can fail the call.
    ///
    /// # Errors
    ///
    /// - [`IngestError::InputMissing`] if `upload` is `None`
    /// - [`IngestError::Io`] if the file cannot be opened
    /// - [`IngestError::Parse`] if a record is malformed
    /// - [`IngestError::Publish`] if a chunk could not be published
    ///
    /// Chunks published before a failure stay on the queue.
    pub async fn submit(&self, upload: Option<Upload>) -> Result<SubmitReport> {
        let upload = upload.ok_or(IngestError::InputMissing)?;
        let started = Instant::now();
        info!(file = %upload.original_name, path = %upload.path.display(), "ingesting upload");

        let path = upload.path.clone();
        let rows = tokio::task::spawn_blocking(move || RowReader::open(&path))
            .await
            .map_err(|e| IngestError::io("row reader task", std::io::Error::other(e)))??;
        let published = self.publish_rows(rows).await?;

        remove_source(&upload.path).await;
        let keys_invalidated = self.invalidate_cache().await;

        info!(
            file = %upload.original_name,
            chunks = published.chunks,
            rows = published.rows,
            keys_invalidated,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "upload queued"
        );
        Ok(SubmitReport {
            chunks: published.chunks,
            rows: published.rows,
            keys_invalidated,
        })
    }

    /// Chunk and publish rows from any source, reading it on a blocking task.
    ///
    /// The source is pulled no further than `chunk_size + row_buffer` rows
    /// ahead of the last confirmed publish. Reading stops at the first `Err`.
    ///
    /// # Errors
    ///
    /// Returns the first error yielded by `rows`, or
    /// [`IngestError::Publish`] if a chunk could not be published.
    pub async fn publish_rows<I>(&self, rows: I) -> Result<Published>
    where
        I: Iterator<Item = Result<RawRow>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(self.config.row_buffer);
        let reader = tokio::task::spawn_blocking(move || {
            for row in rows {
                let last = row.is_err();
                // receiver dropped: the publisher gave up
                if tx.blocking_send(row).is_err() || last {
                    break;
                }
            }
        });

        let outcome = self.drain(&mut rx).await;
        drop(rx);
        reader
            .await
            .map_err(|e| IngestError::io("row reader task", std::io::Error::other(e)))?;
        outcome
    }

    async fn drain(&self, rx: &mut mpsc::Receiver<Result<RawRow>>) -> Result<Published> {
        let size = self.config.chunk_size;
        let mut buffer = Vec::with_capacity(size);
        let mut published = Published::default();

        while let Some(row) = rx.recv().await {
            buffer.push(row?);
            if buffer.len() >= size {
                let chunk = Chunk::new(std::mem::replace(&mut buffer, Vec::with_capacity(size)));
                self.publish_chunk(&chunk, published.chunks + 1).await?;
                published.chunks += 1;
                published.rows += chunk.len();
            }
        }
        if !buffer.is_empty() {
            let chunk = Chunk::new(buffer);
            self.publish_chunk(&chunk, published.chunks + 1).await?;
            published.chunks += 1;
            published.rows += chunk.len();
        }
        Ok(published)
    }

    async fn publish_chunk(&self, chunk: &Chunk, number: usize) -> Result<()> {
        let payload = self.codec.encode(chunk)?;
        let bytes = payload.len();
        let queue = &self.queue;
        let name = self.config.queue_name.as_str();
        retry_with_backoff(&self.config.publish_retry, "publish chunk", move || {
            queue.publish(name, payload.clone())
        })
        .await
        .map_err(|source| IngestError::Publish {
            chunk: number,
            source,
        })?;
        debug!(chunk = number, rows = chunk.len(), bytes, "published chunk");
        Ok(())
    }

    async fn invalidate_cache(&self) -> usize {
        match invalidate_prefix(self.cache.as_ref(), &self.config.cache_prefix).await {
            Ok(n) => {
                debug!(prefix = %self.config.cache_prefix, keys = n, "cache invalidated");
                n
            }
            Err(e) => {
                warn!(prefix = %self.config.cache_prefix, error = %e, "cache invalidation failed");
                0
            }
        }
    }
}

async fn remove_source(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "could not delete uploaded file");
    }
}
