//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds the knobs shared by the producer and the consumer.
//! Every field has a default. A TOML file may set any of them, using the field
//! names below (`[publish_retry]` is a table):
//!
//! ```toml
//! chunk_size = 500
//! queue_name = "imports"
//! max_delivery_attempts = 5
//!
//! [publish_retry]
//! max_attempts = 3
//! initial_delay_ms = 250
//! ```
//!
//! `BULKLOAD_*` environment variables are applied on top of the file:
//!
//! | Variable | Field |
//! |---|---|
//! | `BULKLOAD_CHUNK_SIZE` | `chunk_size` |
//! | `BULKLOAD_ROW_BUFFER` | `row_buffer` |
//! | `BULKLOAD_QUEUE_NAME` | `queue_name` |
//! | `BULKLOAD_CACHE_PREFIX` | `cache_prefix` |
//! | `BULKLOAD_FAILURE_LOG` | `failure_log_path` |
//! | `BULKLOAD_PREFETCH` | `prefetch` |
//! | `BULKLOAD_MAX_DELIVERY_ATTEMPTS` | `max_delivery_attempts` (`0` disables) |
//! | `BULKLOAD_COMPRESSION` | `compression` |
//! | `BULKLOAD_PUBLISH_RETRIES` | `publish_retry.max_attempts` |
//! | `BULKLOAD_PUBLISH_RETRY_INITIAL_DELAY_MS` | `publish_retry.initial_delay_ms` |
//! | `BULKLOAD_PUBLISH_RETRY_MAX_DELAY_MS` | `publish_retry.max_delay_ms` |
//! | `BULKLOAD_PUBLISH_RETRY_BACKOFF_MULTIPLIER` | `publish_retry.backoff_multiplier` |
//!
//! Unless a layer sets `row_buffer` explicitly it follows `chunk_size`.

use crate::backend::RetryConfig;
use crate::error::{IngestError, Result};
use crate::model::MAX_CHUNK_ROWS;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_PREFIX: &str = "BULKLOAD_";

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_QUEUE: &str = "csv_chunk_queue";
pub const DEFAULT_CACHE_PREFIX: &str = "users:";
pub const DEFAULT_FAILURE_LOG: &str = "logs/failed_inserts.log";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Rows per chunk. At most [`MAX_CHUNK_ROWS`] so a chunk inserts as one
    /// statement.
    pub chunk_size: usize,
    /// Capacity of the channel between the file reader and the publisher.
    pub row_buffer: usize,
    pub queue_name: String,
    /// Cache namespace invalidated after each upload.
    pub cache_prefix: String,
    pub failure_log_path: PathBuf,
    /// Unacknowledged deliveries the consumer holds, and handles, at once.
    pub prefetch: u16,
    /// Dead-letter a failing message once its delivery attempt reaches this.
    /// `None` redelivers forever.
    ///
    /// Only brokers that report an attempt count can enforce the cap. On
    /// RabbitMQ that means a quorum queue, which is how
    /// [`AmqpQueue`](crate::backend::amqp::AmqpQueue) declares it.
    pub max_delivery_attempts: Option<u32>,
    /// Codec used for outgoing chunks.
    pub compression: String,
    pub publish_retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            row_buffer: DEFAULT_CHUNK_SIZE,
            queue_name: DEFAULT_QUEUE.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            failure_log_path: PathBuf::from(DEFAULT_FAILURE_LOG),
            prefetch: 10,
            max_delivery_attempts: None,
            compression: "gzip".to_string(),
            publish_retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `BULKLOAD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if a variable cannot be parsed or the
    /// result is invalid.
    pub fn from_env() -> Result<Self> {
        Self::layered(None, &config_from_env(ENV_PREFIX))
    }

    /// Build from variables already stripped of their prefix and lowercased,
    /// as returned by [`config_from_env`].
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if a value cannot be parsed or the
    /// result is invalid.
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::layered(None, vars)
    }

    /// Parse a TOML document. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if the document does not parse, names
    /// an unknown field, or the result is invalid.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::layered(Some(text), &HashMap::new())
    }

    /// Read `path` as TOML, then apply `BULKLOAD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or
    /// [`IngestError::Config`] if it or a variable is invalid.
    pub fn from_file_and_env(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IngestError::io(format!("read {}", path.display()), e))?;
        Self::layered(Some(&text), &config_from_env(ENV_PREFIX))
    }

    /// Defaults, then the TOML document if any, then `vars`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if either layer is malformed or the
    /// result is invalid.
    pub fn layered(toml_text: Option<&str>, vars: &HashMap<String, String>) -> Result<Self> {
        let (mut cfg, mut row_buffer_set) = match toml_text {
            Some(text) => parse_toml(text)?,
            None => (Self::default(), false),
        };
        row_buffer_set |= cfg.apply_env(vars)?;
        if !row_buffer_set {
            cfg.row_buffer = cfg.chunk_size;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply prefix-stripped variables. Returns whether `row_buffer` was set.
    fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<bool> {
        if let Some(v) = vars.get("chunk_size") {
            self.chunk_size = parse("chunk_size", v)?;
        }
        let row_buffer_set = match vars.get("row_buffer") {
            Some(v) => {
                self.row_buffer = parse("row_buffer", v)?;
                true
            }
            None => false,
        };
        if let Some(v) = vars.get("queue_name") {
            self.queue_name.clone_from(v);
        }
        if let Some(v) = vars.get("cache_prefix") {
            self.cache_prefix.clone_from(v);
        }
        if let Some(v) = vars.get("failure_log") {
            self.failure_log_path = PathBuf::from(v);
        }
        if let Some(v) = vars.get("prefetch") {
            self.prefetch = parse("prefetch", v)?;
        }
        if let Some(v) = vars.get("max_delivery_attempts") {
            let n: u32 = parse("max_delivery_attempts", v)?;
            self.max_delivery_attempts = (n > 0).then_some(n);
        }
        if let Some(v) = vars.get("compression") {
            self.compression.clone_from(v);
        }

        let retry = &mut self.publish_retry;
        if let Some(v) = vars.get("publish_retries") {
            retry.max_attempts = parse("publish_retries", v)?;
        }
        if let Some(v) = vars.get("publish_retry_initial_delay_ms") {
            retry.initial_delay_ms = parse("publish_retry_initial_delay_ms", v)?;
        }
        if let Some(v) = vars.get("publish_retry_max_delay_ms") {
            retry.max_delay_ms = parse("publish_retry_max_delay_ms", v)?;
        }
        if let Some(v) = vars.get("publish_retry_backoff_multiplier") {
            retry.backoff_multiplier = parse("publish_retry_backoff_multiplier", v)?;
        }
        Ok(row_buffer_set)
    }

    /// # Errors
    ///
    /// Returns [`IngestError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::Config("chunk_size must be at least 1".into()));
        }
        if self.chunk_size > MAX_CHUNK_ROWS {
            return Err(IngestError::Config(format!(
                "chunk_size {} exceeds {MAX_CHUNK_ROWS} rows, the limit of one insert",
                self.chunk_size
            )));
        }
        if self.row_buffer == 0 {
            return Err(IngestError::Config("row_buffer must be at least 1".into()));
        }
        if self.queue_name.trim().is_empty() {
            return Err(IngestError::Config("queue_name must not be empty".into()));
        }
        if self.prefetch == 0 {
            return Err(IngestError::Config("prefetch must be at least 1".into()));
        }
        if self.max_delivery_attempts == Some(0) {
            return Err(IngestError::Config(
                "max_delivery_attempts must be at least 1 when set".into(),
            ));
        }
        if crate::io::compression::codec_by_name(&self.compression).is_none() {
            return Err(IngestError::Config(format!(
                "unknown compression codec {:?}",
                self.compression
            )));
        }
        let multiplier = self.publish_retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(IngestError::Config(format!(
                "publish_retry.backoff_multiplier must be a finite number >= 1, got {multiplier}"
            )));
        }
        Ok(())
    }
}

/// Collect environment variables starting with `prefix`, keyed by the rest of
/// the name in lowercase.
#[must_use]
pub fn config_from_env(prefix: &str) -> HashMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(prefix)
                .map(|rest| (rest.to_lowercase(), value))
        })
        .collect()
}

fn parse_toml(text: &str) -> Result<(PipelineConfig, bool)> {
    let table: toml::Table = toml::from_str(text)
        .map_err(|e| IngestError::Config(format!("parse config: {e}")))?;
    let row_buffer_set = table.contains_key("row_buffer");
    let cfg = toml::Value::Table(table)
        .try_into()
        .map_err(|e| IngestError::Config(format!("parse config: {e}")))?;
    Ok((cfg, row_buffer_set))
}

fn parse<T>(field: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| IngestError::Config(format!("{field}={value:?}: {e}")))
}
