//! Chunk codec: [`Chunk`] to compressed bytes and back.
//!
//! A chunk is serialised as a JSON array of row objects and compressed with a
//! [`CompressionCodec`]. Decoding picks the codec from the payload's magic
//! bytes, so consumers read messages from producers configured with any
//! built-in codec.
//!
//! ```
//! use bulkload::codec::ChunkCodec;
//! use bulkload::model::{Chunk, RawRow};
//!
//! let codec = ChunkCodec::default();
//! let chunk = Chunk::new(vec![RawRow::new().with("Name", "Ada")]);
//! let bytes = codec.encode(&chunk).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), chunk);
//! ```

use crate::error::{IngestError, Result};
use crate::io::compression::{CompressionCodec, GzipCodec, codec_by_name, detect_from_magic};
use crate::model::Chunk;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Stateless and cheap to clone; one instance is shared by all tasks.
#[derive(Clone)]
pub struct ChunkCodec {
    compression: Arc<dyn CompressionCodec>,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new(Arc::new(GzipCodec))
    }
}

impl fmt::Debug for ChunkCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCodec")
            .field("compression", &self.compression.name())
            .finish()
    }
}

impl ChunkCodec {
    #[must_use]
    pub fn new(compression: Arc<dyn CompressionCodec>) -> Self {
        Self { compression }
    }

    /// Build from a codec name such as `"gzip"` or `"zstd"`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if no built-in codec has that name.
    pub fn named(name: &str) -> Result<Self> {
        codec_by_name(name)
            .map(Self::new)
            .ok_or_else(|| IngestError::Config(format!("unknown compression codec {name:?}")))
    }

    #[must_use]
    pub fn compression(&self) -> &str {
        self.compression.name()
    }

    /// Serialise and compress a chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode(&self, chunk: &Chunk) -> Result<Bytes> {
        let json = serde_json::to_vec(chunk)
            .map_err(|e| IngestError::io("serialize chunk", std::io::Error::other(e)))?;
        let packed = self
            .compression
            .compress(&json)
            .map_err(|e| IngestError::io(format!("{} compress", self.compression.name()), e))?;
        Ok(Bytes::from(packed))
    }

    /// Decompress and parse a payload produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MalformedMessage`] if the payload is not in a
    /// known compression format, fails to decompress, or is not a row array.
    /// When only parsing failed, the decompressed text is kept in `raw`.
    pub fn decode(&self, payload: &[u8]) -> Result<Chunk> {
        let codec = detect_from_magic(payload).ok_or_else(|| {
            IngestError::malformed(format!(
                "unrecognised compression header ({} bytes)",
                payload.len()
            ))
        })?;
        let json = codec
            .decompress(payload)
            .map_err(|e| IngestError::malformed(format!("{} decompress: {e}", codec.name())))?;
        serde_json::from_slice(&json).map_err(|e| IngestError::MalformedMessage {
            reason: format!("parse rows: {e}"),
            raw: Some(String::from_utf8_lossy(&json).into_owned()),
        })
    }
}
