//! Pluggable compression for chunk payloads and uploaded files.
//!
//! Two places need a compressor:
//! - the [chunk codec](crate::codec) compresses every serialised chunk before it
//!   is queued and must recognise the format again on the consumer side;
//! - the [row source](crate::io::csv) accepts uploads that were compressed
//!   client-side (`users.csv.gz`).
//!
//! Both go through the [`CompressionCodec`] trait. Detection checks the file
//! extension first and falls back to magic bytes, so a payload or file can be
//! read without being told how it was written.
//!
//! ## Built-in Codecs
//!
//! - **Gzip** (`.gz`) - via `flate2`, always available, the default for chunks
//! - **Zstd** (`.zst`) - via `zstd` (feature: `compression-zstd`)

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Pluggable compression codec trait.
///
/// Implementations must be `Send + Sync`: the same codec is shared by every
/// publishing and consuming task.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip", "zstd").
    fn name(&self) -> &str;

    /// File extensions associated with this codec, lowercase with the leading dot.
    fn extensions(&self) -> &[&str];

    /// Signature every stream written by this codec starts with.
    fn magic_bytes(&self) -> &[u8];

    /// Compress a complete buffer.
    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Decompress a complete buffer.
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Wrap a reader with streaming decompression.
    fn wrap_reader_dyn(
        &self,
        reader: Box<dyn Read + Send>,
    ) -> std::io::Result<Box<dyn Read + Send>>;
}

/// Every codec compiled into this build, gzip first.
#[must_use]
pub fn builtin_codecs() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
    ]
}

/// Look up a built-in codec by name.
#[must_use]
pub fn codec_by_name(name: &str) -> Option<Arc<dyn CompressionCodec>> {
    builtin_codecs()
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(name))
}

/// Detect compression codec from file path extension (case-insensitive).
#[must_use]
pub fn detect_from_extension(path: impl AsRef<Path>) -> Option<Arc<dyn CompressionCodec>> {
    let path_str = path.as_ref().to_string_lossy().to_lowercase();
    builtin_codecs()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| path_str.ends_with(ext)))
}

/// Detect compression codec from the first bytes of a buffer.
#[must_use]
pub fn detect_from_magic(head: &[u8]) -> Option<Arc<dyn CompressionCodec>> {
    if head.is_empty() {
        return None;
    }
    builtin_codecs()
        .into_iter()
        .find(|codec| head.starts_with(codec.magic_bytes()))
}

/// Automatically detect and wrap a reader with decompression if needed.
///
/// Detection strategy:
/// 1. Check file path extension (fast path)
/// 2. Fall back to magic byte detection if extension not recognized
/// 3. Return the buffered reader unwrapped if no compression detected
///
/// # Errors
///
/// Returns an error if the reader cannot be peeked or the codec rejects the
/// stream header.
pub fn auto_detect_reader<R: Read + Send + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> std::io::Result<Box<dyn Read + Send>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec.wrap_reader_dyn(Box::new(reader));
    }

    let mut buf_reader = BufReader::new(reader);
    let codec = detect_from_magic(buf_reader.fill_buf()?);
    match codec {
        Some(codec) => codec.wrap_reader_dyn(Box::new(buf_reader)),
        None => Ok(Box::new(buf_reader)),
    }
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> &[u8] {
        &[0x1f, 0x8b]
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
        enc.write_all(data)?;
        enc.finish()
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use flate2::read::GzDecoder;
        let mut out = Vec::with_capacity(data.len() * 4);
        GzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }

    fn wrap_reader_dyn(
        &self,
        reader: Box<dyn Read + Send>,
    ) -> std::io::Result<Box<dyn Read + Send>> {
        use flate2::read::MultiGzDecoder;
        Ok(Box::new(MultiGzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
pub struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> &[u8] {
        &[0x28, 0xb5, 0x2f, 0xfd]
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::stream::encode_all(data, 3)
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::stream::decode_all(data)
    }

    fn wrap_reader_dyn(
        &self,
        reader: Box<dyn Read + Send>,
    ) -> std::io::Result<Box<dyn Read + Send>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read + Send>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_detection_is_case_insensitive() {
        let codec = detect_from_extension("UPLOAD.CSV.GZ").unwrap();
        assert_eq!(codec.name(), "gzip");
        assert!(detect_from_extension("users.csv").is_none());
    }

    #[test]
    fn magic_detection_matches_compressed_output() {
        for codec in builtin_codecs() {
            let packed = codec.compress(b"Name,Age\nAda,36\n").unwrap();
            let found = detect_from_magic(&packed).unwrap();
            assert_eq!(found.name(), codec.name());
        }
        assert!(detect_from_magic(b"Name,Age").is_none());
        assert!(detect_from_magic(b"").is_none());
    }

    #[test]
    fn auto_reader_passes_plain_text_through() {
        let mut out = String::new();
        auto_detect_reader(&b"plain,text\n"[..], "upload")
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "plain,text\n");
    }
}
