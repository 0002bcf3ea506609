//! Streaming CSV row source.
//!
//! [`RowReader`] yields one [`RawRow`] per record, pairing every field with
//! the header row. It never holds more than the current record in memory, so
//! the producer can stream files of any size.
//!
//! # Notes
//! - The first record is always the header; a header-only or empty file
//!   yields nothing.
//! - Records are **flexible**: a short record leaves the trailing columns out
//!   of the row (they become `NULL` at insert time) and fields beyond the
//!   header are dropped.
//! - Compressed uploads (`.gz`, `.zst`, or matching magic bytes) are
//!   decompressed transparently.

use crate::error::{IngestError, Result};
use crate::io::compression::auto_detect_reader;
use crate::model::RawRow;
use csv::{ReaderBuilder, StringRecordsIntoIter, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub struct RowReader {
    headers: Vec<String>,
    records: StringRecordsIntoIter<Box<dyn Read + Send>>,
    record: u64,
    failed: bool,
}

impl RowReader {
    /// Open `path` and read its header row.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the file cannot be opened and
    /// [`IngestError::Parse`] if the header row is unreadable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f =
            File::open(path).map_err(|e| IngestError::io(format!("open {}", path.display()), e))?;
        let rdr = auto_detect_reader(f, path).map_err(|e| {
            IngestError::io(format!("setup decompression for {}", path.display()), e)
        })?;
        Self::from_reader(rdr)
    }

    /// Read CSV from any source; the first record is the header.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Parse`] if the header row is unreadable.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Headers)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| IngestError::Parse {
                record: 0,
                message: format!("header row: {e}"),
            })?
            .iter()
            .map(str::to_string)
            .collect();
        Ok(Self {
            headers,
            records: rdr.into_records(),
            record: 0,
            failed: false,
        })
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Iterator for RowReader {
    type Item = Result<RawRow>;

    /// Stops after the first error; a malformed record aborts the upload.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let rec = self.records.next()?;
        self.record += 1;
        Some(match rec {
            Ok(rec) => Ok(RawRow::from_fields(
                self.headers.iter().map(String::as_str),
                rec.iter(),
            )),
            Err(e) => {
                self.failed = true;
                Err(IngestError::Parse {
                    record: self.record,
                    message: e.to_string(),
                })
            }
        })
    }
}
