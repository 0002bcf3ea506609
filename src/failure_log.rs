//! Append-only record of chunks the consumer could not insert.
//!
//! Writes failures as NDJSON, one [`FailedInsertEntry`] per line, for manual
//! recovery. The pipeline never reads or rotates the file. It only truncates
//! away the tail of a line it failed to write.

use crate::error::{IngestError, Result};
use crate::model::FailedInsertEntry;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions, create_dir_all};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Appends are serialised through one file handle, so concurrent failures
/// land as whole lines and none is lost.
pub struct FailureLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

struct Writer {
    file: File,
    /// The file may end in a partial line that could not be truncated away.
    torn: bool,
}

impl FailureLog {
    /// Open `path` for appending, creating it and its parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)
                .await
                .map_err(|e| IngestError::io(format!("mkdir -p {}", parent.display()), e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| IngestError::io(format!("open {}", path.display()), e))?;
        info!(path = %path.display(), "failure log ready");
        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, torn: false }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one entry.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::FailureLog`] if the line cannot be written and
    /// synced.
    pub async fn append(&self, entry: &FailedInsertEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry).map_err(|e| self.error(std::io::Error::other(e)))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        if writer.torn {
            line.insert(0, b'\n');
        }
        let len = writer.file.metadata().await.map_err(|e| self.error(e))?.len();
        if let Err(e) = write_line(&mut writer.file, &line).await {
            self.discard_partial(&mut writer, len).await;
            return Err(self.error(e));
        }
        writer.torn = false;
        drop(writer);

        debug!(rows = entry.rows.len(), "recorded failed chunk");
        Ok(())
    }

    /// Cut the file back to `len` after a failed write. If that fails too,
    /// the next append starts on a fresh line.
    async fn discard_partial(&self, writer: &mut Writer, len: u64) {
        if let Err(e) = writer.file.set_len(len).await {
            warn!(
                path = %self.path.display(),
                error = %e,
                "could not drop partial failure log line"
            );
            writer.torn = true;
        }
    }

    fn error(&self, source: std::io::Error) -> IngestError {
        IngestError::FailureLog {
            path: self.path.clone(),
            source,
        }
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Read every entry back. Blank lines are skipped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is not an entry.
pub fn read_entries(path: impl AsRef<Path>) -> anyhow::Result<Vec<FailedInsertEntry>> {
    use anyhow::Context;
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line)
            .with_context(|| format!("parse line {} in {}", i + 1, path.display()))?;
        out.push(entry);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawRow;

    fn entry(name: &str) -> FailedInsertEntry {
        FailedInsertEntry::new(vec![RawRow::new().with("Name", name)], "rejected")
    }

    #[tokio::test]
    async fn partial_line_is_truncated_before_next_append() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("failed.log");
        let log = FailureLog::open(&path).await?;
        log.append(&entry("a")).await?;

        {
            let mut writer = log.writer.lock().await;
            let len = writer.file.metadata().await?.len();
            writer.file.write_all(b"{\"rows\":[{\"Na").await?;
            writer.file.flush().await?;
            log.discard_partial(&mut writer, len).await;
            assert!(!writer.torn);
        }
        log.append(&entry("b")).await?;

        let names: Vec<_> = read_entries(&path)?
            .into_iter()
            .map(|e| e.rows[0].get("Name").map(str::to_string))
            .collect();
        assert_eq!(names, vec![Some("a".to_string()), Some("b".to_string())]);
        Ok(())
    }

    #[tokio::test]
    async fn untruncated_tail_does_not_swallow_next_entry() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("failed.log");
        let log = FailureLog::open(&path).await?;

        {
            let mut writer = log.writer.lock().await;
            writer.file.write_all(b"{\"rows\":[").await?;
            writer.file.flush().await?;
            writer.torn = true;
        }
        log.append(&entry("b")).await?;

        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "{\"rows\":[");
        let b: FailedInsertEntry = serde_json::from_str(lines[1])?;
        assert_eq!(b.rows[0].get("Name"), Some("b"));
        Ok(())
    }
}
