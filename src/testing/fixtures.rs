//! Sample user data in the shape of a real upload.

use crate::model::{RawRow, SOURCE_COLUMNS};
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

const COUNTRIES: [&str; 5] = ["USA", "Canada", "Germany", "Brazil", "Japan"];
const PLANS: [&str; 3] = ["Basic", "Standard", "Premium"];
const GENRES: [&str; 4] = ["Drama", "Comedy", "Documentary", "Action"];

/// The header line of a user upload.
#[must_use]
pub fn user_csv_header() -> String {
    SOURCE_COLUMNS.join(",")
}

/// Field values of user `i`, in [`SOURCE_COLUMNS`] order.
///
/// Names are `user-{i}` so tests can check which rows arrived.
#[must_use]
pub fn sample_user_fields(i: usize) -> [String; 7] {
    [
        format!("user-{i}"),
        (18 + i % 60).to_string(),
        COUNTRIES[i % COUNTRIES.len()].to_string(),
        PLANS[i % PLANS.len()].to_string(),
        format!("{}.{}", i % 500, i % 10),
        GENRES[i % GENRES.len()].to_string(),
        format!("2024-{:02}-{:02}", 1 + i % 12, 1 + i % 28),
    ]
}

/// `n` users as parsed rows.
///
/// # Example
///
/// ```
/// use bulkload::testing::sample_users;
///
/// let users = sample_users(3);
/// assert_eq!(users[2].get("Name"), Some("user-2"));
/// ```
#[must_use]
pub fn sample_users(n: usize) -> Vec<RawRow> {
    (0..n)
        .map(|i| {
            let fields = sample_user_fields(i);
            RawRow::from_fields(SOURCE_COLUMNS, fields.iter().map(String::as_str))
        })
        .collect()
}

/// CSV text with a header and `n` users.
#[must_use]
pub fn user_csv_text(n: usize) -> String {
    let mut out = user_csv_header();
    out.push('\n');
    for i in 0..n {
        let _ = writeln!(out, "{}", sample_user_fields(i).join(","));
    }
    out
}

/// Write `contents` to `dir/name`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_csv(dir: impl AsRef<Path>, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.as_ref().join(name);
    std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Write a user CSV with `n` rows to `dir/name`. `n = 0` gives a header-only file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_user_csv(dir: impl AsRef<Path>, name: &str, n: usize) -> Result<PathBuf> {
    write_csv(dir, name, &user_csv_text(n))
}

/// Like [`write_user_csv`], gzip-compressed.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_gzip_user_csv(dir: impl AsRef<Path>, name: &str, n: usize) -> Result<PathBuf> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let path = dir.as_ref().join(name);
    let file =
        std::fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
    let mut enc = GzEncoder::new(file, Compression::fast());
    enc.write_all(user_csv_text(n).as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    enc.finish()
        .with_context(|| format!("finish {}", path.display()))?;
    Ok(path)
}
