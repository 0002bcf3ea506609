//! Records that flow through the pipeline.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header names of the source file, in the order the store expects them.
pub const SOURCE_COLUMNS: [&str; 7] = [
    "Name",
    "Age",
    "Country",
    "Subscription_Type",
    "Watch_Time_Hours",
    "Favorite_Genre",
    "Last_Login",
];

/// Target columns of the `users` table, positionally matching [`SOURCE_COLUMNS`].
pub const TARGET_COLUMNS: [&str; 7] = [
    "name",
    "age",
    "country",
    "subscription_type",
    "watch_time_hours",
    "favorite_genre",
    "last_login",
];

/// Bind placeholders one statement may carry. MySQL caps this at 65535.
pub const MAX_STATEMENT_PLACEHOLDERS: usize = 65_535;

/// Largest chunk that still inserts as a single statement.
pub const MAX_CHUNK_ROWS: usize = MAX_STATEMENT_PLACEHOLDERS / TARGET_COLUMNS.len();

/// One parsed line of the input: column name to raw string value.
///
/// Values are never coerced before they reach the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(BTreeMap<String, String>);

impl RawRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `headers` with `fields` positionally. Missing trailing fields are
    /// left out; extra fields without a header are dropped.
    pub fn from_fields<'a, H, F>(headers: H, fields: F) -> Self
    where
        H: IntoIterator<Item = &'a str>,
        F: IntoIterator<Item = &'a str>,
    {
        Self(
            headers
                .into_iter()
                .zip(fields)
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Exact lookup first, then an ASCII case-insensitive match.
    #[must_use]
    pub fn lookup(&self, column: &str) -> Option<&str> {
        self.get(column).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(column))
                .map(|(_, v)| v.as_str())
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// An ordered, sealed batch of rows: the unit of compression, queuing and insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chunk(Vec<RawRow>);

impl Chunk {
    #[must_use]
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self(rows)
    }

    #[must_use]
    pub fn rows(&self) -> &[RawRow] {
        &self.0
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<RawRow> {
        self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Map every row onto the fixed insert column order.
    #[must_use]
    pub fn to_records(&self) -> Vec<InsertRecord> {
        self.0.iter().map(InsertRecord::from_row).collect()
    }
}

/// Column values of one row in the store's insert order.
///
/// A field absent from the source row becomes `None` (SQL `NULL`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertRecord {
    pub name: Option<String>,
    pub age: Option<String>,
    pub country: Option<String>,
    pub subscription_type: Option<String>,
    pub watch_time_hours: Option<String>,
    pub favorite_genre: Option<String>,
    pub last_login: Option<String>,
}

impl InsertRecord {
    #[must_use]
    pub fn from_row(row: &RawRow) -> Self {
        let [name, age, country, subscription_type, watch_time_hours, favorite_genre, last_login] =
            SOURCE_COLUMNS.map(|column| row.lookup(column).map(str::to_string));
        Self {
            name,
            age,
            country,
            subscription_type,
            watch_time_hours,
            favorite_genre,
            last_login,
        }
    }

    /// Values in [`TARGET_COLUMNS`] order.
    #[must_use]
    pub fn values(&self) -> [Option<&str>; 7] {
        [
            self.name.as_deref(),
            self.age.as_deref(),
            self.country.as_deref(),
            self.subscription_type.as_deref(),
            self.watch_time_hours.as_deref(),
            self.favorite_genre.as_deref(),
            self.last_login.as_deref(),
        ]
    }
}

/// Where in the consumer a chunk failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Decode,
    Insert,
    DeadLetter,
}

/// One line of the failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedInsertEntry {
    pub rows: Vec<RawRow>,
    pub error: String,
    /// ISO-8601 UTC, millisecond precision.
    pub timestamp: String,
    /// Decompressed payload text when the rows themselves could not be recovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<FailureStage>,
}

impl FailedInsertEntry {
    pub fn new(rows: Vec<RawRow>, error: impl Into<String>) -> Self {
        Self {
            rows,
            error: error.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            raw: None,
            attempt: None,
            stage: None,
        }
    }

    #[must_use]
    pub fn with_raw(mut self, raw: Option<String>) -> Self {
        self.raw = raw;
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: Option<u32>) -> Self {
        self.attempt = attempt;
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: FailureStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// What one `submit` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubmitReport {
    pub chunks: usize,
    pub rows: usize,
    pub keys_invalidated: usize,
}
