//! Before/after state comparison.
//!
//! Both sides of a comparison must be captured with the same dump logic; the helpers here only
//! decide equality and describe the difference.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{error, info};

/// A state difference found by a validation helper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub what: String,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mismatch", self.what)?;
        if !self.missing.is_empty() {
            write!(f, "; missing: [{}]", self.missing.join(", "))?;
        }
        if !self.unexpected.is_empty() {
            write!(f, "; unexpected: [{}]", self.unexpected.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for Mismatch {}

/// A tabular snapshot: column names plus stringified rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDump {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableDump {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Parse delimiter-separated text, first line as header. Blank lines are ignored.
    pub fn parse(text: &str, delimiter: char) -> Self {
        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let split = |line: &str| -> Vec<String> {
            line.split(delimiter).map(|v| v.trim().to_string()).collect()
        };
        let columns = lines.next().map(split).unwrap_or_default();
        let rows = lines.map(split).collect();
        Self { columns, rows }
    }

    fn row_counts(&self) -> BTreeMap<&[String], usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row.as_slice()).or_insert(0) += 1;
        }
        counts
    }
}

fn display_row(row: &[String]) -> String {
    format!("({})", row.join(", "))
}

/// Compare two dumps as multisets of rows; row order does not matter, duplicates do.
pub fn compare_dumps(what: &str, before: &TableDump, after: &TableDump) -> Result<()> {
    if before.columns != after.columns {
        let mismatch = Mismatch {
            what: format!("{} columns", what),
            missing: before.columns.clone(),
            unexpected: after.columns.clone(),
        };
        error!(%mismatch, "table columns differ");
        return Err(mismatch.into());
    }
    let (expected, actual) = (before.row_counts(), after.row_counts());
    let mut missing = vec![];
    let mut unexpected = vec![];
    for row in expected.keys().chain(actual.keys()).collect::<BTreeSet<_>>() {
        let want = expected.get(row).copied().unwrap_or(0);
        let got = actual.get(row).copied().unwrap_or(0);
        missing.extend(std::iter::repeat(display_row(row)).take(want.saturating_sub(got)));
        unexpected.extend(std::iter::repeat(display_row(row)).take(got.saturating_sub(want)));
    }
    if missing.is_empty() && unexpected.is_empty() {
        info!(what, rows = before.rows.len(), "table contents match");
        return Ok(());
    }
    let mismatch = Mismatch {
        what: what.to_string(),
        missing,
        unexpected,
    };
    error!(
        before = before.rows.len(),
        after = after.rows.len(),
        %mismatch,
        "table contents differ"
    );
    Err(mismatch.into())
}

/// Result of [`compare_lists`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListDiff {
    /// `- item` for entries only in the source, `+ item` for entries only in the destination.
    pub lines: Vec<String>,
}

impl ListDiff {
    pub fn is_identical(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_result(self, what: &str) -> Result<()> {
        if self.is_identical() {
            return Ok(());
        }
        let (missing, unexpected) = self
            .lines
            .iter()
            .partition::<Vec<_>, _>(|l| l.starts_with('-'));
        Err(Error::Validation(Mismatch {
            what: what.to_string(),
            missing: missing.into_iter().map(|l| l[2..].to_string()).collect(),
            unexpected: unexpected.into_iter().map(|l| l[2..].to_string()).collect(),
        }))
    }
}

/// Position-wise comparison of two lists, optionally sorting both first.
pub fn compare_lists<T>(source: &[T], destination: &[T], sort: bool) -> ListDiff
where
    T: Ord + Clone + fmt::Display,
{
    let mut source = source.to_vec();
    let mut destination = destination.to_vec();
    if sort {
        source.sort();
        destination.sort();
    }
    let mut lines = vec![];
    for i in 0..source.len().max(destination.len()) {
        match (source.get(i), destination.get(i)) {
            (Some(a), Some(b)) if a == b => {}
            (a, b) => {
                if let Some(a) = a {
                    lines.push(format!("- {}", a));
                }
                if let Some(b) = b {
                    lines.push(format!("+ {}", b));
                }
            }
        }
    }
    ListDiff { lines }
}

/// Key-by-key comparison of two maps.
pub fn compare_maps<V>(
    what: &str,
    expected: &BTreeMap<String, V>,
    actual: &BTreeMap<String, V>,
) -> Result<()>
where
    V: PartialEq + fmt::Debug,
{
    let mut missing = vec![];
    let mut unexpected = vec![];
    for (key, want) in expected {
        match actual.get(key) {
            None => missing.push(key.clone()),
            Some(got) if got != want => {
                missing.push(format!("{}={:?}", key, want));
                unexpected.push(format!("{}={:?}", key, got));
            }
            Some(_) => {}
        }
    }
    unexpected.extend(
        actual
            .keys()
            .filter(|key| !expected.contains_key(*key))
            .cloned(),
    );
    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }
    Err(Error::Validation(Mismatch {
        what: what.to_string(),
        missing,
        unexpected,
    }))
}

/// Accept `actual` if it is within `percent` of `expected`.
pub fn within_percent(what: &str, expected: u64, actual: u64, percent: f64) -> Result<()> {
    let difference = expected.abs_diff(actual) as f64;
    let allowed = expected as f64 * percent / 100.0;
    info!(what, expected, actual, percent, "comparing sizes");
    if difference <= allowed {
        return Ok(());
    }
    Err(Error::Validation(Mismatch {
        what: format!("{} (allowed difference {}%)", what, percent),
        missing: vec![format!("expected {}", expected)],
        unexpected: vec![format!("actual {}", actual)],
    }))
}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
