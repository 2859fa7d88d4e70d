//! Accompanying attribute tables joined onto features before translation.
//!
//! Some regions ship field blocks as geometry plus a separate long-format
//! table with one row per crop on the block. The table is widened onto the
//! features: the first row per key keeps its column names, the k-th row
//! adds `<column>_<k>`. A mapping cell such as `CODE|CODE_2|CODE_3` then
//! turns the repeated columns back into crop parts.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use log::{info, warn};

use crate::{batch::FeatureBatch, io_utils};

const COLLISION_PREFIX: &str = "attr_";

#[derive(Debug, Clone)]
pub struct AttributeTable {
    headers: Vec<String>,
    rows: HashMap<String, Vec<Vec<String>>>,
    max_rows_per_key: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub matched: usize,
    pub unmatched: usize,
    pub added_columns: usize,
}

impl AttributeTable {
    pub fn load(
        path: &Path,
        key: &str,
        delimiter: Option<u8>,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let delimiter = io_utils::resolve_input_delimiter(path, delimiter);
        let (headers, rows) = io_utils::read_table(path, delimiter, encoding)
            .with_context(|| format!("Reading attribute table {path:?}"))?;
        Self::from_rows(&headers, rows, key)
            .with_context(|| format!("Indexing attribute table {path:?}"))
    }

    pub fn from_rows(headers: &[String], rows: Vec<Vec<String>>, key: &str) -> Result<Self> {
        let key_idx = headers
            .iter()
            .position(|h| h == key)
            .ok_or_else(|| anyhow!("Key column '{key}' not found in attribute table"))?;
        let value_columns = (0..headers.len())
            .filter(|idx| *idx != key_idx)
            .collect::<Vec<_>>();

        let mut grouped: HashMap<String, Vec<Vec<String>>> = HashMap::new();
        for row in rows {
            let key_value = row.get(key_idx).map(|v| v.trim().to_string()).unwrap_or_default();
            if key_value.is_empty() {
                continue;
            }
            let values = value_columns
                .iter()
                .map(|idx| row.get(*idx).cloned().unwrap_or_default())
                .collect();
            grouped.entry(key_value).or_default().push(values);
        }
        let max_rows_per_key = grouped.values().map(|rows| rows.len()).max().unwrap_or(0);
        Ok(Self {
            headers: value_columns.iter().map(|idx| headers[*idx].clone()).collect(),
            rows: grouped,
            max_rows_per_key,
        })
    }

    fn widened_name(&self, column: usize, rank: usize) -> String {
        if rank == 1 {
            self.headers[column].clone()
        } else {
            format!("{}_{rank}", self.headers[column])
        }
    }
}

/// Left-joins `table` onto `batch` through `feature_key`, one column per
/// attribute and repeat rank.
pub fn widen_join(
    batch: &mut FeatureBatch,
    table: &AttributeTable,
    feature_key: &str,
) -> Result<JoinSummary> {
    let key_idx = batch
        .column_index(feature_key)
        .ok_or_else(|| anyhow!("Feature key column '{feature_key}' not found in input"))?;
    let keys = batch
        .features
        .iter()
        .map(|feature| feature.values[key_idx].trim().to_string())
        .collect::<Vec<_>>();

    let mut summary = JoinSummary::default();
    for key in &keys {
        if table.rows.contains_key(key) {
            summary.matched += 1;
        } else {
            summary.unmatched += 1;
        }
    }

    for rank in 1..=table.max_rows_per_key {
        for column in 0..table.headers.len() {
            let mut name = table.widened_name(column, rank);
            while batch.column_index(&name).is_some() {
                name = format!("{COLLISION_PREFIX}{name}");
            }
            let mut position = 0usize;
            batch.add_column(&name, |_| {
                let value = table
                    .rows
                    .get(&keys[position])
                    .and_then(|rows| rows.get(rank - 1))
                    .and_then(|row| row.get(column))
                    .cloned()
                    .unwrap_or_default();
                position += 1;
                value
            });
            summary.added_columns += 1;
        }
    }

    if summary.unmatched > 0 {
        warn!(
            "{} feature(s) have no rows in the attribute table",
            summary.unmatched
        );
    }
    info!(
        "Joined attribute table: {} matched feature(s), {} column(s) added",
        summary.matched, summary.added_columns
    );
    Ok(summary)
}
