//! Column translation: rewrite a source schema onto canonical column names.
//!
//! A mapping table has one row per canonical column and one column per
//! `{region}_{year}`. Cells hold nothing, a single source column name, or a
//! pipe-delimited list of source columns. Only rows whose in-use flag is set
//! take part in a translation.
//!
//! ```text
//! column_name,in_use,NRW_2020,NRW_2021
//! field_id,1,FLIK,FLIK
//! crop_code,1,CODE|CODE_2,CODE
//! ```

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result, anyhow, ensure};
use encoding_rs::Encoding;
use log::{debug, warn};

use crate::{batch::FeatureBatch, error::HarmonizeError, io_utils};

const CANONICAL_HEADER: &str = "column_name";
const IN_USE_HEADERS: &[&str] = &["in_use", "in-use", "prelim", "use"];
const SOURCE_SEPARATOR: char = '|';
const NULL_TOKENS: &[&str] = &["nan", "none", "null", "na"];
const CONFLICT_SUFFIX: &str = "_source";

/// Which source column(s) feed a canonical column for one region/year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceColumns {
    None,
    One(String),
    /// Two or more columns; the first is the in-place value.
    Many(Vec<String>),
}

impl SourceColumns {
    pub fn parse(cell: &str) -> Self {
        let trimmed = cell.trim();
        if trimmed.is_empty() || NULL_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
            return SourceColumns::None;
        }
        let mut names = trimmed
            .split(SOURCE_SEPARATOR)
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(|part| part.to_string())
            .collect::<Vec<_>>();
        match names.len() {
            0 => SourceColumns::None,
            1 => SourceColumns::One(names.remove(0)),
            _ => SourceColumns::Many(names),
        }
    }

    pub fn primary(&self) -> Option<&str> {
        match self {
            SourceColumns::None => None,
            SourceColumns::One(name) => Some(name),
            SourceColumns::Many(names) => names.first().map(|name| name.as_str()),
        }
    }

    /// Additional columns beyond the primary, paired with their 1-based
    /// position in the list.
    pub fn secondary(&self) -> Vec<(usize, &str)> {
        match self {
            SourceColumns::Many(names) => names
                .iter()
                .enumerate()
                .skip(1)
                .map(|(idx, name)| (idx + 1, name.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct MappingRow {
    canonical: String,
    in_use: bool,
    cells: Vec<SourceColumns>,
}

/// A parsed mapping table for one region, covering all of its years.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    table: String,
    region_years: Vec<String>,
    rows: Vec<MappingRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub canonical: String,
    pub sources: SourceColumns,
}

/// The in-use entries of a mapping for a single region/year.
#[derive(Debug, Clone)]
pub struct RegionMapping {
    pub region: String,
    pub year: u16,
    pub entries: Vec<MappingEntry>,
}

/// An extra source column that repeats a canonical attribute, to be split
/// into long format once identifiers exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitColumn {
    pub canonical: String,
    pub ordinal: usize,
    pub column: String,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub split_columns: Vec<SplitColumn>,
    /// Canonical columns that received values from the source.
    pub sourced: Vec<String>,
}

pub fn region_year_key(region: &str, year: u16) -> String {
    format!("{region}_{year}")
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "1.0" | "true" | "t" | "yes" | "y" | "x"
    )
}

impl ColumnMapping {
    pub fn load(path: &Path, encoding: &'static Encoding) -> Result<Self> {
        let delimiter = io_utils::resolve_input_delimiter(path, None);
        let (headers, rows) = io_utils::read_table(path, delimiter, encoding)
            .with_context(|| format!("Reading mapping table {path:?}"))?;
        Self::from_rows(&path.display().to_string(), &headers, &rows)
            .with_context(|| format!("Parsing mapping table {path:?}"))
    }

    pub fn from_rows(table: &str, headers: &[String], rows: &[Vec<String>]) -> Result<Self> {
        let canonical_idx = headers
            .iter()
            .position(|h| h.trim() == CANONICAL_HEADER)
            .ok_or_else(|| anyhow!("Mapping table is missing the '{CANONICAL_HEADER}' column"))?;
        let in_use_idx = headers
            .iter()
            .position(|h| IN_USE_HEADERS.contains(&h.trim().to_ascii_lowercase().as_str()));
        if in_use_idx.is_none() {
            debug!("Mapping table {table} has no in-use flag; every row is active");
        }
        let year_columns = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != canonical_idx && Some(*idx) != in_use_idx)
            .map(|(idx, name)| (idx, name.trim().to_string()))
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        let mut parsed = Vec::with_capacity(rows.len());
        for (row_idx, row) in rows.iter().enumerate() {
            let canonical = row
                .get(canonical_idx)
                .map(|value| value.trim().to_string())
                .unwrap_or_default();
            if canonical.is_empty() {
                continue;
            }
            ensure!(
                seen.insert(canonical.clone()),
                "Canonical column '{canonical}' is declared twice (row {})",
                row_idx + 2
            );
            let in_use = in_use_idx
                .map(|idx| row.get(idx).map(|v| is_truthy(v)).unwrap_or(false))
                .unwrap_or(true);
            let cells = year_columns
                .iter()
                .map(|(idx, _)| SourceColumns::parse(row.get(*idx).map(|v| v.as_str()).unwrap_or("")))
                .collect();
            parsed.push(MappingRow {
                canonical,
                in_use,
                cells,
            });
        }

        Ok(Self {
            table: table.to_string(),
            region_years: year_columns.into_iter().map(|(_, name)| name).collect(),
            rows: parsed,
        })
    }

    pub fn region_years(&self) -> &[String] {
        &self.region_years
    }

    pub fn for_region_year(&self, region: &str, year: u16) -> Result<RegionMapping, HarmonizeError> {
        let key = region_year_key(region, year);
        let column = self
            .region_years
            .iter()
            .position(|name| *name == key)
            .ok_or_else(|| HarmonizeError::MappingMissing {
                table: self.table.clone(),
                region: region.to_string(),
                year,
            })?;
        let entries = self
            .rows
            .iter()
            .filter(|row| row.in_use)
            .map(|row| MappingEntry {
                canonical: row.canonical.clone(),
                sources: row.cells[column].clone(),
            })
            .collect();
        Ok(RegionMapping {
            region: region.to_string(),
            year,
            entries,
        })
    }
}

/// Renames source columns to canonical names in place and completes the
/// schema with empty canonical columns.
///
/// When several canonical columns name the same source column, the first
/// takes the column and later ones receive a copy. Source columns that are
/// not claimed but already carry a canonical name are moved aside with a
/// `_source` suffix so the canonical name is unambiguous.
pub fn resolve(
    batch: &mut FeatureBatch,
    mapping: &RegionMapping,
    canonical_columns: &[String],
) -> Resolution {
    let mut resolution = Resolution::default();
    let mut claims: Vec<(&str, usize)> = Vec::new();
    for entry in &mapping.entries {
        let Some(primary) = entry.sources.primary() else {
            continue;
        };
        match batch.column_index(primary) {
            Some(idx) => claims.push((entry.canonical.as_str(), idx)),
            None => warn!(
                "Source column '{primary}' for '{}' not found in input ({}_{})",
                entry.canonical, mapping.region, mapping.year
            ),
        }
    }

    // Secondary columns are located before any renaming takes place.
    let mut pending_splits = Vec::new();
    for entry in &mapping.entries {
        for (ordinal, name) in entry.sources.secondary() {
            match batch.column_index(name) {
                Some(idx) => pending_splits.push((entry.canonical.as_str(), ordinal, idx)),
                None => warn!(
                    "Repeated source column '{name}' for '{}' not found in input",
                    entry.canonical
                ),
            }
        }
    }

    let claimed_indices = claims.iter().map(|(_, idx)| *idx).collect::<HashSet<_>>();
    let canonical_targets = claims.iter().map(|(name, _)| *name).collect::<HashSet<_>>();
    for idx in 0..batch.headers.len() {
        if claimed_indices.contains(&idx) || !canonical_targets.contains(batch.headers[idx].as_str())
        {
            continue;
        }
        let mut moved = format!("{}{CONFLICT_SUFFIX}", batch.headers[idx]);
        while batch.column_index(&moved).is_some() {
            moved.push_str(CONFLICT_SUFFIX);
        }
        debug!("Moving unclaimed column '{}' to '{moved}'", batch.headers[idx]);
        batch.rename_column(idx, &moved);
    }

    let mut renamed = HashSet::new();
    for (canonical, idx) in &claims {
        if renamed.insert(*idx) {
            batch.rename_column(*idx, canonical);
        } else {
            let source = *idx;
            batch.add_column(canonical, |feature| feature.values[source].clone());
        }
        resolution.sourced.push(canonical.to_string());
    }

    resolution.split_columns = pending_splits
        .into_iter()
        .map(|(canonical, ordinal, idx)| SplitColumn {
            canonical: canonical.to_string(),
            ordinal,
            column: batch.headers[idx].clone(),
        })
        .collect();

    for name in mapping
        .entries
        .iter()
        .map(|entry| entry.canonical.as_str())
        .chain(canonical_columns.iter().map(|name| name.as_str()))
    {
        batch.ensure_column(name);
    }
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{batch::Shape, crs::Crs};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::from_rows(
            "test",
            &strings(&["column_name", "in_use", "X_2020", "X_2021"]),
            &[
                strings(&["field_id", "1", "FID", "FID"]),
                strings(&["crop_name", "1", "COL_A|COL_B", "COL_A"]),
                strings(&["crop_code", "1", "", "CODE"]),
                strings(&["farm_id", "0", "FARM", "FARM"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn parses_source_cells() {
        assert_eq!(SourceColumns::parse(""), SourceColumns::None);
        assert_eq!(SourceColumns::parse("NaN"), SourceColumns::None);
        assert_eq!(SourceColumns::parse("A"), SourceColumns::One("A".into()));
        assert_eq!(
            SourceColumns::parse("A | B|"),
            SourceColumns::Many(strings(&["A", "B"]))
        );
        assert_eq!(
            SourceColumns::parse("A|B|C").secondary(),
            vec![(2, "B"), (3, "C")]
        );
    }

    #[test]
    fn only_in_use_rows_are_selected() {
        let selected = mapping().for_region_year("X", 2020).unwrap();
        let names = selected
            .entries
            .iter()
            .map(|e| e.canonical.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["field_id", "crop_name", "crop_code"]);
    }

    #[test]
    fn missing_region_year_is_reported() {
        let err = mapping().for_region_year("X", 2019).unwrap_err();
        assert!(err.is_skip());
        assert!(err.to_string().contains("X_2019"));
    }

    #[test]
    fn duplicate_canonical_rows_are_rejected() {
        let err = ColumnMapping::from_rows(
            "dup",
            &strings(&["column_name", "X_2020"]),
            &[strings(&["crop_code", "A"]), strings(&["crop_code", "B"])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn multi_source_column_splits_off_secondary() {
        let mut batch = FeatureBatch::new(strings(&["FID", "COL_A", "COL_B"]), Crs::LAEA_EUROPE);
        batch.push(strings(&["7", "maize", "silage_maize"]), Shape::Missing);
        let selected = mapping().for_region_year("X", 2020).unwrap();
        let canonical = strings(&["field_id", "crop_name", "crop_code", "organic"]);

        let resolution = resolve(&mut batch, &selected, &canonical);

        assert_eq!(batch.value(&batch.features[0], "crop_name"), "maize");
        assert_eq!(batch.value(&batch.features[0], "field_id"), "7");
        assert_eq!(
            resolution.split_columns,
            vec![SplitColumn {
                canonical: "crop_name".into(),
                ordinal: 2,
                column: "COL_B".into(),
            }]
        );
        assert!(batch.column_index("organic").is_some());
        assert!(!batch.is_sourced("crop_code"));
        assert_eq!(resolution.sourced, strings(&["field_id", "crop_name"]));
    }

    #[test]
    fn unclaimed_column_with_canonical_name_is_moved_aside() {
        let mut batch = FeatureBatch::new(strings(&["FID", "crop_name", "COL_A"]), Crs::LAEA_EUROPE);
        batch.push(strings(&["1", "stale", "wheat"]), Shape::Missing);
        let selected = mapping().for_region_year("X", 2021).unwrap();
        resolve(&mut batch, &selected, &[]);
        assert_eq!(batch.value(&batch.features[0], "crop_name"), "wheat");
        assert_eq!(batch.value(&batch.features[0], "crop_name_source"), "stale");
    }

    #[test]
    fn shared_source_column_is_copied() {
        let table = ColumnMapping::from_rows(
            "shared",
            &strings(&["column_name", "Y_2022"]),
            &[strings(&["crop_code", "KULT"]), strings(&["crop_name", "KULT"])],
        )
        .unwrap();
        let mut batch = FeatureBatch::new(strings(&["KULT"]), Crs::LAEA_EUROPE);
        batch.push(strings(&["411"]), Shape::Missing);
        let resolution = resolve(&mut batch, &table.for_region_year("Y", 2022).unwrap(), &[]);
        assert_eq!(batch.value(&batch.features[0], "crop_code"), "411");
        assert_eq!(batch.value(&batch.features[0], "crop_name"), "411");
        assert!(batch.is_sourced("crop_name"));
        assert_eq!(resolution.sourced.len(), 2);
    }
}
