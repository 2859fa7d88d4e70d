//! Canonical record assembly and the all-or-nothing output commit.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use log::{debug, info, warn};

use crate::{
    batch::FeatureBatch,
    classification::MissedClassification,
    crs::Crs,
    formats::FeatureFormat,
    geometry,
    identity::DuplicateRecord,
    io_utils,
    parts::CropParts,
    schema,
};

const TRUE_TOKENS: &[&str] = &["1", "1.0", "true", "t", "yes", "y", "j", "ja", "x", "bio", "organic"];
const FALSE_TOKENS: &[&str] = &["0", "0.0", "false", "f", "no", "n", "nein", "konventionell", "conventional"];

pub const MISSES_SUFFIX: &str = "misses";
pub const CROP_PARTS_SUFFIX: &str = "crop_parts";
pub const DUPLICATES_SUFFIX: &str = "duplicates";

/// `1`/`0` for recognised flag tokens; anything else is returned unchanged.
pub fn normalize_organic(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        String::new()
    } else if TRUE_TOKENS.contains(&lowered.as_str()) {
        "1".to_string()
    } else if FALSE_TOKENS.contains(&lowered.as_str()) {
        "0".to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Computes `field_size`, normalizes `organic` and stamps region and year.
/// Must run while the batch is still in the projected working system.
pub fn attach_bookkeeping(batch: &mut FeatureBatch, region: &str, year: u16) -> Result<()> {
    if batch.crs.is_geographic() {
        return Err(anyhow!(
            "Field sizes need a projected system, batch is in {}",
            batch.crs
        ));
    }
    batch.add_column(schema::FIELD_SIZE, |feature| {
        feature
            .shape
            .polygonal()
            .map(|shape| format!("{:.4}", geometry::area_hectares(shape)))
            .unwrap_or_default()
    });
    if let Some(idx) = batch.column_index(schema::ORGANIC) {
        for feature in &mut batch.features {
            feature.values[idx] = normalize_organic(&feature.values[idx]);
        }
    }
    batch.add_column(schema::REGION, |_| region.to_string());
    batch.add_column(schema::YEAR, |_| year.to_string());
    Ok(())
}

/// Keeps exactly `canonical_columns` (absent ones filled empty) and moves
/// the shapes into `target`.
pub fn assemble(batch: &mut FeatureBatch, canonical_columns: &[String], target: Crs) -> Result<()> {
    let dropped = batch
        .headers
        .iter()
        .filter(|header| !canonical_columns.contains(header))
        .count();
    for column in canonical_columns {
        batch.ensure_column(column);
    }
    batch.project(canonical_columns);
    debug!("Projected onto {} canonical column(s), {dropped} dropped", canonical_columns.len());
    geometry::reproject_batch(batch, target)
}

/// The files produced for one source, written as a unit.
#[derive(Debug)]
pub struct OutputSet<'a> {
    pub main: PathBuf,
    pub format: FeatureFormat,
    pub batch: &'a FeatureBatch,
    pub id_column: &'a str,
    pub misses: &'a [MissedClassification],
    pub parts: &'a CropParts,
    pub duplicates: &'a [DuplicateRecord],
}

struct Staged {
    partial: PathBuf,
    destination: PathBuf,
}

impl OutputSet<'_> {
    pub fn misses_path(&self) -> PathBuf {
        io_utils::sibling_path(&self.main, MISSES_SUFFIX, "csv")
    }

    pub fn parts_path(&self) -> PathBuf {
        io_utils::sibling_path(&self.main, CROP_PARTS_SUFFIX, "csv")
    }

    pub fn duplicates_path(&self) -> PathBuf {
        io_utils::sibling_path(&self.main, DUPLICATES_SUFFIX, "csv")
    }

    /// Writes every file to a `.partial` sibling, then renames side files
    /// and finally the main output. On failure no temporary survives and
    /// the main output is never left half-written.
    pub fn commit(&self) -> Result<Vec<PathBuf>> {
        io_utils::ensure_parent_dir(&self.main)?;
        let mut staged = Vec::new();
        let written = self.stage(&mut staged);
        let result = written.and_then(|()| self.promote(&staged));
        if result.is_err() {
            for file in &staged {
                if file.partial.exists() {
                    let _ = fs::remove_file(&file.partial);
                }
            }
        }
        result?;
        let committed = staged.into_iter().map(|file| file.destination).collect::<Vec<_>>();
        info!("Committed {} file(s) for {:?}", committed.len(), self.main);
        Ok(committed)
    }

    fn stage(&self, staged: &mut Vec<Staged>) -> Result<()> {
        if !self.misses.is_empty() {
            let destination = self.misses_path();
            let partial = io_utils::partial_path(&destination);
            staged.push(Staged { partial: partial.clone(), destination });
            let headers = vec![schema::CROP_CODE.to_string(), schema::CROP_NAME.to_string()];
            let rows = self
                .misses
                .iter()
                .map(|miss| vec![miss.crop_code.clone(), miss.crop_name.clone()]);
            io_utils::write_table(&partial, b',', &headers, rows)?;
        }
        if !self.parts.is_empty() {
            let destination = self.parts_path();
            let partial = io_utils::partial_path(&destination);
            staged.push(Staged { partial: partial.clone(), destination });
            io_utils::write_table(&partial, b',', &self.parts.headers(self.id_column), self.parts.records())?;
        }
        if !self.duplicates.is_empty() {
            let destination = self.duplicates_path();
            let partial = io_utils::partial_path(&destination);
            staged.push(Staged { partial: partial.clone(), destination });
            let headers = vec![self.id_column.to_string(), "duplicate_row".to_string()];
            let rows = self
                .duplicates
                .iter()
                .map(|record| vec![record.retained_id.clone(), record.duplicate_row.to_string()]);
            io_utils::write_table(&partial, b',', &headers, rows)?;
        }

        let partial = io_utils::partial_path(&self.main);
        staged.push(Staged {
            partial: partial.clone(),
            destination: self.main.clone(),
        });
        self.format.write(&partial, self.batch)
    }

    fn promote(&self, staged: &[Staged]) -> Result<()> {
        // Side files left over from an earlier run of the same source would
        // otherwise sit next to a main output they do not belong to.
        for stale in [self.misses_path(), self.parts_path(), self.duplicates_path()] {
            if stale.exists() && !staged.iter().any(|file| file.destination == stale) {
                warn!("Removing stale side output {stale:?}");
                fs::remove_file(&stale)?;
            }
        }
        // The main output is staged last, so it is also renamed last.
        for file in staged {
            io_utils::finalize(&file.partial, &file.destination)?;
        }
        Ok(())
    }
}

pub fn main_output_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{batch::Shape, crs::Crs};

    fn working_batch() -> FeatureBatch {
        let mut batch = FeatureBatch::new(
            vec!["field_id".into(), "organic".into(), "RAW".into()],
            Crs::LAEA_EUROPE,
        );
        batch.push(
            vec!["a".into(), "Ja".into(), "x".into()],
            Shape::from_wkt("POLYGON((4321000 3210000,4321100 3210000,4321100 3210100,4321000 3210100,4321000 3210000))"),
        );
        batch.push(
            vec!["b".into(), "maybe".into(), "y".into()],
            Shape::from_wkt("POLYGON((4322000 3210000,4322050 3210000,4322050 3210100,4322000 3210100,4322000 3210000))"),
        );
        batch
    }

    #[test]
    fn organic_tokens() {
        assert_eq!(normalize_organic("TRUE"), "1");
        assert_eq!(normalize_organic(" nein "), "0");
        assert_eq!(normalize_organic(""), "");
        assert_eq!(normalize_organic("teilweise"), "teilweise");
    }

    #[test]
    fn bookkeeping_and_projection() {
        let mut batch = working_batch();
        attach_bookkeeping(&mut batch, "NRW", 2020).unwrap();
        assert_eq!(batch.value(&batch.features[0], "field_size"), "1.0000");
        assert_eq!(batch.value(&batch.features[1], "field_size"), "0.5000");
        assert_eq!(batch.value(&batch.features[0], "organic"), "1");
        assert_eq!(batch.value(&batch.features[1], "organic"), "maybe");

        let columns = schema::default_columns();
        assemble(&mut batch, &columns, Crs::WGS84).unwrap();
        assert_eq!(batch.headers, columns);
        assert_eq!(batch.crs, Crs::WGS84);
        assert_eq!(batch.value(&batch.features[0], "region"), "NRW");
        assert_eq!(batch.value(&batch.features[0], "year"), "2020");
        assert_eq!(batch.value(&batch.features[0], "taxonomy_code"), "");
        assert!(batch.column_index("RAW").is_none());
    }

    #[test]
    fn bookkeeping_refuses_geographic_batches() {
        let mut batch = FeatureBatch::new(vec!["a".into()], Crs::WGS84);
        assert!(attach_bookkeeping(&mut batch, "X", 2020).is_err());
    }

    #[test]
    fn commit_writes_side_files_and_leaves_no_partials() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("NRW").join("NRW_2020.csv");
        let batch = working_batch();
        let misses = vec![MissedClassification {
            crop_code: "999".into(),
            crop_name: "Unbekannt".into(),
        }];
        let set = OutputSet {
            main: main.clone(),
            format: FeatureFormat::Delimited,
            batch: &batch,
            id_column: "field_id",
            misses: &misses,
            parts: &CropParts::default(),
            duplicates: &[],
        };
        let committed = set.commit().unwrap();
        assert_eq!(committed.len(), 2);
        assert!(main.is_file());
        let misses_text = fs::read_to_string(set.misses_path()).unwrap();
        assert!(misses_text.contains("\"999\",\"Unbekannt\""));
        assert!(!set.parts_path().exists());
        let leftovers = fs::read_dir(main.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn stale_side_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("X_2021.csv");
        let batch = working_batch();
        let set = OutputSet {
            main: main.clone(),
            format: FeatureFormat::Delimited,
            batch: &batch,
            id_column: "field_id",
            misses: &[],
            parts: &CropParts::default(),
            duplicates: &[],
        };
        fs::write(set.misses_path(), "crop_code,crop_name\n").unwrap();
        set.commit().unwrap();
        assert!(!set.misses_path().exists());
        assert!(main.is_file());
    }
}
