//! Field identity: geometric de-duplication and unique identifiers.
//!
//! Runs on a sanitized batch in a projected working system. Every counter in
//! here walks features in source-row order, so the same input always yields
//! the same identifiers.

use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};

use anyhow::{Result, anyhow, ensure};
use clap::ValueEnum;
use itertools::Itertools;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    batch::{FeatureBatch, Shape},
    error::HarmonizeError,
    geometry,
};

pub const DEFAULT_ID_DIGITS: usize = 7;

/// What to do with features whose geometries are byte-identical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the first feature in file order.
    #[default]
    KeepFirst,
    /// Keep the feature with the largest declared area.
    LargestReportedArea,
    /// Treat identical geometries as distinct overlapping sub-parcels.
    KeepAll,
}

#[derive(Debug, Clone)]
pub struct IdentityOptions {
    pub id_column: String,
    pub natural_key: Option<String>,
    pub policy: DuplicatePolicy,
    pub reported_area_column: Option<String>,
    pub id_digits: usize,
}

impl Default for IdentityOptions {
    fn default() -> Self {
        Self {
            id_column: "field_id".to_string(),
            natural_key: None,
            policy: DuplicatePolicy::default(),
            reported_area_column: None,
            id_digits: DEFAULT_ID_DIGITS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    NaturalKey,
    SuffixedNaturalKey,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateRecord {
    pub retained_id: String,
    pub duplicate_row: usize,
}

#[derive(Debug, Clone)]
pub struct IdentityReport {
    pub missing_geometry: usize,
    pub duplicates: Vec<DuplicateRecord>,
    pub strategy: IdStrategy,
    pub distinct_ids: usize,
}

impl IdentityReport {
    pub fn duplicates_removed(&self) -> usize {
        self.duplicates.len()
    }
}

pub fn parse_reported_area(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(&trimmed.replace(',', ".")).ok()
}

/// Removes geometric duplicates and writes a unique identifier into
/// `options.id_column`.
pub fn resolve_identity(
    batch: &mut FeatureBatch,
    options: &IdentityOptions,
) -> Result<IdentityReport> {
    ensure!(
        !batch.crs.is_geographic(),
        "Identifiers must be derived in a projected system, batch is in {}",
        batch.crs
    );

    let before = batch.len();
    batch
        .features
        .retain(|feature| matches!(feature.shape, Shape::Polygonal(_)));
    let missing_geometry = before - batch.len();
    if missing_geometry > 0 {
        warn!("Removed {missing_geometry} record(s) without geometry before identity resolution");
    }

    let natural_key = usable_natural_key(batch, options);
    let pending = deduplicate(batch, options, natural_key.as_deref());

    let (ids, strategy) = match natural_key.as_deref() {
        Some(column) => natural_identifiers(batch, column),
        None => (synthesized_identifiers(batch, options.id_digits)?, IdStrategy::Synthesized),
    };

    let distinct_ids = ids.iter().collect::<HashSet<_>>().len();
    if distinct_ids != ids.len() {
        let mut seen = HashSet::new();
        let example = ids
            .iter()
            .find(|id| !seen.insert(id.as_str()))
            .cloned()
            .unwrap_or_default();
        return Err(HarmonizeError::IdentifierCollision {
            collisions: ids.len() - distinct_ids,
            example,
        }
        .into());
    }

    let id_by_row = batch
        .features
        .iter()
        .zip(&ids)
        .map(|(feature, id)| (feature.row, id.clone()))
        .collect::<HashMap<_, _>>();
    let duplicates = pending
        .into_iter()
        .map(|(retained_row, duplicate_row)| DuplicateRecord {
            retained_id: id_by_row.get(&retained_row).cloned().unwrap_or_default(),
            duplicate_row,
        })
        .collect::<Vec<_>>();

    let mut assigned = ids.into_iter();
    batch.add_column(&options.id_column, |_| assigned.next().unwrap_or_default());

    info!(
        "Assigned {} identifier(s) ({:?}); {} geometric duplicate(s) removed",
        distinct_ids,
        strategy,
        duplicates.len()
    );
    Ok(IdentityReport {
        missing_geometry,
        duplicates,
        strategy,
        distinct_ids,
    })
}

fn usable_natural_key(batch: &FeatureBatch, options: &IdentityOptions) -> Option<String> {
    let column = options.natural_key.as_deref()?;
    if batch.is_sourced(column) {
        Some(column.to_string())
    } else {
        warn!("Natural key '{column}' is not present in the input; synthesizing identifiers");
        None
    }
}

/// Collapses features sharing a geometry (and natural key value, when one
/// is in use). Returns `(retained row, removed row)` pairs.
fn deduplicate(
    batch: &mut FeatureBatch,
    options: &IdentityOptions,
    natural_key: Option<&str>,
) -> Vec<(usize, usize)> {
    if options.policy == DuplicatePolicy::KeepAll {
        return Vec::new();
    }

    let area_column = match (options.policy, options.reported_area_column.as_deref()) {
        (DuplicatePolicy::LargestReportedArea, Some(column)) if batch.is_sourced(column) => {
            batch.column_index(column)
        }
        (DuplicatePolicy::LargestReportedArea, _) => {
            warn!("No reported area column available; keeping the first of each duplicate group");
            None
        }
        _ => None,
    };
    let key_column = natural_key.and_then(|column| batch.column_index(column));

    let groups = batch
        .features
        .iter()
        .enumerate()
        .map(|(position, feature)| {
            let mut key = feature
                .shape
                .polygonal()
                .map(geometry::canonical_key)
                .unwrap_or_default();
            if let Some(idx) = key_column {
                key.push('\u{1f}');
                key.push_str(feature.values[idx].trim());
            }
            (key, position)
        })
        .into_group_map();

    let mut winner_of = vec![0usize; batch.len()];
    for positions in groups.values() {
        let winner = match area_column {
            Some(idx) => positions
                .iter()
                .copied()
                .rev()
                .max_by_key(|position| {
                    parse_reported_area(&batch.features[*position].values[idx])
                })
                .unwrap_or(positions[0]),
            None => positions[0],
        };
        for position in positions {
            winner_of[*position] = winner;
        }
    }

    let mut removed = Vec::new();
    let features = std::mem::take(&mut batch.features);
    let rows = features.iter().map(|feature| feature.row).collect::<Vec<_>>();
    for (position, feature) in features.into_iter().enumerate() {
        let winner = winner_of[position];
        if winner == position {
            batch.features.push(feature);
        } else {
            debug!(
                "Row {} duplicates the geometry of row {}",
                feature.row, rows[winner]
            );
            removed.push((rows[winner], feature.row));
        }
    }
    removed
}

fn natural_identifiers(batch: &FeatureBatch, column: &str) -> (Vec<String>, IdStrategy) {
    let values = batch
        .features
        .iter()
        .map(|feature| batch.value(feature, column).trim().to_string())
        .collect::<Vec<_>>();
    let distinct = values.iter().collect::<HashSet<_>>().len();
    if distinct == values.len() {
        return (values, IdStrategy::NaturalKey);
    }

    info!(
        "Natural key '{column}' has {} repeated value(s); appending occurrence counters",
        values.len() - distinct
    );
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let suffixed = values
        .into_iter()
        .map(|value| {
            let count = occurrences.entry(value.clone()).or_insert(0);
            *count += 1;
            format!("{value}_{count}")
        })
        .collect();
    (suffixed, IdStrategy::SuffixedNaturalKey)
}

/// Truncates a projected coordinate to exactly `digits` integer digits:
/// short values are zero-padded, long ones keep their leading digits.
pub fn truncate_coordinate(value: f64, digits: usize) -> String {
    let whole = value.trunc() as i64;
    let mut text = format!("{:0width$}", whole.unsigned_abs(), width = digits);
    text.truncate(digits);
    if whole < 0 {
        text.insert(0, '-');
    }
    text
}

fn synthesized_identifiers(batch: &FeatureBatch, digits: usize) -> Result<Vec<String>> {
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    batch
        .features
        .iter()
        .map(|feature| {
            let point = feature
                .shape
                .polygonal()
                .and_then(geometry::representative_point)
                .ok_or_else(|| anyhow!("Row {} has no representative point", feature.row))?;
            let pair = format!(
                "{}_{}",
                truncate_coordinate(point.x(), digits),
                truncate_coordinate(point.y(), digits)
            );
            let count = occurrences.entry(pair.clone()).or_insert(0);
            *count += 1;
            Ok(format!("{pair}_{count}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use geo::{MultiPolygon, polygon};

    fn square(x: f64, y: f64, side: f64) -> Shape {
        Shape::Polygonal(MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + side, y: y),
            (x: x + side, y: y + side),
            (x: x, y: y + side),
            (x: x, y: y),
        ]]))
    }

    fn batch(rows: Vec<(&str, &str, Shape)>) -> FeatureBatch {
        let mut batch = FeatureBatch::new(vec!["key".into(), "area".into()], Crs::LAEA_EUROPE);
        for (key, area, shape) in rows {
            batch.push(vec![key.into(), area.into()], shape);
        }
        batch
    }

    fn ids(batch: &FeatureBatch) -> Vec<String> {
        batch
            .features
            .iter()
            .map(|f| batch.value(f, "field_id").to_string())
            .collect()
    }

    #[test]
    fn unique_natural_key_is_adopted_verbatim() {
        let mut input = batch(vec![
            ("A", "", square(0.0, 0.0, 10.0)),
            ("B", "", square(20.0, 0.0, 10.0)),
        ]);
        let options = IdentityOptions {
            natural_key: Some("key".into()),
            ..IdentityOptions::default()
        };
        let report = resolve_identity(&mut input, &options).unwrap();
        assert_eq!(report.strategy, IdStrategy::NaturalKey);
        assert_eq!(ids(&input), vec!["A", "B"]);
    }

    #[test]
    fn repeated_natural_key_gets_running_counters() {
        let mut input = batch(vec![
            ("A", "", square(0.0, 0.0, 10.0)),
            ("B", "", square(20.0, 0.0, 10.0)),
            ("A", "", square(40.0, 0.0, 10.0)),
        ]);
        let options = IdentityOptions {
            natural_key: Some("key".into()),
            ..IdentityOptions::default()
        };
        let report = resolve_identity(&mut input, &options).unwrap();
        assert_eq!(report.strategy, IdStrategy::SuffixedNaturalKey);
        assert_eq!(ids(&input), vec!["A_1", "B_1", "A_2"]);
    }

    #[test]
    fn synthesized_ids_truncate_and_count_collisions() {
        let mut input = batch(vec![
            ("", "", square(4_321_000.0, 3_210_000.0, 0.4)),
            ("", "", square(4_321_000.1, 3_210_000.1, 0.4)),
        ]);
        resolve_identity(&mut input, &IdentityOptions::default()).unwrap();
        assert_eq!(
            ids(&input),
            vec!["4321000_3210000_1", "4321000_3210000_2"]
        );
    }

    #[test]
    fn short_coordinates_are_zero_padded() {
        assert_eq!(truncate_coordinate(512.9, 7), "0000512");
        assert_eq!(truncate_coordinate(1_234_567.99, 7), "1234567");
    }

    #[test]
    fn long_coordinates_keep_leading_digits() {
        assert_eq!(truncate_coordinate(4_321_005.7, 4), "4321");
        assert_eq!(truncate_coordinate(-1_234.5, 2), "-12");

        let mut input = batch(vec![
            ("", "", square(4_321_005.0, 3_210_005.0, 0.4)),
            ("", "", square(4_321_905.0, 3_210_405.0, 0.4)),
        ]);
        let options = IdentityOptions {
            id_digits: 4,
            ..IdentityOptions::default()
        };
        resolve_identity(&mut input, &options).unwrap();
        assert_eq!(ids(&input), vec!["4321_3210_1", "4321_3210_2"]);
    }

    #[test]
    fn largest_reported_area_wins_duplicate_group() {
        let mut input = batch(vec![
            ("", "0,9", square(0.0, 0.0, 10.0)),
            ("", "1.2", square(0.0, 0.0, 10.0)),
            ("", "5", square(50.0, 0.0, 10.0)),
        ]);
        let options = IdentityOptions {
            policy: DuplicatePolicy::LargestReportedArea,
            reported_area_column: Some("area".into()),
            ..IdentityOptions::default()
        };
        let report = resolve_identity(&mut input, &options).unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(input.features[0].row, 2);
        assert_eq!(input.value(&input.features[0], "area"), "1.2");
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].duplicate_row, 1);
        assert_eq!(report.duplicates[0].retained_id, ids(&input)[0]);
    }

    #[test]
    fn equal_reported_areas_keep_the_earlier_row() {
        let mut input = batch(vec![
            ("", "2", square(0.0, 0.0, 10.0)),
            ("", "2", square(0.0, 0.0, 10.0)),
        ]);
        let options = IdentityOptions {
            policy: DuplicatePolicy::LargestReportedArea,
            reported_area_column: Some("area".into()),
            ..IdentityOptions::default()
        };
        resolve_identity(&mut input, &options).unwrap();
        assert_eq!(input.features[0].row, 1);
    }

    #[test]
    fn keep_all_retains_overlapping_sub_parcels() {
        let mut input = batch(vec![
            ("", "", square(0.0, 0.0, 10.0)),
            ("", "", square(0.0, 0.0, 10.0)),
        ]);
        let options = IdentityOptions {
            policy: DuplicatePolicy::KeepAll,
            ..IdentityOptions::default()
        };
        let report = resolve_identity(&mut input, &options).unwrap();
        assert_eq!(report.duplicates_removed(), 0);
        assert_eq!(input.len(), 2);
        let assigned = ids(&input);
        assert_ne!(assigned[0], assigned[1]);
    }

    #[test]
    fn shared_geometry_with_distinct_natural_keys_is_kept() {
        let mut input = batch(vec![
            ("A", "", square(0.0, 0.0, 10.0)),
            ("B", "", square(0.0, 0.0, 10.0)),
            ("A", "", square(0.0, 0.0, 10.0)),
        ]);
        let options = IdentityOptions {
            natural_key: Some("key".into()),
            ..IdentityOptions::default()
        };
        let report = resolve_identity(&mut input, &options).unwrap();
        assert_eq!(ids(&input), vec!["A", "B"]);
        assert_eq!(report.duplicates[0].retained_id, "A");
        assert_eq!(report.duplicates[0].duplicate_row, 3);
    }

    #[test]
    fn missing_geometries_are_dropped_and_counted() {
        let mut input = batch(vec![
            ("", "", Shape::Missing),
            ("", "", square(0.0, 0.0, 10.0)),
        ]);
        let report = resolve_identity(&mut input, &IdentityOptions::default()).unwrap();
        assert_eq!(report.missing_geometry, 1);
        assert_eq!(input.len(), 1);
    }

    #[test]
    fn geographic_batches_are_rejected() {
        let mut input = batch(vec![("", "", square(0.0, 0.0, 1.0))]);
        input.crs = Crs::WGS84;
        assert!(resolve_identity(&mut input, &IdentityOptions::default()).is_err());
    }
}
