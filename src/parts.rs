//! Long-format crop parts split off multi-source mapping cells.
//!
//! A field block that declares several crops carries them in repeated
//! columns (`KULTUR`, `KULTUR_2`, ...). The first stays in place on the
//! canonical record; every further position becomes one row here, keyed by
//! the field identifier and numbered from 2.

use std::collections::BTreeMap;

use crate::{batch::FeatureBatch, mapping::SplitColumn};

pub const CROP_NUMBER_COLUMN: &str = "crop_number";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropPart {
    pub field_id: String,
    pub crop_number: usize,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CropParts {
    /// Canonical columns carried by every part, in first-declared order.
    pub columns: Vec<String>,
    pub rows: Vec<CropPart>,
}

impl CropParts {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn headers(&self, id_column: &str) -> Vec<String> {
        let mut headers = vec![id_column.to_string(), CROP_NUMBER_COLUMN.to_string()];
        headers.extend(self.columns.iter().cloned());
        headers
    }

    pub fn records(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows.iter().map(|part| {
            let mut record = vec![part.field_id.clone(), part.crop_number.to_string()];
            record.extend(part.values.iter().cloned());
            record
        })
    }
}

/// Builds one part per feature and ordinal where at least one repeated
/// column holds a value. Rows follow feature order, then ordinal.
pub fn split_long_format(
    batch: &FeatureBatch,
    splits: &[SplitColumn],
    id_column: &str,
) -> CropParts {
    let mut columns: Vec<String> = Vec::new();
    for split in splits {
        if !columns.contains(&split.canonical) {
            columns.push(split.canonical.clone());
        }
    }

    // ordinal -> (canonical position, batch column index)
    let mut by_ordinal: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
    for split in splits {
        let Some(column_idx) = batch.column_index(&split.column) else {
            continue;
        };
        let canonical_pos = columns
            .iter()
            .position(|name| *name == split.canonical)
            .unwrap_or_default();
        by_ordinal
            .entry(split.ordinal)
            .or_default()
            .push((canonical_pos, column_idx));
    }

    let mut rows = Vec::new();
    for feature in &batch.features {
        for (ordinal, sources) in &by_ordinal {
            let mut values = vec![String::new(); columns.len()];
            for (canonical_pos, column_idx) in sources {
                if let Some(value) = feature.values.get(*column_idx) {
                    values[*canonical_pos] = value.trim().to_string();
                }
            }
            if values.iter().all(|value| value.is_empty()) {
                continue;
            }
            rows.push(CropPart {
                field_id: batch.value(feature, id_column).to_string(),
                crop_number: *ordinal,
                values,
            });
        }
    }

    CropParts { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{batch::Shape, crs::Crs};

    fn split(canonical: &str, ordinal: usize, column: &str) -> SplitColumn {
        SplitColumn {
            canonical: canonical.into(),
            ordinal,
            column: column.into(),
        }
    }

    #[test]
    fn secondary_crop_becomes_numbered_part() {
        let mut batch = FeatureBatch::new(
            vec!["field_id".into(), "crop_name".into(), "COL_B".into()],
            Crs::LAEA_EUROPE,
        );
        batch.push(
            vec!["f1".into(), "maize".into(), "silage_maize".into()],
            Shape::Missing,
        );
        let parts = split_long_format(&batch, &[split("crop_name", 2, "COL_B")], "field_id");
        assert_eq!(
            parts.rows,
            vec![CropPart {
                field_id: "f1".into(),
                crop_number: 2,
                values: vec!["silage_maize".into()],
            }]
        );
        assert_eq!(parts.headers("field_id"), vec!["field_id", "crop_number", "crop_name"]);
    }

    #[test]
    fn code_and_name_of_same_position_share_a_row() {
        let mut batch = FeatureBatch::new(
            vec!["field_id".into(), "C2".into(), "N2".into(), "C3".into(), "N3".into()],
            Crs::LAEA_EUROPE,
        );
        batch.push(
            vec!["a".into(), "411".into(), "Mais".into(), "".into(), "".into()],
            Shape::Missing,
        );
        batch.push(
            vec!["b".into(), "115".into(), "".into(), "".into(), "Hafer".into()],
            Shape::Missing,
        );
        let splits = [
            split("crop_code", 2, "C2"),
            split("crop_name", 2, "N2"),
            split("crop_code", 3, "C3"),
            split("crop_name", 3, "N3"),
        ];
        let parts = split_long_format(&batch, &splits, "field_id");
        let summary = parts
            .rows
            .iter()
            .map(|p| (p.field_id.as_str(), p.crop_number, p.values.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("a", 2, vec!["411".to_string(), "Mais".to_string()]),
                ("b", 2, vec!["115".to_string(), String::new()]),
                ("b", 3, vec![String::new(), "Hafer".to_string()]),
            ]
        );
    }
}
