use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result, anyhow, bail};
use encoding_rs::UTF_8;
use log::{info, warn};

use crate::{
    cli::VerifyArgs,
    crs::Crs,
    formats::{self, ReadOptions},
    schema,
};

const MAX_REPORTED: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub records: usize,
    pub duplicate_ids: Vec<String>,
    /// 1-based rows with an empty identifier or taxonomy field.
    pub incomplete_rows: Vec<usize>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.duplicate_ids.is_empty() && self.incomplete_rows.is_empty()
    }
}

pub fn execute(args: &VerifyArgs) -> Result<()> {
    let mut failures = 0usize;
    for input in &args.inputs {
        let report = verify_file(input, &args.id_column)
            .with_context(|| format!("Verifying {input:?}"))?;
        if report.is_clean() {
            info!("✓ {input:?}: {} record(s), identifiers unique, taxonomy complete", report.records);
            continue;
        }
        failures += 1;
        if !report.duplicate_ids.is_empty() {
            warn!(
                "✗ {input:?}: {} duplicated identifier(s), e.g. {}",
                report.duplicate_ids.len(),
                report.duplicate_ids.iter().take(MAX_REPORTED).cloned().collect::<Vec<_>>().join(", ")
            );
        }
        if !report.incomplete_rows.is_empty() {
            warn!(
                "✗ {input:?}: {} row(s) with empty identifier or taxonomy, e.g. rows {:?}",
                report.incomplete_rows.len(),
                report.incomplete_rows.iter().take(MAX_REPORTED).collect::<Vec<_>>()
            );
        }
    }
    if failures > 0 {
        bail!("{failures} of {} file(s) failed verification", args.inputs.len());
    }
    Ok(())
}

pub fn verify_file(path: &Path, id_column: &str) -> Result<VerifyReport> {
    let options = ReadOptions {
        crs: Crs::WGS84,
        encoding: UTF_8,
        delimiter: None,
        geometry_column: None,
    };
    let batch = formats::read_features(path, &options)?;
    for column in [id_column, schema::TAXONOMY_NAME, schema::TAXONOMY_CODE] {
        if batch.column_index(column).is_none() {
            return Err(anyhow!("Column '{column}' is missing"));
        }
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut report = VerifyReport {
        records: batch.len(),
        ..VerifyReport::default()
    };
    for feature in &batch.features {
        let id = batch.value(feature, id_column).trim();
        let incomplete = id.is_empty()
            || batch.value(feature, schema::TAXONOMY_NAME).trim().is_empty()
            || batch.value(feature, schema::TAXONOMY_CODE).trim().is_empty();
        if incomplete {
            report.incomplete_rows.push(feature.row);
        }
        if !id.is_empty() && !seen.insert(id) && reported.insert(id) {
            report.duplicate_ids.push(id.to_string());
        }
    }
    Ok(report)
}
