//! Crop classification against the shared taxonomy.
//!
//! Raw crop codes and names are matched against a per-region authority
//! table. Which attribute is used as the join key depends on how many
//! distinct values of each the batch carries:
//!
//! - more than one distinct name: join on name
//! - otherwise, more distinct codes than names: join on code
//! - otherwise: join on name
//!
//! Records whose key value is blank fall back to the other attribute. The
//! authority table is de-duplicated on the key, first occurrence winning.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use log::{debug, info};
use regex::Regex;

use crate::{
    batch::FeatureBatch,
    error::HarmonizeError,
    io_utils,
    schema::{self, Sentinels},
};

const TRANSLATED_ALIASES: &[&str] = &["crop_name_translated", "translated_name", "crop_name_en"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationEntry {
    pub crop_code: String,
    pub crop_name: String,
    pub translated_name: String,
    pub taxonomy_name: String,
    pub taxonomy_code: String,
}

#[derive(Debug, Clone, Default)]
pub struct Authority {
    entries: Vec<ClassificationEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKey {
    Code,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MissedClassification {
    pub crop_code: String,
    pub crop_name: String,
}

#[derive(Debug, Clone)]
pub struct ClassifyReport {
    pub key: JoinKey,
    pub matched: usize,
    pub unresolved: usize,
    pub absent: usize,
    pub misses: Vec<MissedClassification>,
}

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Codes exported through spreadsheets often gain a `.0`; `31.0` and `31`
/// are the same code.
pub fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('.')
        && let Ok(number) = trimmed.parse::<f64>()
        && number.is_finite()
        && number.fract() == 0.0
        && number.abs() < 1e15
    {
        return (number as i64).to_string();
    }
    trimmed.to_string()
}

pub fn normalize_name(raw: &str) -> String {
    whitespace().replace_all(raw.trim(), " ").into_owned()
}

fn distinct_non_empty<'a>(values: impl Iterator<Item = &'a String>) -> usize {
    values
        .filter(|value| !value.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

pub fn choose_join_key(distinct_codes: usize, distinct_names: usize) -> JoinKey {
    if distinct_names > 1 {
        JoinKey::Name
    } else if distinct_codes > distinct_names {
        JoinKey::Code
    } else {
        JoinKey::Name
    }
}

impl Authority {
    pub fn new(entries: Vec<ClassificationEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: &Path, encoding: &'static Encoding) -> Result<Self> {
        let delimiter = io_utils::resolve_input_delimiter(path, None);
        let (headers, rows) = io_utils::read_table(path, delimiter, encoding)
            .with_context(|| format!("Reading classification table {path:?}"))?;
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);
        let code_idx = position(schema::CROP_CODE);
        let name_idx = position(schema::CROP_NAME);
        let translated_idx = TRANSLATED_ALIASES.iter().find_map(|alias| position(*alias));
        let taxonomy_name_idx = position(schema::TAXONOMY_NAME).ok_or_else(|| {
            anyhow!("Classification table {path:?} is missing '{}'", schema::TAXONOMY_NAME)
        })?;
        let taxonomy_code_idx = position(schema::TAXONOMY_CODE).ok_or_else(|| {
            anyhow!("Classification table {path:?} is missing '{}'", schema::TAXONOMY_CODE)
        })?;
        if code_idx.is_none() && name_idx.is_none() {
            return Err(anyhow!(
                "Classification table {path:?} has neither '{}' nor '{}'",
                schema::CROP_CODE,
                schema::CROP_NAME
            ));
        }

        let cell = |row: &[String], idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };
        let entries = rows
            .iter()
            .map(|row| ClassificationEntry {
                crop_code: normalize_code(&cell(row, code_idx)),
                crop_name: normalize_name(&cell(row, name_idx)),
                translated_name: cell(row, translated_idx),
                taxonomy_name: cell(row, Some(taxonomy_name_idx)),
                taxonomy_code: cell(row, Some(taxonomy_code_idx)),
            })
            .collect::<Vec<_>>();
        debug!("Loaded {} classification entr(ies) from {path:?}", entries.len());
        Ok(Self { entries })
    }

    /// First entry per non-empty key value.
    fn index(&self, key: JoinKey) -> HashMap<&str, &ClassificationEntry> {
        let mut index = HashMap::new();
        for entry in &self.entries {
            let value = match key {
                JoinKey::Code => entry.crop_code.as_str(),
                JoinKey::Name => entry.crop_name.as_str(),
            };
            if !value.is_empty() {
                index.entry(value).or_insert(entry);
            }
        }
        index
    }
}

/// Attaches taxonomy name/code and translated crop name to every record.
pub fn classify(
    batch: &mut FeatureBatch,
    authority: &Authority,
    sentinels: &Sentinels,
) -> Result<ClassifyReport> {
    if !batch.is_sourced(schema::CROP_CODE) && !batch.is_sourced(schema::CROP_NAME) {
        return Err(HarmonizeError::NoCropAttribute {
            code_column: schema::CROP_CODE.to_string(),
            name_column: schema::CROP_NAME.to_string(),
        }
        .into());
    }

    let attributes = batch
        .features
        .iter()
        .map(|feature| {
            (
                normalize_code(batch.value(feature, schema::CROP_CODE)),
                normalize_name(batch.value(feature, schema::CROP_NAME)),
            )
        })
        .collect::<Vec<_>>();
    let distinct_codes = distinct_non_empty(attributes.iter().map(|(code, _)| code));
    let distinct_names = distinct_non_empty(attributes.iter().map(|(_, name)| name));
    let key = choose_join_key(distinct_codes, distinct_names);
    info!(
        "Joining crops on {key:?} ({distinct_codes} distinct code(s), {distinct_names} distinct name(s))"
    );

    let by_code = authority.index(JoinKey::Code);
    let by_name = authority.index(JoinKey::Name);
    let (primary, fallback) = match key {
        JoinKey::Code => (&by_code, &by_name),
        JoinKey::Name => (&by_name, &by_code),
    };

    let mut report = ClassifyReport {
        key,
        matched: 0,
        unresolved: 0,
        absent: 0,
        misses: Vec::new(),
    };
    let mut seen_misses = HashSet::new();
    let mut resolved = Vec::with_capacity(attributes.len());
    for (feature, (code, name)) in batch.features.iter().zip(&attributes) {
        if code.is_empty() && name.is_empty() {
            report.absent += 1;
            resolved.push((
                sentinels.absent_name.clone(),
                sentinels.absent_code.clone(),
                String::new(),
            ));
            continue;
        }
        let (key_value, other_value) = match key {
            JoinKey::Code => (code, name),
            JoinKey::Name => (name, code),
        };
        let entry = if key_value.is_empty() {
            fallback.get(other_value.as_str())
        } else {
            primary.get(key_value.as_str())
        };
        match entry {
            Some(entry) => {
                report.matched += 1;
                resolved.push((
                    entry.taxonomy_name.clone(),
                    entry.taxonomy_code.clone(),
                    entry.translated_name.clone(),
                ));
            }
            None => {
                report.unresolved += 1;
                let miss = MissedClassification {
                    crop_code: batch.value(feature, schema::CROP_CODE).trim().to_string(),
                    crop_name: batch.value(feature, schema::CROP_NAME).trim().to_string(),
                };
                if seen_misses.insert(miss.clone()) {
                    report.misses.push(miss);
                }
                resolved.push((
                    sentinels.unresolved_name.clone(),
                    sentinels.unresolved_code.clone(),
                    String::new(),
                ));
            }
        }
    }

    let mut names = resolved.iter().map(|(name, _, _)| name.clone());
    batch.add_column(schema::TAXONOMY_NAME, |_| names.next().unwrap_or_default());
    let mut codes = resolved.iter().map(|(_, code, _)| code.clone());
    batch.add_column(schema::TAXONOMY_CODE, |_| codes.next().unwrap_or_default());
    let mut translated = resolved.into_iter().map(|(_, _, translated)| translated);
    batch.add_column(schema::CROP_NAME_TRANSLATED, |_| {
        translated.next().unwrap_or_default()
    });

    info!(
        "Classified {} record(s): {} matched, {} unresolved ({} distinct), {} without crop",
        batch.len(),
        report.matched,
        report.unresolved,
        report.misses.len(),
        report.absent
    );
    Ok(report)
}
