//! Run configuration loaded from YAML.
//!
//! ```yaml
//! output_dir: harmonized
//! sources:
//!   - region: NRW
//!     year: 2020
//!     input: raw/nrw_2020.geojson
//!     mapping: tables/nrw_mapping.csv
//!     classification: tables/nrw_classification.csv
//!     input_crs: EPSG:4326
//! ```
//!
//! Every field besides the per-source paths has a default.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    crs::Crs,
    formats::{FeatureFormat, ReadOptions},
    identity::{DEFAULT_ID_DIGITS, DuplicatePolicy, IdentityOptions},
    io_utils,
    schema::{self, Sentinels},
};

pub const DEFAULT_AUDIT_LOG: &str = "audit.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Projected system used for area and synthesized identifiers.
    pub working_crs: Crs,
    /// System of the written output.
    pub target_crs: Crs,
    pub id_column: String,
    pub id_digits: usize,
    pub sentinels: Sentinels,
    pub canonical_columns: Vec<String>,
    pub output_dir: PathBuf,
    /// Extension of the main output, `csv` or `geojson`.
    pub output_format: String,
    /// Defaults to `<output_dir>/audit.log`.
    pub audit_log: Option<PathBuf>,
    pub resume: bool,
    pub sources: Vec<SourceConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            working_crs: Crs::LAEA_EUROPE,
            target_crs: Crs::WGS84,
            id_column: schema::FIELD_ID.to_string(),
            id_digits: DEFAULT_ID_DIGITS,
            sentinels: Sentinels::default(),
            canonical_columns: schema::default_columns(),
            output_dir: PathBuf::from("harmonized"),
            output_format: "geojson".to_string(),
            audit_log: None,
            resume: false,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub region: String,
    pub year: u16,
    pub input: PathBuf,
    pub mapping: PathBuf,
    pub classification: PathBuf,
    /// Column (after translation) holding a declared field identifier.
    #[serde(default)]
    pub natural_key: Option<String>,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default)]
    pub reported_area_column: Option<String>,
    #[serde(default = "default_input_crs")]
    pub input_crs: Crs,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub geometry_column: Option<String>,
    #[serde(default)]
    pub attributes: Option<AttributeSource>,
}

/// Accompanying long-format table joined onto the features.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeSource {
    pub path: PathBuf,
    /// Key column in the attribute table.
    pub key: String,
    /// Key column in the features; defaults to `key`.
    #[serde(default)]
    pub feature_key: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
}

fn default_input_crs() -> Crs {
    Crs::WGS84
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening run config {path:?}"))?;
        let mut config: RunConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing run config {path:?}"))?;
        config.resolve_relative_paths(path.parent().unwrap_or(Path::new("")));
        config.validate()?;
        Ok(config)
    }

    /// Paths in a config file are relative to the file itself.
    fn resolve_relative_paths(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        rebase(&mut self.output_dir);
        if let Some(audit) = self.audit_log.as_mut() {
            rebase(audit);
        }
        for source in &mut self.sources {
            rebase(&mut source.input);
            rebase(&mut source.mapping);
            rebase(&mut source.classification);
            if let Some(attributes) = source.attributes.as_mut() {
                rebase(&mut attributes.path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.working_crs.is_geographic(),
            "working_crs must be projected, got {}",
            self.working_crs
        );
        ensure!(self.id_digits > 0, "id_digits must be positive");
        ensure!(
            self.sentinels.unresolved_name != self.sentinels.absent_name
                && self.sentinels.unresolved_code != self.sentinels.absent_code,
            "unresolved and absent sentinels must differ"
        );
        ensure!(
            self.canonical_columns.contains(&self.id_column),
            "canonical_columns must include the identifier column '{}'",
            self.id_column
        );
        self.output_format()?;
        for source in &self.sources {
            source
                .encoding()
                .with_context(|| format!("Source {}_{}", source.region, source.year))?;
            source
                .delimiter()
                .with_context(|| format!("Source {}_{}", source.region, source.year))?;
        }
        Ok(())
    }

    pub fn output_format(&self) -> Result<FeatureFormat> {
        let probe = PathBuf::from(format!("output.{}", self.output_format));
        Ok(FeatureFormat::for_path(&probe)?)
    }

    /// `<output_dir>/<region>/<region>_<year>.<format>`
    pub fn output_path(&self, source: &SourceConfig) -> PathBuf {
        self.output_dir.join(&source.region).join(format!(
            "{}_{}.{}",
            source.region, source.year, self.output_format
        ))
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_AUDIT_LOG))
    }

    pub fn identity_options(&self, source: &SourceConfig) -> IdentityOptions {
        IdentityOptions {
            id_column: self.id_column.clone(),
            natural_key: source.natural_key.clone(),
            policy: source.duplicate_policy,
            reported_area_column: source.reported_area_column.clone(),
            id_digits: self.id_digits,
        }
    }
}

impl SourceConfig {
    pub fn label(&self) -> String {
        format!("{}_{}", self.region, self.year)
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        io_utils::resolve_encoding(self.encoding.as_deref())
    }

    pub fn delimiter(&self) -> Result<Option<u8>> {
        self.delimiter
            .as_deref()
            .map(io_utils::parse_delimiter)
            .transpose()
    }

    pub fn read_options(&self) -> Result<ReadOptions> {
        Ok(ReadOptions {
            crs: self.input_crs,
            encoding: self.encoding()?,
            delimiter: self.delimiter()?,
            geometry_column: self.geometry_column.clone(),
        })
    }
}

impl AttributeSource {
    pub fn feature_key(&self) -> &str {
        self.feature_key.as_deref().unwrap_or(&self.key)
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        io_utils::resolve_encoding(self.encoding.as_deref())
    }

    pub fn delimiter(&self) -> Result<Option<u8>> {
        self.delimiter
            .as_deref()
            .map(io_utils::parse_delimiter)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_defaults() {
        let yaml = r#"
sources:
  - region: NRW
    year: 2020
    input: raw/nrw.csv
    mapping: nrw_mapping.csv
    classification: nrw_classification.csv
    duplicate_policy: largest-reported-area
"#;
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.working_crs, Crs::LAEA_EUROPE);
        assert_eq!(config.target_crs, Crs::WGS84);
        assert_eq!(config.id_digits, DEFAULT_ID_DIGITS);
        let source = &config.sources[0];
        assert_eq!(source.duplicate_policy, DuplicatePolicy::LargestReportedArea);
        assert_eq!(source.input_crs, Crs::WGS84);
        assert_eq!(
            config.output_path(source),
            PathBuf::from("harmonized/NRW/NRW_2020.geojson")
        );
    }

    #[test]
    fn geographic_working_system_is_rejected() {
        let config = RunConfig {
            working_crs: Crs::WGS84,
            ..RunConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("projected"));
    }

    #[test]
    fn unknown_fields_and_formats_are_rejected() {
        assert!(serde_yaml::from_str::<RunConfig>("jobs: 4\n").is_err());
        let config = RunConfig {
            output_format: "shp".to_string(),
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(
            &path,
            "output_dir: out\nsources:\n  - {region: X, year: 2021, input: a.csv, mapping: m.csv, classification: c.csv}\n",
        )
        .unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, dir.path().join("out"));
        assert_eq!(config.sources[0].input, dir.path().join("a.csv"));
        assert_eq!(config.audit_log_path(), dir.path().join("out").join("audit.log"));
    }
}
