//! Per-source harmonization and the run loop over all configured sources.
//!
//! One source file moves through the stages in a fixed order:
//! read → attribute join → geometry sanitize → column translation →
//! identity → classification → crop parts → assembly → commit.
//! Record counts are checked for conservation and appended to the audit log
//! before anything is written.

use anyhow::{Context, Result};
use log::{error, info, warn};
use rayon::prelude::*;

use crate::{
    assemble::{self, OutputSet},
    attributes::{self, AttributeTable},
    audit::{AuditLog, RecordCounts},
    batch::FeatureBatch,
    cache::TableCache,
    classification::{self, ClassifyReport},
    config::{RunConfig, SourceConfig},
    error::HarmonizeError,
    formats,
    geometry::{self, SanitizeReport},
    identity::{self, IdentityReport},
    mapping,
    parts::{self, CropParts},
};

/// Everything one source produced in memory, ready to be committed.
#[derive(Debug)]
pub struct Harmonized {
    pub batch: FeatureBatch,
    pub counts: RecordCounts,
    pub sanitize: SanitizeReport,
    pub identity: IdentityReport,
    pub classification: ClassifyReport,
    pub parts: CropParts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Harmonized(RecordCounts),
    /// Main output already present and the run resumes.
    Resumed,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<(String, FileOutcome)>,
}

impl RunSummary {
    pub fn harmonized(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::Harmonized(_)))
    }

    pub fn resumed(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::Resumed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, predicate: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| predicate(outcome)).count()
    }
}

/// `input == dropped + duplicates + output`, or the file aborts.
pub fn check_conservation(
    input: usize,
    dropped: usize,
    duplicates: usize,
    output: usize,
) -> Result<(), HarmonizeError> {
    if input == dropped + duplicates + output {
        Ok(())
    } else {
        Err(HarmonizeError::ConservationViolated {
            input,
            dropped,
            duplicates,
            output,
        })
    }
}

fn classify_error(err: &anyhow::Error) -> Option<&HarmonizeError> {
    err.chain().find_map(|cause| cause.downcast_ref::<HarmonizeError>())
}

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    cache: &'a TableCache,
    audit: AuditLog,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RunConfig, cache: &'a TableCache) -> Self {
        Self {
            config,
            cache,
            audit: AuditLog::new(config.audit_log_path()),
        }
    }

    /// Runs every stage for `source` without touching the output directory.
    pub fn harmonize(&self, source: &SourceConfig) -> Result<Harmonized> {
        let label = source.label();
        let encoding = source.encoding()?;
        let mapping_table = self
            .cache
            .mapping(&source.mapping, encoding)
            .with_context(|| format!("Loading mapping for {label}"))?;
        let region_mapping = mapping_table.for_region_year(&source.region, source.year)?;
        let authority = self
            .cache
            .authority(&source.classification, encoding)
            .with_context(|| format!("Loading classification for {label}"))?;

        let mut batch = formats::read_features(&source.input, &source.read_options()?)?;
        let input = batch.len();
        info!("{label}: read {input} record(s) from {:?}", source.input);

        if let Some(attribute_source) = &source.attributes {
            let table = AttributeTable::load(
                &attribute_source.path,
                &attribute_source.key,
                attribute_source.delimiter()?,
                attribute_source.encoding()?,
            )?;
            attributes::widen_join(&mut batch, &table, attribute_source.feature_key())?;
        }

        let sanitize = geometry::sanitize(&mut batch, self.config.working_crs)?;
        let after_geometry = batch.len();

        let resolution =
            mapping::resolve(&mut batch, &region_mapping, &self.config.canonical_columns);

        let identity =
            identity::resolve_identity(&mut batch, &self.config.identity_options(source))?;
        let after_dedup = batch.len();

        check_conservation(
            input,
            sanitize.dropped() + identity.missing_geometry,
            identity.duplicates_removed(),
            after_dedup,
        )?;

        let classification =
            classification::classify(&mut batch, &authority, &self.config.sentinels)?;
        let parts =
            parts::split_long_format(&batch, &resolution.split_columns, &self.config.id_column);

        assemble::attach_bookkeeping(&mut batch, &source.region, source.year)?;
        assemble::assemble(
            &mut batch,
            &self.config.canonical_columns,
            self.config.target_crs,
        )?;

        let counts = RecordCounts {
            input,
            after_geometry,
            after_dedup,
            distinct_ids: identity.distinct_ids,
            misses: classification.misses.len(),
            crop_parts: parts.len(),
        };
        Ok(Harmonized {
            batch,
            counts,
            sanitize,
            identity,
            classification,
            parts,
        })
    }

    /// Harmonizes and commits one source. Skip conditions come back as
    /// [`FileOutcome::Skipped`]; anything else is an error.
    pub fn process(&self, source: &SourceConfig) -> Result<FileOutcome> {
        let label = source.label();
        let main = self.config.output_path(source);
        if self.config.resume && assemble::main_output_exists(&main) {
            info!("{label}: output {main:?} exists, skipping on resume");
            return Ok(FileOutcome::Resumed);
        }

        let harmonized = match self.harmonize(source) {
            Ok(harmonized) => harmonized,
            Err(err) => match classify_error(&err) {
                Some(condition) if condition.is_skip() => {
                    warn!("{label}: skipped, {condition}");
                    self.audit.record_skip(&label, &condition.to_string())?;
                    return Ok(FileOutcome::Skipped(condition.to_string()));
                }
                _ => return Err(err),
            },
        };

        self.audit.record_counts(&label, &harmonized.counts)?;
        info!("{label}: {}", harmonized.counts);

        let output = OutputSet {
            main,
            format: self.config.output_format()?,
            batch: &harmonized.batch,
            id_column: &self.config.id_column,
            misses: &harmonized.classification.misses,
            parts: &harmonized.parts,
            duplicates: &harmonized.identity.duplicates,
        };
        output
            .commit()
            .with_context(|| format!("Writing outputs for {label}"))?;
        Ok(FileOutcome::Harmonized(harmonized.counts))
    }

    fn outcome(&self, source: &SourceConfig) -> FileOutcome {
        match self.process(source) {
            Ok(outcome) => outcome,
            Err(err) => {
                let label = source.label();
                let message = format!("{err:#}");
                error!("{label}: {message}");
                if let Err(audit_err) = self.audit.record_failure(&label, &message) {
                    error!("{label}: could not write audit log: {audit_err:#}");
                }
                FileOutcome::Failed(message)
            }
        }
    }

    /// Processes every configured source on `jobs` worker threads. Sources
    /// are independent; results keep the configured order.
    pub fn run(&self, jobs: usize) -> Result<RunSummary> {
        let sources = &self.config.sources;
        let outcomes = if jobs <= 1 {
            sources
                .iter()
                .map(|source| (source.label(), self.outcome(source)))
                .collect::<Vec<_>>()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .context("Building worker pool")?;
            pool.install(|| {
                sources
                    .par_iter()
                    .map(|source| (source.label(), self.outcome(source)))
                    .collect::<Vec<_>>()
            })
        };
        let summary = RunSummary { outcomes };
        info!(
            "Run finished: {} harmonized, {} resumed, {} skipped, {} failed",
            summary.harmonized(),
            summary.resumed(),
            summary.skipped(),
            summary.failed()
        );
        Ok(summary)
    }
}
