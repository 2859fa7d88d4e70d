//! Conditions the pipeline has to tell apart when a source file cannot be
//! harmonized.
//!
//! Everything else flows through `anyhow` with context, the same way the
//! command layer reports I/O and parse failures. These variants exist so the
//! run loop can decide between "skip and continue" and "abort this file".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarmonizeError {
    /// The mapping table has no `{region}_{year}` column; the file is skipped.
    #[error("mapping table {table} has no column for '{region}_{year}'")]
    MappingMissing {
        table: String,
        region: String,
        year: u16,
    },

    #[error(
        "no crop attribute available: neither '{code_column}' nor '{name_column}' is sourced from the input"
    )]
    NoCropAttribute {
        code_column: String,
        name_column: String,
    },

    #[error("{collisions} field identifier(s) are still duplicated after resolution (first: '{example}')")]
    IdentifierCollision { collisions: usize, example: String },

    #[error(
        "record accounting does not balance: input {input} != dropped {dropped} + duplicates {duplicates} + output {output}"
    )]
    ConservationViolated {
        input: usize,
        dropped: usize,
        duplicates: usize,
        output: usize,
    },

    #[error("unsupported coordinate reference system '{0}'")]
    UnknownCrs(String),

    #[error("no feature format registered for extension '{0}'")]
    UnsupportedFormat(String),
}

impl HarmonizeError {
    /// Whether the condition skips the file without counting it as failed.
    pub fn is_skip(&self) -> bool {
        matches!(self, HarmonizeError::MappingMissing { .. })
    }
}
