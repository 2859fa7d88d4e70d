use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{crs::Crs, identity::DuplicatePolicy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Harmonize regional agricultural parcel extracts into one canonical dataset",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Harmonize every source listed in a YAML run configuration
    Run(RunArgs),
    /// Harmonize a single source file
    File(FileArgs),
    /// Show how a mapping table translates columns for one region and year
    Mapping(MappingArgs),
    /// Check harmonized outputs for unique identifiers and complete taxonomy
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// YAML run configuration
    #[arg(short, long)]
    pub config: PathBuf,
    /// Number of sources harmonized in parallel
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,
    /// Skip sources whose main output already exists
    #[arg(long)]
    pub resume: bool,
    /// Override the configured output directory
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FileArgs {
    /// Input feature file (.csv/.tsv/.txt with WKT, or .geojson/.json)
    #[arg(short, long)]
    pub input: PathBuf,
    /// Region code used to select the mapping column
    #[arg(long)]
    pub region: String,
    /// Year used to select the mapping column
    #[arg(long)]
    pub year: u16,
    /// Column mapping table for the region
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Crop classification table for the region
    #[arg(short = 'k', long)]
    pub classification: PathBuf,
    /// Directory receiving harmonized outputs
    #[arg(short = 'o', long = "output-dir", default_value = "harmonized")]
    pub output_dir: PathBuf,
    /// Output format extension (csv, tsv, geojson)
    #[arg(long = "format", default_value = "geojson")]
    pub output_format: String,
    /// Translated column holding a declared field identifier
    #[arg(long = "natural-key")]
    pub natural_key: Option<String>,
    /// How features with identical geometries are treated
    #[arg(long = "duplicates", value_enum, default_value = "keep-first")]
    pub duplicate_policy: DuplicatePolicy,
    /// Column with the declared area, used by `largest-reported-area`
    #[arg(long = "reported-area")]
    pub reported_area_column: Option<String>,
    /// Coordinate system of the input geometries
    #[arg(long = "input-crs", default_value = "EPSG:4326")]
    pub input_crs: Crs,
    /// Projected system used for areas and synthesized identifiers
    #[arg(long = "working-crs", default_value = "EPSG:3035")]
    pub working_crs: Crs,
    /// Coordinate system of the written output
    #[arg(long = "target-crs", default_value = "EPSG:4326")]
    pub target_crs: Crs,
    /// Integer digits per coordinate in synthesized identifiers
    #[arg(long = "id-digits")]
    pub id_digits: Option<usize>,
    /// Character encoding of the input and tables (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Delimiter of delimited input (supports ',', 'tab', ';', '|')
    #[arg(long)]
    pub delimiter: Option<String>,
    /// Name of the WKT column in delimited input
    #[arg(long = "geometry-column")]
    pub geometry_column: Option<String>,
    /// Accompanying long-format attribute table
    #[arg(long = "attributes", requires = "attribute_key")]
    pub attributes: Option<PathBuf>,
    /// Key column shared by the attribute table and the features
    #[arg(long = "attribute-key")]
    pub attribute_key: Option<String>,
    /// Audit log path (defaults to <output-dir>/audit.log)
    #[arg(long = "audit-log")]
    pub audit_log: Option<PathBuf>,
    /// Skip the source when its main output already exists
    #[arg(long)]
    pub resume: bool,
}

#[derive(Debug, Args)]
pub struct MappingArgs {
    /// Column mapping table
    #[arg(short, long)]
    pub mapping: PathBuf,
    /// Region code
    #[arg(long)]
    pub region: String,
    /// Year
    #[arg(long)]
    pub year: u16,
    /// Character encoding of the mapping table (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Harmonized output files to check
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Identifier column expected to be unique
    #[arg(long = "id-column", default_value = "field_id")]
    pub id_column: String,
}
