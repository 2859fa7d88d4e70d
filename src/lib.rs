pub mod assemble;
pub mod attributes;
pub mod audit;
pub mod batch;
pub mod cache;
pub mod classification;
pub mod cli;
pub mod config;
pub mod crs;
pub mod error;
pub mod formats;
pub mod geometry;
pub mod identity;
mod io_utils;
pub mod mapping;
pub mod parts;
pub mod pipeline;
pub mod schema;
pub mod table;
pub mod verify;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cache::TableCache,
    cli::{Cli, Commands},
    config::{AttributeSource, RunConfig, SourceConfig},
    pipeline::Pipeline,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("gsa_harmonize", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::File(args) => handle_file(args),
        Commands::Mapping(args) => handle_mapping(&args),
        Commands::Verify(args) => verify::execute(&args),
    }
}

fn handle_run(args: &cli::RunArgs) -> Result<()> {
    let mut config = RunConfig::load(&args.config)
        .with_context(|| format!("Loading run configuration {:?}", args.config))?;
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = output_dir.clone();
    }
    config.resume |= args.resume;
    info!(
        "Harmonizing {} source(s) from {:?} with {} job(s)",
        config.sources.len(),
        args.config,
        args.jobs.max(1)
    );
    execute(&config, args.jobs)
}

fn handle_file(args: cli::FileArgs) -> Result<()> {
    let attributes = match (args.attributes, args.attribute_key) {
        (Some(path), Some(key)) => Some(AttributeSource {
            path,
            key,
            feature_key: None,
            encoding: args.input_encoding.clone(),
            delimiter: None,
        }),
        _ => None,
    };
    let source = SourceConfig {
        region: args.region,
        year: args.year,
        input: args.input,
        mapping: args.mapping,
        classification: args.classification,
        natural_key: args.natural_key,
        duplicate_policy: args.duplicate_policy,
        reported_area_column: args.reported_area_column,
        input_crs: args.input_crs,
        encoding: args.input_encoding,
        delimiter: args.delimiter,
        geometry_column: args.geometry_column,
        attributes,
    };
    let defaults = RunConfig::default();
    let config = RunConfig {
        working_crs: args.working_crs,
        target_crs: args.target_crs,
        id_digits: args.id_digits.unwrap_or(defaults.id_digits),
        output_dir: args.output_dir,
        output_format: args.output_format,
        audit_log: args.audit_log,
        resume: args.resume,
        sources: vec![source],
        ..defaults
    };
    config.validate()?;
    execute(&config, 1)
}

fn execute(config: &RunConfig, jobs: usize) -> Result<()> {
    let cache = TableCache::new();
    let summary = Pipeline::new(config, &cache).run(jobs)?;
    for (label, outcome) in &summary.outcomes {
        info!("{label}: {outcome:?}");
    }
    if summary.has_failures() {
        bail!(
            "{} of {} source(s) failed",
            summary.failed(),
            summary.outcomes.len()
        );
    }
    Ok(())
}

fn handle_mapping(args: &cli::MappingArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let mapping = mapping::ColumnMapping::load(&args.mapping, encoding)
        .with_context(|| format!("Loading mapping table {:?}", args.mapping))?;
    let resolved = mapping.for_region_year(&args.region, args.year)?;
    let headers = ["canonical", "source", "repeated sources"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    print!("{}", table::render_table(&headers, &table::mapping_rows(&resolved)));
    Ok(())
}
