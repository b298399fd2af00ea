use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;

use cdprep_rs::catalog::{resolve_query, Catalog, JsonCatalog};
use cdprep_rs::config::Settings;
use cdprep_rs::logging::init_logging_with_file;
use cdprep_rs::pipeline::{process_records, PipelineOptions};
use cdprep_rs::sources::NetcdfGridSource;

/// Acquire and subset catalog-indexed model output.
///
/// The configuration file lists the variables to download and the
/// output windows to cut; this program resolves them into a single
/// catalog query, opens each matching store, standardizes its
/// coordinates, and writes one netCDF file per (dataset, window) pair
/// under the data root. Outputs that already exist are skipped unless
/// overwriting is enabled.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the TOML configuration file (data root, download
    /// requests, subset windows).
    #[clap(short, long)]
    config: PathBuf,

    /// Path to the catalog index, a JSON array of records with the
    /// usual facet columns plus a store location.
    #[clap(long)]
    catalog: PathBuf,

    /// Base directory against which relative store locations are
    /// resolved (e.g. a mount of the remote archive).
    #[clap(long)]
    store_base: Option<PathBuf>,

    /// Delete and regenerate outputs that already exist, regardless of
    /// the configuration file's setting.
    #[clap(long)]
    overwrite: bool,

    /// Also append log output to this file.
    #[clap(long)]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Context(String),
    #[error("{0} output(s) could not be produced")]
    Incomplete(usize),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

fn main() -> ExitCode {
    let clargs = Cli::parse();
    init_logging_with_file(
        clargs.verbosity.log_level_filter(),
        clargs.log_file.as_deref(),
    );
    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: Cli) -> error_stack::Result<(), CliError> {
    let mut settings = Settings::load(Some(&clargs.config))
        .change_context_lazy(|| CliError::context("Error loading the configuration file"))?;
    if clargs.overwrite {
        settings.overwrite = true;
    }

    let catalog = JsonCatalog::open(&clargs.catalog)
        .change_context_lazy(|| CliError::context("Error loading the catalog index"))?;

    let query = resolve_query(&settings.downloads);
    log::info!("Catalog query: {query}");
    let records = catalog.search(&query);
    log::info!("Query matched {} record(s)", records.len());

    let source = NetcdfGridSource::new(clargs.store_base.clone());
    let opts = PipelineOptions::from_settings(&settings);
    let report = process_records(&records, &source, &settings.subsets, &opts)
        .change_context_lazy(|| CliError::context("Error while processing catalog records"))?;

    println!("{}", report.summary());
    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::Incomplete(report.failures.len()).into())
    }
}
