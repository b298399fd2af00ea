use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;
use tabled::{Table, Tabled};

use cdprep_rs::catalog::{resolve_query, Catalog, CatalogRecord, JsonCatalog};
use cdprep_rs::config::Settings;
use cdprep_rs::logging::init_logging;

/// Resolve the configured download requests into a catalog query and
/// print the matching records, without downloading anything.
///
/// Useful for checking what a `fetch_cmip` run would process.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the TOML configuration file with the download requests.
    #[clap(short, long)]
    config: PathBuf,

    /// Path to the catalog index, a JSON array of records.
    #[clap(long)]
    catalog: PathBuf,

    /// Print only the resolved query, not the matching records.
    #[clap(long)]
    query_only: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

#[derive(Tabled)]
struct RecordRow {
    source: String,
    experiment: String,
    table: String,
    variable: String,
    run: String,
    location: String,
}

impl From<&CatalogRecord> for RecordRow {
    fn from(record: &CatalogRecord) -> Self {
        Self {
            source: record.source_id.clone(),
            experiment: record.experiment_id.clone(),
            table: record.table_id.clone(),
            variable: record.variable_id.clone(),
            run: record.member_id.clone(),
            location: record.location.clone(),
        }
    }
}

fn main() -> ExitCode {
    let clargs = Cli::parse();
    init_logging(clargs.verbosity.log_level_filter());
    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: Cli) -> error_stack::Result<(), CliError> {
    let settings = Settings::load(Some(&clargs.config))
        .change_context_lazy(|| CliError::context("Error loading the configuration file"))?;
    if settings.downloads.is_empty() {
        log::warn!("The configuration file lists no download requests");
    }

    let query = resolve_query(&settings.downloads);
    println!("Query: {query}");
    if clargs.query_only {
        return Ok(());
    }

    let catalog = JsonCatalog::open(&clargs.catalog)
        .change_context_lazy(|| CliError::context("Error loading the catalog index"))?;
    let records = catalog.search(&query);
    if records.is_empty() {
        log::warn!("Query matched no records");
        return Ok(());
    }

    let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
    println!("{}", Table::new(rows));
    println!("{} record(s)", records.len());
    Ok(())
}
