use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;
use indicatif::{ProgressBar, ProgressStyle};

use cdprep_rs::calendar::CfDate;
use cdprep_rs::chunking::{chunk_years, fetch_chunk, merge_and_clean, ReanalysisJob, ResampleFreq};
use cdprep_rs::config::Settings;
use cdprep_rs::logging::init_logging_with_file;
use cdprep_rs::output::{evaluate_gate, GateDecision, OutputDescriptor};
use cdprep_rs::sources::{BoundingBox, ExternalCommandApi};

/// Download a reanalysis variable in year chunks and merge the chunks
/// into one standardized netCDF file.
///
/// Each chunk is requested from the configured retrieval command,
/// renamed to the canonical variable name, optionally mean-resampled,
/// and persisted as an intermediate; chunks already on disk are not
/// fetched again, so an interrupted run resumes where it left off.
/// Once all chunks are present they are concatenated along time into
/// the final file and the intermediates are deleted.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the TOML configuration file (data root, retry policy).
    #[clap(short, long)]
    config: PathBuf,

    /// Canonical variable name used in the output file (e.g. "tas").
    #[clap(long)]
    variable: String,

    /// Variable identifier sent to the provider (e.g. "2m_temperature").
    #[clap(long)]
    provider_variable: String,

    /// Short name(s) the variable may carry inside downloaded files
    /// (e.g. "t2m"). May be given multiple times; defaults to the
    /// provider variable name.
    #[clap(long = "raw-name")]
    raw_names: Vec<String>,

    /// Source name used in the output path and file name.
    #[clap(long, default_value = "ERA5")]
    source: String,

    /// Experiment label used in the output file name.
    #[clap(long, default_value = "reanalysis")]
    experiment: String,

    /// Run label used in the output file name.
    #[clap(long, default_value = "r1")]
    run: String,

    /// First year to download (inclusive).
    #[clap(long)]
    start_year: i32,

    /// Last year to download (inclusive).
    #[clap(long)]
    end_year: i32,

    /// Maximum years per retrieval request.
    #[clap(long, default_value_t = 5)]
    chunk_size: usize,

    /// Frequency label written into the output file name.
    #[clap(long, default_value = "day")]
    frequency: String,

    /// Mean-resample each chunk to this frequency ("day" or "mon");
    /// omit to keep the provider's native resolution.
    #[clap(long)]
    resample: Option<ResampleFreq>,

    /// Hour stride of the request (e.g. 6 requests 00/06/12/18).
    #[clap(long, default_value_t = 6)]
    hour_step: u32,

    /// Bounding box edges, degrees.
    #[clap(long, default_value_t = 90.0, allow_negative_numbers = true)]
    north: f64,
    #[clap(long, default_value_t = -180.0, allow_negative_numbers = true)]
    west: f64,
    #[clap(long, default_value_t = -90.0, allow_negative_numbers = true)]
    south: f64,
    #[clap(long, default_value_t = 180.0, allow_negative_numbers = true)]
    east: f64,

    /// External retrieval command. It receives the request as JSON on
    /// stdin and the target file path as its final argument, and must
    /// exit zero with the file written.
    #[clap(long)]
    fetch_command: PathBuf,

    /// Extra argument passed to the retrieval command before the target
    /// path. May be given multiple times.
    #[clap(long = "fetch-arg")]
    fetch_args: Vec<String>,

    /// Delete and regenerate the final output if it already exists.
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
    if clargs.chunk_size == 0 {
        return Err(CliError::context("--chunk-size must be at least 1").into());
    }
    if clargs.start_year > clargs.end_year {
        return Err(CliError::context("--start-year must not be after --end-year").into());
    }

    let start = CfDate::new(clargs.start_year, 1, 1)
        .change_context_lazy(|| CliError::context("Invalid start year"))?;
    let end = CfDate::new(clargs.end_year, 12, 31)
        .change_context_lazy(|| CliError::context("Invalid end year"))?;
    let descriptor = OutputDescriptor {
        variable: clargs.variable.clone(),
        frequency: clargs.frequency.clone(),
        source: clargs.source.clone(),
        experiment: clargs.experiment.clone(),
        run: clargs.run.clone(),
        start,
        end,
        suffix: None,
    };

    // Gate on the final path before any network traffic
    let final_path = descriptor.path(&settings.data_root);
    let decision = evaluate_gate(std::slice::from_ref(&final_path), settings.overwrite);
    if let GateDecision::Skip { .. } = decision {
        log::info!("Unchanged: {}", final_path.display());
        println!("{} already exists, nothing to do", final_path.display());
        return Ok(());
    }
    decision
        .enforce()
        .change_context_lazy(|| CliError::context("Could not remove the existing output"))?;

    let raw_variables = if clargs.raw_names.is_empty() {
        vec![clargs.provider_variable.clone()]
    } else {
        clargs.raw_names.clone()
    };
    let job = ReanalysisJob {
        descriptor,
        provider_variable: clargs.provider_variable.clone(),
        raw_variables,
        start_year: clargs.start_year,
        end_year: clargs.end_year,
        chunk_size: clargs.chunk_size,
        hour_step: clargs.hour_step,
        area: BoundingBox {
            north: clargs.north,
            west: clargs.west,
            south: clargs.south,
            east: clargs.east,
        },
        resample: clargs.resample,
    };
    let api = ExternalCommandApi::new(&clargs.fetch_command, clargs.fetch_args.clone());

    let chunks = chunk_years(job.start_year, job.end_year, job.chunk_size);
    let bar = ProgressBar::new(chunks.len() as u64).with_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} chunks")
            .expect("progress bar template is valid")
            .progress_chars("=> "),
    );
    bar.set_message(clargs.variable.clone());

    let mut chunk_paths = vec![];
    for years in &chunks {
        let path = fetch_chunk(&api, &settings.retry, &job, years, &settings.data_root)
            .change_context_lazy(|| {
                CliError::context(format!(
                    "Failed on years {}-{}",
                    years.start(),
                    years.end()
                ))
            })?;
        chunk_paths.push(path);
        bar.inc(1);
    }
    bar.finish();

    let final_path = merge_and_clean(&job, &chunk_paths, &settings.data_root)
        .change_context_lazy(|| CliError::context("Error merging downloaded chunks"))?;
    println!("Wrote {}", final_path.display());
    Ok(())
}
