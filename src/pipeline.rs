//! The sequential per-dataset processing loop for catalog-driven
//! acquisitions: gate, open, standardize, cut each requested window,
//! write.
//!
//! Stages are composed as plain function calls over owned grids; there
//! is no shared mutable state between datasets, and the only recovery
//! mechanism on re-run is the file-existence gate. Per-output
//! conditions (an empty window, a missing pressure level) are recorded
//! in the report and processing continues with the remaining outputs;
//! dataset-level failures (cannot open the store, cannot write) abort
//! the run.

use std::path::PathBuf;

use error_stack::ResultExt;

use crate::catalog::CatalogRecord;
use crate::config::Settings;
use crate::grid::Grid;
use crate::lons::normalize_lons;
use crate::nc_io;
use crate::output::{ensure_source_dir, evaluate_gate, GateDecision, OutputDescriptor};
use crate::sources::GridSource;
use crate::subset::{self, CoordinateDefect, SubsetError, SubsetSpec, DEFAULT_PLEV_TOLERANCE};

/// The run-wide knobs the pipeline needs from configuration.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub data_root: PathBuf,
    pub overwrite: bool,
    pub calendar_regrid: bool,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            data_root: settings.data_root.clone(),
            overwrite: settings.overwrite,
            calendar_regrid: settings.calendar_regrid,
        }
    }
}

/// What a run did, for the summary printed at the end.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Outputs written this run.
    pub written: Vec<PathBuf>,
    /// Outputs left untouched because they already existed.
    pub unchanged: Vec<PathBuf>,
    /// Level requests skipped because no level was within tolerance.
    pub level_skipped: Vec<String>,
    /// Outputs that could not be produced (e.g. empty time window).
    pub failures: Vec<String>,
    /// Coordinate defects compensated for, per dataset.
    pub defects: Vec<(String, CoordinateDefect)>,
}

impl PipelineReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Multi-line summary for the end of a run.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} written, {} unchanged, {} level request(s) skipped, {} failure(s)",
            self.written.len(),
            self.unchanged.len(),
            self.level_skipped.len(),
            self.failures.len()
        )];
        for (id, defect) in &self.defects {
            lines.push(format!("  defect compensated in {id}: {defect}"));
        }
        for failure in &self.failures {
            lines.push(format!("  failed: {failure}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Could not open source dataset {0}")]
    OpenFailed(String),
    #[error("Could not prepare the output directory for {0}")]
    DirFailed(String),
    #[error("Could not write {}", .0.display())]
    WriteFailed(PathBuf),
}

/// The output identity for one (dataset, window) pair.
pub fn descriptor_for(record: &CatalogRecord, spec: &SubsetSpec) -> OutputDescriptor {
    OutputDescriptor {
        variable: record.variable_id.clone(),
        frequency: record.table_id.clone(),
        source: record.source_id.clone(),
        experiment: record.experiment_id.clone(),
        run: record.member_id.clone(),
        start: spec.start,
        end: spec.end,
        suffix: spec.suffix.clone(),
    }
}

/// Process every catalog record sequentially. An empty record list is a
/// warning, not an error.
pub fn process_records<S: GridSource>(
    records: &[CatalogRecord],
    source: &S,
    subsets: &[SubsetSpec],
    opts: &PipelineOptions,
) -> error_stack::Result<PipelineReport, PipelineError> {
    let mut report = PipelineReport::default();
    if records.is_empty() {
        log::warn!("Catalog query matched no records, nothing to process");
        return Ok(report);
    }
    if subsets.is_empty() {
        log::warn!("No subset windows configured, nothing to produce");
        return Ok(report);
    }
    for record in records {
        process_one(record, source, subsets, opts, &mut report)?;
    }
    Ok(report)
}

fn process_one<S: GridSource>(
    record: &CatalogRecord,
    source: &S,
    subsets: &[SubsetSpec],
    opts: &PipelineOptions,
    report: &mut PipelineReport,
) -> error_stack::Result<(), PipelineError> {
    let outputs: Vec<(&SubsetSpec, PathBuf)> = subsets
        .iter()
        .map(|spec| (spec, descriptor_for(record, spec).path(&opts.data_root)))
        .collect();
    let paths: Vec<PathBuf> = outputs.iter().map(|(_, p)| p.clone()).collect();

    // Cheap existence check before the expensive store open
    let decision = evaluate_gate(&paths, opts.overwrite);
    if let GateDecision::Skip { existing } = &decision {
        for path in existing {
            log::info!("Unchanged: {}", path.display());
        }
        report.unchanged.extend(existing.iter().cloned());
        return Ok(());
    }

    ensure_source_dir(&opts.data_root, &record.source_id)
        .change_context_lazy(|| PipelineError::DirFailed(record.id()))?;
    decision
        .enforce()
        .change_context_lazy(|| PipelineError::DirFailed(record.id()))?;
    let pending: Vec<&PathBuf> = decision.pending().iter().collect();

    log::info!("Opening {} ({})", record.id(), record.location);
    let mut grid = source
        .open_grid(&record.location, &record.variable_id)
        .change_context_lazy(|| PipelineError::OpenFailed(record.id()))?;
    if grid.sort_time() {
        log::warn!("{}: time axis was unsorted, reordered", record.id());
    }
    let (grid, defects) = subset::drop_duplicate_coords(&grid);
    for defect in defects {
        report.defects.push((record.id(), defect));
    }

    for (spec, path) in &outputs {
        if !pending.contains(&path) {
            log::info!("Already present: {}", path.display());
            report.unchanged.push(path.clone());
            continue;
        }
        match build_output(&grid, spec, opts) {
            Ok(out) => {
                nc_io::write_grid(&out, path)
                    .change_context_lazy(|| PipelineError::WriteFailed(path.clone()))?;
                log::info!("Wrote {}", path.display());
                report.written.push(path.clone());
            }
            Err(e @ SubsetError::NoMatchingLevel { .. }) => {
                log::warn!("Skipping {}: {e}", path.display());
                report.level_skipped.push(format!("{}: {e}", path.display()));
            }
            Err(e) => {
                log::error!("Could not produce {}: {e}", path.display());
                report.failures.push(format!("{}: {e}", path.display()));
            }
        }
    }
    Ok(())
}

/// Cut one output window from a standardized grid.
fn build_output(
    grid: &Grid,
    spec: &SubsetSpec,
    opts: &PipelineOptions,
) -> Result<Grid, SubsetError> {
    let mut grid = grid.clone();
    normalize_lons(&mut grid, spec.convention, spec.origin)?;
    let grid = subset::subset_time(&grid, spec.start, spec.end)?;
    let mut grid = subset::subset_space(&grid, spec)?;
    if let Some(target) = spec.plev {
        grid = subset::select_pressure_level(&grid, target, DEFAULT_PLEV_TOLERANCE)?;
    }
    if opts.calendar_regrid {
        if grid.time().samples_per_year_is(360) {
            grid = subset::regrid_360_to_365(&grid)?;
        } else {
            log::warn!(
                "Calendar regrid enabled but '{}' does not have 360 samples per year, leaving as-is",
                grid.name()
            );
        }
    }
    Ok(grid)
}
