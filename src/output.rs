//! Output file naming and the existence/overwrite gate.
//!
//! Every file this crate writes is named
//! `[variable]_[frequency]_[source]_[experiment]_[run]_[startdate]-[enddate](_[suffix]).nc`
//! with dates as `YYYYMMDD`, under a `[source]/` subdirectory of the
//! configured data root. That path is the pipeline's unit of
//! idempotence: before any store is opened, the gate checks which of a
//! source dataset's candidate outputs already exist and decides whether
//! to skip the dataset, delete and regenerate, or fill in the missing
//! files only.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::calendar::CfDate;
use crate::error::DateError;

static FILE_NAME_REGEX: OnceLock<regex::Regex> = OnceLock::new();

/// The identity of one output file; renders to its deterministic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub variable: String,
    pub frequency: String,
    pub source: String,
    pub experiment: String,
    pub run: String,
    pub start: CfDate,
    pub end: CfDate,
    pub suffix: Option<String>,
}

impl OutputDescriptor {
    /// The file name, e.g. `tas_Amon_ACCESS-CM2_historical_r1i1p1f1_19790101-20141231.nc`.
    pub fn file_name(&self) -> String {
        let mut name = format!(
            "{}_{}_{}_{}_{}_{}-{}",
            self.variable,
            self.frequency,
            self.source,
            self.experiment,
            self.run,
            self.start.format_compact(),
            self.end.format_compact(),
        );
        if let Some(suffix) = &self.suffix {
            name.push('_');
            name.push_str(suffix);
        }
        name.push_str(".nc");
        name
    }

    /// The full path under the data root: `[root]/[source]/[file_name]`.
    pub fn path(&self, data_root: &Path) -> PathBuf {
        data_root.join(&self.source).join(self.file_name())
    }

    /// This descriptor with a different date range, used for chunk
    /// intermediates covering a sub-range of the final file.
    pub fn with_dates(&self, start: CfDate, end: CfDate) -> Self {
        Self {
            start,
            end,
            ..self.clone()
        }
    }

    /// This descriptor with the given suffix in place of the current one.
    pub fn with_suffix<S: Into<String>>(&self, suffix: S) -> Self {
        Self {
            suffix: Some(suffix.into()),
            ..self.clone()
        }
    }

    /// Parse a file name produced by [`OutputDescriptor::file_name`].
    pub fn parse_file_name(name: &str) -> Result<Self, OutputNameError> {
        let re = FILE_NAME_REGEX.get_or_init(|| {
            regex::Regex::new(
                r"^(?<variable>[^_]+)_(?<frequency>[^_]+)_(?<source>[^_]+)_(?<experiment>[^_]+)_(?<run>[^_]+)_(?<start>\d{8})-(?<end>\d{8})(?:_(?<suffix>[^_.]+))?\.nc$",
            )
            .expect("Could not compile output file name regex")
        });
        let caps = re
            .captures(name)
            .ok_or_else(|| OutputNameError::Unrecognized(name.to_owned()))?;
        let start = CfDate::parse_compact(&caps["start"])
            .map_err(|e| OutputNameError::BadDate(name.to_owned(), e))?;
        let end = CfDate::parse_compact(&caps["end"])
            .map_err(|e| OutputNameError::BadDate(name.to_owned(), e))?;
        Ok(Self {
            variable: caps["variable"].to_owned(),
            frequency: caps["frequency"].to_owned(),
            source: caps["source"].to_owned(),
            experiment: caps["experiment"].to_owned(),
            run: caps["run"].to_owned(),
            start,
            end,
            suffix: caps.name("suffix").map(|m| m.as_str().to_owned()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutputNameError {
    #[error("'{0}' does not follow the output naming convention")]
    Unrecognized(String),
    #[error("'{0}' has an unparseable date field: {1}")]
    BadDate(String, DateError),
}

/// What the gate decided for one source dataset's candidate outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Every output exists and overwriting is disabled: do nothing,
    /// open nothing. `existing` lists the unchanged paths for reporting.
    Skip { existing: Vec<PathBuf> },
    /// Overwriting is enabled and at least one output exists: the
    /// existing files are to be deleted (see [`GateDecision::enforce`])
    /// and every output regenerated.
    Regenerate {
        existing: Vec<PathBuf>,
        all: Vec<PathBuf>,
    },
    /// Generate the missing outputs only.
    Proceed { missing: Vec<PathBuf> },
}

impl GateDecision {
    /// The paths that should now be generated.
    pub fn pending(&self) -> &[PathBuf] {
        match self {
            Self::Skip { .. } => &[],
            Self::Regenerate { all, .. } => all,
            Self::Proceed { missing } => missing,
        }
    }

    /// Apply the decision's filesystem side effects: deleting the files
    /// to be regenerated. Evaluation itself never touches the disk.
    pub fn enforce(&self) -> std::io::Result<()> {
        if let Self::Regenerate { existing, .. } = self {
            for path in existing {
                log::info!("Overwrite enabled, removing {}", path.display());
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

/// Decide what to do for one source dataset's candidate output paths.
///
/// Called before the (expensive) store open so a fully-present dataset
/// costs neither network nor compute. Purely a read of the filesystem;
/// deletions happen in [`GateDecision::enforce`].
pub fn evaluate_gate(paths: &[PathBuf], overwrite: bool) -> GateDecision {
    let existing: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
    if !overwrite && existing.len() == paths.len() && !paths.is_empty() {
        GateDecision::Skip { existing }
    } else if overwrite && !existing.is_empty() {
        GateDecision::Regenerate {
            existing,
            all: paths.to_vec(),
        }
    } else {
        let missing = paths.iter().filter(|p| !p.exists()).cloned().collect();
        GateDecision::Proceed { missing }
    }
}

/// The `[data-root]/[source]/` directory, created on demand.
pub fn ensure_source_dir(data_root: &Path, source: &str) -> std::io::Result<PathBuf> {
    let dir = data_root.join(source);
    if !dir.is_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
