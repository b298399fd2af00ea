//! Configuration loading.
//!
//! Settings come from a TOML file merged with `CDPREP_`-prefixed
//! environment variables (the environment wins), so a run can be fully
//! described by a checked-in file while still being overridable from a
//! scheduler. The download and subset request lists live in the same
//! file, as explicit typed structures rather than loose key/value
//! parameter mappings:
//!
//! ```toml
//! data_root = "/data/climate"
//! overwrite = false
//!
//! [[downloads]]
//! variable = "tas"
//! table = "Amon"
//! experiment = "historical"
//! run = "r1i1p1f1"
//! source = "ACCESS-CM2"
//!
//! [[subsets]]
//! lat_range = [-45.0, -10.0]
//! lon_range = [110.0, 155.0]
//! convention = "360"
//! start = "1979-01-01"
//! end = "2014-12-31"
//! suffix = "aus"
//! ```

use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::catalog::DownloadSpec;
use crate::sources::RetryPolicy;
use crate::subset::SubsetSpec;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not load configuration")]
    CouldNotLoad,
    #[error("Configuration file {} does not exist", .0.display())]
    NoSuchFile(PathBuf),
}

/// Everything a run needs to know that is not on the command line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Root directory for outputs; `[source]/` subdirectories are
    /// created under it on demand.
    pub data_root: PathBuf,
    /// Delete and regenerate outputs that already exist.
    #[serde(default)]
    pub overwrite: bool,
    /// Interpolate 360-day-calendar subsets onto 365-day years. Never
    /// applied to raw downloads regardless of this flag.
    #[serde(default)]
    pub calendar_regrid: bool,
    /// Bounds on remote retrieval attempts.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// The variables to acquire.
    #[serde(default)]
    pub downloads: Vec<DownloadSpec>,
    /// The output windows to cut from each acquired dataset.
    #[serde(default)]
    pub subsets: Vec<SubsetSpec>,
}

impl Settings {
    /// Load settings from an optional TOML file, overlaid with
    /// `CDPREP_`-prefixed environment variables (e.g. `CDPREP_DATA_ROOT`,
    /// `CDPREP_OVERWRITE`).
    pub fn load(config_file: Option<&Path>) -> error_stack::Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = config_file {
            if !path.exists() {
                return Err(ConfigError::NoSuchFile(path.to_path_buf()).into());
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("CDPREP_"));
        figment
            .extract::<Settings>()
            .change_context(ConfigError::CouldNotLoad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CfDate;
    use crate::lons::LonConvention;

    const EXAMPLE: &str = r#"
data_root = "/data/climate"
overwrite = true

[retry]
max_attempts = 5

[[downloads]]
variable = "tas"
table = "Amon"
experiment = "historical"
run = "r1i1p1f1"
source = "ACCESS-CM2"

[[downloads]]
variable = "pr"
table = "Amon"
experiment = "historical"
run = "r1i1p1f1"

[[subsets]]
lat_range = [-45.0, -10.0]
lon_range = [110.0, 155.0]
convention = "360"
start = "1979-01-01"
end = "2014-12-31"
suffix = "aus"

[[subsets]]
lat_range = [-90.0, 90.0]
lon_range = [-180.0, 180.0]
start = "1979-01-01"
end = "2014-12-31"
plev = 85000.0
"#;

    #[test]
    fn test_load_full_example() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdprep.toml");
        std::fs::write(&path, EXAMPLE).unwrap();
        let settings = Settings::load(Some(&path)).unwrap();

        assert_eq!(settings.data_root, PathBuf::from("/data/climate"));
        assert!(settings.overwrite);
        assert!(!settings.calendar_regrid);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_backoff_secs, 2);

        assert_eq!(settings.downloads.len(), 2);
        assert_eq!(settings.downloads[0].variable, "tas");
        assert_eq!(settings.downloads[0].source.as_deref(), Some("ACCESS-CM2"));
        assert_eq!(settings.downloads[1].source, None);

        assert_eq!(settings.subsets.len(), 2);
        let aus = &settings.subsets[0];
        assert_eq!(aus.convention, LonConvention::ZeroTo360);
        assert_eq!(aus.start, CfDate::new(1979, 1, 1).unwrap());
        assert_eq!(aus.suffix.as_deref(), Some("aus"));
        let global = &settings.subsets[1];
        assert_eq!(global.convention, LonConvention::CenteredAt180);
        assert_eq!(global.plev, Some(85000.0));
        assert_eq!(global.suffix, None);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/no/such/cdprep.toml"))).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::NoSuchFile(_)));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdprep.toml");
        std::fs::write(&path, EXAMPLE).unwrap();
        // The file says overwrite = true; the environment wins
        std::env::set_var("CDPREP_OVERWRITE", "false");
        let settings = Settings::load(Some(&path)).unwrap();
        std::env::remove_var("CDPREP_OVERWRITE");
        assert!(!settings.overwrite);
    }
}
