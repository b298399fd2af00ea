//! General utilities, not particular to any pipeline stage.
use std::env;
use std::error::Error;
use std::fmt::Display;
use std::path::PathBuf;

/// Errors from resolving the data root directory out of the environment.
#[derive(Debug)]
pub enum DataRootError {
    /// No `CDPREP_DATA_ROOT` variable was set in the current environment.
    NotSet,
    /// The path taken from the environment points to a directory that
    /// doesn't exist at all. The contained [`PathBuf`] is the path checked.
    DoesNotExist(PathBuf),
    /// The path taken from the environment points to *something* but that
    /// something is not a directory. The contained [`PathBuf`] is the path checked.
    IsNotDir(PathBuf),
}

impl Display for DataRootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSet => {
                write!(f, "CDPREP_DATA_ROOT/cdprep_data_root environmental variables not set")
            }
            Self::DoesNotExist(p) => {
                write!(f, "Current CDPREP_DATA_ROOT ({}) does not exist", p.display())
            }
            Self::IsNotDir(p) => {
                write!(f, "Current CDPREP_DATA_ROOT ({}) is not a directory", p.display())
            }
        }
    }
}

impl Error for DataRootError {}

/// Get the data root directory as defined in the environment
///
/// This will check for the environmental variables "CDPREP_DATA_ROOT"
/// and "cdprep_data_root" in that order, the first one found is used.
/// Prefer the configuration file (`config::Settings`) where one is
/// available; this is the fallback for configuration-free use.
///
/// # Returns
/// A [`Result`] containing the data root as a [`PathBuf`]. It returns
/// an `Err` if:
///
/// * no CDPREP_DATA_ROOT variable is set in the current environment, or
/// * the variable points to a nonexistant directory, or
/// * the variable points to a file and not a directory.
pub fn get_data_root() -> Result<PathBuf, DataRootError> {
    let env_path = env::var_os("CDPREP_DATA_ROOT")
        .or_else(|| env::var_os("cdprep_data_root"))
        .map(PathBuf::from)
        .ok_or(DataRootError::NotSet)?;

    if !env_path.exists() {
        return Err(DataRootError::DoesNotExist(env_path));
    }

    if !env_path.is_dir() {
        return Err(DataRootError::IsNotDir(env_path));
    }

    Ok(env_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    // One sequential test: CDPREP_DATA_ROOT is process-global state, so
    // the cases cannot run as separate (parallel) test functions.
    #[test]
    fn test_get_data_root() {
        env::remove_var("CDPREP_DATA_ROOT");
        env::remove_var("cdprep_data_root");
        assert!(matches!(get_data_root(), Err(DataRootError::NotSet)));

        env::set_var("CDPREP_DATA_ROOT", "/no/such/directory/anywhere");
        assert!(matches!(
            get_data_root(),
            Err(DataRootError::DoesNotExist(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        env::set_var("CDPREP_DATA_ROOT", dir.path());
        assert_eq!(get_data_root().unwrap(), dir.path());

        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        env::set_var("CDPREP_DATA_ROOT", &file);
        assert!(matches!(get_data_root(), Err(DataRootError::IsNotDir(_))));

        env::remove_var("CDPREP_DATA_ROOT");
    }
}
