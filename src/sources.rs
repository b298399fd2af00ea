//! Remote data access seams: traits for the two kinds of upstream
//! source, plus the bounded retry policy every remote call goes
//! through.
//!
//! Transport itself (HTTP, cloud object access, provider SDKs) is an
//! external collaborator, reached through the [`GridSource`] and
//! [`ReanalysisApi`] traits; this crate ships a filesystem-backed grid
//! source for local or mounted stores and a reanalysis API that
//! delegates retrieval to an external command. Both kinds of call are
//! blocking and sequential, so an unbounded hang upstream would stall
//! the whole pipeline; [`RetryPolicy`] therefore caps the per-attempt
//! time and the number of attempts, with exponential backoff between
//! failures.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use error_stack::ResultExt;

use crate::grid::Grid;
use crate::nc_io;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Could not launch retrieval command '{program}'")]
    CommandLaunch { program: String },
    #[error("Retrieval command '{program}' exited with {status}")]
    CommandFailed { program: String, status: String },
    #[error("Retrieval did not finish within {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },
    #[error("Retrieval reported success but wrote no file at {}", .path.display())]
    MissingOutput { path: PathBuf },
    #[error("Could not open grid store '{location}'")]
    OpenFailed { location: String },
    #[error("{what} failed after {attempts} attempt(s)")]
    AttemptsExhausted { what: String, attempts: u32 },
}

impl FetchError {
    pub fn command_launch<S: ToString>(program: S) -> Self {
        Self::CommandLaunch {
            program: program.to_string(),
        }
    }

    pub fn command_failed<S: ToString, T: ToString>(program: S, status: T) -> Self {
        Self::CommandFailed {
            program: program.to_string(),
            status: status.to_string(),
        }
    }

    pub fn open_failed<S: Into<String>>(location: S) -> Self {
        Self::OpenFailed {
            location: location.into(),
        }
    }

    pub fn attempts_exhausted<S: Into<String>>(what: S, attempts: u32) -> Self {
        Self::AttemptsExhausted {
            what: what.into(),
            attempts,
        }
    }
}

/// Bounds on remote calls: attempts, backoff between them, and the time
/// budget each attempt gets. Deserializable so configuration files can
/// override individual fields.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    2
}
fn default_max_backoff() -> u64 {
    120
}
fn default_attempt_timeout() -> u64 {
    3600
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            attempt_timeout_secs: default_attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Run `attempt` until it succeeds or the policy's attempt budget is
/// spent, sleeping with exponential backoff between failures. The
/// closure receives the per-attempt timeout it must honor.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    what: &str,
    mut attempt: F,
) -> error_stack::Result<T, FetchError>
where
    F: FnMut(Duration) -> error_stack::Result<T, FetchError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = Duration::from_secs(policy.initial_backoff_secs);
    for n in 1..=max_attempts {
        match attempt(policy.attempt_timeout()) {
            Ok(v) => return Ok(v),
            Err(e) if n == max_attempts => {
                return Err(e.change_context(FetchError::attempts_exhausted(what, max_attempts)));
            }
            Err(e) => {
                log::warn!(
                    "{what} failed (attempt {n} of {max_attempts}), retrying in {}s: {e:?}",
                    delay.as_secs()
                );
                std::thread::sleep(delay);
                delay = (delay * 2).min(Duration::from_secs(policy.max_backoff_secs));
            }
        }
    }
    unreachable!("the final attempt either returned or errored out above")
}

/// Anything that can open a grid given a catalog location string.
pub trait GridSource {
    fn open_grid(&self, location: &str, variable: &str) -> error_stack::Result<Grid, FetchError>;
}

/// A grid source reading netCDF stores from the local filesystem (or a
/// mount of the remote store). Relative locations are resolved against
/// an optional base directory.
pub struct NetcdfGridSource {
    base: Option<PathBuf>,
}

impl NetcdfGridSource {
    pub fn new(base: Option<PathBuf>) -> Self {
        Self { base }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl GridSource for NetcdfGridSource {
    fn open_grid(&self, location: &str, variable: &str) -> error_stack::Result<Grid, FetchError> {
        let path = self.resolve(location);
        nc_io::read_grid(&path, variable)
            .change_context_lazy(|| FetchError::open_failed(location))
    }
}

/// A bounding box in the [north, west, south, east] order used by
/// reanalysis retrieval requests.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn as_nwse(&self) -> [f64; 4] {
        [self.north, self.west, self.south, self.east]
    }

    /// The whole globe.
    pub fn global() -> Self {
        Self {
            north: 90.0,
            west: -180.0,
            south: -90.0,
            east: 180.0,
        }
    }
}

/// One synchronous retrieval request: which variable, which times, and
/// the spatial window. The provider receives lists of zero-padded year,
/// month (01-12), day (01-31), and hour strings, rendered by
/// [`ReanalysisRequest::to_wire_json`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReanalysisRequest {
    /// Provider-side variable identifier (e.g. "2m_temperature").
    pub variable: String,
    pub years: Vec<i32>,
    pub months: Vec<u32>,
    pub days: Vec<u32>,
    pub hours: Vec<u32>,
    pub area: BoundingBox,
}

impl ReanalysisRequest {
    /// A request for every month, every day, at a fixed hour interval.
    pub fn full_years(
        variable: impl Into<String>,
        years: Vec<i32>,
        hour_step: u32,
        area: BoundingBox,
    ) -> Self {
        let hour_step = hour_step.clamp(1, 24);
        Self {
            variable: variable.into(),
            years,
            months: (1..=12).collect(),
            days: (1..=31).collect(),
            hours: (0..24).step_by(hour_step as usize).collect(),
            area,
        }
    }

    /// The JSON form handed to the retrieval command.
    pub fn to_wire_json(&self) -> serde_json::Value {
        serde_json::json!({
            "variable": self.variable,
            "year": self.years.iter().map(|y| y.to_string()).collect::<Vec<_>>(),
            "month": self.months.iter().map(|m| format!("{m:02}")).collect::<Vec<_>>(),
            "day": self.days.iter().map(|d| format!("{d:02}")).collect::<Vec<_>>(),
            "time": self.hours.iter().map(|h| format!("{h:02}:00")).collect::<Vec<_>>(),
            "area": self.area.as_nwse(),
            "format": "netcdf",
        })
    }
}

/// Anything that can execute a retrieval request, writing one file to
/// `target` synchronously. Implementations must give up once `timeout`
/// has elapsed; [`with_retry`] supplies that budget per attempt.
pub trait ReanalysisApi {
    fn retrieve(
        &self,
        request: &ReanalysisRequest,
        target: &Path,
        timeout: Duration,
    ) -> error_stack::Result<(), FetchError>;
}

/// A [`ReanalysisApi`] that delegates to an external program (typically
/// a thin wrapper around the provider's client library). The request is
/// written to the program's stdin as JSON; the target path is appended
/// as the final argument. The program is expected to exit zero with the
/// file written.
pub struct ExternalCommandApi {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl ExternalCommandApi {
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }
}

impl ReanalysisApi for ExternalCommandApi {
    fn retrieve(
        &self,
        request: &ReanalysisRequest,
        target: &Path,
        timeout: Duration,
    ) -> error_stack::Result<(), FetchError> {
        let program = self.program.display().to_string();
        let mut child = Command::new(&self.program)
            .args(&self.extra_args)
            .arg(target)
            .stdin(Stdio::piped())
            .spawn()
            .change_context_lazy(|| FetchError::command_launch(&program))?;

        if let Some(mut stdin) = child.stdin.take() {
            let wire = request.to_wire_json().to_string();
            // The program may legitimately exit before draining stdin; a
            // broken pipe here surfaces through its exit status instead.
            if let Err(e) = stdin.write_all(wire.as_bytes()) {
                log::debug!("Could not write request to {program} stdin: {e}");
            }
        }

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() > timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(FetchError::Timeout {
                            timeout_secs: timeout.as_secs(),
                        }
                        .into());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(error_stack::Report::new(FetchError::command_failed(
                        &program, e,
                    )))
                }
            }
        };

        if !status.success() {
            return Err(FetchError::command_failed(&program, status).into());
        }
        if !target.exists() {
            return Err(FetchError::MissingOutput {
                path: target.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
            attempt_timeout_secs: 5,
        }
    }

    #[test]
    fn test_with_retry_succeeds_after_failures() {
        let mut calls = 0;
        let out = with_retry(&immediate_policy(3), "test fetch", |_| {
            calls += 1;
            if calls < 3 {
                Err(FetchError::command_failed("x", "1").into())
            } else {
                Ok(42)
            }
        })
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_with_retry_gives_up_after_max_attempts() {
        let mut calls = 0;
        let err = with_retry(&immediate_policy(2), "test fetch", |_| -> error_stack::Result<(), FetchError> {
            calls += 1;
            Err(FetchError::command_failed("x", "1").into())
        })
        .unwrap_err();
        assert_eq!(calls, 2);
        assert!(matches!(
            err.current_context(),
            FetchError::AttemptsExhausted { attempts: 2, .. }
        ));
    }

    #[test]
    fn test_request_wire_form() {
        let req = ReanalysisRequest::full_years("2m_temperature", vec![1979, 1980], 6, BoundingBox {
            north: 60.0,
            west: -10.0,
            south: 40.0,
            east: 30.0,
        });
        let wire = req.to_wire_json();
        assert_eq!(wire["year"][0], "1979");
        assert_eq!(wire["month"][0], "01");
        assert_eq!(wire["month"][11], "12");
        assert_eq!(wire["day"][30], "31");
        assert_eq!(wire["time"][1], "06:00");
        assert_eq!(wire["area"][0], 60.0);
        assert_eq!(wire["area"][3], 30.0);
    }

    #[test]
    fn test_external_command_writes_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.nc");
        // "$0" is the appended target path argument
        let api = ExternalCommandApi::new("sh", vec!["-c".into(), "touch \"$0\"".into()]);
        let req = ReanalysisRequest::full_years("t", vec![1979], 6, BoundingBox::global());
        api.retrieve(&req, &target, Duration::from_secs(10)).unwrap();
        assert!(target.exists());
    }

    #[test]
    fn test_external_command_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.nc");
        let api = ExternalCommandApi::new("sh", vec!["-c".into(), "exit 3".into()]);
        let req = ReanalysisRequest::full_years("t", vec![1979], 6, BoundingBox::global());
        let err = api
            .retrieve(&req, &target, Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            FetchError::CommandFailed { .. }
        ));
    }

    #[test]
    fn test_external_command_success_without_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.nc");
        let api = ExternalCommandApi::new("sh", vec!["-c".into(), "exit 0".into()]);
        let req = ReanalysisRequest::full_years("t", vec![1979], 6, BoundingBox::global());
        let err = api
            .retrieve(&req, &target, Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            FetchError::MissingOutput { .. }
        ));
    }

    #[test]
    fn test_external_command_timeout_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.nc");
        let api = ExternalCommandApi::new("sh", vec!["-c".into(), "sleep 30".into()]);
        let req = ReanalysisRequest::full_years("t", vec![1979], 6, BoundingBox::global());
        let err = api
            .retrieve(&req, &target, Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err.current_context(), FetchError::Timeout { .. }));
    }
}
