//! Chunked fetch-and-merge for reanalysis downloads.
//!
//! A multi-decade reanalysis request is too large for one retrieval, so
//! the year range is partitioned into fixed-size chunks which are
//! fetched, standardized, and persisted independently; a chunk whose
//! intermediate file already exists is never fetched again, which makes
//! an interrupted run resumable. Once every chunk is on disk the
//! intermediates are concatenated along the time axis into the final
//! file and deleted. Concatenation is strict: a missing intermediate,
//! a spatial extent mismatch, or overlapping time axes abort the merge
//! rather than producing a silently gapped file.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use ndarray::{ArrayD, Axis};

use crate::calendar::{CfDate, TimeAxis};
use crate::grid::{Grid, GridShapeError};
use crate::nc_io;
use crate::output::{ensure_source_dir, OutputDescriptor};
use crate::sources::{with_retry, BoundingBox, ReanalysisApi, ReanalysisRequest, RetryPolicy};

/// Suffix marking intermediate per-chunk files.
pub const CHUNK_SUFFIX: &str = "chunk";
/// Suffix marking the raw provider download before standardization.
const RAW_SUFFIX: &str = "raw";

/// Partition an inclusive year range into consecutive sub-ranges of at
/// most `chunk_size` years. An empty range yields no chunks.
pub fn chunk_years(start: i32, end: i32, chunk_size: usize) -> Vec<RangeInclusive<i32>> {
    assert!(chunk_size > 0, "chunk size must be at least one year");
    let mut chunks = vec![];
    let mut from = start;
    while from <= end {
        let to = (from + chunk_size as i32 - 1).min(end);
        chunks.push(from..=to);
        from = to + 1;
    }
    chunks
}

/// Output frequencies for temporal mean resampling.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ResampleFreq {
    /// Daily means, labeled on the day.
    #[strum(serialize = "day")]
    #[serde(rename = "day")]
    Daily,
    /// Monthly means, labeled on the first of the month.
    #[strum(serialize = "mon")]
    #[serde(rename = "mon")]
    Monthly,
}

/// Mean-aggregate a grid's time axis to the given output frequency.
/// NaN samples are excluded from each mean; a group with no defined
/// samples stays NaN.
pub fn resample_time_mean(grid: &Grid, freq: ResampleFreq) -> Result<Grid, GridShapeError> {
    // Group consecutive samples by their output label
    let mut labels: Vec<CfDate> = vec![];
    let mut group_of: Vec<usize> = Vec::with_capacity(grid.time().len());
    for date in grid.time().dates() {
        let label = match freq {
            ResampleFreq::Daily => CfDate {
                hour: 0,
                ..*date
            },
            ResampleFreq::Monthly => CfDate {
                day: 1,
                hour: 0,
                ..*date
            },
        };
        if labels.last() != Some(&label) {
            labels.push(label);
        }
        group_of.push(labels.len() - 1);
    }

    let mut new_shape = grid.data().shape().to_vec();
    new_shape[0] = labels.len();
    let mut out = ArrayD::<f64>::zeros(new_shape);

    for (lane_in, mut lane_out) in grid
        .data()
        .lanes(Axis(0))
        .into_iter()
        .zip(out.lanes_mut(Axis(0)))
    {
        let mut sums = vec![0.0; labels.len()];
        let mut counts = vec![0usize; labels.len()];
        for (t, &v) in lane_in.iter().enumerate() {
            if !v.is_nan() {
                sums[group_of[t]] += v;
                counts[group_of[t]] += 1;
            }
        }
        for g in 0..labels.len() {
            lane_out[g] = if counts[g] > 0 {
                sums[g] / counts[g] as f64
            } else {
                f64::NAN
            };
        }
    }

    let axis = TimeAxis::new(grid.time().calendar(), labels);
    grid.with_time_and_data(axis, out)
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("No chunks to merge for {0}")]
    EmptyPlan(String),
    #[error("Retrieval failed for chunk {0}")]
    ChunkFetch(String),
    #[error("Could not read chunk file {}", .0.display())]
    ChunkRead(PathBuf),
    #[error("Chunk file {} names the variable none of {candidates:?}", .path.display())]
    UnknownRawVariable {
        path: PathBuf,
        candidates: Vec<String>,
    },
    #[error("Intermediate chunk file {} is missing at merge time", .0.display())]
    MissingIntermediate(PathBuf),
    #[error("Chunk {} does not match the extent of {}: {reason}", .path.display(), .first.display())]
    ExtentMismatch {
        path: PathBuf,
        first: PathBuf,
        reason: String,
    },
    #[error("Chunk {} overlaps the previous chunk's time range", .0.display())]
    TimeOverlap(PathBuf),
    #[error("Could not write {}", .0.display())]
    WriteFailed(PathBuf),
}

/// One reanalysis acquisition: the final output identity plus how to
/// fetch it (provider naming, chunking, temporal resolution, window).
#[derive(Debug, Clone)]
pub struct ReanalysisJob {
    /// Identity of the final output file. Its date range should span
    /// `start_year`..`end_year`.
    pub descriptor: OutputDescriptor,
    /// Variable identifier sent to the provider (e.g. "2m_temperature").
    pub provider_variable: String,
    /// Names the variable may carry inside the downloaded file (the
    /// provider's short names, e.g. "t2m"). Tried in order.
    pub raw_variables: Vec<String>,
    pub start_year: i32,
    pub end_year: i32,
    /// Maximum years per retrieval request.
    pub chunk_size: usize,
    /// Hour stride of the request (e.g. 6 for four samples per day).
    pub hour_step: u32,
    pub area: BoundingBox,
    /// Mean-resample each chunk to this frequency before persisting;
    /// `None` keeps the provider's native resolution.
    pub resample: Option<ResampleFreq>,
}

impl ReanalysisJob {
    /// The intermediate descriptor for one chunk of years.
    pub fn chunk_descriptor(&self, years: &RangeInclusive<i32>) -> OutputDescriptor {
        let start = CfDate {
            year: *years.start(),
            month: 1,
            day: 1,
            hour: 0,
        };
        let end = CfDate {
            year: *years.end(),
            month: 12,
            day: 31,
            hour: 0,
        };
        self.descriptor.with_dates(start, end).with_suffix(CHUNK_SUFFIX)
    }
}

/// Fetch every missing chunk, then merge all chunks into the final file
/// and delete the intermediates. Returns the final path.
pub fn fetch_and_merge<A: ReanalysisApi>(
    api: &A,
    policy: &RetryPolicy,
    job: &ReanalysisJob,
    data_root: &Path,
) -> error_stack::Result<PathBuf, MergeError> {
    let chunks = chunk_years(job.start_year, job.end_year, job.chunk_size);
    if chunks.is_empty() {
        return Err(MergeError::EmptyPlan(job.descriptor.file_name()).into());
    }
    let mut chunk_paths = vec![];
    for years in &chunks {
        chunk_paths.push(fetch_chunk(api, policy, job, years, data_root)?);
    }
    merge_and_clean(job, &chunk_paths, data_root)
}

/// Fetch and standardize one chunk of years, unless its intermediate
/// file already exists. Returns the intermediate's path either way.
pub fn fetch_chunk<A: ReanalysisApi>(
    api: &A,
    policy: &RetryPolicy,
    job: &ReanalysisJob,
    years: &RangeInclusive<i32>,
    data_root: &Path,
) -> error_stack::Result<PathBuf, MergeError> {
    let chunk_desc = job.chunk_descriptor(years);
    let chunk_path = chunk_desc.path(data_root);
    ensure_source_dir(data_root, &job.descriptor.source)
        .change_context_lazy(|| MergeError::WriteFailed(chunk_path.clone()))?;
    if chunk_path.exists() {
        log::info!(
            "Chunk {} already downloaded, skipping fetch",
            chunk_path.display()
        );
        return Ok(chunk_path);
    }

    let raw_path = chunk_desc.with_suffix(RAW_SUFFIX).path(data_root);
    let request = ReanalysisRequest::full_years(
        job.provider_variable.clone(),
        years.clone().collect(),
        job.hour_step,
        job.area,
    );
    log::info!(
        "Fetching years {}-{} of {}",
        years.start(),
        years.end(),
        job.descriptor.variable
    );
    with_retry(
        policy,
        &format!("retrieval of {}", chunk_desc.file_name()),
        |timeout| api.retrieve(&request, &raw_path, timeout),
    )
    .change_context_lazy(|| MergeError::ChunkFetch(chunk_desc.file_name()))?;

    let mut grid = read_raw_grid(&raw_path, &job.raw_variables)?;
    let candidates: Vec<&str> = job.raw_variables.iter().map(|s| s.as_str()).collect();
    if grid.rename_variable_if_matches(&candidates, &job.descriptor.variable) {
        log::debug!(
            "Renamed provider variable to '{}' in {}",
            job.descriptor.variable,
            chunk_path.display()
        );
    }
    if grid.sort_time() {
        log::warn!(
            "Chunk {} had an unsorted time axis, reordered",
            raw_path.display()
        );
    }
    if let Some(freq) = job.resample {
        grid = resample_time_mean(&grid, freq).map_err(|e| {
            error_stack::Report::new(MergeError::ChunkRead(raw_path.clone()))
                .attach_printable(e.to_string())
        })?;
    }
    nc_io::write_grid(&grid, &chunk_path)
        .change_context_lazy(|| MergeError::WriteFailed(chunk_path.clone()))?;
    if let Err(e) = std::fs::remove_file(&raw_path) {
        log::warn!("Could not remove raw download {}: {e}", raw_path.display());
    }
    Ok(chunk_path)
}

/// Merge the chunk intermediates into the final file, then delete them
/// (plus any stale chunk files left by runs with different boundaries).
pub fn merge_and_clean(
    job: &ReanalysisJob,
    chunk_paths: &[PathBuf],
    data_root: &Path,
) -> error_stack::Result<PathBuf, MergeError> {
    let final_path = job.descriptor.path(data_root);
    merge_chunks(chunk_paths, &job.descriptor.variable, &final_path)?;

    for path in chunk_paths {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Could not remove intermediate {}: {e}", path.display());
        }
    }
    sweep_stale_chunks(job, data_root, &final_path);

    Ok(final_path)
}

fn read_raw_grid(
    path: &Path,
    candidates: &[String],
) -> error_stack::Result<Grid, MergeError> {
    for name in candidates {
        match nc_io::read_grid(path, name) {
            Ok(grid) => return Ok(grid),
            Err(e)
                if matches!(
                    e.current_context(),
                    nc_io::GridIoError::MissingVariable { .. }
                ) =>
            {
                continue
            }
            Err(e) => return Err(e.change_context(MergeError::ChunkRead(path.to_path_buf()))),
        }
    }
    Err(MergeError::UnknownRawVariable {
        path: path.to_path_buf(),
        candidates: candidates.to_vec(),
    }
    .into())
}

/// Concatenate chunk files along the time axis, in the given order,
/// into `out_path`. Every chunk must exist, share the first chunk's
/// spatial (and level) extent, and start strictly after the previous
/// chunk's last time step.
pub fn merge_chunks(
    chunk_paths: &[PathBuf],
    variable: &str,
    out_path: &Path,
) -> error_stack::Result<(), MergeError> {
    if chunk_paths.is_empty() {
        return Err(MergeError::EmptyPlan(variable.to_owned()).into());
    }

    let mut grids: Vec<Grid> = vec![];
    for path in chunk_paths {
        if !path.exists() {
            return Err(MergeError::MissingIntermediate(path.clone()).into());
        }
        let grid = nc_io::read_grid(path, variable)
            .change_context_lazy(|| MergeError::ChunkRead(path.clone()))?;
        if let Some(first) = grids.first() {
            if let Err(reason) = same_extent(first, &grid) {
                return Err(MergeError::ExtentMismatch {
                    path: path.clone(),
                    first: chunk_paths[0].clone(),
                    reason,
                }
                .into());
            }
            let prev_last = grids
                .last()
                .and_then(|g| g.time().last())
                .expect("previous chunks are non-empty");
            match grid.time().first() {
                Some(first_date) if first_date > prev_last => {}
                _ => return Err(MergeError::TimeOverlap(path.clone()).into()),
            }
        }
        grids.push(grid);
    }

    let views: Vec<_> = grids.iter().map(|g| g.data().view()).collect();
    let data = ndarray::concatenate(Axis(0), &views).map_err(|e| {
        error_stack::Report::new(MergeError::WriteFailed(out_path.to_path_buf()))
            .attach_printable(format!("chunk data shapes do not concatenate: {e}"))
    })?;
    let mut dates = vec![];
    for g in &grids {
        dates.extend_from_slice(g.time().dates());
    }
    let time = TimeAxis::new(grids[0].time().calendar(), dates);

    let first = &grids[0];
    let mut merged = Grid::new(
        variable,
        data,
        time,
        first.plev().map(|p| p.to_vec()),
        first.coords().clone(),
    )
    .map_err(|e| {
        error_stack::Report::new(MergeError::WriteFailed(out_path.to_path_buf()))
            .attach_printable(e.to_string())
    })?;
    if let Some(units) = first.units() {
        merged = merged.with_units(units);
    }

    nc_io::write_grid(&merged, out_path)
        .change_context_lazy(|| MergeError::WriteFailed(out_path.to_path_buf()))?;
    log::info!(
        "Merged {} chunk(s) into {}",
        grids.len(),
        out_path.display()
    );
    Ok(())
}

/// Compare the non-time extents of two chunks.
fn same_extent(a: &Grid, b: &Grid) -> Result<(), String> {
    if a.time().calendar() != b.time().calendar() {
        return Err(format!(
            "calendar {} vs {}",
            a.time().calendar(),
            b.time().calendar()
        ));
    }
    match (a.plev(), b.plev()) {
        (None, None) => {}
        (Some(pa), Some(pb)) if close_slices(pa, pb) => {}
        _ => return Err("level axes differ".to_owned()),
    }
    match (a.coords(), b.coords()) {
        (
            crate::grid::SpatialCoords::Rectilinear { lat: la, lon: oa },
            crate::grid::SpatialCoords::Rectilinear { lat: lb, lon: ob },
        ) => {
            if !close_slices(la, lb) {
                return Err(format!("lat axes differ ({} vs {} values)", la.len(), lb.len()));
            }
            if !close_slices(oa, ob) {
                return Err(format!("lon axes differ ({} vs {} values)", oa.len(), ob.len()));
            }
            Ok(())
        }
        (
            crate::grid::SpatialCoords::Curvilinear { lat: la, .. },
            crate::grid::SpatialCoords::Curvilinear { lat: lb, .. },
        ) => {
            if la.dim() != lb.dim() {
                return Err(format!("curvilinear shapes differ ({:?} vs {:?})", la.dim(), lb.dim()));
            }
            Ok(())
        }
        _ => Err("one chunk is rectilinear, the other curvilinear".to_owned()),
    }
}

fn close_slices(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-8)
}

/// Remove leftover chunk intermediates for this job from earlier runs
/// with different chunk boundaries.
fn sweep_stale_chunks(job: &ReanalysisJob, data_root: &Path, final_path: &Path) {
    let d = &job.descriptor;
    let pattern = data_root
        .join(&d.source)
        .join(format!(
            "{}_{}_{}_{}_{}_*_{CHUNK_SUFFIX}.nc",
            d.variable, d.frequency, d.source, d.experiment, d.run
        ))
        .display()
        .to_string();
    let matches = match glob::glob(&pattern) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("Could not sweep stale chunks: {e}");
            return;
        }
    };
    for entry in matches.flatten() {
        if entry == final_path {
            continue;
        }
        log::info!("Removing stale chunk file {}", entry.display());
        if let Err(e) = std::fs::remove_file(&entry) {
            log::warn!("Could not remove {}: {e}", entry.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CfCalendar;
    use crate::grid::SpatialCoords;
    use crate::test_utils::rectilinear_grid;
    use ndarray::ArrayD;
    use rstest::rstest;
    use std::cell::RefCell;
    use std::time::Duration;

    #[rstest]
    #[case(1979, 1983, 5, vec![1979..=1983])]
    #[case(1979, 1989, 5, vec![1979..=1983, 1984..=1988, 1989..=1989])]
    #[case(2000, 2000, 5, vec![2000..=2000])]
    #[case(2001, 2000, 5, vec![])]
    fn test_chunk_years(
        #[case] start: i32,
        #[case] end: i32,
        #[case] size: usize,
        #[case] expected: Vec<RangeInclusive<i32>>,
    ) {
        assert_eq!(chunk_years(start, end, size), expected);
    }

    fn hourly_grid() -> Grid {
        let dates = vec![
            CfDate::new(1979, 1, 1).unwrap(),
            CfDate::new(1979, 1, 1).unwrap().with_hour(12),
            CfDate::new(1979, 1, 2).unwrap(),
            CfDate::new(1979, 1, 2).unwrap().with_hour(12),
            CfDate::new(1979, 2, 1).unwrap(),
        ];
        let axis = TimeAxis::new(CfCalendar::Standard, dates);
        let data =
            ArrayD::from_shape_vec(vec![5, 1, 1], vec![1.0, 3.0, 5.0, 7.0, 9.0]).unwrap();
        Grid::new(
            "t2m",
            data,
            axis,
            None,
            SpatialCoords::Rectilinear {
                lat: vec![0.0],
                lon: vec![0.0],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_resample_daily_means() {
        let out = resample_time_mean(&hourly_grid(), ResampleFreq::Daily).unwrap();
        assert_eq!(out.time().len(), 3);
        assert_eq!(out.data()[[0, 0, 0]], 2.0);
        assert_eq!(out.data()[[1, 0, 0]], 6.0);
        assert_eq!(out.data()[[2, 0, 0]], 9.0);
        assert!(out.time().dates().iter().all(|d| d.hour == 0));
    }

    #[test]
    fn test_resample_monthly_means_label_first_of_month() {
        let out = resample_time_mean(&hourly_grid(), ResampleFreq::Monthly).unwrap();
        assert_eq!(out.time().len(), 2);
        assert_eq!(out.data()[[0, 0, 0]], 4.0);
        assert_eq!(out.data()[[1, 0, 0]], 9.0);
        assert_eq!(out.time().dates()[0].date_key(), (1979, 1, 1));
        assert_eq!(out.time().dates()[1].date_key(), (1979, 2, 1));
    }

    #[test]
    fn test_resample_skips_nan_samples() {
        let mut grid = hourly_grid();
        let mut data = grid.data().clone();
        data[[1, 0, 0]] = f64::NAN;
        grid = grid.with_time_and_data(grid.time().clone(), data).unwrap();
        let out = resample_time_mean(&grid, ResampleFreq::Daily).unwrap();
        assert_eq!(out.data()[[0, 0, 0]], 1.0);
    }

    /// Writes a two-sample standard-calendar file per requested year.
    struct MockApi {
        calls: RefCell<usize>,
        variable_in_file: &'static str,
    }

    impl MockApi {
        fn new(variable_in_file: &'static str) -> Self {
            Self {
                calls: RefCell::new(0),
                variable_in_file,
            }
        }
    }

    impl ReanalysisApi for MockApi {
        fn retrieve(
            &self,
            request: &ReanalysisRequest,
            target: &Path,
            _timeout: Duration,
        ) -> error_stack::Result<(), crate::sources::FetchError> {
            *self.calls.borrow_mut() += 1;
            let mut dates = vec![];
            for &y in &request.years {
                dates.push(CfDate::new(y, 1, 1).unwrap());
                dates.push(CfDate::new(y, 7, 1).unwrap());
            }
            let n = dates.len();
            let axis = TimeAxis::new(CfCalendar::Standard, dates);
            let data = ArrayD::from_shape_fn(vec![n, 2, 2], |idx| idx[0] as f64);
            let grid = Grid::new(
                self.variable_in_file,
                data,
                axis,
                None,
                SpatialCoords::Rectilinear {
                    lat: vec![0.0, 10.0],
                    lon: vec![0.0, 10.0],
                },
            )
            .unwrap();
            nc_io::write_grid(&grid, target).unwrap();
            Ok(())
        }
    }

    fn job() -> ReanalysisJob {
        ReanalysisJob {
            descriptor: OutputDescriptor {
                variable: "tas".to_owned(),
                frequency: "day".to_owned(),
                source: "ERA5".to_owned(),
                experiment: "historical".to_owned(),
                run: "r1".to_owned(),
                start: CfDate::new(1979, 1, 1).unwrap(),
                end: CfDate::new(1989, 12, 31).unwrap(),
                suffix: None,
            },
            provider_variable: "2m_temperature".to_owned(),
            raw_variables: vec!["t2m".to_owned()],
            start_year: 1979,
            end_year: 1989,
            chunk_size: 5,
            hour_step: 6,
            area: BoundingBox::global(),
            resample: None,
        }
    }

    #[test]
    fn test_fetch_and_merge_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let api = MockApi::new("t2m");
        let job = job();
        let final_path =
            fetch_and_merge(&api, &RetryPolicy::default(), &job, dir.path()).unwrap();
        assert_eq!(*api.calls.borrow(), 3);
        assert!(final_path.exists());

        // Final file holds the renamed variable over the full sorted union
        let merged = nc_io::read_grid(&final_path, "tas").unwrap();
        assert_eq!(merged.time().len(), 22);
        assert!(merged.time().is_sorted());
        let dates = merged.time().dates();
        assert!(dates.windows(2).all(|w| w[0] < w[1]), "no duplicate times");
        assert_eq!(dates[0].date_key(), (1979, 1, 1));
        assert_eq!(dates[21].date_key(), (1989, 7, 1));

        // Intermediates are gone
        for years in chunk_years(1979, 1989, 5) {
            assert!(!job.chunk_descriptor(&years).path(dir.path()).exists());
        }
    }

    #[test]
    fn test_existing_chunk_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let api = MockApi::new("t2m");
        let mut job = job();
        job.end_year = 1988; // two chunks: 1979-1983, 1984-1988
        ensure_source_dir(dir.path(), &job.descriptor.source).unwrap();

        // Pre-populate the first chunk exactly as a previous run would have
        let first_years = 1979..=1983;
        let pre = MockApi::new("t2m");
        let raw = dir.path().join("ERA5/pre.nc");
        let req = ReanalysisRequest::full_years(
            "2m_temperature",
            first_years.clone().collect(),
            6,
            BoundingBox::global(),
        );
        pre.retrieve(&req, &raw, Duration::from_secs(1)).unwrap();
        let mut grid = nc_io::read_grid(&raw, "t2m").unwrap();
        grid.rename_variable("tas");
        nc_io::write_grid(&grid, &job.chunk_descriptor(&first_years).path(dir.path())).unwrap();
        std::fs::remove_file(&raw).unwrap();

        fetch_and_merge(&api, &RetryPolicy::default(), &job, dir.path()).unwrap();
        assert_eq!(*api.calls.borrow(), 1, "only the missing chunk is fetched");
    }

    #[test]
    fn test_merge_missing_intermediate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a_chunk.nc");
        nc_io::write_grid(&rectilinear_grid("tas", 2, &[0.0], &[0.0]), &present).unwrap();
        let missing = dir.path().join("b_chunk.nc");
        let err = merge_chunks(
            &[present, missing.clone()],
            "tas",
            &dir.path().join("out.nc"),
        )
        .unwrap_err();
        match err.current_context() {
            MergeError::MissingIntermediate(p) => assert_eq!(p, &missing),
            other => panic!("expected MissingIntermediate, got {other}"),
        }
    }

    #[test]
    fn test_merge_extent_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a_chunk.nc");
        nc_io::write_grid(&rectilinear_grid("tas", 2, &[0.0, 10.0], &[0.0]), &a).unwrap();
        let b = dir.path().join("b_chunk.nc");
        let later = crate::test_utils::grid_with_axis(
            "tas",
            crate::test_utils::daily_axis(2001, 1, 2),
            &[0.0, 20.0],
            &[0.0],
        );
        nc_io::write_grid(&later, &b).unwrap();
        let err = merge_chunks(&[a, b], "tas", &dir.path().join("out.nc")).unwrap_err();
        assert!(matches!(
            err.current_context(),
            MergeError::ExtentMismatch { .. }
        ));
    }

    #[test]
    fn test_merge_time_overlap_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a_chunk.nc");
        nc_io::write_grid(&rectilinear_grid("tas", 5, &[0.0], &[0.0]), &a).unwrap();
        let b = dir.path().join("b_chunk.nc");
        // Same January 2000 dates again: overlaps chunk a
        nc_io::write_grid(&rectilinear_grid("tas", 3, &[0.0], &[0.0]), &b).unwrap();
        let err = merge_chunks(&[a, b], "tas", &dir.path().join("out.nc")).unwrap_err();
        assert!(matches!(err.current_context(), MergeError::TimeOverlap(_)));
    }
}
