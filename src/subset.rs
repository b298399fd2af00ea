//! Spatial and temporal subsetting of grids, including the defect
//! compensations that real source grids require.
//!
//! The operations here are deliberately separate functions rather than
//! one monolithic "subset" call: a pipeline applies them in an explicit
//! order (sort time, drop duplicate coordinates, normalize longitudes,
//! subset time, subset space, optionally select a pressure level or
//! regrid a 360-day calendar), and each step reports what it did so the
//! caller can log or reject the compensation.

use interp::{interp_slice, InterpMode};
use itertools::Itertools;
use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::calendar::{CfCalendar, CfDate, TimeAxis};
use crate::grid::{Grid, SpatialCoords};
use crate::lons::LonConvention;

/// Absolute tolerance, in the units of the level coordinate (Pa for
/// CMIP-style pressure levels), within which a level is considered to
/// match a requested target. Catalog metadata and grid files round
/// level values differently, so exact equality is never required.
pub const DEFAULT_PLEV_TOLERANCE: f64 = 0.1;

/// Which spatial axis a report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AxisKind {
    #[strum(serialize = "lat")]
    Lat,
    #[strum(serialize = "lon")]
    Lon,
}

/// A non-fatal coordinate defect that was compensated for, reported to
/// the caller so it can be surfaced rather than silently absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateDefect {
    pub axis: AxisKind,
    pub dropped: usize,
}

impl std::fmt::Display for CoordinateDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dropped {} duplicate {} value(s) undefined in the reference slice",
            self.dropped, self.axis
        )
    }
}

/// One requested output window: where and when to cut a source grid,
/// plus the longitude convention the cut should be expressed in.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubsetSpec {
    /// Inclusive latitude bounds in degrees north, low to high.
    pub lat_range: (f64, f64),
    /// Inclusive longitude bounds, expressed in `convention`, low to high.
    pub lon_range: (f64, f64),
    /// Longitude convention for the output grid.
    #[serde(default = "default_convention")]
    pub convention: LonConvention,
    /// Longitude that should come first on the output axis; defaults to
    /// the convention's range start.
    #[serde(default)]
    pub origin: Option<f64>,
    /// First date of the output window (inclusive).
    pub start: CfDate,
    /// Last date of the output window (inclusive). A day of 31 is
    /// clamped to 30 on 30-day-month axes during subsetting.
    pub end: CfDate,
    /// If set, collapse the level axis to the level nearest this value.
    #[serde(default)]
    pub plev: Option<f64>,
    /// Optional suffix appended to the output file name.
    #[serde(default)]
    pub suffix: Option<String>,
}

fn default_convention() -> LonConvention {
    LonConvention::CenteredAt180
}

#[derive(Debug, thiserror::Error)]
pub enum SubsetError {
    /// The requested time window does not intersect the grid's time axis.
    /// This must never fall through to an empty output file.
    #[error(
        "Requested time range {start} to {end} does not intersect the \
         grid's time axis ({axis_descr})"
    )]
    EmptyTimeRange {
        start: CfDate,
        end: CfDate,
        axis_descr: String,
    },
    /// The requested spatial window selects nothing on one axis.
    #[error("Requested {axis} range [{min}, {max}] selects no grid points")]
    EmptySpatialRange { axis: AxisKind, min: f64, max: f64 },
    /// No level on the grid is within tolerance of the requested target.
    /// Callers are expected to skip the offending request and continue.
    #[error("No level within {tolerance} of {target}; available levels: {available:?}")]
    NoMatchingLevel {
        target: f64,
        tolerance: f64,
        available: Vec<f64>,
    },
    /// A level was requested from a grid with no level axis.
    #[error("Variable '{variable}' has no level axis to select from")]
    NoLevelAxis { variable: String },
    /// The 360-to-365-day regridding preconditions do not hold.
    #[error("Cannot regrid calendar: {reason}")]
    RegridUnavailable { reason: String },
    /// The longitude axis could not be normalized to the requested form.
    #[error("Longitude normalization failed: {0}")]
    Normalization(#[from] crate::lons::LonNormError),
}

impl SubsetError {
    pub fn empty_time_range(start: CfDate, end: CfDate, axis: &TimeAxis) -> Self {
        let axis_descr = match (axis.first(), axis.last()) {
            (Some(a), Some(b)) => format!("{a} to {b}"),
            _ => "empty axis".to_string(),
        };
        Self::EmptyTimeRange {
            start,
            end,
            axis_descr,
        }
    }

    pub fn regrid_unavailable<S: Into<String>>(reason: S) -> Self {
        Self::RegridUnavailable {
            reason: reason.into(),
        }
    }
}

/// Restrict a grid to the inclusive date window [start, end].
///
/// On axes with 30-day months (explicit 360-day calendar or detected
/// from the day labels) an end day of 31 is replaced with 30 first, so
/// a conventional "...-12-31" request covers the model December. The
/// comparison ignores the hour-of-day: an end date without a time of
/// day covers that whole day.
pub fn subset_time(grid: &Grid, start: CfDate, end: CfDate) -> Result<Grid, SubsetError> {
    let end_eff = if grid.time().has_thirty_day_months() && end.day == 31 {
        CfDate { day: 30, ..end }
    } else {
        end
    };

    let dates = grid.time().dates();
    let first = dates.iter().position(|d| d.date_key() >= start.date_key());
    let last = dates
        .iter()
        .rposition(|d| d.date_key() <= end_eff.date_key());
    match (first, last) {
        (Some(i), Some(j)) if i <= j => Ok(grid.slice_time(i..j + 1)),
        _ => Err(SubsetError::empty_time_range(start, end, grid.time())),
    }
}

/// Restrict a grid to the spatial window of a [`SubsetSpec`].
///
/// Rectilinear grids are sliced by coordinate range directly; the
/// longitude axis is assumed to already be normalized to the requested
/// convention (see [`crate::lons::normalize_lons`]). Curvilinear grids
/// fall back to a mask over the 2-D coordinate fields: rows and columns
/// with no point inside the window are dropped, and each point's
/// longitude is wrapped into the requested convention before comparison
/// since the normalizer does not apply to this branch.
pub fn subset_space(grid: &Grid, spec: &SubsetSpec) -> Result<Grid, SubsetError> {
    let (lat_lo, lat_hi) = ordered(spec.lat_range);
    let (lon_lo, lon_hi) = ordered(spec.lon_range);

    match grid.coords() {
        SpatialCoords::Rectilinear { lat, lon } => {
            let lat_keep = in_range_indices(lat, lat_lo, lat_hi);
            if lat_keep.is_empty() {
                return Err(SubsetError::EmptySpatialRange {
                    axis: AxisKind::Lat,
                    min: lat_lo,
                    max: lat_hi,
                });
            }
            let lon_keep = in_range_indices(lon, lon_lo, lon_hi);
            if lon_keep.is_empty() {
                return Err(SubsetError::EmptySpatialRange {
                    axis: AxisKind::Lon,
                    min: lon_lo,
                    max: lon_hi,
                });
            }
            Ok(grid
                .select_lat_indices(&lat_keep)
                .select_lon_indices(&lon_keep))
        }
        SpatialCoords::Curvilinear { lat, lon } => {
            let (ny, nx) = (lat.nrows(), lat.ncols());
            let mut row_any = vec![false; ny];
            let mut col_any = vec![false; nx];
            for y in 0..ny {
                for x in 0..nx {
                    let lon_val = spec.convention.wrap(lon[[y, x]]);
                    if lat[[y, x]] >= lat_lo
                        && lat[[y, x]] <= lat_hi
                        && lon_val >= lon_lo
                        && lon_val <= lon_hi
                    {
                        row_any[y] = true;
                        col_any[x] = true;
                    }
                }
            }
            let rows: Vec<usize> = (0..ny).filter(|&y| row_any[y]).collect();
            if rows.is_empty() {
                return Err(SubsetError::EmptySpatialRange {
                    axis: AxisKind::Lat,
                    min: lat_lo,
                    max: lat_hi,
                });
            }
            let cols: Vec<usize> = (0..nx).filter(|&x| col_any[x]).collect();
            if cols.is_empty() {
                return Err(SubsetError::EmptySpatialRange {
                    axis: AxisKind::Lon,
                    min: lon_lo,
                    max: lon_hi,
                });
            }
            Ok(grid.select_lat_indices(&rows).select_lon_indices(&cols))
        }
    }
}

fn ordered(range: (f64, f64)) -> (f64, f64) {
    if range.0 <= range.1 {
        range
    } else {
        (range.1, range.0)
    }
}

fn in_range_indices(values: &[f64], lo: f64, hi: f64) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| v >= lo && v <= hi)
        .map(|(i, _)| i)
        .collect()
}

/// Drop duplicated coordinate values that some source grids carry.
///
/// A handful of published stores repeat a latitude or longitude value
/// (after rounding to 10 decimal places) and leave the data undefined
/// on the spurious copy. For each duplicated value, the indices whose
/// data is entirely NaN in the reference slice (first time step, first
/// level) are dropped; every compensation is reported. Curvilinear
/// grids and grids with an empty time axis are returned unchanged.
pub fn drop_duplicate_coords(grid: &Grid) -> (Grid, Vec<CoordinateDefect>) {
    let (lat, lon) = match grid.coords() {
        SpatialCoords::Rectilinear { lat, lon } => (lat.clone(), lon.clone()),
        SpatialCoords::Curvilinear { .. } => return (grid.clone(), vec![]),
    };
    if grid.time().is_empty() {
        return (grid.clone(), vec![]);
    }

    let mut reference: ArrayViewD<'_, f64> = grid.data().view().index_axis_move(Axis(0), 0);
    if grid.plev().is_some() {
        reference = reference.index_axis_move(Axis(0), 0);
    }

    let mut defects = vec![];

    let lat_keep = non_defective_indices(&lat, |i| {
        reference.index_axis(Axis(0), i).iter().all(|v| v.is_nan())
    });
    let lat_dropped = lat.len() - lat_keep.len();
    let mut out = if lat_dropped > 0 {
        defects.push(CoordinateDefect {
            axis: AxisKind::Lat,
            dropped: lat_dropped,
        });
        grid.select_lat_indices(&lat_keep)
    } else {
        grid.clone()
    };

    let lon_keep = non_defective_indices(&lon, |i| {
        reference.index_axis(Axis(1), i).iter().all(|v| v.is_nan())
    });
    let lon_dropped = lon.len() - lon_keep.len();
    if lon_dropped > 0 {
        defects.push(CoordinateDefect {
            axis: AxisKind::Lon,
            dropped: lon_dropped,
        });
        out = out.select_lon_indices(&lon_keep);
    }

    for defect in &defects {
        log::warn!("Grid '{}': {defect}", grid.name());
    }
    (out, defects)
}

/// Indices to keep on one axis: everything except duplicated values
/// whose reference-slice data is all NaN.
fn non_defective_indices(values: &[f64], all_nan_at: impl Fn(usize) -> bool) -> Vec<usize> {
    let keys: Vec<i64> = values.iter().map(|&v| round_key(v)).collect();
    let occurrences = keys.iter().counts();
    (0..values.len())
        .filter(|&i| {
            // For a duplicated value, keep the copy that actually has data
            occurrences[&keys[i]] == 1 || !all_nan_at(i)
        })
        .collect()
}

/// Coordinate equality key after rounding to 10 decimal places.
fn round_key(v: f64) -> i64 {
    (v * 1e10).round() as i64
}

/// Collapse the level axis to the level nearest `target`, within
/// `tolerance`. When no level qualifies the error lists the available
/// levels; callers skip that request and continue.
pub fn select_pressure_level(
    grid: &Grid,
    target: f64,
    tolerance: f64,
) -> Result<Grid, SubsetError> {
    let plev = grid.plev().ok_or_else(|| SubsetError::NoLevelAxis {
        variable: grid.name().to_owned(),
    })?;
    let nearest = plev
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (**a - target).abs();
            let db = (**b - target).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .filter(|&(_, p)| (*p - target).abs() <= tolerance);
    match nearest {
        Some((idx, _)) => Ok(grid
            .select_level(idx)
            .expect("index comes from enumerating the level axis")),
        None => Err(SubsetError::NoMatchingLevel {
            target,
            tolerance,
            available: plev.to_vec(),
        }),
    }
}

/// Interpolate a 360-day-calendar grid onto a 365-day year.
///
/// Requires every year on the axis to have exactly 360 samples. Each
/// cell's time series is linearly interpolated across day-of-year and
/// relabeled 1..=365 (noleap calendar). This is lossy and irreversible,
/// so it must stay disabled when persisting raw downloads; the pipeline
/// only applies it to derived subsets when explicitly enabled.
pub fn regrid_360_to_365(grid: &Grid) -> Result<Grid, SubsetError> {
    if !grid.time().samples_per_year_is(360) {
        return Err(SubsetError::regrid_unavailable(
            "time axis does not have exactly 360 samples per year",
        ));
    }
    if !grid.time().is_sorted() {
        return Err(SubsetError::regrid_unavailable("time axis is not sorted"));
    }
    let years = grid.time().years();
    let n_years = years.len();

    // Sample positions: source day centers stretched onto the 365-day
    // year, target day centers at 0.5, 1.5, ... 364.5.
    let xs: Vec<f64> = (0..360).map(|i| (i as f64 + 0.5) * 365.0 / 360.0).collect();
    let targets: Vec<f64> = (0..365).map(|j| j as f64 + 0.5).collect();

    let mut new_shape = grid.data().shape().to_vec();
    new_shape[0] = n_years * 365;
    let mut out = ArrayD::<f64>::zeros(new_shape);

    for (lane_in, mut lane_out) in grid
        .data()
        .lanes(Axis(0))
        .into_iter()
        .zip(out.lanes_mut(Axis(0)))
    {
        let series = lane_in.to_vec();
        for yi in 0..n_years {
            let ys = &series[yi * 360..(yi + 1) * 360];
            let interped = interp_slice(&xs, ys, &targets, &InterpMode::FirstLast);
            for (j, v) in interped.into_iter().enumerate() {
                lane_out[yi * 365 + j] = v;
            }
        }
    }

    let mut dates = Vec::with_capacity(n_years * 365);
    for &year in &years {
        let jan1 = CfDate::new(year, 1, 1).map_err(|e| SubsetError::regrid_unavailable(
            format!("cannot label year {year}: {e}"),
        ))?;
        for doy in 0..365 {
            let date = CfCalendar::NoLeap
                .date_from_days(jan1, doy as f64)
                .map_err(|e| SubsetError::regrid_unavailable(e.to_string()))?;
            dates.push(date);
        }
    }
    let new_axis = TimeAxis::new(CfCalendar::NoLeap, dates);

    grid.with_time_and_data(new_axis, out)
        .map_err(|e| SubsetError::regrid_unavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{day360_axis, grid_with_axis, rectilinear_grid};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, ArrayD};

    fn basic_spec() -> SubsetSpec {
        SubsetSpec {
            lat_range: (-90.0, 90.0),
            lon_range: (-180.0, 180.0),
            convention: LonConvention::CenteredAt180,
            origin: None,
            start: CfDate::new(2000, 1, 1).unwrap(),
            end: CfDate::new(2000, 12, 31).unwrap(),
            plev: None,
            suffix: None,
        }
    }

    #[test]
    fn test_subset_time_inclusive_window() {
        let grid = rectilinear_grid("tas", 10, &[0.0], &[0.0]);
        let out = subset_time(
            &grid,
            CfDate::new(2000, 1, 3).unwrap(),
            CfDate::new(2000, 1, 7).unwrap(),
        )
        .unwrap();
        assert_eq!(out.time().len(), 5);
        assert_eq!(out.time().first().unwrap().day, 3);
        assert_eq!(out.time().last().unwrap().day, 7);
    }

    #[test]
    fn test_subset_time_day31_equals_day30_on_360_calendar() {
        let grid = grid_with_axis("tas", day360_axis(2000..=2000), &[0.0], &[0.0]);
        let start = CfDate::new(2000, 6, 1).unwrap();
        let with_31 = subset_time(&grid, start, CfDate::new(2000, 12, 31).unwrap()).unwrap();
        let with_30 = subset_time(&grid, start, CfDate::new(2000, 12, 30).unwrap()).unwrap();
        assert_eq!(with_31, with_30);
        assert_eq!(with_31.time().last().unwrap().day, 30);
    }

    #[test]
    fn test_subset_time_disjoint_window_is_an_error() {
        let grid = rectilinear_grid("tas", 5, &[0.0], &[0.0]);
        let err = subset_time(
            &grid,
            CfDate::new(1990, 1, 1).unwrap(),
            CfDate::new(1990, 12, 31).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SubsetError::EmptyTimeRange { .. }));
    }

    #[test]
    fn test_subset_space_rectilinear() {
        let lats: Vec<f64> = (-3..=3).map(|i| i as f64 * 30.0).collect();
        let lons: Vec<f64> = (0..12).map(|i| -180.0 + i as f64 * 30.0).collect();
        let grid = rectilinear_grid("tas", 1, &lats, &lons);
        let mut spec = basic_spec();
        spec.lat_range = (-45.0, 45.0);
        spec.lon_range = (-60.0, 60.0);
        let out = subset_space(&grid, &spec).unwrap();
        assert_eq!(out.lat().unwrap(), &[-30.0, 0.0, 30.0]);
        assert_eq!(out.lon().unwrap(), &[-60.0, -30.0, 0.0, 30.0, 60.0]);
    }

    #[test]
    fn test_subset_space_descending_lat_axis() {
        let lats = [60.0, 30.0, 0.0, -30.0, -60.0];
        let grid = rectilinear_grid("tas", 1, &lats, &[0.0, 10.0]);
        let mut spec = basic_spec();
        spec.lat_range = (-40.0, 40.0);
        spec.lon_range = (0.0, 10.0);
        let out = subset_space(&grid, &spec).unwrap();
        assert_eq!(out.lat().unwrap(), &[30.0, 0.0, -30.0]);
    }

    #[test]
    fn test_subset_space_empty_is_an_error() {
        let grid = rectilinear_grid("tas", 1, &[0.0, 10.0], &[0.0, 10.0]);
        let mut spec = basic_spec();
        spec.lat_range = (50.0, 60.0);
        let err = subset_space(&grid, &spec).unwrap_err();
        assert!(matches!(
            err,
            SubsetError::EmptySpatialRange {
                axis: AxisKind::Lat,
                ..
            }
        ));
    }

    #[test]
    fn test_subset_space_curvilinear_mask() {
        let lat = Array2::from_shape_fn((4, 4), |(y, _)| y as f64 * 10.0);
        let lon = Array2::from_shape_fn((4, 4), |(_, x)| x as f64 * 10.0);
        let data = ArrayD::zeros(vec![1, 4, 4]);
        let grid = Grid::new(
            "tos",
            data,
            crate::test_utils::daily_axis(2000, 1, 1),
            None,
            SpatialCoords::Curvilinear { lat, lon },
        )
        .unwrap();
        let mut spec = basic_spec();
        spec.lat_range = (5.0, 25.0);
        spec.lon_range = (15.0, 35.0);
        spec.convention = LonConvention::ZeroTo360;
        let out = subset_space(&grid, &spec).unwrap();
        // Rows 1..=2 and columns 2..=3 survive
        match out.coords() {
            SpatialCoords::Curvilinear { lat, .. } => assert_eq!(lat.dim(), (2, 2)),
            _ => panic!("curvilinear grid must stay curvilinear"),
        }
    }

    #[test]
    fn test_duplicate_lat_rows_dropped() {
        // lat has two duplicated values; the second copy of each is
        // all-NaN at the reference time step
        let lats = [0.0, 10.0, 10.0, 20.0, 20.0, 30.0];
        let lons = [0.0, 10.0];
        let mut data = ArrayD::from_elem(vec![2, 6, 2], 1.0);
        for x in 0..2 {
            data[[0, 2, x]] = f64::NAN;
            data[[0, 4, x]] = f64::NAN;
        }
        let grid = Grid::new(
            "tas",
            data,
            crate::test_utils::daily_axis(2000, 1, 2),
            None,
            SpatialCoords::Rectilinear {
                lat: lats.to_vec(),
                lon: lons.to_vec(),
            },
        )
        .unwrap();
        let (out, defects) = drop_duplicate_coords(&grid);
        assert_eq!(out.lat().unwrap(), &[0.0, 10.0, 20.0, 30.0]);
        assert_eq!(out.lon().unwrap(), &[0.0, 10.0]);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].axis, AxisKind::Lat);
        assert_eq!(defects[0].dropped, 2);
        // Non-duplicated rows keep their data
        assert_eq!(out.data()[[0, 0, 0]], 1.0);
    }

    #[test]
    fn test_no_duplicates_reports_nothing() {
        let grid = rectilinear_grid("tas", 2, &[0.0, 10.0], &[0.0, 10.0]);
        let (out, defects) = drop_duplicate_coords(&grid);
        assert!(defects.is_empty());
        assert_eq!(out, grid);
    }

    #[test]
    fn test_select_pressure_level_nearest_within_tolerance() {
        let time = crate::test_utils::daily_axis(2000, 1, 1);
        let data = ArrayD::from_elem(vec![1, 3, 1, 1], 7.0);
        let grid = Grid::new(
            "ta",
            data,
            time,
            Some(vec![100000.0, 85000.000001, 50000.0]),
            SpatialCoords::Rectilinear {
                lat: vec![0.0],
                lon: vec![0.0],
            },
        )
        .unwrap();
        let out = select_pressure_level(&grid, 85000.0, DEFAULT_PLEV_TOLERANCE).unwrap();
        assert!(out.plev().is_none());
        assert_eq!(out.data().ndim(), 3);

        let err = select_pressure_level(&grid, 70000.0, DEFAULT_PLEV_TOLERANCE).unwrap_err();
        match err {
            SubsetError::NoMatchingLevel { available, .. } => {
                assert_eq!(available.len(), 3);
            }
            other => panic!("expected NoMatchingLevel, got {other}"),
        }
    }

    #[test]
    fn test_select_level_without_axis_is_an_error() {
        let grid = rectilinear_grid("tas", 1, &[0.0], &[0.0]);
        let err = select_pressure_level(&grid, 85000.0, DEFAULT_PLEV_TOLERANCE).unwrap_err();
        assert!(matches!(err, SubsetError::NoLevelAxis { .. }));
    }

    #[test]
    fn test_regrid_360_to_365_constant_series() {
        let axis = day360_axis(2000..=2001);
        let data = ArrayD::from_elem(vec![720, 1, 1], 3.5);
        let grid = Grid::new(
            "tas",
            data,
            axis,
            None,
            SpatialCoords::Rectilinear {
                lat: vec![0.0],
                lon: vec![0.0],
            },
        )
        .unwrap();
        let out = regrid_360_to_365(&grid).unwrap();
        assert_eq!(out.time().len(), 730);
        assert_eq!(out.time().calendar(), CfCalendar::NoLeap);
        assert_eq!(out.time().first().unwrap().date_key(), (2000, 1, 1));
        assert_eq!(out.time().last().unwrap().date_key(), (2001, 12, 31));
        for v in out.data().iter() {
            assert_abs_diff_eq!(*v, 3.5);
        }
    }

    #[test]
    fn test_regrid_rejects_non_360_axes() {
        let grid = rectilinear_grid("tas", 10, &[0.0], &[0.0]);
        let err = regrid_360_to_365(&grid).unwrap_err();
        assert!(matches!(err, SubsetError::RegridUnavailable { .. }));
    }
}
