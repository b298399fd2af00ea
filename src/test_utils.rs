//! Helpers for constructing small in-memory grids in unit tests.

use ndarray::ArrayD;

use crate::calendar::{CfCalendar, CfDate, TimeAxis};
use crate::grid::{Grid, SpatialCoords};

/// A standard-calendar daily axis starting on the first of the given month.
pub(crate) fn daily_axis(year: i32, month: u32, ndays: u32) -> TimeAxis {
    let dates = (1..=ndays)
        .map(|d| CfDate::new(year, month, d).expect("test dates must be valid"))
        .collect();
    TimeAxis::new(CfCalendar::Standard, dates)
}

/// A full-year daily axis in the 360-day calendar for each year in the range.
pub(crate) fn day360_axis(years: std::ops::RangeInclusive<i32>) -> TimeAxis {
    let mut dates = vec![];
    for year in years {
        for month in 1..=12 {
            for day in 1..=30 {
                dates.push(CfDate::new(year, month, day).expect("test dates must be valid"));
            }
        }
    }
    TimeAxis::new(CfCalendar::Day360, dates)
}

/// A rectilinear grid over the given coordinates with `ntime` daily steps.
/// Cell values encode their index as `t * 100 + y * 10 + x` so tests can
/// verify that data moved together with its coordinates.
pub(crate) fn rectilinear_grid(name: &str, ntime: usize, lats: &[f64], lons: &[f64]) -> Grid {
    grid_with_axis(name, daily_axis(2000, 1, ntime as u32), lats, lons)
}

/// Same as [`rectilinear_grid`] but over an explicit time axis.
pub(crate) fn grid_with_axis(name: &str, time: TimeAxis, lats: &[f64], lons: &[f64]) -> Grid {
    let shape = vec![time.len(), lats.len(), lons.len()];
    let data = ArrayD::from_shape_fn(shape, |idx| {
        (idx[0] * 100 + idx[1] * 10 + idx[2]) as f64
    });
    Grid::new(
        name,
        data,
        time,
        None,
        SpatialCoords::Rectilinear {
            lat: lats.to_vec(),
            lon: lons.to_vec(),
        },
    )
    .expect("test grid shapes are consistent")
}
