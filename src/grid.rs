//! The in-memory representation of a single-variable climate grid.
//!
//! A [`Grid`] owns one data variable as an [`ndarray::ArrayD`] with a
//! fixed dimension order of (time, \[pressure level,\] lat, lon), plus
//! the coordinate values for each axis. Spatial coordinates are either
//! rectilinear (1-D lat and lon vectors) or curvilinear (2-D lat and lon
//! fields over the same y/x index space); most operations in this crate
//! only apply to the rectilinear form, and the curvilinear form exists
//! so that such grids can still be subset by masking (see the `subset`
//! module).
//!
//! Transformations never mutate shared state: each one either modifies
//! the owned grid in place or returns a new `Grid`, so a processing
//! pipeline is an explicit chain of values.

use ndarray::{Array2, ArrayD, Axis, Slice};

use crate::calendar::TimeAxis;

/// Spatial coordinates of a grid.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialCoords {
    /// 1-D latitude and longitude vectors; the common case.
    Rectilinear { lat: Vec<f64>, lon: Vec<f64> },
    /// 2-D latitude and longitude fields over (y, x); ocean and some
    /// regional model grids. Both arrays must have the same shape.
    Curvilinear { lat: Array2<f64>, lon: Array2<f64> },
}

impl SpatialCoords {
    /// Number of rows (latitude direction) and columns (longitude direction).
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Rectilinear { lat, lon } => (lat.len(), lon.len()),
            Self::Curvilinear { lat, .. } => (lat.nrows(), lat.ncols()),
        }
    }

    pub fn is_curvilinear(&self) -> bool {
        matches!(self, Self::Curvilinear { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GridShapeError {
    #[error("Data has {ndim} dimensions but {expected} coordinate axes were supplied")]
    DimCountMismatch { ndim: usize, expected: usize },
    #[error("Axis '{axis}' has {coord_len} coordinate values but the data extent is {data_len}")]
    AxisLengthMismatch {
        axis: &'static str,
        coord_len: usize,
        data_len: usize,
    },
    #[error("Curvilinear lat field is {lat_shape:?} but lon field is {lon_shape:?}")]
    CurvilinearShapeMismatch {
        lat_shape: (usize, usize),
        lon_shape: (usize, usize),
    },
}

/// A single-variable grid with its coordinate axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    name: String,
    units: Option<String>,
    data: ArrayD<f64>,
    time: TimeAxis,
    plev: Option<Vec<f64>>,
    coords: SpatialCoords,
}

impl Grid {
    /// Assemble a grid, checking that every coordinate axis matches the
    /// corresponding data extent. Data dimension order must be
    /// (time, lat, lon) or (time, plev, lat, lon).
    pub fn new(
        name: impl Into<String>,
        data: ArrayD<f64>,
        time: TimeAxis,
        plev: Option<Vec<f64>>,
        coords: SpatialCoords,
    ) -> Result<Self, GridShapeError> {
        let expected_ndim = if plev.is_some() { 4 } else { 3 };
        if data.ndim() != expected_ndim {
            return Err(GridShapeError::DimCountMismatch {
                ndim: data.ndim(),
                expected: expected_ndim,
            });
        }
        if let SpatialCoords::Curvilinear { lat, lon } = &coords {
            if lat.dim() != lon.dim() {
                return Err(GridShapeError::CurvilinearShapeMismatch {
                    lat_shape: lat.dim(),
                    lon_shape: lon.dim(),
                });
            }
        }

        let shape = data.shape();
        let (nlat, nlon) = coords.shape();
        let checks: [(&'static str, usize, usize); 4] = [
            ("time", time.len(), shape[0]),
            (
                "plev",
                plev.as_ref().map(|p| p.len()).unwrap_or(0),
                if plev.is_some() { shape[1] } else { 0 },
            ),
            ("lat", nlat, shape[data.ndim() - 2]),
            ("lon", nlon, shape[data.ndim() - 1]),
        ];
        for (axis, coord_len, data_len) in checks {
            if coord_len != data_len {
                return Err(GridShapeError::AxisLengthMismatch {
                    axis,
                    coord_len,
                    data_len,
                });
            }
        }

        Ok(Self {
            name: name.into(),
            units: None,
            data,
            time,
            plev,
            coords,
        })
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn time(&self) -> &TimeAxis {
        &self.time
    }

    pub fn plev(&self) -> Option<&[f64]> {
        self.plev.as_deref()
    }

    pub fn coords(&self) -> &SpatialCoords {
        &self.coords
    }

    /// The 1-D latitude values, or `None` for a curvilinear grid.
    pub fn lat(&self) -> Option<&[f64]> {
        match &self.coords {
            SpatialCoords::Rectilinear { lat, .. } => Some(lat),
            SpatialCoords::Curvilinear { .. } => None,
        }
    }

    /// The 1-D longitude values, or `None` for a curvilinear grid.
    pub fn lon(&self) -> Option<&[f64]> {
        match &self.coords {
            SpatialCoords::Rectilinear { lon, .. } => Some(lon),
            SpatialCoords::Curvilinear { .. } => None,
        }
    }

    pub fn is_curvilinear(&self) -> bool {
        self.coords.is_curvilinear()
    }

    fn lat_axis(&self) -> Axis {
        Axis(self.data.ndim() - 2)
    }

    fn lon_axis(&self) -> Axis {
        Axis(self.data.ndim() - 1)
    }

    /// Unconditionally rename the data variable.
    pub fn rename_variable(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Rename the data variable to `canonical` if its current name is one
    /// of `expected`. Returns whether the rename occurred, so the caller
    /// decides whether a miss is an error.
    pub fn rename_variable_if_matches(&mut self, expected: &[&str], canonical: &str) -> bool {
        if expected.contains(&self.name.as_str()) {
            self.name = canonical.to_owned();
            true
        } else {
            false
        }
    }

    /// Circularly shift the longitude axis (coordinate and data together)
    /// so that index `offset` becomes index 0. No-op on curvilinear grids
    /// and for a zero offset.
    pub fn roll_lon(&mut self, offset: usize) {
        let lon = match &mut self.coords {
            SpatialCoords::Rectilinear { lon, .. } => lon,
            SpatialCoords::Curvilinear { .. } => return,
        };
        let n = lon.len();
        if n == 0 || offset % n == 0 {
            return;
        }
        let offset = offset % n;
        lon.rotate_left(offset);
        let order: Vec<usize> = (offset..n).chain(0..offset).collect();
        self.data = self.data.select(self.lon_axis(), &order);
    }

    /// Overwrite the longitude coordinate values (e.g. after remapping
    /// them into a different numeric range). Panics if the length does
    /// not match; only call with a vector derived from [`Grid::lon`].
    pub(crate) fn set_lon_values(&mut self, values: Vec<f64>) {
        match &mut self.coords {
            SpatialCoords::Rectilinear { lon, .. } => {
                assert_eq!(lon.len(), values.len(), "longitude length changed");
                *lon = values;
            }
            SpatialCoords::Curvilinear { .. } => {}
        }
    }

    /// Restrict the grid to a contiguous range of time indices.
    pub fn slice_time(&self, range: std::ops::Range<usize>) -> Self {
        let data = self
            .data
            .slice_axis(Axis(0), Slice::from(range.clone()))
            .to_owned();
        Self {
            name: self.name.clone(),
            units: self.units.clone(),
            data,
            time: self.time.sliced(range),
            plev: self.plev.clone(),
            coords: self.coords.clone(),
        }
    }

    /// Keep only the given latitude indices (rows for curvilinear grids).
    pub fn select_lat_indices(&self, keep: &[usize]) -> Self {
        let coords = match &self.coords {
            SpatialCoords::Rectilinear { lat, lon } => SpatialCoords::Rectilinear {
                lat: keep.iter().map(|&i| lat[i]).collect(),
                lon: lon.clone(),
            },
            SpatialCoords::Curvilinear { lat, lon } => SpatialCoords::Curvilinear {
                lat: lat.select(Axis(0), keep),
                lon: lon.select(Axis(0), keep),
            },
        };
        Self {
            name: self.name.clone(),
            units: self.units.clone(),
            data: self.data.select(self.lat_axis(), keep),
            time: self.time.clone(),
            plev: self.plev.clone(),
            coords,
        }
    }

    /// Keep only the given longitude indices (columns for curvilinear grids).
    pub fn select_lon_indices(&self, keep: &[usize]) -> Self {
        let coords = match &self.coords {
            SpatialCoords::Rectilinear { lat, lon } => SpatialCoords::Rectilinear {
                lat: lat.clone(),
                lon: keep.iter().map(|&i| lon[i]).collect(),
            },
            SpatialCoords::Curvilinear { lat, lon } => SpatialCoords::Curvilinear {
                lat: lat.select(Axis(1), keep),
                lon: lon.select(Axis(1), keep),
            },
        };
        Self {
            name: self.name.clone(),
            units: self.units.clone(),
            data: self.data.select(self.lon_axis(), keep),
            time: self.time.clone(),
            plev: self.plev.clone(),
            coords,
        }
    }

    /// Collapse the pressure-level axis by selecting a single level.
    /// Returns `None` if the grid has no level axis or the index is out
    /// of range.
    pub fn select_level(&self, index: usize) -> Option<Self> {
        let plev = self.plev.as_ref()?;
        if index >= plev.len() {
            return None;
        }
        let data = self.data.index_axis(Axis(1), index).to_owned();
        Some(Self {
            name: self.name.clone(),
            units: self.units.clone(),
            data,
            time: self.time.clone(),
            plev: None,
            coords: self.coords.clone(),
        })
    }

    /// Sort the time axis ascending, reordering the data to match.
    /// Returns whether a reorder was necessary.
    pub fn sort_time(&mut self) -> bool {
        let order = match self.time.sort_order() {
            Some(o) => o,
            None => return false,
        };
        self.time = self.time.permuted(&order);
        self.data = self.data.select(Axis(0), &order);
        true
    }

    /// Replace the time axis and data together, e.g. after temporal
    /// resampling. Checks the new shapes against each other and against
    /// the unchanged axes.
    pub fn with_time_and_data(
        &self,
        time: TimeAxis,
        data: ArrayD<f64>,
    ) -> Result<Self, GridShapeError> {
        let mut out = Self::new(
            self.name.clone(),
            data,
            time,
            self.plev.clone(),
            self.coords.clone(),
        )?;
        out.units = self.units.clone();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{daily_axis, rectilinear_grid};
    use ndarray::ArrayD;

    #[test]
    fn test_shape_validation() {
        let time = daily_axis(2000, 1, 3);
        let data = ArrayD::zeros(vec![3, 2, 4]);
        let coords = SpatialCoords::Rectilinear {
            lat: vec![0.0, 1.0],
            lon: vec![0.0, 1.0, 2.0, 3.0],
        };
        Grid::new("tas", data.clone(), time.clone(), None, coords.clone()).unwrap();

        let bad_coords = SpatialCoords::Rectilinear {
            lat: vec![0.0],
            lon: vec![0.0, 1.0, 2.0, 3.0],
        };
        let err = Grid::new("tas", data.clone(), time.clone(), None, bad_coords).unwrap_err();
        assert!(matches!(err, GridShapeError::AxisLengthMismatch { axis: "lat", .. }));

        // plev supplied but data only 3-D
        let err = Grid::new("ta", data, time, Some(vec![85000.0]), coords).unwrap_err();
        assert!(matches!(err, GridShapeError::DimCountMismatch { .. }));
    }

    #[test]
    fn test_roll_lon_rotates_data_with_coord() {
        let mut grid = rectilinear_grid("tas", 2, &[0.0, 10.0], &[0.0, 90.0, 180.0, 270.0]);
        // Make each column identifiable by its longitude
        let shape = grid.data().shape().to_vec();
        let mut data = grid.data().clone();
        for t in 0..shape[0] {
            for y in 0..shape[1] {
                for x in 0..shape[2] {
                    data[[t, y, x]] = x as f64;
                }
            }
        }
        grid = grid.with_time_and_data(grid.time().clone(), data).unwrap();

        grid.roll_lon(2);
        assert_eq!(grid.lon().unwrap(), &[180.0, 270.0, 0.0, 90.0]);
        assert_eq!(grid.data()[[0, 0, 0]], 2.0);
        assert_eq!(grid.data()[[0, 0, 3]], 1.0);
    }

    #[test]
    fn test_roll_lon_zero_is_noop() {
        let mut grid = rectilinear_grid("tas", 2, &[0.0, 10.0], &[0.0, 90.0, 180.0]);
        let before = grid.clone();
        grid.roll_lon(0);
        assert_eq!(grid, before);
        grid.roll_lon(3);
        assert_eq!(grid, before);
    }

    #[test]
    fn test_select_level_collapses_axis() {
        let time = daily_axis(2000, 1, 2);
        let data = ArrayD::from_elem(vec![2, 3, 2, 2], 1.0);
        let coords = SpatialCoords::Rectilinear {
            lat: vec![0.0, 1.0],
            lon: vec![0.0, 1.0],
        };
        let grid = Grid::new(
            "ta",
            data,
            time,
            Some(vec![100000.0, 85000.0, 50000.0]),
            coords,
        )
        .unwrap();
        let level = grid.select_level(1).unwrap();
        assert!(level.plev().is_none());
        assert_eq!(level.data().ndim(), 3);
        assert!(grid.select_level(3).is_none());
    }

    #[test]
    fn test_sort_time_reorders_data() {
        let grid = rectilinear_grid("tas", 3, &[0.0], &[0.0]);
        let mut data = grid.data().clone();
        data[[0, 0, 0]] = 0.0;
        data[[1, 0, 0]] = 1.0;
        data[[2, 0, 0]] = 2.0;
        let dates = grid.time().dates().to_vec();
        let shuffled = crate::calendar::TimeAxis::new(
            grid.time().calendar(),
            vec![dates[2], dates[0], dates[1]],
        );
        let mut grid = grid.with_time_and_data(shuffled, data).unwrap();
        assert!(grid.sort_time());
        assert!(grid.time().is_sorted());
        assert_eq!(grid.data()[[0, 0, 0]], 1.0);
        assert_eq!(grid.data()[[2, 0, 0]], 0.0);
        assert!(!grid.sort_time());
    }

    #[test]
    fn test_rename_if_matches() {
        let mut grid = rectilinear_grid("t2m", 1, &[0.0], &[0.0]);
        assert!(!grid.rename_variable_if_matches(&["2t", "temp2m"], "tas"));
        assert_eq!(grid.name(), "t2m");
        assert!(grid.rename_variable_if_matches(&["t2m", "2t"], "tas"));
        assert_eq!(grid.name(), "tas");
    }
}
