//! Reading and writing grids as netCDF files.
//!
//! Source files name their axes inconsistently ("lat" vs "latitude",
//! "time" vs "valid_time", curvilinear "nav_lat"/"nav_lon" fields), so
//! reading goes through alias lists and reports which alias matched at
//! debug level. Writing always produces the standardized form: one data
//! variable, dimensions named `time`/(`plev`)/`lat`/`lon` (or `y`/`x`
//! index dimensions with 2-D `lat`/`lon` variables for curvilinear
//! grids), the time coordinate encoded as fractional days since
//! 1850-01-01 with a CF `calendar` attribute.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use error_stack::ResultExt;
use ndarray::Ix2;
use netcdf::{AttributeValue, Extents};

use crate::calendar::{CfCalendar, CfDate, TimeAxis};
use crate::grid::{Grid, SpatialCoords};

/// Dimension/variable names accepted as the time axis, canonical first.
pub const TIME_ALIASES: &[&str] = &["time", "valid_time"];
/// Names accepted as the latitude coordinate, canonical first.
pub const LAT_ALIASES: &[&str] = &["lat", "latitude", "nav_lat"];
/// Names accepted as the longitude coordinate, canonical first.
pub const LON_ALIASES: &[&str] = &["lon", "longitude", "nav_lon"];
/// Names accepted as the pressure-level axis, canonical first.
pub const PLEV_ALIASES: &[&str] = &["plev", "lev", "level", "pressure_level"];

/// Epoch used when encoding time coordinates of output files.
fn time_epoch() -> CfDate {
    CfDate {
        year: 1850,
        month: 1,
        day: 1,
        hour: 0,
    }
}

static TIME_UNITS_REGEX: OnceLock<regex::Regex> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum GridIoError {
    #[error("Could not open {}", .0.display())]
    CouldNotOpen(PathBuf),
    #[error("Could not write {}", .0.display())]
    CouldNotWrite(PathBuf),
    #[error("File {} has no variable '{variable}'", .path.display())]
    MissingVariable { path: PathBuf, variable: String },
    #[error("File {} has no coordinate values for the '{name}' axis", .path.display())]
    MissingCoordinate { path: PathBuf, name: String },
    #[error("Variable '{variable}' in {} has {ndim} dimensions, expected 3 (time, lat, lon) or 4 (time, level, lat, lon)", .path.display())]
    UnexpectedDims {
        path: PathBuf,
        variable: String,
        ndim: usize,
    },
    #[error("Could not interpret time units '{units}' in {}", .path.display())]
    BadTimeUnits { path: PathBuf, units: String },
    #[error("File {} is inconsistent: {reason}", .path.display())]
    Inconsistent { path: PathBuf, reason: String },
}

impl GridIoError {
    pub fn inconsistent<S: ToString>(path: &Path, reason: S) -> Self {
        Self::Inconsistent {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Read one data variable and its coordinate axes from a netCDF file.
///
/// Fill values are replaced with NaN so downstream defect handling can
/// treat "undefined" uniformly. Axis names are matched against the
/// alias lists; the grid itself carries no axis names, so the output
/// naming is standardized no matter what the source called them.
pub fn read_grid(path: &Path, variable: &str) -> error_stack::Result<Grid, GridIoError> {
    let file =
        netcdf::open(path).change_context_lazy(|| GridIoError::CouldNotOpen(path.to_path_buf()))?;

    let var = file
        .variable(variable)
        .ok_or_else(|| GridIoError::MissingVariable {
            path: path.to_path_buf(),
            variable: variable.to_owned(),
        })?;

    let dims: Vec<(String, usize)> = var
        .dimensions()
        .iter()
        .map(|d| (d.name(), d.len()))
        .collect();
    if dims.len() != 3 && dims.len() != 4 {
        return Err(GridIoError::UnexpectedDims {
            path: path.to_path_buf(),
            variable: variable.to_owned(),
            ndim: dims.len(),
        }
        .into());
    }

    let time_name = &dims[0].0;
    if !TIME_ALIASES.contains(&time_name.as_str()) {
        return Err(GridIoError::inconsistent(
            path,
            format!("first dimension '{time_name}' is not a recognized time axis"),
        )
        .into());
    }
    if time_name != TIME_ALIASES[0] {
        log::debug!("{}: using '{time_name}' as the time axis", path.display());
    }
    let time = read_time_axis(&file, path, time_name)?;

    let plev = if dims.len() == 4 {
        let lev_name = &dims[1].0;
        if !PLEV_ALIASES.contains(&lev_name.as_str()) {
            return Err(GridIoError::inconsistent(
                path,
                format!("second dimension '{lev_name}' is not a recognized level axis"),
            )
            .into());
        }
        Some(read_coord_values(&file, path, lev_name)?)
    } else {
        None
    };

    let y_name = &dims[dims.len() - 2].0;
    let x_name = &dims[dims.len() - 1].0;
    let coords = read_spatial_coords(&file, path, y_name, x_name)?;

    let mut data = var
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| GridIoError::CouldNotOpen(path.to_path_buf()))?;
    if let Some(fill) = attr_f64(var.attribute("_FillValue"))
        .or_else(|| attr_f64(var.attribute("missing_value")))
    {
        for v in data.iter_mut() {
            if *v == fill {
                *v = f64::NAN;
            }
        }
    }

    let mut grid = Grid::new(variable, data, time, plev, coords)
        .map_err(|e| GridIoError::inconsistent(path, e))?;
    if let Some(units) = attr_string(var.attribute("units")) {
        grid = grid.with_units(units);
    }
    Ok(grid)
}

fn read_time_axis(
    file: &netcdf::File,
    path: &Path,
    time_name: &str,
) -> error_stack::Result<TimeAxis, GridIoError> {
    let time_var = file
        .variable(time_name)
        .ok_or_else(|| GridIoError::MissingCoordinate {
            path: path.to_path_buf(),
            name: time_name.to_owned(),
        })?;
    let units = attr_string(time_var.attribute("units")).ok_or_else(|| {
        GridIoError::BadTimeUnits {
            path: path.to_path_buf(),
            units: "(missing units attribute)".to_owned(),
        }
    })?;
    let re = TIME_UNITS_REGEX.get_or_init(|| {
        regex::Regex::new(
            r"^(?<unit>seconds|hours|days)\s+since\s+(?<y>\d{1,4})-(?<m>\d{1,2})-(?<d>\d{1,2})",
        )
        .expect("Could not compile time units regex")
    });
    let caps = re
        .captures(units.trim())
        .ok_or_else(|| GridIoError::BadTimeUnits {
            path: path.to_path_buf(),
            units: units.clone(),
        })?;
    let to_days = match &caps["unit"] {
        "seconds" => 1.0 / 86_400.0,
        "hours" => 1.0 / 24.0,
        _ => 1.0,
    };
    let epoch = CfDate::new(
        caps["y"].parse().expect("regex guarantees digits"),
        caps["m"].parse().expect("regex guarantees digits"),
        caps["d"].parse().expect("regex guarantees digits"),
    )
    .map_err(|_| GridIoError::BadTimeUnits {
        path: path.to_path_buf(),
        units: units.clone(),
    })?;

    let calendar = match attr_string(time_var.attribute("calendar")) {
        Some(name) => name.parse::<CfCalendar>().unwrap_or_else(|_| {
            log::warn!(
                "{}: unrecognized calendar '{name}', assuming standard",
                path.display()
            );
            CfCalendar::Standard
        }),
        None => CfCalendar::Standard,
    };

    let raw = time_var
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| GridIoError::CouldNotOpen(path.to_path_buf()))?;
    let days: Vec<f64> = raw.iter().map(|&v| v * to_days).collect();
    TimeAxis::decode_days_since(calendar, epoch, &days)
        .map_err(|e| GridIoError::inconsistent(path, e).into())
}

fn read_coord_values(
    file: &netcdf::File,
    path: &Path,
    name: &str,
) -> error_stack::Result<Vec<f64>, GridIoError> {
    let var = file
        .variable(name)
        .ok_or_else(|| GridIoError::MissingCoordinate {
            path: path.to_path_buf(),
            name: name.to_owned(),
        })?;
    let values = var
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| GridIoError::CouldNotOpen(path.to_path_buf()))?;
    Ok(values.into_raw_vec())
}

/// Find the spatial coordinates for the trailing (y, x) dimensions:
/// 1-D coordinate variables named for the dimensions themselves
/// (rectilinear), or 2-D lat/lon fields over both (curvilinear).
fn read_spatial_coords(
    file: &netcdf::File,
    path: &Path,
    y_name: &str,
    x_name: &str,
) -> error_stack::Result<SpatialCoords, GridIoError> {
    let rect_lat = LAT_ALIASES.contains(&y_name) && file.variable(y_name).is_some();
    let rect_lon = LON_ALIASES.contains(&x_name) && file.variable(x_name).is_some();
    if rect_lat && rect_lon {
        if y_name != LAT_ALIASES[0] || x_name != LON_ALIASES[0] {
            log::debug!(
                "{}: standardizing spatial axes '{y_name}'/'{x_name}' to 'lat'/'lon'",
                path.display()
            );
        }
        let lat = read_coord_values(file, path, y_name)?;
        let lon = read_coord_values(file, path, x_name)?;
        return Ok(SpatialCoords::Rectilinear { lat, lon });
    }

    // Curvilinear fallback: 2-D lat/lon fields over (y, x)
    let lat_var = LAT_ALIASES
        .iter()
        .find_map(|name| file.variable(name).filter(|v| v.dimensions().len() == 2));
    let lon_var = LON_ALIASES
        .iter()
        .find_map(|name| file.variable(name).filter(|v| v.dimensions().len() == 2));
    match (lat_var, lon_var) {
        (Some(lat_var), Some(lon_var)) => {
            let lat = lat_var
                .get::<f64, _>(Extents::All)
                .change_context_lazy(|| GridIoError::CouldNotOpen(path.to_path_buf()))?
                .into_dimensionality::<Ix2>()
                .map_err(|e| GridIoError::inconsistent(path, e))?;
            let lon = lon_var
                .get::<f64, _>(Extents::All)
                .change_context_lazy(|| GridIoError::CouldNotOpen(path.to_path_buf()))?
                .into_dimensionality::<Ix2>()
                .map_err(|e| GridIoError::inconsistent(path, e))?;
            log::debug!(
                "{}: grid is curvilinear over ('{y_name}', '{x_name}')",
                path.display()
            );
            Ok(SpatialCoords::Curvilinear { lat, lon })
        }
        _ => Err(GridIoError::MissingCoordinate {
            path: path.to_path_buf(),
            name: format!("{y_name}/{x_name}"),
        }
        .into()),
    }
}

/// Write a grid as a standardized single-variable netCDF file.
pub fn write_grid(grid: &Grid, path: &Path) -> error_stack::Result<(), GridIoError> {
    let mut file = netcdf::create(path)
        .change_context_lazy(|| GridIoError::CouldNotWrite(path.to_path_buf()))?;
    let err = || GridIoError::CouldNotWrite(path.to_path_buf());

    file.add_dimension("time", grid.time().len())
        .change_context_lazy(err)?;
    let epoch = time_epoch();
    let time_values = grid
        .time()
        .encode_days_since(epoch)
        .map_err(|e| GridIoError::inconsistent(path, e))?;
    let mut time_var = file
        .add_variable::<f64>("time", &["time"])
        .change_context_lazy(err)?;
    time_var
        .put_values(&time_values, Extents::All)
        .change_context_lazy(err)?;
    time_var
        .put_attribute("units", "days since 1850-01-01 00:00:00")
        .change_context_lazy(err)?;
    time_var
        .put_attribute("calendar", grid.time().calendar().to_string().as_str())
        .change_context_lazy(err)?;
    time_var
        .put_attribute("standard_name", "time")
        .change_context_lazy(err)?;

    if let Some(plev) = grid.plev() {
        file.add_dimension("plev", plev.len())
            .change_context_lazy(err)?;
        let mut plev_var = file
            .add_variable::<f64>("plev", &["plev"])
            .change_context_lazy(err)?;
        plev_var
            .put_values(plev, Extents::All)
            .change_context_lazy(err)?;
        plev_var
            .put_attribute("units", "Pa")
            .change_context_lazy(err)?;
        plev_var
            .put_attribute("standard_name", "air_pressure")
            .change_context_lazy(err)?;
    }

    let spatial_dims: Vec<&str> = match grid.coords() {
        SpatialCoords::Rectilinear { lat, lon } => {
            file.add_dimension("lat", lat.len()).change_context_lazy(err)?;
            file.add_dimension("lon", lon.len()).change_context_lazy(err)?;
            let mut lat_var = file
                .add_variable::<f64>("lat", &["lat"])
                .change_context_lazy(err)?;
            lat_var.put_values(lat, Extents::All).change_context_lazy(err)?;
            lat_var
                .put_attribute("units", "degrees_north")
                .change_context_lazy(err)?;
            lat_var
                .put_attribute("standard_name", "latitude")
                .change_context_lazy(err)?;
            let mut lon_var = file
                .add_variable::<f64>("lon", &["lon"])
                .change_context_lazy(err)?;
            lon_var.put_values(lon, Extents::All).change_context_lazy(err)?;
            lon_var
                .put_attribute("units", "degrees_east")
                .change_context_lazy(err)?;
            lon_var
                .put_attribute("standard_name", "longitude")
                .change_context_lazy(err)?;
            vec!["lat", "lon"]
        }
        SpatialCoords::Curvilinear { lat, lon } => {
            let (ny, nx) = lat.dim();
            file.add_dimension("y", ny).change_context_lazy(err)?;
            file.add_dimension("x", nx).change_context_lazy(err)?;
            let mut lat_var = file
                .add_variable::<f64>("lat", &["y", "x"])
                .change_context_lazy(err)?;
            lat_var
                .put(lat.view(), Extents::All)
                .change_context_lazy(err)?;
            lat_var
                .put_attribute("units", "degrees_north")
                .change_context_lazy(err)?;
            let mut lon_var = file
                .add_variable::<f64>("lon", &["y", "x"])
                .change_context_lazy(err)?;
            lon_var
                .put(lon.view(), Extents::All)
                .change_context_lazy(err)?;
            lon_var
                .put_attribute("units", "degrees_east")
                .change_context_lazy(err)?;
            vec!["y", "x"]
        }
    };

    let mut dims: Vec<&str> = vec!["time"];
    if grid.plev().is_some() {
        dims.push("plev");
    }
    dims.extend(spatial_dims);

    let mut data_var = file
        .add_variable::<f64>(grid.name(), &dims)
        .change_context_lazy(err)?;
    data_var
        .put(grid.data().view(), Extents::All)
        .change_context_lazy(err)?;
    if let Some(units) = grid.units() {
        data_var
            .put_attribute("units", units)
            .change_context_lazy(err)?;
    }

    Ok(())
}

fn attr_string(attr: Option<netcdf::Attribute>) -> Option<String> {
    match attr?.value().ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn attr_f64(attr: Option<netcdf::Attribute>) -> Option<f64> {
    match attr?.value().ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Longlong(v) => Some(v as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{day360_axis, grid_with_axis, rectilinear_grid};

    #[test]
    fn test_round_trip_rectilinear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tas.nc");
        let grid = rectilinear_grid("tas", 3, &[-30.0, 0.0, 30.0], &[0.0, 90.0, 180.0, 270.0])
            .with_units("K");
        write_grid(&grid, &path).unwrap();
        let back = read_grid(&path, "tas").unwrap();
        assert_eq!(back, grid);
        assert_eq!(back.units(), Some("K"));
    }

    #[test]
    fn test_round_trip_preserves_360_day_calendar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pr.nc");
        let grid = grid_with_axis("pr", day360_axis(2000..=2000), &[0.0], &[0.0]);
        write_grid(&grid, &path).unwrap();
        let back = read_grid(&path, "pr").unwrap();
        assert_eq!(back.time().calendar(), CfCalendar::Day360);
        assert_eq!(back.time().dates(), grid.time().dates());
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tas.nc");
        write_grid(&rectilinear_grid("tas", 1, &[0.0], &[0.0]), &path).unwrap();
        let err = read_grid(&path, "pr").unwrap_err();
        assert!(matches!(
            err.current_context(),
            GridIoError::MissingVariable { .. }
        ));
    }

    #[test]
    fn test_fill_values_become_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fill.nc");
        {
            let mut file = netcdf::create(&path).unwrap();
            file.add_dimension("time", 1).unwrap();
            file.add_dimension("lat", 1).unwrap();
            file.add_dimension("lon", 2).unwrap();
            let mut t = file.add_variable::<f64>("time", &["time"]).unwrap();
            t.put_values(&[0.0], Extents::All).unwrap();
            t.put_attribute("units", "days since 2000-01-01").unwrap();
            let mut lat = file.add_variable::<f64>("lat", &["lat"]).unwrap();
            lat.put_values(&[0.0], Extents::All).unwrap();
            let mut lon = file.add_variable::<f64>("lon", &["lon"]).unwrap();
            lon.put_values(&[0.0, 10.0], Extents::All).unwrap();
            let mut v = file
                .add_variable::<f64>("tas", &["time", "lat", "lon"])
                .unwrap();
            v.put_values(&[1.0, -9999.0], Extents::All).unwrap();
            v.put_attribute("_FillValue", -9999.0f64).unwrap();
        }
        let grid = read_grid(&path, "tas").unwrap();
        assert_eq!(grid.data()[[0, 0, 0]], 1.0);
        assert!(grid.data()[[0, 0, 1]].is_nan());
    }

    #[test]
    fn test_aliased_axis_names_are_standardized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliased.nc");
        {
            let mut file = netcdf::create(&path).unwrap();
            file.add_dimension("valid_time", 2).unwrap();
            file.add_dimension("latitude", 2).unwrap();
            file.add_dimension("longitude", 3).unwrap();
            let mut t = file
                .add_variable::<f64>("valid_time", &["valid_time"])
                .unwrap();
            t.put_values(&[0.0, 24.0], Extents::All).unwrap();
            t.put_attribute("units", "hours since 1979-01-01").unwrap();
            let mut lat = file.add_variable::<f64>("latitude", &["latitude"]).unwrap();
            lat.put_values(&[50.0, 60.0], Extents::All).unwrap();
            let mut lon = file
                .add_variable::<f64>("longitude", &["longitude"])
                .unwrap();
            lon.put_values(&[0.0, 1.0, 2.0], Extents::All).unwrap();
            let mut v = file
                .add_variable::<f64>("t2m", &["valid_time", "latitude", "longitude"])
                .unwrap();
            v.put_values(&[0.0; 12], Extents::All).unwrap();
        }
        let grid = read_grid(&path, "t2m").unwrap();
        assert_eq!(grid.lat().unwrap(), &[50.0, 60.0]);
        assert_eq!(grid.lon().unwrap(), &[0.0, 1.0, 2.0]);
        assert_eq!(grid.time().len(), 2);
        assert_eq!(grid.time().dates()[0].date_key(), (1979, 1, 1));
        assert_eq!(grid.time().dates()[1].date_key(), (1979, 1, 2));
        // Writing back standardizes the axis names
        let out = dir.path().join("standardized.nc");
        write_grid(&grid, &out).unwrap();
        let file = netcdf::open(&out).unwrap();
        assert!(file.dimension("lat").is_some());
        assert!(file.dimension("lon").is_some());
        assert!(file.dimension("time").is_some());
    }
}
