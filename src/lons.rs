//! Longitude-axis normalization.
//!
//! Source grids arrive with their longitudes in either a [-180, 180)
//! or a [0, 360) convention, with the axis starting at an arbitrary
//! meridian. Before a lon-range slice can be taken, the axis has to be
//! (1) remapped into the requested convention's numeric range and
//! (2) rotated so that the requested sub-range does not straddle the
//! wrap point. [`normalize_lons`] does both, rolling the data along
//! with the coordinate.
//!
//! The rotation offset is found by explicit search: the index whose
//! value is angularly closest at-or-after the origin becomes index 0.
//! Earlier revisions of this pipeline rotated by exactly half the axis
//! length whenever the first longitude was not already near -180, which
//! silently mis-rotates any grid that is not even-length and aligned to
//! the prime meridian; here the result is instead checked against the
//! postcondition (strictly increasing, spanning less than a full
//! circle) and a violation is an error rather than a corrupt grid.

use crate::grid::Grid;

/// The two recognized longitude conventions. The string forms ("180"
/// and "360") follow the labels used in download configuration files.
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
pub enum LonConvention {
    /// Longitudes in [-180, 180), prime meridian near the middle.
    #[strum(serialize = "180")]
    #[serde(rename = "180")]
    CenteredAt180,
    /// Longitudes in [0, 360), prime meridian first.
    #[strum(serialize = "360")]
    #[serde(rename = "360")]
    ZeroTo360,
}

impl LonConvention {
    /// The first value of this convention's canonical range.
    pub fn range_start(&self) -> f64 {
        match self {
            Self::CenteredAt180 => -180.0,
            Self::ZeroTo360 => 0.0,
        }
    }

    /// Map a longitude into this convention's canonical range.
    pub fn wrap(&self, lon: f64) -> f64 {
        let start = self.range_start();
        (lon - start).rem_euclid(360.0) + start
    }
}

/// What [`normalize_lons`] did to the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LonNormOutcome {
    /// The axis was remapped and rotated left by `rotated_by` indices
    /// (zero if the grid was already in the requested form).
    Applied { rotated_by: usize },
    /// The grid has 2-D longitude fields, which this normalizer does not
    /// handle; spatial subsetting must use the mask fallback instead.
    SkippedCurvilinear,
}

#[derive(Debug, thiserror::Error)]
pub enum LonNormError {
    #[error("Longitude axis is empty")]
    EmptyAxis,
    #[error(
        "Longitude axis is not strictly increasing after normalization: \
         value {value} at index {index} does not increase past {prev}"
    )]
    NotMonotonic { index: usize, prev: f64, value: f64 },
    #[error("Normalized longitude axis spans {span} degrees, at least a full circle")]
    SpansFullCircle { span: f64 },
}

/// Normalize a grid's longitude axis to the given convention, rotating
/// it so the value angularly closest at-or-after `origin` comes first.
///
/// With the default origin (`None`, meaning the convention's range
/// start) the result spans exactly the canonical range. A custom origin
/// shifts the covered window to [origin, origin + 360); values past the
/// wrap are unwrapped by +360 so the axis stays strictly increasing and
/// any in-window slice `[a, b]` with `a < b` is contiguous.
///
/// The grid is only modified when the whole operation succeeds.
pub fn normalize_lons(
    grid: &mut Grid,
    convention: LonConvention,
    origin: Option<f64>,
) -> Result<LonNormOutcome, LonNormError> {
    let lon = match grid.lon() {
        Some(lon) => lon,
        None => {
            log::warn!(
                "Grid '{}' has curvilinear coordinates, longitude normalization does not apply",
                grid.name()
            );
            return Ok(LonNormOutcome::SkippedCurvilinear);
        }
    };
    if lon.is_empty() {
        return Err(LonNormError::EmptyAxis);
    }

    let origin = origin.unwrap_or_else(|| convention.range_start());
    let wrapped: Vec<f64> = lon.iter().map(|&l| convention.wrap(l)).collect();

    // The rotation offset: the index angularly closest at-or-after the origin.
    let offset = wrapped
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (**a - origin).rem_euclid(360.0);
            let db = (**b - origin).rem_euclid(360.0);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .expect("axis checked non-empty");

    // Validate the rotated sequence before touching the grid.
    let mut values = Vec::with_capacity(wrapped.len());
    let mut prev = f64::NEG_INFINITY;
    for (i, &w) in wrapped[offset..].iter().chain(&wrapped[..offset]).enumerate() {
        let mut v = w;
        if i > 0 && v < prev {
            v += 360.0;
        }
        if i > 0 && v <= prev {
            return Err(LonNormError::NotMonotonic {
                index: i,
                prev,
                value: w,
            });
        }
        values.push(v);
        prev = v;
    }
    let span = values[values.len() - 1] - values[0];
    if span >= 360.0 {
        return Err(LonNormError::SpansFullCircle { span });
    }

    grid.roll_lon(offset);
    grid.set_lon_values(values);
    Ok(LonNormOutcome::Applied { rotated_by: offset })
}
