//! The per-step meteorological inputs a cell is driven by. Station-to-grid interpolation and
//! raster stack I/O are out of scope here; this module only defines the shape the core consumes.

/// Meteorological forcing for a single cell at a single time step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellForcing {
    /// Precipitation (m, over the step)
    pub precipitation_m: f64,
    /// Minimum air temperature (deg C)
    pub temp_min_c: f64,
    /// Average air temperature (deg C)
    pub temp_avg_c: f64,
    /// Maximum air temperature (deg C)
    pub temp_max_c: f64,
    /// Wind speed (m/s)
    pub wind_speed_m_s: f64,
    /// Relative humidity (%)
    pub relative_humidity_pct: f64,
    /// Atmospheric pressure (kPa)
    pub pressure_kpa: f64,
    /// Sunshine duration over the step (h)
    pub sunshine_h: f64,
}

impl CellForcing {
    /// Whether any field holds a NaN, the trigger for [`crate::error::DomainError::NanForcing`].
    pub fn first_nan_field(&self) -> Option<&'static str> {
        if self.precipitation_m.is_nan() {
            return Some("precipitation");
        }
        if self.temp_min_c.is_nan() {
            return Some("temp_min");
        }
        if self.temp_avg_c.is_nan() {
            return Some("temp_avg");
        }
        if self.temp_max_c.is_nan() {
            return Some("temp_max");
        }
        if self.wind_speed_m_s.is_nan() {
            return Some("wind_speed");
        }
        if self.relative_humidity_pct.is_nan() {
            return Some("relative_humidity");
        }
        if self.pressure_kpa.is_nan() {
            return Some("pressure");
        }
        if self.sunshine_h.is_nan() {
            return Some("sunshine");
        }
        None
    }

    /// Actual vapour pressure e_a (kPa) from saturated vapour pressure at `temp_avg_c` and RH.
    pub fn actual_vapour_pressure_kpa(&self) -> f64 {
        saturated_vapour_pressure_kpa(self.temp_avg_c) * self.relative_humidity_pct / 100.0
    }
}

/// Saturated vapour pressure e_0(T) = 0.6108 exp(17.277 T / (T + 237.3)), kPa.
///
/// Note: the coefficient in the denominator is 237.3 here (the FAO-56 e_0 form used throughout
/// this crate's ET and resistance computations), distinct from the 273.3 constant used in the
/// longwave-emissivity saturated-vapour-pressure approximation in [`crate::radiation`].
pub fn saturated_vapour_pressure_kpa(temp_c: f64) -> f64 {
    0.6108 * (17.277 * temp_c / (temp_c + 237.3)).exp()
}

/// One full grid's worth of forcing at a single time step, row-major, same geometry as the
/// static terrain rasters.
#[derive(Debug, Clone)]
pub struct ForcingFrame {
    nrows: usize,
    ncols: usize,
    cells: Vec<Option<CellForcing>>,
}

impl ForcingFrame {
    pub fn new(nrows: usize, ncols: usize, cells: Vec<Option<CellForcing>>) -> Self {
        assert_eq!(cells.len(), nrows * ncols);
        ForcingFrame { nrows, ncols, cells }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&CellForcing> {
        self.cells.get(row * self.ncols + col).and_then(|c| c.as_ref())
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }
}
