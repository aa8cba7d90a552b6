//! Immutable, process-wide parameter libraries (`SoilLib`, `VegLib`). These are constructed
//! once at startup by the collaborator layer (tab-delimited text file parsing is out of scope
//! here) and passed by reference into every component — there is no hidden global state.

use crate::error::{DomainError, ErrorLocation};
use std::collections::HashMap;

/// Soil-texture-class properties used by the unsaturated and saturated zone models.
#[derive(Debug, Clone, Copy)]
pub struct SoilProperties {
    /// Wilting point (m3/m3)
    pub wilting_point: f64,
    /// Field capacity (m3/m3)
    pub field_capacity: f64,
    /// Saturation water content, i.e. porosity expressed volumetrically (m3/m3)
    pub saturation: f64,
    /// Residual water content (m3/m3)
    pub residual: f64,
    /// Saturated hydraulic conductivity K_s (m/h)
    pub k_sat: f64,
    /// Porosity (m3/m3), equal to `saturation` in this library but kept distinct for clarity
    /// at call sites that mean "pore space" rather than "moisture at saturation".
    pub porosity: f64,
    /// Brooks-Corey pore-size distribution index b (-)
    pub pore_size_index: f64,
    /// Bubbling pressure (m)
    pub bubbling_pressure: f64,
    /// Air-entry head h_ae (m)
    pub air_entry_head: f64,
    /// Total soil column depth to the impermeable boundary, D_soil (m)
    pub soil_thickness_m: f64,
}

/// A lookup table from soil class id to [`SoilProperties`].
#[derive(Debug, Clone, Default)]
pub struct SoilLib {
    classes: HashMap<i32, SoilProperties>,
}

impl SoilLib {
    pub fn new(classes: HashMap<i32, SoilProperties>) -> Self {
        SoilLib { classes }
    }

    pub fn lookup(&self, soil_class: i32, location: ErrorLocation) -> Result<&SoilProperties, DomainError> {
        self.classes
            .get(&soil_class)
            .ok_or(DomainError::UnknownSoilClass(soil_class, location))
    }

    pub fn insert(&mut self, soil_class: i32, properties: SoilProperties) {
        self.classes.insert(soil_class, properties);
    }
}

/// Monthly-varying vegetation properties (one entry per calendar month, 0-indexed).
#[derive(Debug, Clone, Copy, Default)]
pub struct MonthlyVegetation {
    pub lai: f64,
    pub albedo: f64,
    pub roughness_m: f64,
    pub displacement_m: f64,
}

/// Vegetation-class properties used by the radiation, resistance, ET and snow models.
#[derive(Debug, Clone)]
pub struct VegProperties {
    pub overstory_present: bool,
    pub min_stomatal_resistance_s_m: f64,
    pub max_stomatal_resistance_s_m: f64,
    pub monthly: [MonthlyVegetation; 12],
    pub canopy_top_m: f64,
    pub canopy_bottom_m: f64,
    /// Extinction coefficient applied to radiation/wind attenuation through the canopy.
    pub extinction_coefficient: f64,
    /// Architectural resistance read from the library but, per the source, never consumed by
    /// any visible computation; kept only so the field round-trips through ingestion.
    pub rarc_undocumented_unit: f64,
}

impl VegProperties {
    pub fn lai(&self, month0: usize) -> f64 {
        self.monthly[month0].lai
    }

    pub fn albedo(&self, month0: usize) -> f64 {
        self.monthly[month0].albedo
    }

    pub fn canopy_height_m(&self) -> f64 {
        self.canopy_top_m
    }

    pub fn displacement_m(&self, month0: usize) -> f64 {
        self.monthly[month0].displacement_m
    }

    pub fn roughness_m(&self, month0: usize) -> f64 {
        self.monthly[month0].roughness_m
    }
}

/// A lookup table from vegetation class id to [`VegProperties`].
#[derive(Debug, Clone, Default)]
pub struct VegLib {
    classes: HashMap<i32, VegProperties>,
}

impl VegLib {
    pub fn new(classes: HashMap<i32, VegProperties>) -> Self {
        VegLib { classes }
    }

    pub fn lookup(&self, veg_class: i32, location: ErrorLocation) -> Result<&VegProperties, DomainError> {
        self.classes
            .get(&veg_class)
            .ok_or(DomainError::UnknownVegetationClass(veg_class, location))
    }

    pub fn insert(&mut self, veg_class: i32, properties: VegProperties) {
        self.classes.insert(veg_class, properties);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> ErrorLocation {
        ErrorLocation::Cell { row: 0, col: 0, step: 0 }
    }

    #[test]
    fn unknown_soil_class_is_a_domain_error() {
        let lib = SoilLib::default();
        assert!(lib.lookup(7, loc()).is_err());
    }

    #[test]
    fn known_soil_class_resolves() {
        let mut lib = SoilLib::default();
        lib.insert(
            1,
            SoilProperties {
                wilting_point: 0.1,
                field_capacity: 0.3,
                saturation: 0.45,
                residual: 0.05,
                k_sat: 0.01,
                porosity: 0.45,
                pore_size_index: 0.3,
                bubbling_pressure: 0.2,
                air_entry_head: 0.1,
                soil_thickness_m: 2.0,
            },
        );
        assert_eq!(lib.lookup(1, loc()).unwrap().field_capacity, 0.3);
    }
}
