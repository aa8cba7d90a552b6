//! Run-level values that belong to no single physical component: solar/radiation constants,
//! aerodynamic reference heights, the fixed soil-layer split, and the understory vegetation
//! defaults used in place of a second library entry. Parsed from the `key,value` configuration
//! file by the collaborator layer; this module only defines the shape the core consumes.

/// Ångström-Prescott coefficients and the PAR threshold used by [`crate::resistance`]'s f_3.
#[derive(Debug, Clone, Copy)]
pub struct RadiationConfig {
    pub angstrom_a: f64,
    pub angstrom_b: f64,
    /// R_pc, the radiation level above which stomata are fully open (kJ/m2/h).
    pub radiation_threshold_kj_m2_h: f64,
    /// Bare-ground albedo, used where `SoilLib` carries no albedo of its own.
    pub ground_albedo: f64,
}

/// Observation and canopy reference heights feeding the logarithmic wind profiles in
/// [`crate::resistance`] and [`crate::snow`].
#[derive(Debug, Clone, Copy)]
pub struct AerodynamicConfig {
    pub obs_height_m: f64,
    pub ground_displacement_m: f64,
    pub ground_roughness_m: f64,
    /// Reference height above the canopy at which the overstory aerodynamic resistance is
    /// evaluated, z_r.
    pub reference_height_above_canopy_m: f64,
}

/// Fixed understory vegetation parameterisation. `VegLib` (see [`crate::libs`]) carries a single
/// vegetation class per cell, matching the source's `Lookup_VegLib` table, which has no second
/// understory entry; rather than guess at a per-class understory from incomplete source data,
/// every cell uses this one fixed grass-like understory whenever `VegProperties::overstory_present`
/// and `canopy_fraction` leave room for one. See DESIGN.md for the full rationale.
#[derive(Debug, Clone, Copy)]
pub struct UnderstoryDefaults {
    pub present: bool,
    pub lai: f64,
    pub albedo: f64,
    pub roughness_m: f64,
    pub displacement_m: f64,
    pub min_stomatal_resistance_s_m: f64,
    pub max_stomatal_resistance_s_m: f64,
    pub interception_capacity_coefficient_m: f64,
}

impl Default for UnderstoryDefaults {
    fn default() -> Self {
        UnderstoryDefaults {
            present: true,
            lai: 2.0,
            albedo: 0.2,
            roughness_m: 0.05,
            displacement_m: 0.03,
            min_stomatal_resistance_s_m: 100.0,
            max_stomatal_resistance_s_m: 5000.0,
            interception_capacity_coefficient_m: 0.0001,
        }
    }
}

/// The fixed depth split between the upper and lower soil layers. `SoilLib` (see [`crate::libs`])
/// carries one set of hydraulic properties per texture class rather than separate topsoil/subsoil
/// entries, so both layers share `SoilProperties` and differ only in thickness: the upper layer
/// is `upper_layer_thickness_m` deep (clamped to the cell's total `soil_thickness_m`), the lower
/// layer is the remainder.
#[derive(Debug, Clone, Copy)]
pub struct SoilLayering {
    pub upper_layer_thickness_m: f64,
}

/// Every run-level value a [`crate::simulation::SimulationLoop`] needs beyond the per-cell
/// forcings, static terrain, and parameter libraries.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    pub radiation: RadiationConfig,
    pub aerodynamic: AerodynamicConfig,
    pub understory: UnderstoryDefaults,
    pub soil_layering: SoilLayering,
    /// Reservoir fraction beta splitting a cell's UH flow time into pure delay and linear
    /// reservoir components (see [`crate::uh`]). Defaults to 0.5 per the source.
    pub reservoir_fraction_beta: f64,
}

impl SimulationConfig {
    /// `thickness_upper_m` / `thickness_lower_m` for a cell of the given total soil thickness.
    pub fn layer_thicknesses_m(&self, soil_thickness_m: f64) -> (f64, f64) {
        let upper = self.soil_layering.upper_layer_thickness_m.min(soil_thickness_m);
        (upper, (soil_thickness_m - upper).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_split_clamps_upper_thickness_to_the_column_depth() {
        let config = SimulationConfig {
            radiation: RadiationConfig {
                angstrom_a: 0.25,
                angstrom_b: 0.5,
                radiation_threshold_kj_m2_h: 360.0,
                ground_albedo: 0.2,
            },
            aerodynamic: AerodynamicConfig {
                obs_height_m: 10.0,
                ground_displacement_m: 0.0,
                ground_roughness_m: 0.01,
                reference_height_above_canopy_m: 2.0,
            },
            understory: UnderstoryDefaults::default(),
            soil_layering: SoilLayering { upper_layer_thickness_m: 0.3 },
            reservoir_fraction_beta: 0.5,
        };
        assert_eq!(config.layer_thicknesses_m(2.0), (0.3, 1.7));
        assert_eq!(config.layer_thicknesses_m(0.2), (0.2, 0.0));
    }
}
