//! Per-cell owned state. [`CellStatic`] (in [`crate::grid`]) never changes across a run;
//! [`CellState`] is mutated by exactly one component per time step, serialised by the
//! [`SimulationLoop`](crate::simulation::SimulationLoop).

/// Energy-balance snowpack state. The same shape is reused for the canopy-intercepted pack and
/// the ground pack; `albedo`/`age_hours`/`density_kg_m3` are meaningful mainly for the ground
/// pack but are tracked uniformly so [`crate::snow::SnowModel`] has one state type to update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnowState {
    /// Liquid water held in the pack, as SWE-equivalent depth (m).
    pub liquid_m: f64,
    /// Frozen water held in the pack, as SWE-equivalent depth (m).
    pub solid_m: f64,
    /// Pack temperature (deg C). Clamped to 0 whenever `liquid_m > 0`.
    pub temperature_c: f64,
    /// Albedo, in [0, 0.9].
    pub albedo: f64,
    /// Hours elapsed since the last snowfall onto this pack.
    pub age_hours: f64,
    /// Bulk density (kg/m3).
    pub density_kg_m3: f64,
}

impl SnowState {
    /// SWE of this pack in metres.
    pub fn swe_m(&self) -> f64 {
        self.liquid_m + self.solid_m
    }

    pub fn is_empty(&self) -> bool {
        self.swe_m() <= 0.0
    }
}

impl Default for SnowState {
    fn default() -> Self {
        SnowState {
            liquid_m: 0.0,
            solid_m: 0.0,
            temperature_c: 0.0,
            albedo: 0.0,
            age_hours: 0.0,
            density_kg_m3: 100.0,
        }
    }
}

/// The mutable per-step state owned by a single cell.
#[derive(Debug, Clone, Copy)]
pub struct CellState {
    /// Overstory canopy interception (m)
    pub interception_overstory_m: f64,
    /// Understory canopy interception (m)
    pub interception_understory_m: f64,
    /// Upper soil layer moisture fraction (m3/m3)
    pub sm_upper: f64,
    /// Lower soil layer moisture fraction (m3/m3)
    pub sm_lower: f64,
    /// Water table depth z, positive downward, 0 at the ground surface, <= soil thickness (m)
    pub water_table_depth_m: f64,
    pub canopy_snow: SnowState,
    pub ground_snow: SnowState,
}

impl CellState {
    /// Spin-up defaults: zero interception and snow, the given water-table depth, and soil
    /// moisture initialised to field capacity.
    pub fn spin_up(water_table_depth_m: f64, field_capacity_upper: f64, field_capacity_lower: f64) -> Self {
        CellState {
            interception_overstory_m: 0.0,
            interception_understory_m: 0.0,
            sm_upper: field_capacity_upper,
            sm_lower: field_capacity_lower,
            water_table_depth_m,
            canopy_snow: SnowState::default(),
            ground_snow: SnowState::default(),
        }
    }

    /// Total column storage (m of water), used by the mass-conservation check: interception,
    /// soil moisture over each layer's thickness, snow, and saturated storage below the water
    /// table.
    pub fn total_storage_m(&self, thickness_upper_m: f64, thickness_lower_m: f64, porosity: f64) -> f64 {
        self.interception_overstory_m
            + self.interception_understory_m
            + self.sm_upper * thickness_upper_m
            + self.sm_lower * thickness_lower_m
            + self.canopy_snow.swe_m()
            + self.ground_snow.swe_m()
            + self.water_table_depth_m * porosity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spin_up_zeros_interception_and_snow() {
        let state = CellState::spin_up(0.5, 0.3, 0.25);
        assert_eq!(state.interception_overstory_m, 0.0);
        assert_eq!(state.interception_understory_m, 0.0);
        assert!(state.canopy_snow.is_empty());
        assert!(state.ground_snow.is_empty());
        assert_eq!(state.sm_upper, 0.3);
        assert_eq!(state.sm_lower, 0.25);
        assert_eq!(state.water_table_depth_m, 0.5);
    }

    #[test]
    fn swe_is_liquid_plus_solid() {
        let snow = SnowState {
            liquid_m: 0.01,
            solid_m: 0.04,
            ..Default::default()
        };
        assert!((snow.swe_m() - 0.05).abs() < 1e-12);
    }
}
