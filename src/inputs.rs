//! The immutable, per-cell-per-step bundle every physical component is driven from. Replaces
//! the source's practice of threading forcings, static terrain attributes, and parameter-library
//! lookups through function signatures as 30+ loose scalar arguments.

use chrono::{Datelike, NaiveDate};

use crate::cell::CellState;
use crate::config::SimulationConfig;
use crate::forcing::CellForcing;
use crate::grid::CellStatic;
use crate::libs::{SoilProperties, VegProperties};

/// Everything [`crate::simulation::SimulationLoop`] resolves once per cell per step before
/// handing off to the Radiation/Resistance/Snow/ET/Unsaturated cascade. Borrowed, not owned:
/// the loop holds the grids and libraries this points into.
#[derive(Clone, Copy)]
pub struct StepInputs<'a> {
    pub row: usize,
    pub col: usize,
    pub step: usize,
    pub date: NaiveDate,
    pub step_hours: f64,
    pub static_cell: &'a CellStatic,
    pub forcing: &'a CellForcing,
    pub soil: &'a SoilProperties,
    pub veg: &'a VegProperties,
    pub config: &'a SimulationConfig,
    pub state: &'a CellState,
    /// This cell's subsurface inflow aggregated by [`crate::saturated::SaturatedSoilModel`]'s
    /// pass 2 at the start of the step (m3/h).
    pub subsurface_inflow_m3_h: f64,
}

impl<'a> StepInputs<'a> {
    /// 0-indexed calendar month, the index [`VegProperties`]'s monthly tables are keyed by.
    pub fn month0(&self) -> usize {
        self.date.month0() as usize
    }

    pub fn lai_overstory(&self) -> f64 {
        self.veg.lai(self.month0())
    }

    pub fn albedo_overstory(&self) -> f64 {
        self.veg.albedo(self.month0())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AerodynamicConfig, RadiationConfig, SimulationConfig, SoilLayering, UnderstoryDefaults};
    use crate::grid::Direction8;
    use crate::libs::MonthlyVegetation;

    fn static_cell() -> CellStatic {
        CellStatic {
            elevation_m: 100.0,
            flow_direction: Direction8::E,
            flow_accumulation: 1,
            is_stream: false,
            is_outlet: false,
            vegetation_class: 1,
            canopy_fraction: 0.5,
            soil_class: 1,
            latitude_deg: 45.0,
        }
    }

    fn forcing() -> CellForcing {
        CellForcing {
            precipitation_m: 0.0,
            temp_min_c: 10.0,
            temp_avg_c: 15.0,
            temp_max_c: 20.0,
            wind_speed_m_s: 2.0,
            relative_humidity_pct: 70.0,
            pressure_kpa: 101.0,
            sunshine_h: 8.0,
        }
    }

    fn soil() -> SoilProperties {
        SoilProperties {
            wilting_point: 0.1,
            field_capacity: 0.3,
            saturation: 0.45,
            residual: 0.05,
            k_sat: 0.01,
            porosity: 0.45,
            pore_size_index: 4.0,
            bubbling_pressure: 0.2,
            air_entry_head: 0.1,
            soil_thickness_m: 2.0,
        }
    }

    fn veg() -> VegProperties {
        let mut monthly = [MonthlyVegetation::default(); 12];
        monthly[2] = MonthlyVegetation { lai: 3.5, albedo: 0.15, roughness_m: 1.0, displacement_m: 6.0 };
        VegProperties {
            overstory_present: true,
            min_stomatal_resistance_s_m: 100.0,
            max_stomatal_resistance_s_m: 5000.0,
            monthly,
            canopy_top_m: 18.0,
            canopy_bottom_m: 8.0,
            extinction_coefficient: 0.5,
            rarc_undocumented_unit: 0.0,
        }
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
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
        }
    }

    #[test]
    fn month0_selects_the_matching_monthly_vegetation_entry() {
        let static_cell = static_cell();
        let forcing = forcing();
        let soil = soil();
        let veg = veg();
        let config = config();
        let state = CellState::spin_up(0.5, 0.3, 0.25);

        let inputs = StepInputs {
            row: 0,
            col: 0,
            step: 0,
            date: NaiveDate::from_ymd_opt(2020, 3, 15).unwrap(),
            step_hours: 24.0,
            static_cell: &static_cell,
            forcing: &forcing,
            soil: &soil,
            veg: &veg,
            config: &config,
            state: &state,
            subsurface_inflow_m3_h: 0.0,
        };

        assert_eq!(inputs.month0(), 2);
        assert_eq!(inputs.lai_overstory(), 3.5);
        assert_eq!(inputs.albedo_overstory(), 0.15);
    }
}
