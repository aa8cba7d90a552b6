//! Two-layer canopy evapotranspiration: Penman potential evaporation, Monteith transpiration,
//! Dickinson wet-canopy partitioning, and Entekhabi-Eagleson bare-soil sorptivity.

use crate::snow::{air_density_kg_m3, latent_heat_vaporization_kj_kg};

const SPECIFIC_HEAT_AIR_KJ_KG_K: f64 = 1.005;
const WATER_DENSITY_KG_M3: f64 = 1000.0;

/// Saturation vapour pressure using the FAO-56 e_0 form (237.3 denominator constant), shared with
/// the rest of the crate's humidity handling.
fn e0_fao237(temp_c: f64) -> f64 {
    crate::forcing::saturated_vapour_pressure_kpa(temp_c)
}

/// Saturation vapour pressure using the 273.3 variant specific to this model's own E_p term.
/// Kept distinct from [`e0_fao237`] deliberately: the two constants appear in different places
/// and are not reconciled here.
fn e0_et_variant(temp_c: f64) -> f64 {
    0.6108 * (17.277 * temp_c / (temp_c + 273.3)).exp()
}

fn delta_gamma(temp_avg_c: f64, temp_min_c: f64, temp_max_c: f64, pressure_kpa: f64) -> (f64, f64) {
    let delta = 4098.0 * e0_fao237(temp_avg_c) / ((temp_min_c + temp_max_c) / 2.0 + 237.3).powi(2);
    let gamma = 0.665e-3 * pressure_kpa;
    (delta, gamma)
}

#[derive(Debug, Clone, Copy)]
pub struct PenmanInputs {
    pub temp_min_c: f64,
    pub temp_avg_c: f64,
    pub temp_max_c: f64,
    pub pressure_kpa: f64,
    pub actual_vapour_pressure_kpa: f64,
    pub net_radiation_kj_m2_h: f64,
    pub aerodynamic_resistance_h_m: f64,
}

/// Potential evaporation from a wet surface at the given aerodynamic level (m/h).
pub fn potential_evaporation_m_h(inputs: &PenmanInputs) -> f64 {
    let (delta, gamma) = delta_gamma(inputs.temp_avg_c, inputs.temp_min_c, inputs.temp_max_c, inputs.pressure_kpa);
    let e_s = e0_et_variant(inputs.temp_avg_c);
    let rho_a = air_density_kg_m3(inputs.pressure_kpa, inputs.temp_avg_c);
    let numerator = delta * inputs.net_radiation_kj_m2_h
        + rho_a * SPECIFIC_HEAT_AIR_KJ_KG_K * (e_s - inputs.actual_vapour_pressure_kpa) / inputs.aerodynamic_resistance_h_m;
    let lambda_v = latent_heat_vaporization_kj_kg(inputs.temp_avg_c);
    numerator / (lambda_v * (delta + gamma)) / WATER_DENSITY_KG_M3
}

/// Transpiration from a dry canopy given its stomatal resistance (m/h).
pub fn transpiration_m_h(potential_evaporation_m_h: f64, delta: f64, gamma: f64, canopy_resistance_h_m: f64, aerodynamic_resistance_h_m: f64) -> f64 {
    potential_evaporation_m_h * (delta + gamma) / (delta + gamma * (1.0 + canopy_resistance_h_m / aerodynamic_resistance_h_m))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoryBalanceOutputs {
    pub interception_evaporation_m: f64,
    pub transpiration_m: f64,
    pub interception_new_m: f64,
    pub throughfall_m: f64,
}

/// Dickinson wet-fraction split of a single canopy layer's water balance over the step.
pub fn story_balance(e_p_m_h: f64, e_t_m_h: f64, interception_prev_m: f64, precip_in_m: f64, interception_capacity_m: f64, step_hours: f64) -> StoryBalanceOutputs {
    let wet_input_m = interception_prev_m + precip_in_m;
    let a_w = if interception_capacity_m > 0.0 {
        (wet_input_m / interception_capacity_m).powf(2.0 / 3.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let (ei, et) = if a_w > 0.0 && e_p_m_h > 0.0 {
        let t_w_hours = wet_input_m / (e_p_m_h * a_w);
        if t_w_hours <= step_hours {
            let ei = (e_p_m_h * a_w * t_w_hours).max(0.0);
            let et = (e_t_m_h * (1.0 - a_w) * t_w_hours + e_t_m_h * a_w * (step_hours - t_w_hours)).max(0.0);
            (ei, et)
        } else {
            ((e_p_m_h * step_hours).max(0.0), 0.0)
        }
    } else {
        (0.0, 0.0)
    };

    let p_excess_m = (wet_input_m - ei).max(0.0);
    let (interception_new_m, throughfall_m) = if p_excess_m <= interception_capacity_m {
        (p_excess_m, 0.0)
    } else {
        (interception_capacity_m, p_excess_m - interception_capacity_m)
    };

    StoryBalanceOutputs {
        interception_evaporation_m: ei,
        transpiration_m: et,
        interception_new_m,
        throughfall_m,
    }
}

/// Entekhabi-Eagleson sorptivity-limited bare-soil evaporation capacity (m), scaled by
/// `step_hours.sqrt()`. Resolves the source's unclear F_e/E_p dimensional pairing: F_e is a
/// depth that grows with the square root of the step length, so `F_e / step_hours` in
/// [`bare_soil_evaporation_m`] yields a declining average rate rather than a fixed one.
pub fn entekhabi_eagleson_sorptivity_m(theta: f64, porosity: f64, k_sat_m_h: f64, pore_size_index_b: f64, bubbling_pressure_head_m: f64, step_hours: f64) -> f64 {
    let base = (8.0 * porosity * k_sat_m_h * bubbling_pressure_head_m / (3.0 * (1.0 + 3.0 * pore_size_index_b) * (1.0 + 4.0 * pore_size_index_b))).sqrt();
    let theta_term = (theta / porosity).powf(1.0 / (2.0 * pore_size_index_b) + 2.0);
    base * theta_term * step_hours.sqrt()
}

/// Bare-soil evaporation when there is no understory: `min(Ep, Fe/Δt) * Δt`.
pub fn bare_soil_evaporation_m(residual_potential_m_h: f64, sorptivity_m: f64, step_hours: f64) -> f64 {
    residual_potential_m_h.max(0.0).min(sorptivity_m / step_hours) * step_hours
}

#[derive(Debug, Clone, Copy)]
pub struct LayerGeometry {
    pub present: bool,
    pub net_radiation_kj_m2_h: f64,
    pub aerodynamic_resistance_h_m: f64,
    pub canopy_resistance_h_m: f64,
    pub interception_capacity_m: f64,
    pub interception_prev_m: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct EtCascadeInputs {
    pub canopy_fraction: f64,
    pub overstory: LayerGeometry,
    pub understory: LayerGeometry,
    pub temp_min_c: f64,
    pub temp_avg_c: f64,
    pub temp_max_c: f64,
    pub pressure_kpa: f64,
    pub actual_vapour_pressure_kpa: f64,
    pub precip_m: f64,
    pub step_hours: f64,
    pub soil_moisture_upper: f64,
    pub porosity: f64,
    pub k_sat_m_h: f64,
    pub pore_size_index_b: f64,
    pub bubbling_pressure_head_m: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EtCascadeOutputs {
    pub potential_evaporation_m_h: f64,
    pub overstory: StoryBalanceOutputs,
    pub understory: StoryBalanceOutputs,
    pub soil_evaporation_m: f64,
    pub net_precip_for_soil_m: f64,
}

/// Runs the full overstory -> understory -> bare-soil cascade for one cell, one step.
pub fn run_cascade(inputs: &EtCascadeInputs) -> EtCascadeOutputs {
    let (delta, gamma) = delta_gamma(inputs.temp_avg_c, inputs.temp_min_c, inputs.temp_max_c, inputs.pressure_kpa);
    let overstory_active = inputs.overstory.present && inputs.canopy_fraction > 1e-4;

    let penman_at = |layer: &LayerGeometry| {
        potential_evaporation_m_h(&PenmanInputs {
            temp_min_c: inputs.temp_min_c,
            temp_avg_c: inputs.temp_avg_c,
            temp_max_c: inputs.temp_max_c,
            pressure_kpa: inputs.pressure_kpa,
            actual_vapour_pressure_kpa: inputs.actual_vapour_pressure_kpa,
            net_radiation_kj_m2_h: layer.net_radiation_kj_m2_h,
            aerodynamic_resistance_h_m: layer.aerodynamic_resistance_h_m,
        })
    };

    let (e_p, overstory_out, throughfall_after_overstory) = if overstory_active {
        let e_p = penman_at(&inputs.overstory);
        let e_t = transpiration_m_h(e_p, delta, gamma, inputs.overstory.canopy_resistance_h_m, inputs.overstory.aerodynamic_resistance_h_m);
        let balance = story_balance(e_p, e_t, inputs.overstory.interception_prev_m, inputs.precip_m, inputs.overstory.interception_capacity_m, inputs.step_hours);
        let throughfall = balance.throughfall_m;
        (e_p, balance, throughfall)
    } else {
        let e_p = penman_at(&inputs.understory);
        (e_p, StoryBalanceOutputs::default(), inputs.precip_m)
    };

    let e_p_u = e_p - (overstory_out.interception_evaporation_m + overstory_out.transpiration_m) / inputs.step_hours;

    let (understory_out, throughfall_after_understory) = if inputs.understory.present {
        let e_t_u = transpiration_m_h(e_p_u.max(0.0), delta, gamma, inputs.understory.canopy_resistance_h_m, inputs.understory.aerodynamic_resistance_h_m);
        let balance = story_balance(e_p_u.max(0.0), e_t_u, inputs.understory.interception_prev_m, throughfall_after_overstory, inputs.understory.interception_capacity_m, inputs.step_hours);
        let throughfall = balance.throughfall_m;
        (balance, throughfall)
    } else {
        (StoryBalanceOutputs::default(), throughfall_after_overstory)
    };

    let (soil_evaporation_m, net_precip_for_soil_m) = if !inputs.understory.present {
        let sorptivity_m = entekhabi_eagleson_sorptivity_m(
            inputs.soil_moisture_upper,
            inputs.porosity,
            inputs.k_sat_m_h,
            inputs.pore_size_index_b,
            inputs.bubbling_pressure_head_m,
            inputs.step_hours,
        );
        let e_s = bare_soil_evaporation_m(e_p_u, sorptivity_m, inputs.step_hours);
        (e_s, (throughfall_after_understory - e_s).max(0.0))
    } else {
        (0.0, throughfall_after_understory)
    };

    EtCascadeOutputs {
        potential_evaporation_m_h: e_p,
        overstory: overstory_out,
        understory: understory_out,
        soil_evaporation_m,
        net_precip_for_soil_m,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(present: bool) -> LayerGeometry {
        LayerGeometry {
            present,
            net_radiation_kj_m2_h: 800.0,
            aerodynamic_resistance_h_m: 0.01,
            canopy_resistance_h_m: 0.05,
            interception_capacity_m: 0.0005,
            interception_prev_m: 0.0,
        }
    }

    #[test]
    fn dry_isothermal_day_yields_positive_potential_evaporation() {
        let e_p = potential_evaporation_m_h(&PenmanInputs {
            temp_min_c: 15.0,
            temp_avg_c: 20.0,
            temp_max_c: 25.0,
            pressure_kpa: 101.3,
            actual_vapour_pressure_kpa: 1.5,
            net_radiation_kj_m2_h: 800.0,
            aerodynamic_resistance_h_m: 0.01,
        });
        assert!(e_p > 0.0);
    }

    #[test]
    fn wet_canopy_with_no_standing_water_has_zero_interception_evaporation() {
        let out = story_balance(0.0005, 0.0001, 0.0, 0.0, 0.0005, 24.0);
        assert_eq!(out.interception_evaporation_m, 0.0);
        assert_eq!(out.interception_new_m, 0.0);
    }

    #[test]
    fn sorptivity_increases_with_soil_moisture() {
        let low = entekhabi_eagleson_sorptivity_m(0.1, 0.4, 0.01, 4.0, 0.3, 1.0);
        let high = entekhabi_eagleson_sorptivity_m(0.35, 0.4, 0.01, 4.0, 0.3, 1.0);
        assert!(high > low);
    }

    #[test]
    fn cascade_with_no_canopy_falls_back_to_bare_soil_branch() {
        let inputs = EtCascadeInputs {
            canopy_fraction: 0.0,
            overstory: layer(false),
            understory: layer(false),
            temp_min_c: 15.0,
            temp_avg_c: 20.0,
            temp_max_c: 25.0,
            pressure_kpa: 101.3,
            actual_vapour_pressure_kpa: 1.0,
            precip_m: 0.0,
            step_hours: 24.0,
            soil_moisture_upper: 0.25,
            porosity: 0.4,
            k_sat_m_h: 0.01,
            pore_size_index_b: 4.0,
            bubbling_pressure_head_m: 0.3,
        };
        let out = run_cascade(&inputs);
        assert_eq!(out.overstory.interception_evaporation_m, 0.0);
        assert_eq!(out.understory.interception_evaporation_m, 0.0);
        assert!(out.soil_evaporation_m >= 0.0);
    }
}
