//! Infiltration, Brooks-Corey unsaturated percolation, and the two-layer soil-moisture balance.

use crate::et::entekhabi_eagleson_sorptivity_m;

/// Brooks-Corey unsaturated hydraulic conductivity, clamped to 0 below the residual moisture and
/// to `k_sat_m_h` above porosity.
fn brooks_corey_conductivity_m_h(theta: f64, residual: f64, porosity: f64, k_sat_m_h: f64, pore_size_index_b: f64) -> f64 {
    if theta <= residual {
        return 0.0;
    }
    let ratio = ((theta - residual) / (porosity - residual)).clamp(0.0, 1.0);
    (k_sat_m_h * ratio.powf(2.0 * pore_size_index_b + 3.0)).min(k_sat_m_h)
}

/// Step percolation out of a layer, averaging conductivity at the start and end moisture and
/// capping the result to the storage the step's inflow actually makes available.
fn percolation_m(theta_begin: f64, inflow_m: f64, thickness_m: f64, residual: f64, porosity: f64, k_sat_m_h: f64, pore_size_index_b: f64, step_hours: f64) -> f64 {
    let theta_end = (theta_begin + inflow_m / thickness_m).min(porosity);
    let k_begin = brooks_corey_conductivity_m_h(theta_begin, residual, porosity, k_sat_m_h, pore_size_index_b);
    let k_end = brooks_corey_conductivity_m_h(theta_end, residual, porosity, k_sat_m_h, pore_size_index_b);
    let raw_m = 0.5 * (k_begin + k_end) * step_hours;

    let theta_avg = 0.5 * (theta_begin + theta_end);
    let available_m = (inflow_m + (theta_begin - theta_avg) * thickness_m).max(0.0);
    raw_m.min(available_m)
}

/// Green-Ampt-style infiltration capacity, bounded by the Entekhabi-Eagleson sorptivity of the
/// upper layer.
pub fn infiltration_capacity_m(theta_upper: f64, porosity_upper: f64, k_sat_upper_m_h: f64, pore_size_index_b: f64, bubbling_pressure_head_m: f64, step_hours: f64) -> f64 {
    entekhabi_eagleson_sorptivity_m(theta_upper, porosity_upper, k_sat_upper_m_h, pore_size_index_b, bubbling_pressure_head_m, step_hours)
}

#[derive(Debug, Clone, Copy)]
pub struct UnsaturatedInputs {
    pub theta_upper: f64,
    pub theta_lower: f64,
    pub thickness_upper_m: f64,
    pub thickness_lower_m: f64,
    pub porosity_upper: f64,
    pub porosity_lower: f64,
    pub residual_upper: f64,
    pub residual_lower: f64,
    pub k_sat_upper_m_h: f64,
    pub k_sat_lower_m_h: f64,
    pub pore_size_index_b_upper: f64,
    pub pore_size_index_b_lower: f64,
    pub bubbling_pressure_head_upper_m: f64,
    /// Rain/snowmelt reaching the ground surface this step (m).
    pub water_input_m: f64,
    pub et_overstory_m: f64,
    pub et_understory_m: f64,
    /// Deep-root overstory uptake drawn directly from the lower layer (m).
    pub et_overstory_deep_m: f64,
    pub soil_evaporation_m: f64,
    pub rise_from_groundwater_upper_m: f64,
    pub rise_from_groundwater_lower_m: f64,
    pub return_flow_m: f64,
    pub step_hours: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnsaturatedOutputs {
    pub infiltration_m: f64,
    pub infiltration_excess_runoff_m: f64,
    pub percolation_upper_m: f64,
    pub percolation_lower_m: f64,
    pub saturation_excess_runoff_m: f64,
    pub theta_upper_new: f64,
    pub theta_lower_new: f64,
}

/// Advances the two-layer unsaturated column by one step.
pub fn advance(inputs: &UnsaturatedInputs) -> UnsaturatedOutputs {
    let capacity_m = infiltration_capacity_m(
        inputs.theta_upper,
        inputs.porosity_upper,
        inputs.k_sat_upper_m_h,
        inputs.pore_size_index_b_upper,
        inputs.bubbling_pressure_head_upper_m,
        inputs.step_hours,
    );
    let (infiltration_m, infiltration_excess_runoff_m) = if inputs.water_input_m > capacity_m {
        (capacity_m, inputs.water_input_m - capacity_m)
    } else {
        (inputs.water_input_m, 0.0)
    };

    let percolation_upper_m = percolation_m(
        inputs.theta_upper,
        infiltration_m,
        inputs.thickness_upper_m,
        inputs.residual_upper,
        inputs.porosity_upper,
        inputs.k_sat_upper_m_h,
        inputs.pore_size_index_b_upper,
        inputs.step_hours,
    );

    let delta_theta_upper = (infiltration_m - percolation_upper_m - inputs.et_overstory_m - inputs.et_understory_m - inputs.soil_evaporation_m
        + inputs.rise_from_groundwater_upper_m
        - inputs.return_flow_m)
        / inputs.thickness_upper_m;
    let mut theta_upper_new = inputs.theta_upper + delta_theta_upper;

    let percolation_lower_m = percolation_m(
        inputs.theta_lower,
        percolation_upper_m,
        inputs.thickness_lower_m,
        inputs.residual_lower,
        inputs.porosity_lower,
        inputs.k_sat_lower_m_h,
        inputs.pore_size_index_b_lower,
        inputs.step_hours,
    );

    let delta_theta_lower = (percolation_upper_m - percolation_lower_m - inputs.et_overstory_deep_m + inputs.rise_from_groundwater_lower_m) / inputs.thickness_lower_m;
    let mut theta_lower_new = inputs.theta_lower + delta_theta_lower;

    let mut saturation_excess_runoff_m = 0.0;
    if theta_upper_new > inputs.porosity_upper {
        saturation_excess_runoff_m += (theta_upper_new - inputs.porosity_upper) * inputs.thickness_upper_m;
        theta_upper_new = inputs.porosity_upper;
    } else if theta_upper_new < 0.0 {
        theta_upper_new = 0.0;
    }
    if theta_lower_new > inputs.porosity_lower {
        saturation_excess_runoff_m += (theta_lower_new - inputs.porosity_lower) * inputs.thickness_lower_m;
        theta_lower_new = inputs.porosity_lower;
    } else if theta_lower_new < 0.0 {
        theta_lower_new = 0.0;
    }

    UnsaturatedOutputs {
        infiltration_m,
        infiltration_excess_runoff_m,
        percolation_upper_m,
        percolation_lower_m,
        saturation_excess_runoff_m,
        theta_upper_new,
        theta_lower_new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> UnsaturatedInputs {
        UnsaturatedInputs {
            theta_upper: 0.3,
            theta_lower: 0.3,
            thickness_upper_m: 0.1,
            thickness_lower_m: 0.9,
            porosity_upper: 0.45,
            porosity_lower: 0.45,
            residual_upper: 0.05,
            residual_lower: 0.05,
            k_sat_upper_m_h: 0.0005,
            k_sat_lower_m_h: 0.0005,
            pore_size_index_b_upper: 4.0,
            pore_size_index_b_lower: 4.0,
            bubbling_pressure_head_upper_m: 0.3,
            water_input_m: 0.01,
            et_overstory_m: 0.0,
            et_understory_m: 0.0,
            et_overstory_deep_m: 0.0,
            soil_evaporation_m: 0.0,
            rise_from_groundwater_upper_m: 0.0,
            rise_from_groundwater_lower_m: 0.0,
            return_flow_m: 0.0,
            step_hours: 1.0,
        }
    }

    #[test]
    fn heavy_rain_on_low_conductivity_soil_produces_infiltration_excess() {
        let mut inputs = base_inputs();
        inputs.water_input_m = 0.01; // 10 mm/h
        inputs.k_sat_upper_m_h = 0.00005; // low-conductivity "clay"
        let out = advance(&inputs);
        assert!(out.infiltration_excess_runoff_m > 0.0);
        assert!((out.infiltration_m + out.infiltration_excess_runoff_m - inputs.water_input_m).abs() < 1e-12);
    }

    #[test]
    fn theta_clamped_to_porosity_generates_saturation_excess() {
        let mut inputs = base_inputs();
        inputs.theta_upper = inputs.porosity_upper - 1e-6;
        inputs.rise_from_groundwater_upper_m = 0.05;
        inputs.water_input_m = 0.0;
        let out = advance(&inputs);
        assert_eq!(out.theta_upper_new, inputs.porosity_upper);
        assert!(out.saturation_excess_runoff_m > 0.0);
    }

    #[test]
    fn theta_never_goes_negative() {
        let mut inputs = base_inputs();
        inputs.theta_upper = inputs.residual_upper + 1e-6;
        inputs.et_overstory_m = 1.0;
        inputs.water_input_m = 0.0;
        let out = advance(&inputs);
        assert_eq!(out.theta_upper_new, 0.0);
    }
}
