//! Aerodynamic resistance (overstory/understory) and canopy (stomatal) resistance.

const VON_KARMAN: f64 = 0.41;
/// Overstory wind-profile extinction coefficient (Storck).
const OVERSTORY_EXTINCTION: f64 = 2.5;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Friction velocity implied by an observed wind speed and a logarithmic profile rooted at the
/// ground displacement/roughness.
fn friction_velocity(wind_speed_obs_m_s: f64, obs_height_m: f64, ground_displacement_m: f64, ground_roughness_m: f64) -> f64 {
    VON_KARMAN * wind_speed_obs_m_s / ((obs_height_m - ground_displacement_m) / ground_roughness_m).ln()
}

/// Wind speed at `height_m` implied by the same ground-rooted logarithmic profile.
fn wind_speed_at(u_star: f64, height_m: f64, ground_displacement_m: f64, ground_roughness_m: f64) -> f64 {
    u_star / VON_KARMAN * ((height_m - ground_displacement_m) / ground_roughness_m).ln()
}

#[derive(Debug, Clone, Copy)]
pub struct OverstoryResistanceInputs {
    pub wind_speed_obs_m_s: f64,
    pub obs_height_m: f64,
    pub ground_displacement_m: f64,
    pub ground_roughness_m: f64,
    /// Reference height above the canopy, z_r (m)
    pub reference_height_m: f64,
    pub canopy_height_m: f64,
    pub canopy_displacement_m: f64,
    pub canopy_roughness_m: f64,
}

/// Three-layer Storck aerodynamic resistance profile for the overstory (h/m).
pub fn overstory_aerodynamic_resistance_h_m(inputs: &OverstoryResistanceInputs) -> f64 {
    let u_star = friction_velocity(
        inputs.wind_speed_obs_m_s,
        inputs.obs_height_m,
        inputs.ground_displacement_m,
        inputs.ground_roughness_m,
    );
    let u_zr = wind_speed_at(u_star, inputs.reference_height_m, inputs.ground_displacement_m, inputs.ground_roughness_m);

    let d = inputs.canopy_displacement_m;
    let z0 = inputs.canopy_roughness_m;
    let h_c = inputs.canopy_height_m;
    let z_r = inputs.reference_height_m;
    let z_w = 1.5 * h_c - 0.5 * d;

    let within_canopy_term = h_c / (OVERSTORY_EXTINCTION * (z_w - d)) * ((OVERSTORY_EXTINCTION * (1.0 - (d + z0) / h_c)).exp() - 1.0);
    let above_canopy_to_zw = (z_w - h_c) / (z_w - d);
    let zw_to_zr = ((z_r - d) / (z_w - d)).ln();

    let r_a_s_per_m = (1.0 / (VON_KARMAN.powi(2) * u_zr)) * ((z_r - d) / z0).ln() * (within_canopy_term + above_canopy_to_zw + zw_to_zr);
    r_a_s_per_m / SECONDS_PER_HOUR
}

#[derive(Debug, Clone, Copy)]
pub struct UnderstoryResistanceInputs {
    pub wind_speed_obs_m_s: f64,
    pub obs_height_m: f64,
    pub ground_displacement_m: f64,
    pub ground_roughness_m: f64,
    pub understory_displacement_m: f64,
    pub understory_roughness_m: f64,
}

/// Logarithmic-profile aerodynamic resistance for the understory at reference height
/// `z_a = 2 + d_u + z_0u` (h/m).
pub fn understory_aerodynamic_resistance_h_m(inputs: &UnderstoryResistanceInputs) -> f64 {
    let u_star = friction_velocity(
        inputs.wind_speed_obs_m_s,
        inputs.obs_height_m,
        inputs.ground_displacement_m,
        inputs.ground_roughness_m,
    );
    let d_u = inputs.understory_displacement_m;
    let z0u = inputs.understory_roughness_m;
    let z_a = 2.0 + d_u + z0u;
    let u_za = wind_speed_at(u_star, z_a, inputs.ground_displacement_m, inputs.ground_roughness_m);

    let r_a_s_per_m = ((z_a - d_u) / z0u).ln().powi(2) / (VON_KARMAN.powi(2) * u_za);
    r_a_s_per_m / SECONDS_PER_HOUR
}

/// Air-temperature stress factor f_1. Undefined for T <= 0, clamped to 1e3 for T <= 2 deg C as
/// directed by the spec, and domain-limited to (0, 50) deg C.
fn f1_temperature(temp_c: f64) -> f64 {
    if temp_c <= 2.0 {
        return 1.0e3;
    }
    let denom = 0.08 * temp_c - 0.0016 * temp_c * temp_c;
    if denom <= 0.0 {
        1.0e3
    } else {
        (1.0 / denom).min(1.0e3)
    }
}

/// Vapour-pressure-deficit stress factor f_2, clamped at 1e3.
fn f2_vapour_deficit(saturated_vapour_pressure_kpa: f64, actual_vapour_pressure_kpa: f64) -> f64 {
    const E_C_KPA: f64 = 4.0;
    let deficit_ratio = (saturated_vapour_pressure_kpa - actual_vapour_pressure_kpa) / E_C_KPA;
    if deficit_ratio >= 1.0 {
        1.0e3
    } else {
        (1.0 / (1.0 - deficit_ratio)).min(1.0e3)
    }
}

/// Photosynthetically-active-radiation stress factor f_3.
fn f3_radiation(photosynthetic_radiation: f64, radiation_threshold: f64, r_s_min: f64, r_s_max: f64) -> f64 {
    let ratio = photosynthetic_radiation / radiation_threshold;
    (1.0 + ratio) / (r_s_min / r_s_max + ratio)
}

/// Soil-moisture stress factor f_4.
fn f4_soil_moisture(theta: f64, theta_wilting_point: f64, theta_free: f64) -> f64 {
    if theta <= theta_wilting_point {
        0.0
    } else if theta <= theta_free {
        (theta_free - theta_wilting_point) / (theta - theta_wilting_point)
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CanopyResistanceInputs {
    pub r_s_min_s_m: f64,
    pub r_s_max_s_m: f64,
    pub lai: f64,
    pub temp_c: f64,
    pub saturated_vapour_pressure_kpa: f64,
    pub actual_vapour_pressure_kpa: f64,
    pub photosynthetic_radiation: f64,
    pub radiation_threshold: f64,
    pub soil_moisture: f64,
    pub theta_wilting_point: f64,
    pub theta_free: f64,
}

/// Canopy (stomatal) resistance, converted from s/m to h/m and scaled down by LAI.
pub fn canopy_resistance_h_m(inputs: &CanopyResistanceInputs) -> f64 {
    let f1 = f1_temperature(inputs.temp_c);
    let f2 = f2_vapour_deficit(inputs.saturated_vapour_pressure_kpa, inputs.actual_vapour_pressure_kpa);
    let f3 = f3_radiation(inputs.photosynthetic_radiation, inputs.radiation_threshold, inputs.r_s_min_s_m, inputs.r_s_max_s_m);
    let f4 = f4_soil_moisture(inputs.soil_moisture, inputs.theta_wilting_point, inputs.theta_free);

    if inputs.lai <= 0.0 || f4 == 0.0 {
        return f64::INFINITY;
    }
    let r_c_s_per_m = inputs.r_s_min_s_m * f1 * f2 * f3 * f4 / inputs.lai;
    r_c_s_per_m / SECONDS_PER_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f4_is_zero_at_or_below_wilting_point() {
        assert_eq!(f4_soil_moisture(0.1, 0.15, 0.3), 0.0);
        assert_eq!(f4_soil_moisture(0.15, 0.15, 0.3), 0.0);
    }

    #[test]
    fn f4_saturates_to_one_above_free_water_threshold() {
        assert_eq!(f4_soil_moisture(0.35, 0.15, 0.3), 1.0);
    }

    #[test]
    fn f1_clamps_for_cold_temperatures() {
        assert_eq!(f1_temperature(1.0), 1.0e3);
        assert_eq!(f1_temperature(2.0), 1.0e3);
    }

    #[test]
    fn f1_is_finite_and_small_at_moderate_temperature() {
        let f1 = f1_temperature(20.0);
        assert!(f1 > 0.0 && f1 < 10.0);
    }

    #[test]
    fn canopy_resistance_is_infinite_with_zero_lai() {
        let inputs = CanopyResistanceInputs {
            r_s_min_s_m: 100.0,
            r_s_max_s_m: 5000.0,
            lai: 0.0,
            temp_c: 20.0,
            saturated_vapour_pressure_kpa: 2.0,
            actual_vapour_pressure_kpa: 1.0,
            photosynthetic_radiation: 300.0,
            radiation_threshold: 100.0,
            soil_moisture: 0.3,
            theta_wilting_point: 0.1,
            theta_free: 0.25,
        };
        assert!(canopy_resistance_h_m(&inputs).is_infinite());
    }

    #[test]
    fn overstory_resistance_is_positive_and_finite() {
        let inputs = OverstoryResistanceInputs {
            wind_speed_obs_m_s: 3.0,
            obs_height_m: 10.0,
            ground_displacement_m: 0.0,
            ground_roughness_m: 0.01,
            reference_height_m: 25.0,
            canopy_height_m: 18.0,
            canopy_displacement_m: 12.0,
            canopy_roughness_m: 1.5,
        };
        let r_a = overstory_aerodynamic_resistance_h_m(&inputs);
        assert!(r_a.is_finite() && r_a > 0.0);
    }

    #[test]
    fn understory_resistance_is_positive_and_finite() {
        let inputs = UnderstoryResistanceInputs {
            wind_speed_obs_m_s: 3.0,
            obs_height_m: 10.0,
            ground_displacement_m: 0.0,
            ground_roughness_m: 0.01,
            understory_displacement_m: 0.1,
            understory_roughness_m: 0.02,
        };
        let r_a = understory_aerodynamic_resistance_h_m(&inputs);
        assert!(r_a.is_finite() && r_a > 0.0);
    }
}
