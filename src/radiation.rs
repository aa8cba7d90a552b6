//! Sky shortwave/longwave radiation and its partition to overstory, understory and ground.
//!
//! Reference: Abramowitz, Pouyanné & Ajami-style emissivity disaggregation, and the standard
//! FAO-56 Ångström/Penman daily radiation formulae used throughout the unsaturated/ET chain.

use chrono::{Datelike, NaiveDate};

const STEFAN_BOLTZMANN_MJ_M2_K4_D: f64 = 4.90e-9;
/// Converts a MJ*m-2*d-1 daily rate to a kJ*m-2*h-1 hourly rate, assuming the rate is uniform
/// across the day (1000 kJ/MJ, 24 h/d).
const MJ_PER_D_TO_KJ_PER_H: f64 = 1000.0 / 24.0;

#[derive(Debug, Clone, Copy)]
pub struct RadiationInputs {
    pub date: NaiveDate,
    /// Latitude (decimal degrees)
    pub latitude_deg: f64,
    /// Sunshine duration over the day (h)
    pub sunshine_h: f64,
    /// Ångström coefficients
    pub angstrom_a: f64,
    pub angstrom_b: f64,
    /// Air temperature (deg C), used as a stand-in for surface temperatures the cell does not
    /// track explicitly.
    pub temp_air_c: f64,
    pub actual_vapour_pressure_kpa: f64,
    /// Fractional forest (canopy) cover, in [0, 1]
    pub canopy_fraction: f64,
    pub lai_overstory: f64,
    pub lai_understory: f64,
    pub albedo_overstory: f64,
    pub albedo_understory: f64,
    pub albedo_ground: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RadiationOutputs {
    /// Downward sky shortwave radiation (kJ/m2/h)
    pub sky_shortwave_kj_m2_h: f64,
    /// Downward sky longwave radiation (kJ/m2/h)
    pub sky_longwave_kj_m2_h: f64,
    /// Net radiation absorbed by the overstory (kJ/m2/h)
    pub net_overstory_kj_m2_h: f64,
    /// Net radiation absorbed by the understory (kJ/m2/h)
    pub net_understory_kj_m2_h: f64,
    /// Net radiation absorbed by the ground (kJ/m2/h)
    pub net_ground_kj_m2_h: f64,
}

pub struct RadiationModel;

impl RadiationModel {
    /// Sunset hour angle (rad), or `None` when the cell is in polar day/night (|lat| > ~66.5
    /// deg): per the spec, this is not an error, `R_a` (and every downstream radiation term)
    /// is simply 0.
    fn sunset_hour_angle(latitude_deg: f64, declination: f64) -> Option<f64> {
        let arg = -(latitude_deg.to_radians().tan()) * declination.tan();
        if (-1.0..=1.0).contains(&arg) {
            Some(arg.acos())
        } else {
            None
        }
    }

    /// Compute sky radiation and its canopy/ground partition for one cell at one day.
    pub fn compute(inputs: &RadiationInputs) -> RadiationOutputs {
        let day_of_year = inputs.date.ordinal() as f64;
        let dr = 1.0 + 0.033 * (2.0 * std::f64::consts::PI * day_of_year / 365.0).cos();
        let declination = 0.408 * (2.0 * std::f64::consts::PI * day_of_year / 365.0 - 1.39).sin();
        let lat_rad = inputs.latitude_deg.to_radians();

        let (r_a, sunshine_fraction) = match Self::sunset_hour_angle(inputs.latitude_deg, declination) {
            None => (0.0, 0.0),
            Some(omega_s) => {
                let day_length_h = 24.0 * omega_s / std::f64::consts::PI;
                let r_a = 37.59 * dr * (omega_s * lat_rad.sin() * declination.sin() + lat_rad.cos() * declination.cos() * omega_s.sin());
                let sunshine_fraction = if day_length_h > 0.0 {
                    (inputs.sunshine_h / day_length_h).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                (r_a.max(0.0), sunshine_fraction)
            }
        };

        let r_s_mj_m2_d = (inputs.angstrom_a + inputs.angstrom_b * sunshine_fraction) * r_a;

        let emissivity_clear_sky = 0.83 - 0.18 * (-1.54 * inputs.actual_vapour_pressure_kpa).exp();
        let emissivity_sky = (1.0 - sunshine_fraction) + sunshine_fraction * emissivity_clear_sky;
        let ff = inputs.canopy_fraction.clamp(0.0, 1.0);
        let emissivity_atmosphere = (1.0 - ff) * emissivity_sky + ff;
        let l_sky_mj_m2_d = emissivity_atmosphere * STEFAN_BOLTZMANN_MJ_M2_K4_D * (inputs.temp_air_c + 273.15).powi(4);

        let sky_shortwave = r_s_mj_m2_d * MJ_PER_D_TO_KJ_PER_H;
        let sky_longwave = l_sky_mj_m2_d * MJ_PER_D_TO_KJ_PER_H;

        // Outgoing longwave from each layer, taken at air temperature absent a tracked surface
        // temperature, as directed by the spec.
        let emitted = STEFAN_BOLTZMANN_MJ_M2_K4_D * (inputs.temp_air_c + 273.15).powi(4) * MJ_PER_D_TO_KJ_PER_H;

        let trans_overstory = (-inputs.lai_overstory).exp();
        let trans_understory = (-inputs.lai_understory).exp();

        let net_overstory = ff * ((1.0 - inputs.albedo_overstory) * sky_shortwave + sky_longwave - emitted)
            + ff * (1.0 - trans_overstory) * (emitted - emitted);

        let understory_sw = sky_shortwave * trans_overstory * (1.0 - inputs.albedo_understory) * ff
            + sky_shortwave * (1.0 - inputs.albedo_understory) * (1.0 - ff);
        // Longwave reaching the understory: the fraction of sky longwave transmitted straight
        // through the overstory, plus what the overstory itself re-emits downward over the
        // fraction it intercepts, over the canopy-covered area; the open area gets full sky
        // longwave. Both terms share the emitted-layer approximation above.
        let understory_lw = ff * (sky_longwave * trans_overstory + emitted * (1.0 - trans_overstory)) + (1.0 - ff) * sky_longwave
            - emitted;
        let net_understory = understory_sw + understory_lw;

        let ground_sw = ff * sky_shortwave * trans_overstory * trans_understory * (1.0 - inputs.albedo_ground)
            + (1.0 - ff) * sky_shortwave * trans_understory * (1.0 - inputs.albedo_ground);
        let ground_lw = ff * (sky_longwave * trans_overstory + emitted * (1.0 - trans_overstory)) * trans_understory
            + (1.0 - ff) * sky_longwave * trans_understory
            + (1.0 - trans_understory) * emitted
            - emitted;
        let net_ground = ground_sw + ground_lw;

        RadiationOutputs {
            sky_shortwave_kj_m2_h: sky_shortwave,
            sky_longwave_kj_m2_h: sky_longwave,
            net_overstory_kj_m2_h: net_overstory,
            net_understory_kj_m2_h: net_understory,
            net_ground_kj_m2_h: net_ground,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> RadiationInputs {
        RadiationInputs {
            date: NaiveDate::from_ymd_opt(2020, 6, 21).unwrap(),
            latitude_deg: 45.0,
            sunshine_h: 10.0,
            angstrom_a: 0.25,
            angstrom_b: 0.5,
            temp_air_c: 20.0,
            actual_vapour_pressure_kpa: 1.5,
            canopy_fraction: 0.6,
            lai_overstory: 3.0,
            lai_understory: 1.0,
            albedo_overstory: 0.15,
            albedo_understory: 0.2,
            albedo_ground: 0.25,
        }
    }

    #[test]
    fn polar_night_gives_zero_shortwave() {
        let mut inputs = base_inputs();
        inputs.latitude_deg = 80.0;
        inputs.date = NaiveDate::from_ymd_opt(2020, 12, 21).unwrap();
        let out = RadiationModel::compute(&inputs);
        assert_eq!(out.sky_shortwave_kj_m2_h, 0.0);
    }

    #[test]
    fn midlatitude_summer_radiation_is_positive() {
        let out = RadiationModel::compute(&base_inputs());
        assert!(out.sky_shortwave_kj_m2_h > 0.0);
        assert!(out.sky_longwave_kj_m2_h > 0.0);
    }

    #[test]
    fn zero_canopy_fraction_collapses_overstory_net_to_zero() {
        let mut inputs = base_inputs();
        inputs.canopy_fraction = 0.0;
        let out = RadiationModel::compute(&inputs);
        assert_eq!(out.net_overstory_kj_m2_h, 0.0);
    }
}
