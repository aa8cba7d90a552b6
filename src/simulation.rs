//! The per-step driver: wires Radiation -> Snow -> ET -> UnsaturatedSoil per cell, then
//! SaturatedSoil's three lateral-flow passes, then UH convolution and ChannelRouting, into the
//! single [`SimulationLoop::step`] call a top-level run loop calls once per time step.

use std::collections::VecDeque;

use chrono::Datelike;
use float_cmp::approx_eq;
use log::{debug, warn};
use rayon::prelude::*;

use crate::cell::CellState;
use crate::clock::StepClock;
use crate::config::SimulationConfig;
use crate::error::{DomainError, ErrorLocation, InputShapeError, ModelError};
use crate::et::{self, EtCascadeInputs, LayerGeometry};
use crate::forcing::ForcingFrame;
use crate::grid::{CellStatic, Grid};
use crate::inputs::StepInputs;
use crate::libs::{SoilLib, SoilProperties, VegLib, VegProperties};
use crate::outputs::{OutputSink, StepOutputs};
use crate::radiation::{RadiationInputs, RadiationModel};
use crate::resistance::{
    self, CanopyResistanceInputs, OverstoryResistanceInputs, UnderstoryResistanceInputs,
};
use crate::routing::{ChannelCellState, ChannelGeometry, ChannelRoutingModel};
use crate::saturated::{CellOutflow, SaturatedSoilModel, StreamGeometry};
use crate::snow::{self, SnowEnergyInputs};
use crate::uh::OutletUh;
use crate::unsaturated::{self, UnsaturatedInputs};

/// Groundwater terms [`crate::saturated::SaturatedSoilModel`] produced for a cell, carried one
/// step to resolve the otherwise-cyclic dependency between it and `UnsaturatedSoil`: this step's
/// percolation feeds this step's water-table update directly, but the rise/return-flow that
/// update produces can only be folded into the *next* step's soil-moisture balance.
#[derive(Debug, Clone, Copy, Default)]
struct PendingSaturatedFlux {
    rise_to_upper_m: f64,
    rise_to_lower_m: f64,
    return_flow_m: f64,
}

struct CellStepResult {
    state: CellState,
    outputs: StepOutputs,
    percolation_lower_m: f64,
    /// Infiltration-excess plus saturation-excess runoff generated this step (m), convolved
    /// through the cell's UH contribution once the saturated-zone pass adds its own return flow.
    surface_runoff_m: f64,
}

/// Runs the Radiation -> Resistance -> Snow -> ET -> UnsaturatedSoil cascade for one cell. Pure
/// function of its inputs; safe to call from a parallel iterator.
fn run_cell_step(inputs: &StepInputs, pending: &PendingSaturatedFlux) -> CellStepResult {
    let month0 = inputs.month0();
    let veg = inputs.veg;
    let soil = inputs.soil;
    let forcing = inputs.forcing;
    let config = inputs.config;
    let state = inputs.state;

    let overstory_active = veg.overstory_present && inputs.static_cell.canopy_fraction > 1e-4;
    let understory_active = config.understory.present;

    let lai_overstory_effective = veg.extinction_coefficient * veg.lai(month0);
    let lai_understory = config.understory.lai;

    let radiation = RadiationModel::compute(&RadiationInputs {
        date: inputs.date,
        latitude_deg: inputs.static_cell.latitude_deg,
        sunshine_h: forcing.sunshine_h,
        angstrom_a: config.radiation.angstrom_a,
        angstrom_b: config.radiation.angstrom_b,
        temp_air_c: forcing.temp_avg_c,
        actual_vapour_pressure_kpa: forcing.actual_vapour_pressure_kpa(),
        canopy_fraction: inputs.static_cell.canopy_fraction,
        lai_overstory: lai_overstory_effective,
        lai_understory,
        albedo_overstory: veg.albedo(month0),
        albedo_understory: config.understory.albedo,
        albedo_ground: config.radiation.ground_albedo,
    });

    let r_a_overstory = resistance::overstory_aerodynamic_resistance_h_m(&OverstoryResistanceInputs {
        wind_speed_obs_m_s: forcing.wind_speed_m_s,
        obs_height_m: config.aerodynamic.obs_height_m,
        ground_displacement_m: config.aerodynamic.ground_displacement_m,
        ground_roughness_m: config.aerodynamic.ground_roughness_m,
        reference_height_m: veg.canopy_height_m() + config.aerodynamic.reference_height_above_canopy_m,
        canopy_height_m: veg.canopy_height_m(),
        canopy_displacement_m: veg.displacement_m(month0),
        canopy_roughness_m: veg.roughness_m(month0),
    });

    let r_a_understory = resistance::understory_aerodynamic_resistance_h_m(&UnderstoryResistanceInputs {
        wind_speed_obs_m_s: forcing.wind_speed_m_s,
        obs_height_m: config.aerodynamic.obs_height_m,
        ground_displacement_m: config.aerodynamic.ground_displacement_m,
        ground_roughness_m: config.aerodynamic.ground_roughness_m,
        understory_displacement_m: config.understory.displacement_m,
        understory_roughness_m: config.understory.roughness_m,
    });

    let e_sat = crate::forcing::saturated_vapour_pressure_kpa(forcing.temp_avg_c);
    let e_act = forcing.actual_vapour_pressure_kpa();

    let r_c_overstory = resistance::canopy_resistance_h_m(&CanopyResistanceInputs {
        r_s_min_s_m: veg.min_stomatal_resistance_s_m,
        r_s_max_s_m: veg.max_stomatal_resistance_s_m,
        lai: veg.lai(month0),
        temp_c: forcing.temp_avg_c,
        saturated_vapour_pressure_kpa: e_sat,
        actual_vapour_pressure_kpa: e_act,
        photosynthetic_radiation: radiation.sky_shortwave_kj_m2_h,
        radiation_threshold: config.radiation.radiation_threshold_kj_m2_h,
        soil_moisture: state.sm_upper,
        theta_wilting_point: soil.wilting_point,
        theta_free: soil.field_capacity,
    });

    let r_c_understory = resistance::canopy_resistance_h_m(&CanopyResistanceInputs {
        r_s_min_s_m: config.understory.min_stomatal_resistance_s_m,
        r_s_max_s_m: config.understory.max_stomatal_resistance_s_m,
        lai: lai_understory,
        temp_c: forcing.temp_avg_c,
        saturated_vapour_pressure_kpa: e_sat,
        actual_vapour_pressure_kpa: e_act,
        photosynthetic_radiation: radiation.sky_shortwave_kj_m2_h,
        radiation_threshold: config.radiation.radiation_threshold_kj_m2_h,
        soil_moisture: state.sm_upper,
        theta_wilting_point: soil.wilting_point,
        theta_free: soil.field_capacity,
    });

    let (rain_m, snow_m) = snow::partition_precipitation(forcing.precipitation_m, forcing.temp_avg_c);

    let mut canopy_snow = state.canopy_snow;
    let mut ground_snow = state.ground_snow;

    let canopy_energy = SnowEnergyInputs {
        incoming_shortwave_kj_m2_h: radiation.sky_shortwave_kj_m2_h,
        incoming_longwave_kj_m2_h: radiation.sky_longwave_kj_m2_h,
        albedo: canopy_snow.albedo.max(0.6),
        temp_air_c: forcing.temp_avg_c,
        wind_speed_m_s: forcing.wind_speed_m_s,
        actual_vapour_pressure_kpa: e_act,
        pressure_kpa: forcing.pressure_kpa,
        reference_height_m: veg.canopy_height_m() + config.aerodynamic.reference_height_above_canopy_m,
        roughness_m: veg.roughness_m(month0),
        aerodynamic_resistance_h_m: r_a_overstory,
    };

    let overflow_solid_m = if overstory_active {
        snow::intercept_canopy_snowfall(&mut canopy_snow, veg.lai(month0), forcing.temp_avg_c, snow_m)
    } else {
        snow_m
    };

    let canopy_melt_m = if overstory_active {
        snow::advance(&mut canopy_snow, &canopy_energy, 0.0, 0.0, inputs.step_hours);
        snow::release_canopy_melt(&mut canopy_snow)
    } else {
        0.0
    };

    let ground_energy = SnowEnergyInputs {
        incoming_shortwave_kj_m2_h: radiation.sky_shortwave_kj_m2_h,
        incoming_longwave_kj_m2_h: radiation.sky_longwave_kj_m2_h,
        albedo: ground_snow.albedo.max(0.6),
        temp_air_c: forcing.temp_avg_c,
        wind_speed_m_s: forcing.wind_speed_m_s,
        actual_vapour_pressure_kpa: e_act,
        pressure_kpa: forcing.pressure_kpa,
        reference_height_m: config.aerodynamic.reference_height_above_canopy_m,
        roughness_m: config.aerodynamic.ground_roughness_m,
        aerodynamic_resistance_h_m: r_a_understory,
    };
    let ground_outputs = snow::advance(&mut ground_snow, &ground_energy, rain_m + canopy_melt_m, overflow_solid_m, inputs.step_hours);

    let (thickness_upper_m, thickness_lower_m) = config.layer_thicknesses_m(soil.soil_thickness_m);

    let et_out = et::run_cascade(&EtCascadeInputs {
        canopy_fraction: inputs.static_cell.canopy_fraction,
        overstory: LayerGeometry {
            present: overstory_active,
            net_radiation_kj_m2_h: radiation.net_overstory_kj_m2_h,
            aerodynamic_resistance_h_m: r_a_overstory,
            canopy_resistance_h_m: r_c_overstory,
            interception_capacity_m: config.understory.interception_capacity_coefficient_m * veg.lai(month0) * inputs.static_cell.canopy_fraction,
            interception_prev_m: state.interception_overstory_m,
        },
        understory: LayerGeometry {
            present: understory_active,
            net_radiation_kj_m2_h: radiation.net_understory_kj_m2_h,
            aerodynamic_resistance_h_m: r_a_understory,
            canopy_resistance_h_m: r_c_understory,
            interception_capacity_m: config.understory.interception_capacity_coefficient_m * lai_understory,
            interception_prev_m: state.interception_understory_m,
        },
        temp_min_c: forcing.temp_min_c,
        temp_avg_c: forcing.temp_avg_c,
        temp_max_c: forcing.temp_max_c,
        pressure_kpa: forcing.pressure_kpa,
        actual_vapour_pressure_kpa: e_act,
        precip_m: ground_outputs.snow_runoff_m,
        step_hours: inputs.step_hours,
        soil_moisture_upper: state.sm_upper,
        porosity: soil.porosity,
        k_sat_m_h: soil.k_sat,
        pore_size_index_b: soil.pore_size_index,
        bubbling_pressure_head_m: soil.bubbling_pressure,
    });

    let unsat_out = unsaturated::advance(&UnsaturatedInputs {
        theta_upper: state.sm_upper,
        theta_lower: state.sm_lower,
        thickness_upper_m,
        thickness_lower_m,
        porosity_upper: soil.porosity,
        porosity_lower: soil.porosity,
        residual_upper: soil.residual,
        residual_lower: soil.residual,
        k_sat_upper_m_h: soil.k_sat,
        k_sat_lower_m_h: soil.k_sat,
        pore_size_index_b_upper: soil.pore_size_index,
        pore_size_index_b_lower: soil.pore_size_index,
        bubbling_pressure_head_upper_m: soil.bubbling_pressure,
        water_input_m: et_out.net_precip_for_soil_m,
        et_overstory_m: et_out.overstory.transpiration_m,
        et_understory_m: et_out.understory.transpiration_m,
        et_overstory_deep_m: 0.0,
        soil_evaporation_m: et_out.soil_evaporation_m,
        rise_from_groundwater_upper_m: pending.rise_to_upper_m,
        rise_from_groundwater_lower_m: pending.rise_to_lower_m,
        return_flow_m: pending.return_flow_m,
        step_hours: inputs.step_hours,
    });

    let new_state = CellState {
        interception_overstory_m: et_out.overstory.interception_new_m,
        interception_understory_m: et_out.understory.interception_new_m,
        sm_upper: unsat_out.theta_upper_new,
        sm_lower: unsat_out.theta_lower_new,
        water_table_depth_m: state.water_table_depth_m,
        canopy_snow,
        ground_snow,
    };

    let outputs = StepOutputs {
        sky_shortwave_kj_m2_h: radiation.sky_shortwave_kj_m2_h,
        sky_longwave_kj_m2_h: radiation.sky_longwave_kj_m2_h,
        net_overstory_kj_m2_h: radiation.net_overstory_kj_m2_h,
        net_understory_kj_m2_h: radiation.net_understory_kj_m2_h,
        potential_evaporation_m_h: et_out.potential_evaporation_m_h,
        interception_evap_overstory_m: et_out.overstory.interception_evaporation_m,
        interception_evap_understory_m: et_out.understory.interception_evaporation_m,
        transpiration_overstory_m: et_out.overstory.transpiration_m,
        transpiration_understory_m: et_out.understory.transpiration_m,
        soil_evaporation_m: et_out.soil_evaporation_m,
        interception_overstory_m: et_out.overstory.interception_new_m,
        interception_understory_m: et_out.understory.interception_new_m,
        sm_upper: unsat_out.theta_upper_new,
        sm_lower: unsat_out.theta_lower_new,
        infiltration_m: unsat_out.infiltration_m,
        percolation_upper_m: unsat_out.percolation_upper_m,
        percolation_lower_m: unsat_out.percolation_lower_m,
        infiltration_excess_runoff_m: unsat_out.infiltration_excess_runoff_m,
        saturation_excess_runoff_m: unsat_out.saturation_excess_runoff_m,
        sub_q_in_m3_h: inputs.subsurface_inflow_m3_h,
        ..Default::default()
    };

    CellStepResult {
        state: new_state,
        outputs,
        percolation_lower_m: unsat_out.percolation_lower_m,
        surface_runoff_m: unsat_out.infiltration_excess_runoff_m + unsat_out.saturation_excess_runoff_m,
    }
}

/// Validates that the requested simulation covers no more steps than the temperature forcing
/// stack actually supplies. The source's `Check_DATA` compares the window length against
/// `time_steps_WIN` (the window length itself) rather than `time_steps_TEM_MAX` (the number of
/// steps the temperature stack covers) -- a tautology that can never fail. This implements the
/// comparison that was clearly intended.
pub fn validate_simulation_window(requested_steps: usize, time_steps_available_in_temperature_stack: usize) -> Result<(), InputShapeError> {
    if requested_steps > time_steps_available_in_temperature_stack {
        Err(InputShapeError::WindowOutsideCoverage("temperature forcing stack".to_string()))
    } else {
        Ok(())
    }
}

/// Checks the closed-form mass-conservation identity a cell's water balance must satisfy:
/// storage change equals precipitation input minus every outflow term, to within 1e-6 m.
pub fn check_mass_conservation(storage_before_m: f64, storage_after_m: f64, precip_m: f64, et_total_m: f64, surface_runoff_m: f64, subsurface_net_m: f64, channel_out_m: f64) -> bool {
    let delta = storage_after_m - storage_before_m;
    let balance = precip_m - et_total_m - surface_runoff_m - subsurface_net_m - channel_out_m;
    approx_eq!(f64, delta, balance, epsilon = 1e-6)
}

/// Owns every grid and parameter library a run needs, plus the mutable per-cell and per-stream
/// state carried across steps. Constructed once by the collaborator layer that parses the
/// configuration, static terrain, and parameter library files; [`Self::step`] is then called once
/// per time step by the top-level run loop.
pub struct SimulationLoop {
    pub static_grid: Grid<CellStatic>,
    pub soil_lib: SoilLib,
    pub veg_lib: VegLib,
    pub stream_geometry: Grid<StreamGeometry>,
    pub channel_geometry: Grid<ChannelGeometry>,
    pub outlet_uhs: Vec<OutletUh>,
    pub config: SimulationConfig,
    pub clock: StepClock,
    cell_state: Grid<CellState>,
    channel_state: Grid<ChannelCellState>,
    pending_saturated_flux: Grid<PendingSaturatedFlux>,
    overland_buffers: Vec<VecDeque<f64>>,
}

impl SimulationLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        static_grid: Grid<CellStatic>,
        soil_lib: SoilLib,
        veg_lib: VegLib,
        stream_geometry: Grid<StreamGeometry>,
        channel_geometry: Grid<ChannelGeometry>,
        outlet_uhs: Vec<OutletUh>,
        config: SimulationConfig,
        clock: StepClock,
        initial_state: Grid<CellState>,
    ) -> Self {
        let nrows = static_grid.nrows();
        let ncols = static_grid.ncols();
        let cellsize = static_grid.cellsize_m();
        let origin = static_grid.origin();

        let channel_state = Grid::new(nrows, ncols, cellsize, origin.0, origin.1, vec![Some(ChannelCellState::default()); nrows * ncols]);
        let pending_saturated_flux = Grid::new(nrows, ncols, cellsize, origin.0, origin.1, vec![Some(PendingSaturatedFlux::default()); nrows * ncols]);

        let uh_steps = outlet_uhs
            .iter()
            .flat_map(|o| o.ordinates.values())
            .map(|series| series.len())
            .max()
            .unwrap_or(1)
            .max(1);
        let overland_buffers = outlet_uhs.iter().map(|_| VecDeque::from(vec![0.0; uh_steps])).collect();

        SimulationLoop {
            static_grid,
            soil_lib,
            veg_lib,
            stream_geometry,
            channel_geometry,
            outlet_uhs,
            config,
            clock,
            cell_state: initial_state,
            channel_state,
            pending_saturated_flux,
            overland_buffers,
        }
    }

    fn saturated_model(&self) -> SaturatedSoilModel<'_> {
        SaturatedSoilModel {
            static_grid: &self.static_grid,
            soil_lib: &self.soil_lib,
            stream_geometry: &self.stream_geometry,
        }
    }

    fn channel_model(&self) -> ChannelRoutingModel<'_> {
        ChannelRoutingModel {
            static_grid: &self.static_grid,
            geometry: &self.channel_geometry,
        }
    }

    fn soil_for(&self, static_cell: &CellStatic, step: usize, row: usize, col: usize) -> Result<&SoilProperties, ModelError> {
        self.soil_lib
            .lookup(static_cell.soil_class, ErrorLocation::Cell { row, col, step })
            .map_err(ModelError::from)
    }

    fn veg_for(&self, static_cell: &CellStatic, step: usize, row: usize, col: usize) -> Result<&VegProperties, ModelError> {
        self.veg_lib
            .lookup(static_cell.vegetation_class, ErrorLocation::Cell { row, col, step })
            .map_err(ModelError::from)
    }

    /// Runs one full time step: the per-cell cascade (data-parallel over cells), the saturated
    /// zone's three serialized passes, UH convolution of surface runoff, and channel routing.
    /// Only commits state once every fallible lookup for the step has succeeded; a step that
    /// errors leaves `self` at the last successfully completed step.
    pub fn step(&mut self, step: usize, forcing: &ForcingFrame, sink: &mut dyn OutputSink) -> Result<(), ModelError> {
        debug!("Running step #{} - {}", step, self.clock.date(step as u64));
        let date = self.clock.date(step as u64);
        let step_hours = self.clock.step_time_hours() as f64;
        let coords: Vec<(usize, usize)> = self.static_grid.iter_valid_coords().collect();

        let cell_results: Vec<((usize, usize), CellStepResult)> = coords
            .par_iter()
            .map(|&(row, col)| -> Result<((usize, usize), CellStepResult), ModelError> {
                let loc = ErrorLocation::Cell { row, col, step };
                let static_cell = self.static_grid.get(row, col).expect("coords drawn from iter_valid_coords");
                let forcing_cell = forcing.get(row, col).ok_or_else(|| ModelError::from(DomainError::NanForcing("missing forcing cell".to_string(), loc.clone())))?;
                if let Some(field) = forcing_cell.first_nan_field() {
                    return Err(ModelError::from(DomainError::NanForcing(field.to_string(), loc)));
                }
                let soil = self.soil_for(static_cell, step, row, col)?;
                let veg = self.veg_for(static_cell, step, row, col)?;
                let state = self.cell_state.get(row, col).expect("cell_state initialised for every valid cell");
                let pending = self.pending_saturated_flux.get(row, col).copied().unwrap_or_default();

                let step_inputs = StepInputs {
                    row,
                    col,
                    step,
                    date,
                    step_hours,
                    static_cell,
                    forcing: forcing_cell,
                    soil,
                    veg,
                    config: &self.config,
                    state,
                    subsurface_inflow_m3_h: 0.0,
                };
                Ok(((row, col), run_cell_step(&step_inputs, &pending)))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let nrows = self.static_grid.nrows();
        let ncols = self.static_grid.ncols();
        let cellsize = self.static_grid.cellsize_m();
        let origin = self.static_grid.origin();

        let mut percolation_lower = vec![0.0f64; nrows * ncols];
        let mut surface_runoff = vec![0.0f64; nrows * ncols];
        let mut per_cell_outputs = vec![StepOutputs::default(); nrows * ncols];

        for ((row, col), result) in cell_results {
            let idx = row * ncols + col;
            self.cell_state.set(row, col, result.state);
            percolation_lower[idx] = result.percolation_lower_m;
            surface_runoff[idx] = result.surface_runoff_m;
            per_cell_outputs[idx] = result.outputs;
        }

        // SaturatedSoil: gradient pass uses the water-table depths as they stood at the start of
        // this step (the per-cell cascade above never touches `water_table_depth_m`).
        let water_table_depth: Vec<Option<f64>> = (0..nrows * ncols)
            .map(|idx| {
                let row = idx / ncols;
                let col = idx % ncols;
                self.cell_state.get(row, col).map(|s| s.water_table_depth_m)
            })
            .collect();
        let water_table_grid = Grid::new(nrows, ncols, cellsize, origin.0, origin.1, water_table_depth);

        let sat_model = self.saturated_model();
        let stability = sat_model.stability_coefficient(|row, col| {
            self.static_grid
                .get(row, col)
                .and_then(|c| self.soil_lib.lookup(c.soil_class, ErrorLocation::Cell { row, col, step }).ok())
                .map(|s| s.porosity)
                .unwrap_or(1.0)
        });
        if let Err(err) = sat_model.check_stability(step_hours, stability, ErrorLocation::Cell { row: 0, col: 0, step }) {
            warn!("Saturated-zone stability condition violated at step #{}", step);
            return Err(err.into());
        }

        let gradient = sat_model.gradient_pass(&water_table_grid);
        let q_in_grid = sat_model.aggregate_inflow(&gradient);

        let mut new_pending = vec![Some(PendingSaturatedFlux::default()); nrows * ncols];
        let mut q_c_cells = vec![Some(0.0f64); nrows * ncols];

        for (row, col) in self.static_grid.iter_valid_coords() {
            let idx = row * ncols + col;
            let static_cell = self.static_grid.get(row, col).unwrap();
            let soil = self.soil_for(static_cell, step, row, col)?;
            let (thickness_upper_m, _) = self.config.layer_thicknesses_m(soil.soil_thickness_m);
            let cur_state = *self.cell_state.get(row, col).unwrap();
            let outflow: &CellOutflow = gradient.get(row, col).unwrap();
            let q_in = *q_in_grid.get(row, col).unwrap_or(&0.0);

            let update = sat_model.update_cell(
                cur_state.water_table_depth_m,
                soil.soil_thickness_m,
                thickness_upper_m,
                soil.porosity,
                soil.porosity,
                cellsize,
                outflow,
                q_in,
                percolation_lower[idx],
                step_hours,
            );

            let mut committed = cur_state;
            committed.water_table_depth_m = update.water_table_depth_m;
            self.cell_state.set(row, col, committed);

            new_pending[idx] = Some(PendingSaturatedFlux {
                rise_to_upper_m: update.rise_to_upper_m,
                rise_to_lower_m: update.rise_to_lower_m,
                return_flow_m: update.return_flow_m,
            });
            q_c_cells[idx] = Some(outflow.q_stream_exchange_m3_h);

            surface_runoff[idx] += update.return_flow_m;

            per_cell_outputs[idx].sub_q_in_m3_h = q_in;
            per_cell_outputs[idx].sub_q_out_m3_h = outflow.q_out_m3_h;
            per_cell_outputs[idx].water_table_depth_m = update.water_table_depth_m;
            per_cell_outputs[idx].rise_to_upper_m = update.rise_to_upper_m;
            per_cell_outputs[idx].rise_to_lower_m = update.rise_to_lower_m;
            per_cell_outputs[idx].return_flow_m = update.return_flow_m;
            per_cell_outputs[idx].stream_exchange_m3_h = outflow.q_stream_exchange_m3_h;
        }
        self.pending_saturated_flux = Grid::new(nrows, ncols, cellsize, origin.0, origin.1, new_pending);
        let q_c_grid = Grid::new(nrows, ncols, cellsize, origin.0, origin.1, q_c_cells);

        // UH convolution: each contributing cell's surface runoff volume is spread over its
        // outlet's ordinate series and accumulated into that outlet's future-discharge buffer.
        let cell_area_m2 = cellsize * cellsize;
        for (outlet_idx, outlet) in self.outlet_uhs.iter().enumerate() {
            for (&(row, col), ordinates) in outlet.ordinates.iter() {
                let idx = row * ncols + col;
                let volume_m3 = surface_runoff[idx] * cell_area_m2;
                if volume_m3 <= 0.0 {
                    continue;
                }
                let buffer = &mut self.overland_buffers[outlet_idx];
                for (k, ordinate) in ordinates.iter().enumerate() {
                    if k < buffer.len() {
                        buffer[k] += ordinate * volume_m3;
                    }
                }
            }
        }
        let mut surface_discharge = vec![0.0f64; self.outlet_uhs.len()];
        for (outlet_idx, buffer) in self.overland_buffers.iter_mut().enumerate() {
            surface_discharge[outlet_idx] = buffer.pop_front().unwrap_or(0.0);
            buffer.push_back(0.0);
        }

        // Channel routing. Q_c already folds each stream cell's subsurface exchange into its own
        // reservoir, so the outlet's channel discharge below already reflects baseflow; the UH's
        // surface discharge is added separately as the overland-flow component the channel
        // network never carries.
        let channel_model = self.channel_model();
        let inflow_grid = channel_model.accumulate_inflow(&self.channel_state);
        self.channel_state = channel_model.advance(&self.channel_state, &inflow_grid, &q_c_grid, step_hours);

        for (row, col) in self.static_grid.iter_valid_coords() {
            let idx = row * ncols + col;
            let static_cell = self.static_grid.get(row, col).unwrap();
            if static_cell.is_stream {
                per_cell_outputs[idx].channel_discharge_m3_h = self.channel_state.get(row, col).map(|s| s.q_out_m3_h).unwrap_or(0.0);
            }
            sink.record_cell(row, col, step, &per_cell_outputs[idx]);
        }

        for (outlet_idx, outlet) in self.outlet_uhs.iter().enumerate() {
            let channel_q = ChannelRoutingModel::outlet_discharge_m3_h(&self.channel_state, outlet.outlet_row, outlet.outlet_col);
            let total = surface_discharge[outlet_idx] + channel_q;
            sink.record_outlet_discharge(outlet.outlet_row, outlet.outlet_col, step, total);
        }

        Ok(())
    }

    /// Runs `forcings.len()` steps in order, checking `is_cancelled` at each step boundary (never
    /// mid-step, per the error-handling design): a cancellation after step `t` leaves the loop's
    /// state exactly as step `t` committed it, with no partial step applied.
    pub fn run(&mut self, forcings: &[ForcingFrame], sink: &mut dyn OutputSink, mut is_cancelled: impl FnMut() -> bool) -> Result<(), ModelError> {
        debug!("Starting run over {} steps", forcings.len());
        for (step, frame) in forcings.iter().enumerate() {
            if is_cancelled() {
                debug!("Cancellation observed at step #{}, stopping after the last committed step", step);
                break;
            }
            self.step(step, frame, sink)?;
        }
        Ok(())
    }
}

/// 0-indexed calendar month for a step's date; exposed for collaborator layers that need to
/// cross-reference a step against the monthly vegetation tables without constructing
/// [`StepInputs`] themselves.
pub fn month0_for_step(clock: &StepClock, step: u64) -> usize {
    clock.date(step).month0() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Direction8;
    use crate::libs::{MonthlyVegetation, SoilProperties, VegProperties};
    use crate::outputs::InMemorySink;
    use chrono::NaiveDate;

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
        for m in monthly.iter_mut() {
            *m = MonthlyVegetation {
                lai: 3.0,
                albedo: 0.15,
                roughness_m: 1.0,
                displacement_m: 6.0,
            };
        }
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
        use crate::config::{AerodynamicConfig, RadiationConfig, SoilLayering, UnderstoryDefaults};
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

    fn single_cell_loop() -> SimulationLoop {
        let static_cell = CellStatic {
            elevation_m: 100.0,
            flow_direction: Direction8::E,
            flow_accumulation: 1,
            is_stream: true,
            is_outlet: true,
            vegetation_class: 1,
            canopy_fraction: 0.0,
            soil_class: 1,
            latitude_deg: 45.0,
        };
        let static_grid = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(static_cell)]);

        let mut soil_lib = SoilLib::default();
        soil_lib.insert(1, soil());
        let mut veg_lib = VegLib::default();
        veg_lib.insert(1, veg());

        let stream_geometry = Grid::new(
            1,
            1,
            100.0,
            0.0,
            0.0,
            vec![Some(StreamGeometry {
                reach_length_m: 100.0,
                reach_width_m: 5.0,
                stream_depth_m: 1.0,
            })],
        );
        let channel_geometry = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(ChannelGeometry { k_per_h: 0.2 })]);

        let outlet_uh = OutletUh {
            outlet_row: 0,
            outlet_col: 0,
            mask: vec![true],
            ordinates: [((0usize, 0usize), vec![1.0])].into_iter().collect(),
            fingerprint: crate::uh::UhFingerprint::new(&crate::uh::UhParams {
                velocity_avg_m_h: 1.0,
                velocity_min_m_h: 0.1,
                velocity_max_m_h: 5.0,
                slope_exponent_b: 0.3,
                area_exponent_c: 0.2,
                step_time_hours: 1.0,
                reservoir_fraction_beta: 0.5,
            }),
        };

        let initial_state = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(CellState::spin_up(0.5, 0.3, 0.25))]);
        let clock = StepClock::new(
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp(),
            1,
        );

        SimulationLoop::new(static_grid, soil_lib, veg_lib, stream_geometry, channel_geometry, vec![outlet_uh], config(), clock, initial_state)
    }

    fn dry_forcing() -> crate::forcing::CellForcing {
        crate::forcing::CellForcing {
            precipitation_m: 0.0,
            temp_min_c: 18.0,
            temp_avg_c: 25.0,
            temp_max_c: 32.0,
            wind_speed_m_s: 2.0,
            relative_humidity_pct: 30.0,
            pressure_kpa: 101.0,
            sunshine_h: 10.0,
        }
    }

    #[test]
    fn dry_isothermal_step_produces_no_runoff_and_commits_a_discharge_record() {
        let mut loop_model = single_cell_loop();
        let forcing = ForcingFrame::new(1, 1, vec![Some(dry_forcing())]);
        let mut sink = InMemorySink::default();
        loop_model.step(0, &forcing, &mut sink).unwrap();

        assert_eq!(sink.cells.len(), 1);
        let (_, _, _, outputs) = sink.cells[0];
        assert_eq!(outputs.infiltration_excess_runoff_m, 0.0);
        assert_eq!(sink.outlet_discharge.len(), 1);
    }

    #[test]
    fn heavy_rain_step_generates_infiltration_excess_and_a_nonzero_uh_buffer() {
        let mut loop_model = single_cell_loop();
        let mut wet = dry_forcing();
        wet.precipitation_m = 0.05;
        wet.temp_avg_c = 15.0;
        wet.relative_humidity_pct = 90.0;
        let forcing = ForcingFrame::new(1, 1, vec![Some(wet)]);
        let mut sink = InMemorySink::default();
        loop_model.step(0, &forcing, &mut sink).unwrap();

        let (_, _, _, outputs) = sink.cells[0];
        assert!(outputs.infiltration_excess_runoff_m > 0.0);
    }

    #[test]
    fn missing_soil_class_is_reported_as_a_domain_error_and_the_step_is_not_committed() {
        let mut loop_model = single_cell_loop();
        loop_model.soil_lib = SoilLib::default();
        let forcing = ForcingFrame::new(1, 1, vec![Some(dry_forcing())]);
        let mut sink = InMemorySink::default();
        let result = loop_model.step(0, &forcing, &mut sink);
        assert!(result.is_err());
        assert_eq!(sink.cells.len(), 0);
    }

    #[test]
    fn simulation_window_validation_catches_an_overlong_run() {
        assert!(validate_simulation_window(100, 200).is_ok());
        assert!(validate_simulation_window(300, 200).is_err());
    }

    #[test]
    fn mass_conservation_check_flags_an_unbalanced_step() {
        assert!(check_mass_conservation(1.0, 0.9, 0.2, 0.1, 0.0, 0.0, 0.0));
        assert!(!check_mass_conservation(1.0, 0.9, 0.2, 0.0, 0.0, 0.0, 0.0));
    }
}
