//! 8-neighbour saturated-zone lateral flow: gradient pass, inflow aggregation pass, and the
//! water-table update pass, plus stream-cell baseflow exchange.

use crate::error::{ErrorLocation, NumericError};
use crate::grid::{CellStatic, Direction8, Grid};
use crate::libs::SoilLib;

/// Per-reach stream geometry, only meaningful on cells where [`CellStatic::is_stream`] is set.
#[derive(Debug, Clone, Copy)]
pub struct StreamGeometry {
    pub reach_length_m: f64,
    pub reach_width_m: f64,
    pub stream_depth_m: f64,
}

/// Per-cell Brooks-Corey transmissivity exponent n = 2b+3, the soil properties the saturated
/// zone needs beyond what [`SoilLib`] already carries directly.
fn transmissivity_exponent_n(pore_size_index_b: f64) -> f64 {
    2.0 * pore_size_index_b + 3.0
}

fn transmissivity_fraction(water_table_depth_m: f64, soil_thickness_m: f64, n: f64) -> f64 {
    (1.0 - water_table_depth_m / soil_thickness_m).clamp(0.0, 1.0).powf(n)
}

/// Gradient-pass result for one cell: the per-direction outflow split and its stream exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellOutflow {
    pub q_out_m3_h: f64,
    pub q_stream_exchange_m3_h: f64,
    pub directional_m3_h: [f64; 8],
}

/// Result of the water-table update pass for one cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaterTableUpdate {
    pub water_table_depth_m: f64,
    pub return_flow_m: f64,
    pub rise_to_upper_m: f64,
    pub rise_to_lower_m: f64,
}

pub struct SaturatedSoilModel<'a> {
    pub static_grid: &'a Grid<CellStatic>,
    pub soil_lib: &'a SoilLib,
    pub stream_geometry: &'a Grid<StreamGeometry>,
}

impl<'a> SaturatedSoilModel<'a> {
    /// Pass 1: for each cell, the gradient coefficients to its eight neighbours and its stream
    /// exchange, from the water-table depths at the start of the step. Independent per cell and
    /// safe to run data-parallel.
    pub fn gradient_pass(&self, water_table_depth_m: &Grid<f64>) -> Grid<CellOutflow> {
        let mut out = Grid::new(
            self.static_grid.nrows(),
            self.static_grid.ncols(),
            self.static_grid.cellsize_m(),
            self.static_grid.origin().0,
            self.static_grid.origin().1,
            vec![None; self.static_grid.len()],
        );

        for (row, col) in self.static_grid.iter_valid_coords() {
            let static_i = self.static_grid.get(row, col).unwrap();
            let z_i = *water_table_depth_m.get(row, col).unwrap_or(&0.0);
            let loc = ErrorLocation::Cell { row, col, step: 0 };
            let soil_i = self.soil_lib.lookup(static_i.soil_class, loc).expect("soil class validated at startup");
            let n_i = transmissivity_exponent_n(soil_i.pore_size_index);
            // Reference plane: z - elevation, so that a *lower* water table (larger z) or a
            // *lower* elevation both give a larger reference. Outflow runs toward neighbours
            // whose reference is larger, i.e. toward lower water tables -- downhill.
            let wt_ref_i = z_i - static_i.elevation_m;
            let transmissivity_i = soil_i.k_sat * soil_i.soil_thickness_m / n_i;

            let mut gammas = [0.0f64; 8];
            for (idx, dir) in Direction8::ALL.into_iter().enumerate() {
                if let Some((nr, nc)) = self.static_grid.neighbor_coord(row, col, dir) {
                    if let Some(static_k) = self.static_grid.get(nr, nc) {
                        let z_k = *water_table_depth_m.get(nr, nc).unwrap_or(&0.0);
                        let wt_ref_k = z_k - static_k.elevation_m;
                        if wt_ref_k > wt_ref_i {
                            gammas[idx] = (wt_ref_k - wt_ref_i) * transmissivity_i;
                        }
                    }
                }
            }

            let sum_gamma: f64 = gammas.iter().sum();
            let h_i = transmissivity_fraction(z_i, soil_i.soil_thickness_m, n_i);
            let q_out = h_i * sum_gamma;

            let mut directional = [0.0f64; 8];
            if sum_gamma > 0.0 {
                for idx in 0..8 {
                    directional[idx] = (gammas[idx] / sum_gamma) * q_out;
                }
            }

            let q_stream_exchange = if static_i.is_stream {
                let reach = self.stream_geometry.get(row, col).expect("stream geometry present for stream cells");
                4.0 * reach.reach_length_m * (reach.stream_depth_m - z_i) / reach.reach_width_m * transmissivity_i * h_i
            } else {
                0.0
            };

            out.set(
                row,
                col,
                CellOutflow {
                    q_out_m3_h: q_out,
                    q_stream_exchange_m3_h: q_stream_exchange,
                    directional_m3_h: directional,
                },
            );
        }
        out
    }

    /// Pass 2: aggregates each cell's inflow from neighbours whose directional outflow points
    /// back at it. Must run only after every cell's [`gradient_pass`] result is available.
    pub fn aggregate_inflow(&self, outflow: &Grid<CellOutflow>) -> Grid<f64> {
        let mut q_in = Grid::new(
            self.static_grid.nrows(),
            self.static_grid.ncols(),
            self.static_grid.cellsize_m(),
            self.static_grid.origin().0,
            self.static_grid.origin().1,
            vec![Some(0.0); self.static_grid.len()],
        );

        for (row, col) in self.static_grid.iter_valid_coords() {
            let cell_outflow = outflow.get(row, col).unwrap();
            for (idx, dir) in Direction8::ALL.into_iter().enumerate() {
                let flow = cell_outflow.directional_m3_h[idx];
                if flow <= 0.0 {
                    continue;
                }
                if let Some((nr, nc)) = self.static_grid.neighbor_coord(row, col, dir) {
                    if let Some(acc) = q_in.get_mut(nr, nc) {
                        *acc += flow;
                    }
                }
            }
        }
        q_in
    }

    /// The largest `Ks*D/(n*phi*cellsize^2)` across all cells, used by the caller to enforce the
    /// explicit scheme's stability bound `step_hours * this <= 0.5` before running [`Self::update`].
    pub fn stability_coefficient(&self, porosity_for_cell: impl Fn(usize, usize) -> f64) -> f64 {
        let mut worst = 0.0f64;
        let cellsize2 = self.static_grid.cellsize_m().powi(2);
        for (row, col) in self.static_grid.iter_valid_coords() {
            let static_i = self.static_grid.get(row, col).unwrap();
            let loc = ErrorLocation::Cell { row, col, step: 0 };
            let soil_i = self.soil_lib.lookup(static_i.soil_class, loc).expect("soil class validated at startup");
            let n_i = transmissivity_exponent_n(soil_i.pore_size_index);
            let phi = porosity_for_cell(row, col).max(1e-9);
            let coeff = soil_i.k_sat * soil_i.soil_thickness_m / (n_i * phi * cellsize2);
            worst = worst.max(coeff);
        }
        worst
    }

    /// Pass 3: updates the water table given the Q_out/Q_in/Q_c of passes 1-2, the lower-layer
    /// percolation already withdrawn by `UnsaturatedSoil`, and the current soil thickness and
    /// layer porosities. `step_hours` must already have passed [`Self::stability_coefficient`]'s
    /// check.
    #[allow(clippy::too_many_arguments)]
    pub fn update_cell(
        &self,
        water_table_depth_m: f64,
        soil_thickness_m: f64,
        thickness_upper_m: f64,
        porosity_upper: f64,
        porosity_lower: f64,
        cellsize_m: f64,
        outflow: &CellOutflow,
        q_in_m3_h: f64,
        percolation_lower_m: f64,
        step_hours: f64,
    ) -> WaterTableUpdate {
        let porosity_current = if water_table_depth_m <= thickness_upper_m { porosity_upper } else { porosity_lower };
        let cell_area_m2 = cellsize_m * cellsize_m;
        let delta_v_m = (outflow.q_out_m3_h + outflow.q_stream_exchange_m3_h - q_in_m3_h) / cell_area_m2 * step_hours - percolation_lower_m;
        let delta_z_m = delta_v_m / porosity_current;
        let target_z = water_table_depth_m + delta_z_m;

        if target_z < 0.0 {
            let overshoot_m = -target_z;
            let return_flow_m = overshoot_m * porosity_current;
            let rise_upper_depth_m = water_table_depth_m.min(thickness_upper_m);
            let rise_lower_depth_m = (water_table_depth_m - thickness_upper_m).max(0.0);
            WaterTableUpdate {
                water_table_depth_m: 0.0,
                return_flow_m,
                rise_to_upper_m: rise_upper_depth_m * porosity_upper,
                rise_to_lower_m: rise_lower_depth_m * porosity_lower,
            }
        } else {
            WaterTableUpdate {
                water_table_depth_m: target_z.min(soil_thickness_m),
                return_flow_m: 0.0,
                rise_to_upper_m: 0.0,
                rise_to_lower_m: 0.0,
            }
        }
    }

    /// Asserts the explicit scheme's stability condition, as the spec mandates, rather than
    /// silently letting the water-table update diverge.
    pub fn check_stability(&self, step_hours: f64, coefficient: f64, location: ErrorLocation) -> Result<(), NumericError> {
        let product = step_hours * coefficient;
        if product > 0.5 {
            Err(NumericError::UnstableSaturatedScheme(location, product))
        } else {
            Ok(())
        }
    }
}
