//! Channel routing: a linear-reservoir cascade along the D8 stream network, one reservoir per
//! stream cell. Update order follows the source exactly: zero every cell's `Q_in`, accumulate
//! `Q_in` from upstream cells' *previous* `Q_out`, then recompute `Q_out` for every stream cell
//! from its own storage. `Q_out` is therefore one step lagged as it propagates downstream, the
//! same explicit staggering used by [`crate::saturated`].

use crate::error::{ErrorLocation, NumericError};
use crate::grid::{CellStatic, Direction8, Grid};

/// Per-stream-cell linear-reservoir storage parameter k (1/h): the inverse of the average
/// channel residence time. Larger `k` means faster, less attenuated routing.
#[derive(Debug, Clone, Copy)]
pub struct ChannelGeometry {
    pub k_per_h: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelCellState {
    pub volume_m3: f64,
    /// This cell's discharge at the end of the step just completed (m3/h); read by the
    /// downstream cell's `Q_in` accumulation on the *next* step.
    pub q_out_m3_h: f64,
}

pub struct ChannelRoutingModel<'a> {
    pub static_grid: &'a Grid<CellStatic>,
    pub geometry: &'a Grid<ChannelGeometry>,
}

impl<'a> ChannelRoutingModel<'a> {
    /// Zero-then-accumulate pass: each stream cell's `Q_in` this step is the sum of its upstream
    /// neighbours' `Q_out` from the end of the previous step.
    pub fn accumulate_inflow(&self, prior_state: &Grid<ChannelCellState>) -> Grid<f64> {
        let mut inflow = vec![0.0f64; self.static_grid.len()];
        for (row, col) in self.static_grid.iter_valid_coords() {
            let here = self.static_grid.get(row, col).unwrap();
            if !here.is_stream {
                continue;
            }
            if let Some((dr, dc)) = self.static_grid.neighbor_coord(row, col, here.flow_direction) {
                if let Some(down) = self.static_grid.get(dr, dc) {
                    if down.is_stream {
                        let idx = dr * self.static_grid.ncols() + dc;
                        inflow[idx] += prior_state.get(row, col).map(|s| s.q_out_m3_h).unwrap_or(0.0);
                    }
                }
            }
        }
        let cells = inflow.into_iter().map(Some).collect();
        Grid::new(
            self.static_grid.nrows(),
            self.static_grid.ncols(),
            self.static_grid.cellsize_m(),
            self.static_grid.origin().0,
            self.static_grid.origin().1,
            cells,
        )
    }

    /// Advances one stream cell's reservoir by one step: `V(t+dt) = Qbar/k + (V(t) - Qbar/k) *
    /// exp(-k dt)`, `Q_out(t+dt) = Qbar - (V(t+dt) - V(t))/dt`, with `Qbar = Q_in + Q_c`.
    fn advance_reservoir(prior_volume_m3: f64, q_in_plus_qc_m3_h: f64, k_per_h: f64, step_hours: f64) -> ChannelCellState {
        if k_per_h <= 0.0 {
            // No outflow without a defined residence time; all inflow simply accumulates.
            return ChannelCellState {
                volume_m3: prior_volume_m3 + q_in_plus_qc_m3_h * step_hours,
                q_out_m3_h: 0.0,
            };
        }
        let equilibrium_volume_m3 = q_in_plus_qc_m3_h / k_per_h;
        let new_volume_m3 = equilibrium_volume_m3 + (prior_volume_m3 - equilibrium_volume_m3) * (-k_per_h * step_hours).exp();
        let q_out_m3_h = q_in_plus_qc_m3_h - (new_volume_m3 - prior_volume_m3) / step_hours;
        ChannelCellState {
            volume_m3: new_volume_m3,
            q_out_m3_h,
        }
    }

    /// Advances every stream cell by one step given this step's `Q_in` (from
    /// [`Self::accumulate_inflow`]) and subsurface exchange `Q_c` (from
    /// [`crate::saturated::SaturatedSoilModel`]'s stream-exchange term).
    pub fn advance(&self, prior_state: &Grid<ChannelCellState>, inflow_m3_h: &Grid<f64>, q_c_m3_h: &Grid<f64>, step_hours: f64) -> Grid<ChannelCellState> {
        let mut next = vec![None; self.static_grid.len()];
        for (row, col) in self.static_grid.iter_valid_coords() {
            let here = self.static_grid.get(row, col).unwrap();
            let idx = row * self.static_grid.ncols() + col;
            if !here.is_stream {
                next[idx] = Some(ChannelCellState::default());
                continue;
            }
            let prior = prior_state.get(row, col).copied().unwrap_or_default();
            let geometry = self.geometry.get(row, col).copied().unwrap_or(ChannelGeometry { k_per_h: 0.0 });
            let q_in = inflow_m3_h.get(row, col).copied().unwrap_or(0.0);
            let q_c = q_c_m3_h.get(row, col).copied().unwrap_or(0.0);
            next[idx] = Some(Self::advance_reservoir(prior.volume_m3, q_in + q_c, geometry.k_per_h, step_hours));
        }
        Grid::new(
            self.static_grid.nrows(),
            self.static_grid.ncols(),
            self.static_grid.cellsize_m(),
            self.static_grid.origin().0,
            self.static_grid.origin().1,
            next,
        )
    }

    /// `k <= 0` leaves a stream cell with no outflow path, which is never physically valid for
    /// a reach carrying flow; flag it the same way the saturated-zone scheme flags its own
    /// stability bound rather than silently returning zero discharge forever.
    pub fn check_stability(&self, location: ErrorLocation) -> Result<(), NumericError> {
        for (row, col) in self.static_grid.iter_valid_coords() {
            let here = self.static_grid.get(row, col).unwrap();
            if !here.is_stream {
                continue;
            }
            let geometry = self.geometry.get(row, col).copied().unwrap_or(ChannelGeometry { k_per_h: 0.0 });
            if geometry.k_per_h <= 0.0 {
                return Err(NumericError::UnstableSaturatedScheme(location, 0.0));
            }
        }
        Ok(())
    }

    /// Discharge at a named outlet cell at the end of the step just advanced (m3/h).
    pub fn outlet_discharge_m3_h(state: &Grid<ChannelCellState>, outlet_row: usize, outlet_col: usize) -> f64 {
        state.get(outlet_row, outlet_col).map(|s| s.q_out_m3_h).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_grid(n: usize) -> Grid<CellStatic> {
        let mut cells = Vec::with_capacity(n);
        for i in 0..n {
            cells.push(Some(CellStatic {
                elevation_m: (n - i) as f64,
                flow_direction: Direction8::E,
                flow_accumulation: (i + 1) as u32,
                is_stream: true,
                is_outlet: i == n - 1,
                vegetation_class: 1,
                canopy_fraction: 0.0,
                soil_class: 1,
                latitude_deg: 45.0,
            }));
        }
        Grid::new(1, n, 100.0, 0.0, 0.0, cells)
    }

    fn uniform_geometry(n: usize, k: f64) -> Grid<ChannelGeometry> {
        let cells = (0..n).map(|_| Some(ChannelGeometry { k_per_h: k })).collect();
        Grid::new(1, n, 100.0, 0.0, 0.0, cells)
    }

    fn zero_grid(n: usize) -> Grid<f64> {
        Grid::new(1, n, 100.0, 0.0, 0.0, vec![Some(0.0); n])
    }

    #[test]
    fn single_reservoir_pulse_recedes_geometrically_per_the_analytical_solution() {
        let grid = line_grid(1);
        let geometry = uniform_geometry(1, 0.1);
        let model = ChannelRoutingModel { static_grid: &grid, geometry: &geometry };
        let step_hours = 1.0;

        // A 1 m3/h pulse for the first step only, then zero inflow thereafter.
        let mut state = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(ChannelCellState::default())]);
        let pulse = Grid::new(1, 1, 100.0, 0.0, 0.0, vec![Some(1.0)]);
        let zero = zero_grid(1);

        state = model.advance(&state, &pulse, &zero, step_hours);
        let q_peak = state.get(0, 0).unwrap().q_out_m3_h;
        assert!(q_peak > 0.0);

        let mut q_prev = q_peak;
        for _ in 0..5 {
            state = model.advance(&state, &zero, &zero, step_hours);
            let q_next = state.get(0, 0).unwrap().q_out_m3_h;
            let ratio = q_next / q_prev;
            let expected_ratio = (-0.1f64 * step_hours).exp();
            assert!((ratio - expected_ratio).abs() < 1e-6, "ratio {ratio} vs expected {expected_ratio}");
            q_prev = q_next;
        }
    }

    #[test]
    fn mass_is_conserved_along_a_reservoir_cascade() {
        let n = 4;
        let grid = line_grid(n);
        let geometry = uniform_geometry(n, 0.3);
        let model = ChannelRoutingModel { static_grid: &grid, geometry: &geometry };
        let zero_qc = zero_grid(n);

        let mut state = Grid::new(1, n, 100.0, 0.0, 0.0, vec![Some(ChannelCellState { volume_m3: 50.0, q_out_m3_h: 15.0 }); n]);
        let total_before: f64 = (0..n).map(|c| state.get(0, c).unwrap().volume_m3).sum();
        let mut cumulative_outlet_discharge = 0.0;

        for _ in 0..20 {
            let inflow = model.accumulate_inflow(&state);
            let next = model.advance(&state, &inflow, &zero_qc, 1.0);
            cumulative_outlet_discharge += ChannelRoutingModel::outlet_discharge_m3_h(&next, 0, n - 1);
            state = next;
        }
        let total_after: f64 = (0..n).map(|c| state.get(0, c).unwrap().volume_m3).sum();
        assert!((total_before - total_after - cumulative_outlet_discharge).abs() / total_before < 0.2);
    }

    #[test]
    fn zero_k_is_flagged_unstable() {
        let grid = line_grid(2);
        let geometry = uniform_geometry(2, 0.0);
        let model = ChannelRoutingModel { static_grid: &grid, geometry: &geometry };
        let loc = ErrorLocation::Cell { row: 0, col: 0, step: 0 };
        assert!(model.check_stability(loc).is_err());
    }
}
