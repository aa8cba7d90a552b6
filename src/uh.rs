//! One-time, per-outlet Unit Hydrograph construction: slope/velocity field, D8 upstream trace,
//! flow time, and the piecewise linear-reservoir-plus-delay UH ordinate.

use crate::grid::{CellStatic, Grid};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct UhParams {
    pub velocity_avg_m_h: f64,
    pub velocity_min_m_h: f64,
    pub velocity_max_m_h: f64,
    pub slope_exponent_b: f64,
    pub area_exponent_c: f64,
    pub step_time_hours: f64,
    /// Reservoir fraction beta splitting T_flow into a pure-delay part T_s and a
    /// linear-reservoir part T_r. Defaults to 0.5 per the spec.
    pub reservoir_fraction_beta: f64,
}

/// The parameters that determine a UH cache's validity; rebuild only when this changes. Derives
/// `Serialize`/`Deserialize` so a collaborator can stamp it onto a binary UH cache file and check
/// it before trusting the cache over rebuilding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UhFingerprint {
    velocity_avg: OrderedFloat<f64>,
    velocity_min: OrderedFloat<f64>,
    velocity_max: OrderedFloat<f64>,
    slope_exponent_b: OrderedFloat<f64>,
    area_exponent_c: OrderedFloat<f64>,
    step_time_hours: OrderedFloat<f64>,
}

impl UhFingerprint {
    pub fn new(params: &UhParams) -> Self {
        UhFingerprint {
            velocity_avg: OrderedFloat(params.velocity_avg_m_h),
            velocity_min: OrderedFloat(params.velocity_min_m_h),
            velocity_max: OrderedFloat(params.velocity_max_m_h),
            slope_exponent_b: OrderedFloat(params.slope_exponent_b),
            area_exponent_c: OrderedFloat(params.area_exponent_c),
            step_time_hours: OrderedFloat(params.step_time_hours),
        }
    }
}

/// Per-cell flow velocity derived from the slope-area term, clamped to `[V_min, V_max]`.
pub fn compute_velocity_field(static_grid: &Grid<CellStatic>, params: &UhParams) -> Grid<f64> {
    let cellsize = static_grid.cellsize_m();
    let mut slope_area = vec![0.0f64; static_grid.len()];
    let mut sum_sa = 0.0f64;
    let mut count = 0usize;

    for (row, col) in static_grid.iter_valid_coords() {
        let here = static_grid.get(row, col).unwrap();
        let slope = match static_grid.neighbor_coord(row, col, here.flow_direction) {
            Some((dr, dc)) => match static_grid.get(dr, dc) {
                Some(down) => {
                    let l_flow = cellsize * here.flow_direction.distance_factor();
                    (here.elevation_m - down.elevation_m).abs() / l_flow
                }
                None => 0.0,
            },
            None => 0.0,
        };
        let area_m2 = here.flow_accumulation as f64 * cellsize * cellsize;
        let sa = slope.powf(params.slope_exponent_b) * area_m2.powf(params.area_exponent_c);
        let idx = row * static_grid.ncols() + col;
        slope_area[idx] = sa;
        sum_sa += sa;
        count += 1;
    }

    let sa_avg = if count > 0 { sum_sa / count as f64 } else { 1.0 };
    let mut cells = vec![None; static_grid.len()];
    for (row, col) in static_grid.iter_valid_coords() {
        let idx = row * static_grid.ncols() + col;
        let velocity = if sa_avg > 0.0 {
            (params.velocity_avg_m_h * slope_area[idx] / sa_avg).clamp(params.velocity_min_m_h, params.velocity_max_m_h)
        } else {
            params.velocity_avg_m_h.clamp(params.velocity_min_m_h, params.velocity_max_m_h)
        };
        cells[idx] = Some(velocity);
    }
    Grid::new(static_grid.nrows(), static_grid.ncols(), cellsize, static_grid.origin().0, static_grid.origin().1, cells)
}

/// D8-traces every cell's flow path downstream, recording the flow time (h) accumulated at the
/// point the path passes through each outlet cell it reaches before leaving the grid.
fn flow_times_to_outlets(static_grid: &Grid<CellStatic>, velocity_field: &Grid<f64>) -> HashMap<(usize, usize), Vec<((usize, usize), f64)>> {
    let cellsize = static_grid.cellsize_m();
    let mut result: HashMap<(usize, usize), Vec<((usize, usize), f64)>> = HashMap::new();

    for origin in static_grid.iter_valid_coords() {
        let mut hits = Vec::new();
        let mut cur = origin;
        let mut elapsed_h = 0.0;
        let safety_limit = static_grid.len() + 1;
        for _ in 0..safety_limit {
            let here = static_grid.get(cur.0, cur.1).unwrap();
            if here.is_outlet {
                hits.push((cur, elapsed_h));
            }
            let velocity = *velocity_field.get(cur.0, cur.1).unwrap_or(&here_fallback_velocity());
            let l_flow = cellsize * here.flow_direction.distance_factor();
            elapsed_h += l_flow / velocity;
            match static_grid.neighbor_coord(cur.0, cur.1, here.flow_direction) {
                Some(next) if static_grid.get(next.0, next.1).is_some() => cur = next,
                _ => break,
            }
        }
        if !hits.is_empty() {
            result.insert(origin, hits);
        }
    }
    result
}

fn here_fallback_velocity() -> f64 {
    1.0
}

/// The UH ordinate at bin index `t` (so `t*step_time` is the bin's left edge) for a cell whose
/// total flow time to the outlet is `t_flow_hours`.
pub fn uh_ordinate(t: u64, step_hours: f64, t_flow_hours: f64, reservoir_fraction_beta: f64) -> f64 {
    let t_s = t_flow_hours * (1.0 - reservoir_fraction_beta);
    let t_r = t_flow_hours * reservoir_fraction_beta;
    let bin_right_edge = (t as f64 + 1.0) * step_hours;

    if bin_right_edge < t_s {
        0.0
    } else if bin_right_edge <= t_s + step_hours {
        (1.0 / step_hours) * (std::f64::consts::E - (1.0 - (bin_right_edge - t_s) / t_r).exp())
    } else {
        (1.0 / step_hours) * (-(bin_right_edge - t_s) / t_r).exp() * ((step_hours / t_r).exp() - 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutletUh {
    pub outlet_row: usize,
    pub outlet_col: usize,
    /// Cells contributing to this outlet, row-major bitset.
    pub mask: Vec<bool>,
    /// Per-masked-cell UH ordinate series, each summing to `1/step_time_hours`.
    pub ordinates: HashMap<(usize, usize), Vec<f64>>,
    pub fingerprint: UhFingerprint,
}

impl OutletUh {
    pub fn contains(&self, row: usize, col: usize, ncols: usize) -> bool {
        self.mask[row * ncols + col]
    }
}

/// Builds the per-outlet UH set for a grid. One-time construction; cache by [`UhFingerprint`].
pub fn build(static_grid: &Grid<CellStatic>, params: &UhParams) -> Vec<OutletUh> {
    let velocity_field = compute_velocity_field(static_grid, params);
    let hits = flow_times_to_outlets(static_grid, &velocity_field);
    let fingerprint = UhFingerprint::new(params);

    let mut outlets: Vec<(usize, usize)> = static_grid
        .iter_valid_coords()
        .filter(|&(r, c)| static_grid.get(r, c).unwrap().is_outlet)
        .collect();
    outlets.sort_unstable();

    let mut t_flow_max = 0.0f64;
    for cell_hits in hits.values() {
        for &(_, t) in cell_hits {
            t_flow_max = t_flow_max.max(t);
        }
    }
    let uh_steps = (4.0 * (t_flow_max / params.step_time_hours).floor() + 1.0) as u64;

    outlets
        .into_iter()
        .map(|(outlet_row, outlet_col)| {
            let mut mask = vec![false; static_grid.len()];
            let mut ordinates = HashMap::new();

            for (&origin, cell_hits) in hits.iter() {
                if let Some(&(_, t_flow)) = cell_hits.iter().find(|&&(outlet, _)| outlet == (outlet_row, outlet_col)) {
                    mask[origin.0 * static_grid.ncols() + origin.1] = true;

                    let mut series: Vec<f64> = (0..uh_steps)
                        .map(|t| uh_ordinate(t, params.step_time_hours, t_flow, params.reservoir_fraction_beta))
                        .collect();
                    let sum: f64 = series.iter().sum::<f64>() * params.step_time_hours;
                    if sum > 0.0 {
                        let target_sum = 1.0 / params.step_time_hours;
                        let current_sum: f64 = series.iter().sum();
                        let scale = target_sum / current_sum;
                        for v in series.iter_mut() {
                            *v *= scale;
                        }
                    }
                    ordinates.insert(origin, series);
                }
            }

            OutletUh {
                outlet_row,
                outlet_col,
                mask,
                ordinates,
                fingerprint,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Direction8;

    fn plane_grid(n: usize, cellsize: f64) -> Grid<CellStatic> {
        let mut cells = Vec::with_capacity(n * n);
        for row in 0..n {
            for col in 0..n {
                let is_outlet = row == n - 1 && col == n - 1;
                cells.push(Some(CellStatic {
                    elevation_m: ((n - row) + (n - col)) as f64,
                    flow_direction: if col < n - 1 { Direction8::E } else { Direction8::S },
                    flow_accumulation: 1,
                    is_stream: false,
                    is_outlet,
                    vegetation_class: 1,
                    canopy_fraction: 0.0,
                    soil_class: 1,
                    latitude_deg: 45.0,
                }));
            }
        }
        // The last row routes east except the final cell, which has no downstream (the corner).
        for col in 0..n - 1 {
            let idx = (n - 1) * n + col;
            cells[idx] = Some(CellStatic {
                flow_direction: Direction8::E,
                ..cells[idx].unwrap()
            });
        }
        Grid::new(n, n, cellsize, 0.0, 0.0, cells)
    }

    fn params() -> UhParams {
        UhParams {
            velocity_avg_m_h: 1.0,
            velocity_min_m_h: 0.1,
            velocity_max_m_h: 5.0,
            slope_exponent_b: 0.3,
            area_exponent_c: 0.2,
            step_time_hours: 1.0,
            reservoir_fraction_beta: 0.5,
        }
    }

    #[test]
    fn velocity_field_is_clamped() {
        let grid = plane_grid(10, 100.0);
        let field = compute_velocity_field(&grid, &params());
        for (row, col) in grid.iter_valid_coords() {
            let v = *field.get(row, col).unwrap();
            assert!(v >= params().velocity_min_m_h && v <= params().velocity_max_m_h);
        }
    }

    #[test]
    fn every_cell_drains_into_the_single_outlet() {
        let grid = plane_grid(10, 100.0);
        let outlets = build(&grid, &params());
        assert_eq!(outlets.len(), 1);
        let outlet = &outlets[0];
        assert!(outlet.mask.iter().filter(|&&m| m).count() >= grid.len() - 1);
    }

    #[test]
    fn uh_series_sums_to_one_over_delta_t() {
        let grid = plane_grid(10, 100.0);
        let outlets = build(&grid, &params());
        let outlet = &outlets[0];
        for series in outlet.ordinates.values() {
            let sum: f64 = series.iter().sum::<f64>() * params().step_time_hours;
            assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
        }
    }
}
