use crate::error::{DomainError, ErrorLocation};

/// One of the eight D8 compass directions a cell can drain into.
///
/// The integer codes match the source raster convention: E=1, SE=2, S=4, SW=8, W=16, NW=32,
/// N=64, NE=128. `ALL` lists them in clockwise order starting from East, which is also the
/// order used to index the 8-neighbour arrays in [`SaturatedSoil`](crate::saturated) and
/// [`UHBuilder`](crate::uh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction8 {
    E,
    SE,
    S,
    SW,
    W,
    NW,
    N,
    NE,
}

impl Direction8 {
    pub const ALL: [Direction8; 8] = [
        Direction8::E,
        Direction8::SE,
        Direction8::S,
        Direction8::SW,
        Direction8::W,
        Direction8::NW,
        Direction8::N,
        Direction8::NE,
    ];

    /// Decode the raster's D8 flow-direction code into a direction. Any other value is a
    /// domain error; the spec explicitly forbids silent substitution.
    pub fn from_code(code: i32, location: ErrorLocation) -> Result<Self, DomainError> {
        match code {
            1 => Ok(Direction8::E),
            2 => Ok(Direction8::SE),
            4 => Ok(Direction8::S),
            8 => Ok(Direction8::SW),
            16 => Ok(Direction8::W),
            32 => Ok(Direction8::NW),
            64 => Ok(Direction8::N),
            128 => Ok(Direction8::NE),
            other => Err(DomainError::IllegalFlowDirection(other, location)),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Direction8::E => 1,
            Direction8::SE => 2,
            Direction8::S => 4,
            Direction8::SW => 8,
            Direction8::W => 16,
            Direction8::NW => 32,
            Direction8::N => 64,
            Direction8::NE => 128,
        }
    }

    /// `(d_row, d_col)` offset to the neighbour this direction points at. Row 0 is the
    /// northernmost row, so southward motion is `+1` in row.
    pub fn offset(self) -> (isize, isize) {
        match self {
            Direction8::E => (0, 1),
            Direction8::SE => (1, 1),
            Direction8::S => (1, 0),
            Direction8::SW => (1, -1),
            Direction8::W => (0, -1),
            Direction8::NW => (-1, -1),
            Direction8::N => (-1, 0),
            Direction8::NE => (-1, 1),
        }
    }

    /// The distance factor to scale `cellsize_m` by: 1 for cardinal, sqrt(2) for diagonal.
    pub fn distance_factor(self) -> f64 {
        match self {
            Direction8::E | Direction8::S | Direction8::W | Direction8::N => 1.0,
            Direction8::SE | Direction8::SW | Direction8::NW | Direction8::NE => std::f64::consts::SQRT_2,
        }
    }
}

/// Static, per-run-immutable attributes of one land cell.
#[derive(Debug, Clone, Copy)]
pub struct CellStatic {
    pub elevation_m: f64,
    pub flow_direction: Direction8,
    pub flow_accumulation: u32,
    pub is_stream: bool,
    pub is_outlet: bool,
    pub vegetation_class: i32,
    pub canopy_fraction: f64,
    pub soil_class: i32,
    /// Latitude of the cell centre (decimal degrees), derived by the collaborator layer from
    /// the grid's projection and `(xllcorner, yllcorner)`; consumed by [`crate::radiation`].
    pub latitude_deg: f64,
}

/// A single owned 2-D buffer (row-major) with nodata-aware indexing by `(row, col)`.
///
/// Row 0 is the northernmost row; column 0 is the westmost, matching the raster convention of
/// the static terrain inputs.
#[derive(Debug, Clone)]
pub struct Grid<T> {
    nrows: usize,
    ncols: usize,
    cellsize_m: f64,
    xllcorner: f64,
    yllcorner: f64,
    cells: Vec<Option<T>>,
}

impl<T> Grid<T> {
    pub fn new(nrows: usize, ncols: usize, cellsize_m: f64, xllcorner: f64, yllcorner: f64, cells: Vec<Option<T>>) -> Self {
        assert_eq!(cells.len(), nrows * ncols, "cell buffer must have nrows*ncols entries");
        Grid {
            nrows,
            ncols,
            cellsize_m,
            xllcorner,
            yllcorner,
            cells,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn cellsize_m(&self) -> f64 {
        self.cellsize_m
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.xllcorner, self.yllcorner)
    }

    fn index(&self, row: usize, col: usize) -> usize {
        row * self.ncols + col
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        self.cells.get(self.index(row, col)).and_then(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut T> {
        let idx = self.index(row, col);
        self.cells.get_mut(idx).and_then(|c| c.as_mut())
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        let idx = self.index(row, col);
        self.cells[idx] = Some(value);
    }

    /// In-grid `(row, col)` the given direction leads to from `(row, col)`, or `None` if the
    /// direction leaves the grid.
    pub fn neighbor_coord(&self, row: usize, col: usize, dir: Direction8) -> Option<(usize, usize)> {
        let (dr, dc) = dir.offset();
        let nr = row as isize + dr;
        let nc = col as isize + dc;
        if nr < 0 || nc < 0 || nr as usize >= self.nrows || nc as usize >= self.ncols {
            None
        } else {
            Some((nr as usize, nc as usize))
        }
    }

    /// Iterate `(row, col)` pairs in row-major order, skipping nodata cells.
    pub fn iter_valid_coords(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.nrows).flat_map(move |row| {
            (0..self.ncols).filter_map(move |col| if self.get(row, col).is_some() { Some((row, col)) } else { None })
        })
    }

    pub fn len(&self) -> usize {
        self.nrows * self.ncols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> ErrorLocation {
        ErrorLocation::Cell { row: 0, col: 0, step: 0 }
    }

    #[test]
    fn direction_round_trips_through_its_code() {
        for dir in Direction8::ALL {
            assert_eq!(Direction8::from_code(dir.code(), loc()).unwrap(), dir);
        }
    }

    #[test]
    fn illegal_code_is_a_domain_error() {
        assert!(Direction8::from_code(3, loc()).is_err());
        assert!(Direction8::from_code(0, loc()).is_err());
    }

    #[test]
    fn diagonal_directions_scale_by_sqrt2() {
        assert_eq!(Direction8::E.distance_factor(), 1.0);
        assert!((Direction8::SE.distance_factor() - std::f64::consts::SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn neighbor_coord_is_none_at_grid_edge() {
        let grid: Grid<i32> = Grid::new(2, 2, 100.0, 0.0, 0.0, vec![Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(grid.neighbor_coord(0, 0, Direction8::N), None);
        assert_eq!(grid.neighbor_coord(0, 0, Direction8::S), Some((1, 0)));
    }

    #[test]
    fn iter_valid_coords_skips_nodata() {
        let grid: Grid<i32> = Grid::new(1, 3, 100.0, 0.0, 0.0, vec![Some(1), None, Some(3)]);
        let coords: Vec<_> = grid.iter_valid_coords().collect();
        assert_eq!(coords, vec![(0, 0), (0, 2)]);
    }
}
