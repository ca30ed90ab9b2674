//! Cell-level read/write access used by the routing engine
//!
//! Routing code never allocates or frees the grids it works on; it reads and
//! writes single cells through [`GridAccess`]. Callers must pass in-bounds
//! coordinates to the value accessors; [`GridAccess::neighbor`] is the
//! checked way to step to an adjacent cell.

use super::{Direction, Raster};

/// Read/write access to a grid of `f64` cells with a no-data sentinel.
pub trait GridAccess {
    /// (rows, cols)
    fn shape(&self) -> (usize, usize);

    /// Value at an in-bounds cell
    fn value(&self, row: usize, col: usize) -> f64;

    /// Overwrite an in-bounds cell
    fn set_value(&mut self, row: usize, col: usize, value: f64);

    /// Whether an in-bounds cell holds no data
    fn is_nodata_cell(&self, row: usize, col: usize) -> bool;

    /// Mark an in-bounds cell as no-data
    fn set_nodata_cell(&mut self, row: usize, col: usize);

    /// Center-to-center distance to the neighbour in `dir`
    fn neighbor_length(&self, dir: Direction) -> f64;

    fn add_value(&mut self, row: usize, col: usize, delta: f64) {
        let v = self.value(row, col);
        self.set_value(row, col, v + delta);
    }

    fn in_bounds(&self, row: isize, col: isize) -> bool {
        let (rows, cols) = self.shape();
        row >= 0 && col >= 0 && (row as usize) < rows && (col as usize) < cols
    }

    /// The neighbour of (row, col) in `dir`, or `None` off the grid.
    fn neighbor(&self, dir: Direction, row: usize, col: usize) -> Option<(usize, usize)> {
        let (nr, nc) = dir.step(row, col);
        if self.in_bounds(nr, nc) {
            Some((nr as usize, nc as usize))
        } else {
            None
        }
    }

    /// Value at a cell that is in bounds and not no-data
    fn valid_value(&self, row: usize, col: usize) -> Option<f64> {
        if self.is_nodata_cell(row, col) {
            None
        } else {
            Some(self.value(row, col))
        }
    }
}

impl GridAccess for Raster<f64> {
    fn shape(&self) -> (usize, usize) {
        Raster::shape(self)
    }

    #[inline]
    fn value(&self, row: usize, col: usize) -> f64 {
        self.data()[(row, col)]
    }

    #[inline]
    fn set_value(&mut self, row: usize, col: usize, value: f64) {
        self.data_mut()[(row, col)] = value;
    }

    #[inline]
    fn is_nodata_cell(&self, row: usize, col: usize) -> bool {
        self.is_nodata(self.data()[(row, col)])
    }

    fn set_nodata_cell(&mut self, row: usize, col: usize) {
        let nd = self.nodata_or_default();
        self.data_mut()[(row, col)] = nd;
    }

    fn neighbor_length(&self, dir: Direction) -> f64 {
        self.transform().neighbor_distance(dir)
    }
}
