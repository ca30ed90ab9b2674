//! Elevation-ordered cell traversal
//!
//! Single-pass flow routing needs every cell's upstream cells processed
//! first. Visiting cells from highest to lowest elevation guarantees that,
//! because flow only moves to strictly lower neighbours.
//!
//! The index is an explicit value owned by the caller. It is built once per
//! pass and must not outlive changes to the surface it was built from.

use accuflow_core::{Error, GridAccess, Result};

/// Permutation of the valid cells of a surface, highest first.
///
/// Cells of equal elevation keep row-major order, so identical input always
/// gives the identical traversal.
#[derive(Debug, Clone)]
pub struct SortedIndex {
    rows: usize,
    cols: usize,
    /// Flat row-major cell offsets, descending elevation
    order: Vec<usize>,
}

impl SortedIndex {
    /// Sort all non-no-data cells of `surface` by descending elevation.
    ///
    /// Fails with [`Error::EmptySurface`] when no valid cell exists.
    pub fn build<G: GridAccess + ?Sized>(surface: &G) -> Result<Self> {
        let (rows, cols) = surface.shape();

        let mut cells: Vec<(usize, f64)> = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                if let Some(z) = surface.valid_value(row, col) {
                    cells.push((row * cols + col, z));
                }
            }
        }

        if cells.is_empty() {
            return Err(Error::EmptySurface);
        }

        // Stable sort: ties stay in the row-major order they were pushed in.
        cells.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(Self {
            rows,
            cols,
            order: cells.into_iter().map(|(idx, _)| idx).collect(),
        })
    }

    /// Number of indexed (valid) cells
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Shape of the surface the index was built from
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// (row, col) of the cell at `rank`, 0 being the highest.
    ///
    /// # Panics
    /// If `rank >= self.len()`.
    pub fn at(&self, rank: usize) -> (usize, usize) {
        let idx = self.order[rank];
        (idx / self.cols, idx % self.cols)
    }

    /// Cells from highest to lowest; `.rev()` walks upward.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, usize)> + ExactSizeIterator + '_ {
        let cols = self.cols;
        self.order.iter().map(move |&idx| (idx / cols, idx % cols))
    }

    /// Reject use against a surface of a different shape.
    pub fn check_surface<G: GridAccess + ?Sized>(&self, surface: &G) -> Result<()> {
        Error::check_shape(surface.shape(), self.shape())
    }
}
