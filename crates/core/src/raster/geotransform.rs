//! North-up georeferencing

use serde::{Deserialize, Serialize};

use super::Direction;

/// Placement of a north-up grid: upper-left corner and cell extents.
///
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y + row * pixel_height
/// ```
///
/// `pixel_height` is negative for the usual top-down row order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Cell width; rows are assumed to have the same extent
    pub fn cell_size(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Center of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Distance between the centers of a cell and its neighbour in `dir`.
    ///
    /// North/south steps use the pixel height, east/west steps the pixel
    /// width, diagonals the hypotenuse of both. A zero pixel height falls
    /// back to square cells.
    pub fn neighbor_distance(&self, dir: Direction) -> f64 {
        let dx = self.pixel_width.abs();
        let dy = if self.pixel_height == 0.0 {
            dx
        } else {
            self.pixel_height.abs()
        };

        match dir.offset() {
            (0, _) => dx,
            (_, 0) => dy,
            _ => dx.hypot(dy),
        }
    }

    /// (min_x, min_y, max_x, max_y) of a `rows` x `cols` grid
    pub fn bounds(&self, rows: usize, cols: usize) -> (f64, f64, f64, f64) {
        let x1 = self.origin_x + cols as f64 * self.pixel_width;
        let y1 = self.origin_y + rows as f64 * self.pixel_height;
        (
            self.origin_x.min(x1),
            self.origin_y.min(y1),
            self.origin_x.max(x1),
            self.origin_y.max(y1),
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}
