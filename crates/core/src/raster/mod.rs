//! Raster data structures and cell-level access

mod access;
mod direction;
mod element;
mod geotransform;
mod grid;

pub use access::GridAccess;
pub use direction::Direction;
pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::{Raster, RasterStatistics};
