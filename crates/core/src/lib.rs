//! # accuflow Core
//!
//! Core types, traits and I/O shared by the accuflow routing tools.
//!
//! This crate provides:
//! - `Raster<T>`: Generic georeferenced raster grid
//! - `GridAccess`: The narrow cell-level interface the routing engine works through
//! - `Direction`: D8 neighbour codes and their offsets
//! - `Progress`: Cooperative cancellation for long passes
//! - I/O for single-band GeoTIFF rasters

pub mod error;
pub mod io;
pub mod progress;
pub mod raster;

pub use error::{Error, Result};
pub use progress::{NoProgress, Progress};
pub use raster::{Direction, GeoTransform, GridAccess, Raster, RasterElement};

pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::progress::{NoProgress, Progress};
    pub use crate::raster::{Direction, GeoTransform, GridAccess, Raster, RasterElement};
    pub use crate::Algorithm;
}

/// Core trait for the routing tools.
///
/// A tool is a function of its input rasters and a parameter set. Hosts that
/// drive tools generically (batch runners, plugin shells) go through this trait.
pub trait Algorithm {
    type Input;
    type Output;
    type Params: Default;
    type Error: std::error::Error;

    /// Short identifier, e.g. for log lines
    fn name(&self) -> &'static str;

    /// One-line summary shown by hosts
    fn description(&self) -> &'static str;

    fn execute(
        &self,
        input: Self::Input,
        params: Self::Params,
    ) -> std::result::Result<Self::Output, Self::Error>;

    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
