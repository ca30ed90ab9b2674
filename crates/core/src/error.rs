//! Error types for accuflow

use thiserror::Error;

/// Main error type for accuflow operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Missing input grid '{name}': {reason}")]
    MissingInput { name: &'static str, reason: String },

    #[error("Surface has no valid cells to sort")]
    EmptySurface,

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shape check shared by every tool that reads several aligned grids.
    pub fn check_shape(expected: (usize, usize), actual: (usize, usize)) -> Result<()> {
        if expected != actual {
            return Err(Error::SizeMismatch {
                er: expected.0,
                ec: expected.1,
                ar: actual.0,
                ac: actual.1,
            });
        }
        Ok(())
    }
}

/// Result type alias for accuflow operations
pub type Result<T> = std::result::Result<T, Error>;
