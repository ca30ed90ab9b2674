//! Georeferenced grid of cell values

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterElement};
use ndarray::Array2;

/// A georeferenced 2D raster grid.
///
/// Values are stored row-major as `Array2<T>`, indexed `(row, col)`, next to
/// the grid's [`GeoTransform`] and an optional no-data value. Floating-point
/// grids treat NaN as no-data regardless of the configured value.
///
/// # Example
///
/// ```
/// use accuflow_core::Raster;
///
/// let mut raster: Raster<f64> = Raster::new(10, 10);
/// raster.set(2, 3, 42.0).unwrap();
/// assert_eq!(raster.get(2, 3).unwrap(), 42.0);
/// ```
#[derive(Debug, Clone)]
pub struct Raster<T: RasterElement> {
    data: Array2<T>,
    transform: GeoTransform,
    nodata: Option<T>,
}

impl<T: RasterElement> Raster<T> {
    /// Zero-filled raster
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::from_array(Array2::zeros((rows, cols)))
    }

    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self::from_array(Array2::from_elem((rows, cols), value))
    }

    /// Raster from row-major values
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        let array = Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    pub fn from_array(data: Array2<T>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            nodata: None,
        }
    }

    /// Same shape, transform and no-data value, every cell set to `fill_value`
    pub fn like(&self, fill_value: T) -> Self {
        Self {
            data: Array2::from_elem(self.data.dim(), fill_value),
            transform: self.transform,
            nodata: self.nodata,
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn out_of_bounds(&self, row: usize, col: usize) -> Error {
        Error::IndexOutOfBounds {
            row,
            col,
            rows: self.rows(),
            cols: self.cols(),
        }
    }

    /// Checked read
    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.data
            .get((row, col))
            .copied()
            .ok_or_else(|| self.out_of_bounds(row, col))
    }

    /// Checked write
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let err = self.out_of_bounds(row, col);
        let cell = self.data.get_mut((row, col)).ok_or(err)?;
        *cell = value;
        Ok(())
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn set_nodata(&mut self, nodata: Option<T>) {
        self.nodata = nodata;
    }

    /// Value written into cells that hold no data
    pub fn nodata_or_default(&self) -> T {
        self.nodata.unwrap_or_else(T::default_nodata)
    }

    pub fn cell_size(&self) -> f64 {
        self.transform.cell_size()
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.rows(), self.cols())
    }

    /// Map coordinates of the center of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.cell_center(row, col)
    }

    pub fn is_nodata(&self, value: T) -> bool {
        value.is_nodata(self.nodata)
    }

    /// Checked no-data test
    pub fn is_nodata_at(&self, row: usize, col: usize) -> Result<bool> {
        self.get(row, col).map(|v| self.is_nodata(v))
    }

    fn valid_values(&self) -> impl Iterator<Item = T> + '_ {
        self.data.iter().copied().filter(move |&v| !self.is_nodata(v))
    }

    /// Sum of all valid cells
    pub fn sum(&self) -> f64 {
        self.valid_values().filter_map(RasterElement::to_f64).sum()
    }

    /// Min, max and mean over the valid cells
    pub fn statistics(&self) -> RasterStatistics<T> {
        let mut stats = RasterStatistics {
            min: None,
            max: None,
            mean: None,
            valid_count: 0,
            nodata_count: 0,
        };
        let mut sum = 0.0;

        for v in self.valid_values() {
            if stats.min.map_or(true, |m| v < m) {
                stats.min = Some(v);
            }
            if stats.max.map_or(true, |m| v > m) {
                stats.max = Some(v);
            }
            if let Some(x) = v.to_f64() {
                sum += x;
            }
            stats.valid_count += 1;
        }

        stats.nodata_count = self.len() - stats.valid_count;
        if stats.valid_count > 0 {
            stats.mean = Some(sum / stats.valid_count as f64);
        }
        stats
    }
}

/// Summary of the valid cells of a raster
#[derive(Debug, Clone, PartialEq)]
pub struct RasterStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub nodata_count: usize,
}
