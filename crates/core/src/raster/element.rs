//! Cell value types

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Cell value of a [`Raster`](super::Raster).
///
/// The routing engine works on `f64`. Integer cell types exist so that
/// GeoTIFF bands stored as integers can be read without a lossy detour.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Filler for grids without a configured no-data value
    fn default_nodata() -> Self;

    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_raster_element_int {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::MIN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata.map_or(false, |nd| *self == nd)
            }
        }
    )*};
}

macro_rules! impl_raster_element_float {
    ($($t:ty),*) => {$(
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            // NaN is no-data regardless of the configured value.
            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) if nd.is_nan() => false,
                    Some(nd) => (self - nd).abs() < <$t>::EPSILON * 100.0,
                    None => false,
                }
            }
        }
    )*};
}

impl_raster_element_int!(i8, u8, i16, u16, i32, u32);
impl_raster_element_float!(f32, f64);
