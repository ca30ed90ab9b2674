//! GeoTIFF reading/writing on top of the `tiff` crate.
//!
//! Georeferencing comes from the ModelTiepoint + ModelPixelScale tags and
//! the no-data value from the GDAL_NODATA tag. Rotated transforms and
//! projection keys are not interpreted.

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster, RasterElement};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{Gray32Float, Gray64Float};
use tiff::encoder::{ImageEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    /// Store cells as 32-bit floats instead of 64-bit.
    pub float32: bool,
}

/// Read the first band of a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

/// Read a GeoTIFF from an in-memory buffer into a Raster
pub fn read_geotiff_from_buffer<T>(data: &[u8]) -> Result<Raster<T>>
where
    T: RasterElement,
{
    decode_geotiff(Cursor::new(data))
}

fn cast_all<S, T>(values: impl IntoIterator<Item = S>) -> Vec<T>
where
    S: num_traits::NumCast,
    T: RasterElement,
{
    values
        .into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

fn tiff_err(context: &'static str) -> impl Fn(tiff::TiffError) -> Error {
    move |e| Error::Other(format!("{}: {}", context, e))
}

fn decode_geotiff<T, R>(reader: R) -> Result<Raster<T>>
where
    T: RasterElement,
    R: std::io::Read + std::io::Seek,
{
    let mut decoder = Decoder::new(reader).map_err(tiff_err("TIFF decode error"))?;
    let (width, height) = decoder.dimensions().map_err(tiff_err("Cannot read dimensions"))?;
    let (rows, cols) = (height as usize, width as usize);

    let data: Vec<T> = match decoder.read_image().map_err(tiff_err("Cannot read image data"))? {
        DecodingResult::F32(buf) => cast_all(buf),
        DecodingResult::F64(buf) => cast_all(buf),
        DecodingResult::U8(buf) => cast_all(buf),
        DecodingResult::U16(buf) => cast_all(buf),
        DecodingResult::U32(buf) => cast_all(buf),
        DecodingResult::I8(buf) => cast_all(buf),
        DecodingResult::I16(buf) => cast_all(buf),
        DecodingResult::I32(buf) => cast_all(buf),
        _ => return Err(Error::UnsupportedDataType("64-bit integer band".into())),
    };

    // Tiled or multi-band files decode to a different length.
    let mut raster = Raster::from_vec(data, rows, cols)?;
    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_nodata(read_nodata(&mut decoder));
    Ok(raster)
}

fn read_nodata<T, R>(decoder: &mut Decoder<R>) -> Option<T>
where
    T: RasterElement,
    R: std::io::Read + std::io::Seek,
{
    let text = decoder.get_tag_ascii_string(Tag::Unknown(GDAL_NODATA)).ok()?;
    let value: f64 = text.trim_matches(char::from(0)).trim().parse().ok()?;
    num_traits::cast(value)
}

fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::Unknown(MODEL_PIXEL_SCALE))
        .ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(MODEL_TIEPOINT)).ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }

    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];

    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

/// Write a Raster to a GeoTIFF file
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    encode_geotiff(raster, BufWriter::new(file), options.unwrap_or_default())
}

/// Write a Raster to an in-memory GeoTIFF buffer
pub fn write_geotiff_to_buffer<T>(raster: &Raster<T>, options: Option<GeoTiffOptions>) -> Result<Vec<u8>>
where
    T: RasterElement,
{
    let mut buf = Vec::new();
    encode_geotiff(raster, Cursor::new(&mut buf), options.unwrap_or_default())?;
    Ok(buf)
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: std::io::Write + std::io::Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(tiff_err("TIFF encoder error"))?;

    if options.float32 {
        let data: Vec<f32> = cast_all(raster.data().iter().copied());
        write_band::<_, Gray32Float, _>(&mut encoder, raster, &data)
    } else {
        let data: Vec<f64> = cast_all(raster.data().iter().copied());
        write_band::<_, Gray64Float, _>(&mut encoder, raster, &data)
    }
}

fn write_band<W, C, T>(
    encoder: &mut TiffEncoder<W>,
    raster: &Raster<T>,
    data: &[C::Inner],
) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
    C: tiff::encoder::colortype::ColorType,
    [C::Inner]: tiff::encoder::TiffValue,
    T: RasterElement,
{
    let (rows, cols) = raster.shape();
    let mut image = encoder
        .new_image::<C>(cols as u32, rows as u32)
        .map_err(tiff_err("Cannot create TIFF image"))?;
    write_geo_tags(&mut image, raster)?;
    image.write_data(data).map_err(tiff_err("Cannot write image data"))
}

fn write_geo_tags<W, C, K, T>(image: &mut ImageEncoder<'_, W, C, K>, raster: &Raster<T>) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
    C: tiff::encoder::colortype::ColorType,
    K: TiffKind,
    T: RasterElement,
{
    let gt = raster.transform();
    let tag_err = tiff_err("Cannot write GeoTIFF tag");

    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &scale[..])
        .map_err(&tag_err)?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])
        .map_err(&tag_err)?;

    // Version 1.1.0 with two keys: projected model, pixel-is-area.
    let geokeys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, 1, 1025, 0, 1, 1];
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), &geokeys[..])
        .map_err(&tag_err)?;

    if let Some(nd) = raster.nodata().and_then(|v| v.to_f64()) {
        let text = if nd.is_nan() { "nan".to_string() } else { nd.to_string() };
        image
            .encoder()
            .write_tag(Tag::Unknown(GDAL_NODATA), text.as_str())
            .map_err(&tag_err)?;
    }

    Ok(())
}
