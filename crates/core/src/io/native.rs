//! Native GeoTIFF reading/writing built on the `tiff` crate.
//!
//! Supports the subset of GeoTIFF the pipelines exchange: single band,
//! north-up rasters georeferenced by ModelPixelScale + ModelTiepoint, CRS as
//! an EPSG code in the GeoKey directory, GDAL nodata and GDAL metadata tags.

use crate::crs::{CRS, EPSG_WGS84};
use crate::error::{Error, Result};
use crate::io::GeoTiffMetadata;
use crate::raster::{GeoTransform, Raster, RasterElement};
use num_traits::NumCast;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::{ColorType, Gray8, Gray32Float, GrayI16, GrayI32};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GDAL_METADATA_TAG: u16 = 42112;
const GDAL_NODATA_TAG: u16 = 42113;

/// Tags the decoder knows by name come back as named variants, never `Unknown`
fn geotiff_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

/// On-disk sample type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleFormat {
    #[default]
    Float32,
    Int32,
    Int16,
    UInt8,
}

/// Options for writing GeoTIFF files
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    pub sample_format: SampleFormat,
    /// Items written to the GDAL_METADATA tag
    pub metadata: GeoTiffMetadata,
}

impl GeoTiffOptions {
    pub fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    pub fn with_metadata(mut self, metadata: GeoTiffMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Read the first band of a GeoTIFF file into a Raster
pub fn read_geotiff<T, P>(path: P) -> Result<Raster<T>>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    read_geotiff_with_metadata(path).map(|(raster, _)| raster)
}

/// Read a GeoTIFF file together with its GDAL metadata items
pub fn read_geotiff_with_metadata<T, P>(path: P) -> Result<(Raster<T>, GeoTiffMetadata)>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())?;
    decode_geotiff(BufReader::new(file))
}

fn cast_samples<S, T>(buf: Vec<S>) -> Vec<T>
where
    S: NumCast + Copy,
    T: RasterElement,
{
    buf.into_iter()
        .map(|v| num_traits::cast(v).unwrap_or_else(T::default_nodata))
        .collect()
}

fn decode_geotiff<T, R>(reader: R) -> Result<(Raster<T>, GeoTiffMetadata)>
where
    T: RasterElement,
    R: Read + Seek,
{
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let rows = height as usize;
    let cols = width as usize;

    let data: Vec<T> = match decoder.read_image()? {
        DecodingResult::F32(buf) => cast_samples(buf),
        DecodingResult::F64(buf) => cast_samples(buf),
        DecodingResult::U8(buf) => cast_samples(buf),
        DecodingResult::U16(buf) => cast_samples(buf),
        DecodingResult::U32(buf) => cast_samples(buf),
        DecodingResult::I8(buf) => cast_samples(buf),
        DecodingResult::I16(buf) => cast_samples(buf),
        DecodingResult::I32(buf) => cast_samples(buf),
        _ => {
            return Err(Error::UnsupportedDataType(
                "Unsupported TIFF pixel format".to_string(),
            ));
        }
    };

    if data.len() != rows * cols {
        // Multi-band images decode interleaved; only single band is supported
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut raster = Raster::from_vec(data, rows, cols)?;

    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    raster.set_crs(read_crs(&mut decoder));

    if let Ok(text) = decoder.get_tag_ascii_string(geotiff_tag(GDAL_NODATA_TAG)) {
        let text = text.trim_matches(char::from(0)).trim();
        if let Ok(value) = text.parse::<f64>() {
            if let Some(nodata) = num_traits::cast::<f64, T>(value) {
                raster.set_nodata(Some(nodata));
            }
        }
    }

    let metadata = decoder
        .get_tag_ascii_string(geotiff_tag(GDAL_METADATA_TAG))
        .map(|xml| GeoTiffMetadata::from_xml(&xml))
        .unwrap_or_default();

    Ok((raster, metadata))
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(geotiff_tag(MODEL_PIXEL_SCALE_TAG))
        .ok()?;
    let tiepoint = decoder
        .get_tag_f64_vec(geotiff_tag(MODEL_TIEPOINT_TAG))
        .ok()?;

    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }

    // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder
        .get_tag_u16_vec(geotiff_tag(GEO_KEY_DIRECTORY_TAG))
        .ok()?;
    if keys.len() < 4 {
        return None;
    }

    let mut geographic = None;
    let mut projected = None;
    // Entries: [KeyID, TIFFTagLocation, Count, Value]; location 0 means inline
    for entry in keys[4..].chunks_exact(4) {
        if entry[1] != 0 {
            continue;
        }
        match entry[0] {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(<u32 as From<u16>>::from(entry[3])),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(<u32 as From<u16>>::from(entry[3])),
            _ => {}
        }
    }

    projected.or(geographic).map(CRS::from_epsg)
}

/// Write a Raster to a single band GeoTIFF file
pub fn write_geotiff<T, P>(raster: &Raster<T>, path: P, options: Option<GeoTiffOptions>) -> Result<()>
where
    T: RasterElement,
    P: AsRef<Path>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    encode_geotiff(raster, &mut writer, options.unwrap_or_default())?;
    writer.flush()?;
    Ok(())
}

struct GeoTags {
    scale: [f64; 3],
    tiepoint: [f64; 6],
    geokeys: Vec<u16>,
    nodata: Option<String>,
    metadata: Option<String>,
}

impl GeoTags {
    fn for_raster<T: RasterElement>(raster: &Raster<T>, metadata: &GeoTiffMetadata) -> Result<Self> {
        let gt = raster.transform();

        let mut geokeys: Vec<u16> = vec![1, 1, 0, 0];
        match raster.crs().and_then(CRS::epsg) {
            Some(EPSG_WGS84) => {
                geokeys.extend([GT_MODEL_TYPE_GEO_KEY, 0, 1, 2]);
                geokeys.extend([GT_RASTER_TYPE_GEO_KEY, 0, 1, 1]);
                geokeys.extend([GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, EPSG_WGS84 as u16]);
            }
            Some(code) => {
                let code = u16::try_from(code)
                    .map_err(|_| Error::UnsupportedCrs(format!("EPSG:{}", code)))?;
                geokeys.extend([GT_MODEL_TYPE_GEO_KEY, 0, 1, 1]);
                geokeys.extend([GT_RASTER_TYPE_GEO_KEY, 0, 1, 1]);
                geokeys.extend([PROJECTED_CS_TYPE_GEO_KEY, 0, 1, code]);
            }
            None => {
                geokeys.extend([GT_RASTER_TYPE_GEO_KEY, 0, 1, 1]);
            }
        }
        geokeys[3] = ((geokeys.len() - 4) / 4) as u16;

        let nodata = raster
            .nodata()
            .and_then(RasterElement::to_f64)
            .map(|v| if v.fract() == 0.0 { format!("{}", v as i64) } else { v.to_string() });

        Ok(Self {
            scale: [gt.pixel_width, gt.pixel_height.abs(), 0.0],
            tiepoint: [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0],
            geokeys,
            nodata,
            metadata: (!metadata.is_empty()).then(|| metadata.to_xml()),
        })
    }
}

fn encode_geotiff<T, W>(raster: &Raster<T>, writer: W, options: GeoTiffOptions) -> Result<()>
where
    T: RasterElement,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer)?;
    let (rows, cols) = raster.shape();
    let tags = GeoTags::for_raster(raster, &options.metadata)?;

    match options.sample_format {
        SampleFormat::Float32 => {
            let data = convert_samples(raster, f32::NAN);
            write_image::<Gray32Float, _>(&mut encoder, cols, rows, &data, &tags)
        }
        SampleFormat::Int32 => {
            let data = convert_samples(raster, i32::MIN);
            write_image::<GrayI32, _>(&mut encoder, cols, rows, &data, &tags)
        }
        SampleFormat::Int16 => {
            let data = convert_samples(raster, i16::MIN);
            write_image::<GrayI16, _>(&mut encoder, cols, rows, &data, &tags)
        }
        SampleFormat::UInt8 => {
            let data = convert_samples(raster, u8::MAX);
            write_image::<Gray8, _>(&mut encoder, cols, rows, &data, &tags)
        }
    }
}

fn convert_samples<T, S>(raster: &Raster<T>, fallback: S) -> Vec<S>
where
    T: RasterElement,
    S: NumCast + Copy,
{
    raster
        .data()
        .iter()
        .map(|&v| num_traits::cast(v).unwrap_or(fallback))
        .collect()
}

fn write_image<C, W>(
    encoder: &mut TiffEncoder<W>,
    cols: usize,
    rows: usize,
    data: &[C::Inner],
    tags: &GeoTags,
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut image = encoder.new_image::<C>(cols as u32, rows as u32)?;

    image
        .encoder()
        .write_tag(geotiff_tag(MODEL_PIXEL_SCALE_TAG), &tags.scale[..])?;
    image
        .encoder()
        .write_tag(geotiff_tag(MODEL_TIEPOINT_TAG), &tags.tiepoint[..])?;
    image
        .encoder()
        .write_tag(geotiff_tag(GEO_KEY_DIRECTORY_TAG), tags.geokeys.as_slice())?;
    if let Some(nodata) = &tags.nodata {
        image
            .encoder()
            .write_tag(geotiff_tag(GDAL_NODATA_TAG), nodata.as_str())?;
    }
    if let Some(xml) = &tags.metadata {
        image
            .encoder()
            .write_tag(geotiff_tag(GDAL_METADATA_TAG), xml.as_str())?;
    }

    image.write_data(data)?;
    Ok(())
}
