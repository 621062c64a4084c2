//! Loading dataset measurements onto a target pixel grid.

use tracing::debug;
use waterbodies_core::io::read_geotiff;
use waterbodies_core::crs::Projection;
use waterbodies_core::raster::{Raster, RasterElement};

use crate::catalog::DatasetRecord;
use crate::error::{Error, Result};
use crate::grid::GeoBox;

/// Loads one measurement of a dataset as a raster in its native grid.
pub trait DatasetLoader {
    fn load<T: RasterElement>(&self, dataset: &DatasetRecord, measurement: &str) -> Result<Raster<T>>;
}

/// Reads measurements from the GeoTIFF paths listed in each record.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffLoader;

impl DatasetLoader for GeoTiffLoader {
    fn load<T: RasterElement>(&self, dataset: &DatasetRecord, measurement: &str) -> Result<Raster<T>> {
        let path = dataset.measurement_path(measurement)?;
        debug!("Reading {} of {} from {}", measurement, dataset.id, path.display());
        Ok(read_geotiff(path)?)
    }
}

/// Resample `source` onto `target` by nearest neighbour.
///
/// Target pixels whose centre falls outside the source, or on a source nodata
/// pixel, get `fill`.
pub fn reproject_nearest<T: RasterElement>(source: &Raster<T>, target: &GeoBox, fill: T) -> Result<Raster<T>> {
    let source_crs = source
        .crs()
        .ok_or_else(|| Error::InvalidArgument("source raster has no CRS".into()))?;
    let (rows, cols) = target.shape;

    let same_grid = source_crs.is_equivalent(&target.crs)
        && source.transform().approx_eq(&target.transform)
        && source.shape() == target.shape;

    let mut output: Raster<T> = Raster::filled(rows, cols, fill);
    output.set_transform(target.transform);
    output.set_crs(Some(target.crs.clone()));
    output.set_nodata(Some(fill));

    if same_grid {
        let data = output.data_mut();
        for ((row, col), value) in source.data().indexed_iter() {
            if !source.is_nodata(*value) {
                data[(row, col)] = *value;
            }
        }
        return Ok(output);
    }

    let identity = source_crs.is_equivalent(&target.crs);
    let (to_geographic, from_geographic): (Projection, Projection) =
        (target.crs.projection()?, source_crs.projection()?);
    let (src_rows, src_cols) = source.shape();
    let src = source.data();
    let data = output.data_mut();

    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = target.transform.pixel_to_geo(col, row);
            let (sx, sy) = if identity {
                (x, y)
            } else {
                let (lon, lat) = to_geographic.inverse(x, y);
                from_geographic.forward(lon, lat)
            };
            let (fc, fr) = source.transform().geo_to_pixel(sx, sy);
            if !(fc.is_finite() && fr.is_finite()) || fc < 0.0 || fr < 0.0 {
                continue;
            }
            let (sc, sr) = (fc.floor() as usize, fr.floor() as usize);
            if sr >= src_rows || sc >= src_cols {
                continue;
            }
            let value = src[(sr, sc)];
            if !source.is_nodata(value) {
                data[(row, col)] = value;
            }
        }
    }
    Ok(output)
}

/// Combine co-registered layers: each pixel takes the first layer's value
/// that is not `nodata`.
pub fn fuse_first_valid<T: RasterElement>(layers: Vec<Raster<T>>, nodata: T) -> Result<Option<Raster<T>>> {
    let mut layers = layers.into_iter();
    let Some(mut fused) = layers.next() else {
        return Ok(None);
    };
    for layer in layers {
        fused.check_same_shape(&layer)?;
        for (out, &value) in fused.data_mut().iter_mut().zip(layer.data().iter()) {
            if out.is_nodata(Some(nodata)) && !value.is_nodata(Some(nodata)) {
                *out = value;
            }
        }
    }
    fused.set_nodata(Some(nodata));
    Ok(Some(fused))
}

/// Load `measurement` of every dataset onto `target` and fuse them.
pub fn load_aligned<L, T>(
    loader: &L,
    datasets: &[DatasetRecord],
    measurement: &str,
    target: &GeoBox,
    nodata: T,
) -> Result<Raster<T>>
where
    L: DatasetLoader,
    T: RasterElement,
{
    let layers = datasets
        .iter()
        .map(|d| reproject_nearest(&loader.load::<T>(d, measurement)?, target, nodata))
        .collect::<Result<Vec<_>>>()?;
    fuse_first_valid(layers, nodata)?
        .ok_or_else(|| Error::InvalidArgument(format!("no datasets to load {} from", measurement)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterbodies_core::{CRS, GeoTransform};

    fn grid_raster(values: Vec<u8>, rows: usize, cols: usize, transform: GeoTransform) -> Raster<u8> {
        let mut r = Raster::from_vec(values, rows, cols).unwrap();
        r.set_transform(transform);
        r.set_crs(Some(CRS::ease_grid_global()));
        r
    }

    #[test]
    fn test_reproject_same_grid_is_copy() {
        let transform = GeoTransform::new(0.0, 90.0, 30.0, -30.0);
        let source = grid_raster((0..9).collect(), 3, 3, transform);
        let target = GeoBox::new(transform, (3, 3), CRS::ease_grid_global());
        let out = reproject_nearest(&source, &target, 1).unwrap();
        assert_eq!(out.data(), source.data());
    }

    #[test]
    fn test_reproject_shifted_grid() {
        let source = grid_raster(vec![10, 20, 30, 40], 2, 2, GeoTransform::new(0.0, 60.0, 30.0, -30.0));
        // Target is offset by one pixel to the right; its last column is outside
        let target = GeoBox::new(GeoTransform::new(30.0, 60.0, 30.0, -30.0), (2, 2), CRS::ease_grid_global());
        let out = reproject_nearest(&source, &target, 1).unwrap();
        assert_eq!(out.data().as_slice().unwrap(), &[20, 1, 40, 1]);
    }

    #[test]
    fn test_reproject_across_crs() {
        // A geographic raster covering 18..19°E, -33..-32°
        let mut source: Raster<u8> = Raster::filled(10, 10, 128);
        source.set_transform(GeoTransform::new(18.0, -32.0, 0.1, -0.1));
        source.set_crs(Some(CRS::wgs84()));

        let (x, y) = Projection::EqualAreaCylindrical.forward(18.5, -32.5);
        let target = GeoBox::new(GeoTransform::new(x, y, 30.0, -30.0), (4, 4), CRS::ease_grid_global());
        let out = reproject_nearest(&source, &target, 1).unwrap();
        assert!(out.data().iter().all(|&v| v == 128));
    }

    #[test]
    fn test_fuse_first_valid() {
        let t = GeoTransform::new(0.0, 30.0, 30.0, -30.0);
        let a = grid_raster(vec![1, 0, 1], 1, 3, t);
        let b = grid_raster(vec![128, 128, 1], 1, 3, t);
        let fused = fuse_first_valid(vec![a, b], 1).unwrap().unwrap();
        assert_eq!(fused.data().as_slice().unwrap(), &[128, 0, 1]);
        assert!(fuse_first_valid::<u8>(vec![], 1).unwrap().is_none());
    }
}
