//! Historical extent: canonical waterbody polygons from the multi-year water
//! frequency summary.
//!
//! Per tile, pixels are thresholded into a detection mask (confidently
//! water) and a wider extent mask. Extent components become waterbodies; the
//! oversized ones are split by a marker watershed seeded from the eroded
//! detection mask. The regions are vectorized per tile, then merged across
//! tile boundaries, filtered, and given stable geohash identifiers.

use geo::{Centroid, Coord, Intersects, MapCoords, Polygon};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use waterbodies_algorithms::morphology::{StructuringElement, binary_erode};
use waterbodies_algorithms::segmentation::{
    distance_transform_edt, label, remove_small_objects, select_large_objects, watershed,
};
use waterbodies_algorithms::statistics::label_class_counts;
use waterbodies_algorithms::vector::{
    area, length, merge_across_boundaries, perimeter, polygonize, rasterize,
};
use waterbodies_core::io::{GeoTiffMetadata, GeoTiffOptions, SampleFormat, read_geotiff, write_geotiff};
use waterbodies_core::{CRS, Connectivity, Raster};

use crate::catalog::DatasetRecord;
use crate::error::{Error, Result};
use crate::grid::{GeoBox, GridSpec, TileIndex};
use crate::loader::{DatasetLoader, load_aligned, reproject_nearest};
use crate::text;

/// Summary measurement: fraction of clear observations classified as water
pub const FREQUENCY_MEASUREMENT: &str = "frequency";
/// Summary measurement: number of clear observations
pub const COUNT_CLEAR_MEASUREMENT: &str = "count_clear";
/// No-data value of `count_clear`
pub const COUNT_CLEAR_NODATA: i16 = -999;
/// Metadata key of the wb_id → uid table in rasterised tiles
pub const WB_ID_TO_UID_TAG: &str = "WB_ID_to_UID";

/// Half-width of the band around tile boundaries where polygons are merged
pub const BOUNDARY_BAND_M: f64 = 30.0;
/// Polygons with an area at or below this are dropped
pub const MIN_AREA_M2: f64 = 4500.0;
/// Polygons longer than this are dropped
pub const MAX_LENGTH_M: f64 = 150_000.0;
const GEOHASH_PRECISION: usize = 10;

/// Thresholds and size limits of the extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalExtentParams {
    /// Frequency above which a pixel is confidently water
    pub detection_threshold: f32,
    /// Frequency above which a pixel belongs to a waterbody's extent
    pub extent_threshold: f32,
    /// Pixels with fewer clear observations are invalid
    pub min_valid_observations: i16,
    /// Smallest waterbody, in pixels
    pub min_polygon_size: usize,
    /// Waterbodies with more pixels are split by watershed
    pub max_polygon_size: usize,
    /// Radius in pixels of the disk eroding the detection mask into markers
    pub marker_erosion_radius: f64,
    /// Smallest watershed marker, in pixels
    pub min_marker_size: usize,
    /// Land is shrunk by this distance before masking the ocean
    pub land_sea_mask_buffer_m: f64,
}

impl Default for HistoricalExtentParams {
    fn default() -> Self {
        Self {
            detection_threshold: 0.1,
            extent_threshold: 0.05,
            min_valid_observations: 60,
            min_polygon_size: 6,
            max_polygon_size: 1000,
            marker_erosion_radius: 1.0,
            min_marker_size: 100,
            land_sea_mask_buffer_m: 500.0,
        }
    }
}

/// A canonical waterbody.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterbodyPolygon {
    pub uid: String,
    pub wb_id: i32,
    /// EPSG:4326
    pub geometry: Polygon<f64>,
    pub area_m2: f64,
    pub length_m: f64,
    pub perim_m: f64,
}

impl WaterbodyPolygon {
    /// Geometry reprojected vertex by vertex into `crs`
    pub fn geometry_in(&self, crs: &CRS) -> Result<Polygon<f64>> {
        let projection = crs.projection()?;
        Ok(self.geometry.map_coords(|c| {
            let (x, y) = projection.forward(c.x, c.y);
            Coord { x, y }
        }))
    }
}

// ---------------------------------------------------------------------------
// Land/sea masks
// ---------------------------------------------------------------------------

/// Directory of per-tile land/sea mask rasters (1 = land, 0 = ocean).
#[derive(Debug, Clone)]
pub struct LandSeaMasks {
    directory: PathBuf,
    required: bool,
}

impl LandSeaMasks {
    /// With `required`, a tile without a mask file is an error; otherwise it
    /// is processed unmasked.
    pub fn new(directory: impl Into<PathBuf>, required: bool) -> Result<Self> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(Error::NotFound(format!(
                "land/sea mask directory {}",
                directory.display()
            )));
        }
        Ok(Self { directory, required })
    }

    /// The tile's mask aligned to `target`, if there is one
    pub fn for_tile(&self, tile: TileIndex, target: &GeoBox) -> Result<Option<Raster<u8>>> {
        let tile_str = tile.to_string();
        let files = text::find_geotiff_files(&self.directory, Some(&tile_str))?;
        match files.first() {
            Some(path) => {
                debug!("Tile {} land/sea mask {}", tile_str, path.display());
                let mask: Raster<u8> = read_geotiff(path)?;
                Ok(Some(reproject_nearest(&mask, target, 0)?))
            }
            None if self.required => Err(Error::NotFound(format!(
                "land/sea mask for tile {} in {}",
                tile_str,
                self.directory.display()
            ))),
            None => {
                info!(
                    "Tile {} has no land/sea mask in {}, processing unmasked",
                    tile_str,
                    self.directory.display()
                );
                Ok(None)
            }
        }
    }
}

/// Land pixels shrunk by `buffer_m`; everything else is invalid.
pub fn valid_land(mask: &Raster<u8>, buffer_m: f64) -> Result<Raster<u8>> {
    let resolution = mask.transform().pixel_width.abs();
    let land = mask.map(|v| u8::from(v == 1));
    let radius = buffer_m / resolution;
    if radius < 1.0 {
        return Ok(land);
    }
    Ok(binary_erode(&land, &StructuringElement::Disk(radius))?)
}

/// Pixels the source land mask does not cover
const MASK_NO_COVERAGE: u8 = 255;

/// Cut one land mask raster into per-tile masks named `x{X:03}_y{Y:03}.tif`.
///
/// Each tile's geobox is resampled from `mask_path` by nearest neighbour.
/// Only coastal tiles are written: a tile without a single ocean pixel needs
/// no mask. Returns the written paths.
pub fn split_land_sea_mask(
    mask_path: &Path,
    tiles: &[TileIndex],
    grid: &GridSpec,
    directory: &Path,
) -> Result<Vec<PathBuf>> {
    let mask: Raster<u8> = read_geotiff(mask_path)?;
    if mask.crs().is_none() {
        return Err(Error::InvalidArgument(format!(
            "land/sea mask {} has no CRS",
            mask_path.display()
        )));
    }
    std::fs::create_dir_all(directory)?;
    info!("Splitting {} into {} tiles", mask_path.display(), tiles.len());

    let mut written = Vec::new();
    for &tile in tiles {
        let geobox = grid.tile_geobox(tile);
        let tile_mask = reproject_nearest(&mask, &geobox, MASK_NO_COVERAGE)?;
        if !tile_mask.data().iter().any(|&v| v == 0) {
            debug!("Tile {} has no ocean pixels, no land/sea mask written", tile);
            continue;
        }
        let path = directory.join(format!("{}.tif", tile));
        let options = GeoTiffOptions::default().with_sample_format(SampleFormat::UInt8);
        write_geotiff(&tile_mask, &path, Some(options))?;
        debug!("Tile {} land/sea mask written to {}", tile, path.display());
        written.push(path);
    }
    info!("Wrote {} coastal tile masks to {}", written.len(), directory.display());
    Ok(written)
}

// ---------------------------------------------------------------------------
// Per-tile extraction
// ---------------------------------------------------------------------------

/// Thresholded masks of one tile, 1 = set.
#[derive(Debug, Clone)]
pub struct WaterMasks {
    pub detection: Raster<u8>,
    pub extent: Raster<u8>,
}

/// Threshold the frequency summary into detection and extent masks.
pub fn threshold_frequency(
    frequency: &Raster<f32>,
    count_clear: &Raster<i16>,
    land: Option<&Raster<u8>>,
    params: &HistoricalExtentParams,
) -> Result<WaterMasks> {
    frequency.check_same_shape(count_clear)?;
    if let Some(land) = land {
        frequency.check_same_shape(land)?;
    }

    let mut detection: Raster<u8> = frequency.with_same_meta();
    let mut extent: Raster<u8> = frequency.with_same_meta();
    for ((row, col), &freq) in frequency.data().indexed_iter() {
        let count = count_clear.data()[(row, col)];
        let valid = count != COUNT_CLEAR_NODATA
            && count >= params.min_valid_observations
            && land.is_none_or(|l| l.data()[(row, col)] != 0);
        if !valid {
            continue;
        }
        detection.data_mut()[(row, col)] = u8::from(freq > params.detection_threshold);
        extent.data_mut()[(row, col)] = u8::from(freq > params.extent_threshold);
    }

    let outside = Zip::from(detection.data())
        .and(extent.data())
        .fold(0usize, |n, &d, &e| n + usize::from(d == 1 && e == 0));
    if outside > 0 {
        warn!(
            "{} detection pixels fall outside the extent mask; detection threshold {} is below extent threshold {}",
            outside, params.detection_threshold, params.extent_threshold
        );
    }

    Ok(WaterMasks { detection, extent })
}

/// Label waterbodies from the two masks.
///
/// Returns a label raster on the masks' grid where every positive value is
/// one waterbody.
pub fn segment_waterbodies(masks: &WaterMasks, params: &HistoricalExtentParams) -> Result<Raster<i32>> {
    let rook = Connectivity::Rook;

    let extent_labels = remove_small_objects(&label(&masks.extent, rook)?, params.min_polygon_size);
    let large = select_large_objects(&extent_labels, params.max_polygon_size);
    let mut labels = extent_labels.clone();
    Zip::from(labels.data_mut())
        .and(large.data())
        .for_each(|l, &big| {
            if big != 0 {
                *l = 0;
            }
        });

    let eroded = binary_erode(
        &masks.detection,
        &StructuringElement::Disk(params.marker_erosion_radius),
    )?;
    let markers = remove_small_objects(&label(&eroded, rook)?, params.min_marker_size);

    let mut elevation = distance_transform_edt(&large);
    elevation.data_mut().mapv_inplace(|d| -d);
    let segments = watershed(&elevation, &markers, Some(&large), rook)?;

    let offset = labels.data().iter().copied().max().unwrap_or(0).max(0);
    Zip::from(labels.data_mut())
        .and(segments.data())
        .for_each(|l, &s| {
            if s > 0 {
                *l = s + offset;
            }
        });
    debug!(
        "{} large extent pixels split into {} watershed segments",
        large.count_nonzero(),
        segments.data().iter().copied().max().unwrap_or(0)
    );

    let counts = label_class_counts::<2>(&labels, &masks.detection)?;
    let confirmed: BTreeSet<i32> = counts
        .iter()
        .filter(|(_, c)| c[1] > 0)
        .map(|(&l, _)| l)
        .collect();
    labels.data_mut().mapv_inplace(|l| if confirmed.contains(&l) { l } else { 0 });

    let relabelled = label(&labels, rook)?;
    let mut waterbodies = remove_small_objects(&relabelled, params.min_polygon_size);
    waterbodies.set_transform(*masks.extent.transform());
    waterbodies.set_crs(masks.extent.crs().cloned());
    Ok(waterbodies)
}

/// Extract the waterbody polygons of one tile, in the grid CRS.
pub fn get_waterbodies<L: DatasetLoader>(
    loader: &L,
    grid: &GridSpec,
    tile: TileIndex,
    datasets: &[DatasetRecord],
    land_sea_masks: Option<&LandSeaMasks>,
    params: &HistoricalExtentParams,
) -> Result<Vec<Polygon<f64>>> {
    let geobox = grid.tile_geobox(tile);

    let land = match land_sea_masks {
        Some(masks) => match masks.for_tile(tile, &geobox)? {
            Some(mask) => Some(valid_land(&mask, params.land_sea_mask_buffer_m)?),
            None => None,
        },
        None => {
            info!("Skip masking ocean pixels for tile {}, no land/sea mask directory", tile);
            None
        }
    };

    // The summary product has one time step per tile; earlier datasets win.
    let frequency = load_aligned(loader, datasets, FREQUENCY_MEASUREMENT, &geobox, f32::NAN)?;
    let count_clear = load_aligned(loader, datasets, COUNT_CLEAR_MEASUREMENT, &geobox, COUNT_CLEAR_NODATA)?;

    let masks = threshold_frequency(&frequency, &count_clear, land.as_ref(), params)?;
    let waterbodies = segment_waterbodies(&masks, params)?;
    let polygons: Vec<Polygon<f64>> = polygonize(&waterbodies)?
        .into_iter()
        .map(|p| p.polygon)
        .collect();
    info!("Tile {} has {} waterbody polygons", tile, polygons.len());
    Ok(polygons)
}

// ---------------------------------------------------------------------------
// Per-tile polygon files
// ---------------------------------------------------------------------------

/// Polygons of one processed tile, as written by the batch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePolygons {
    pub tile: TileIndex,
    pub epsg: u32,
    pub polygons: Vec<Polygon<f64>>,
}

/// `waterbodies_x{X:03}_y{Y:03}.json`
pub fn tile_polygons_path(directory: &Path, tile: TileIndex) -> PathBuf {
    directory.join(format!("waterbodies_{}.json", tile))
}

pub fn write_tile_polygons(directory: &Path, tile_polygons: &TilePolygons) -> Result<PathBuf> {
    let path = tile_polygons_path(directory, tile_polygons.tile);
    std::fs::write(&path, serde_json::to_string(tile_polygons)?)?;
    Ok(path)
}

/// Read every per-tile polygon file in `directory`, reprojected to the grid CRS.
pub fn read_tile_polygons(directory: &Path, grid: &GridSpec) -> Result<Vec<Polygon<f64>>> {
    let grid_projection = grid.crs.projection()?;
    let mut polygons = Vec::new();
    for path in text::find_files_with_extension(directory, "json")? {
        let tile_polygons: TilePolygons = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        let source_crs = CRS::from_epsg(tile_polygons.epsg);
        if source_crs.is_equivalent(&grid.crs) {
            polygons.extend(tile_polygons.polygons);
            continue;
        }
        let source = source_crs.projection()?;
        polygons.extend(tile_polygons.polygons.into_iter().map(|p| {
            p.map_coords(|c| {
                let (lon, lat) = source.inverse(c.x, c.y);
                let (x, y) = grid_projection.forward(lon, lat);
                Coord { x, y }
            })
        }));
    }
    info!("Loaded {} waterbodies from {}", polygons.len(), directory.display());
    Ok(polygons)
}

// ---------------------------------------------------------------------------
// Cross-tile post-processing
// ---------------------------------------------------------------------------

/// Merge, filter and identify the polygons of all tiles.
///
/// `polygons` are in the grid CRS; `tiles` are the tiles they were extracted
/// from. The result is sorted by uid with dense `wb_id`s from 1.
pub fn process_polygons(
    polygons: Vec<Polygon<f64>>,
    tiles: &[TileIndex],
    grid: &GridSpec,
) -> Result<Vec<WaterbodyPolygon>> {
    let bands: Vec<Polygon<f64>> = tiles
        .iter()
        .map(|&tile| grid.tile_boundary_band(tile, BOUNDARY_BAND_M))
        .collect();
    let merged = merge_across_boundaries(polygons, &bands);
    info!("{} waterbodies after merging at tile boundaries", merged.len());

    let projection = grid.crs.projection()?;
    let mut waterbodies = Vec::new();
    for polygon in merged {
        let area_m2 = area(&polygon);
        if area_m2 <= MIN_AREA_M2 {
            continue;
        }
        let length_m = length(&polygon);
        if length_m > MAX_LENGTH_M {
            debug!("Dropping waterbody {:.0} m long", length_m);
            continue;
        }
        let perim_m = perimeter(&polygon);

        let geometry = polygon.map_coords(|c| {
            let (lon, lat) = projection.inverse(c.x, c.y);
            Coord { x: lon, y: lat }
        });
        let centroid = geometry
            .centroid()
            .ok_or_else(|| Error::InvariantViolation("waterbody without centroid".into()))?;
        let uid = geohash::encode(centroid.0, GEOHASH_PRECISION)
            .map_err(|e| Error::Geohash(e.to_string()))?;

        waterbodies.push(WaterbodyPolygon { uid, wb_id: 0, geometry, area_m2, length_m, perim_m });
    }

    waterbodies.sort_by(|a, b| a.uid.cmp(&b.uid));
    for (idx, waterbody) in waterbodies.iter_mut().enumerate() {
        waterbody.wb_id = i32::try_from(idx + 1)
            .map_err(|_| Error::InvariantViolation("too many waterbodies for i32 ids".into()))?;
    }
    validate_waterbodies(&waterbodies)?;
    info!("Final waterbodies count: {}", waterbodies.len());
    Ok(waterbodies)
}

/// Check uid and wb_id uniqueness and that every wb_id is positive.
pub fn validate_waterbodies(waterbodies: &[WaterbodyPolygon]) -> Result<()> {
    let mut uids = BTreeSet::new();
    let mut wb_ids = BTreeSet::new();
    for waterbody in waterbodies {
        if !uids.insert(waterbody.uid.as_str()) {
            return Err(Error::InvariantViolation(format!("duplicate uid {}", waterbody.uid)));
        }
        if waterbody.wb_id <= 0 {
            return Err(Error::InvariantViolation(format!(
                "wb_id {} of {} is not positive",
                waterbody.wb_id, waterbody.uid
            )));
        }
        if !wb_ids.insert(waterbody.wb_id) {
            return Err(Error::InvariantViolation(format!("duplicate wb_id {}", waterbody.wb_id)));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rasterised historical extent
// ---------------------------------------------------------------------------

/// `x{X:03}_y{Y:03}.tif`
pub fn historical_extent_raster_path(directory: &Path, tile: TileIndex) -> PathBuf {
    directory.join(format!("{}.tif", tile))
}

/// Burn the waterbodies into one `wb_id` raster per tile.
///
/// Tiles no waterbody intersects get no file. Returns the written paths.
pub fn rasterise_polygons(
    waterbodies: &[WaterbodyPolygon],
    tiles: &[TileIndex],
    grid: &GridSpec,
    directory: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(directory)?;
    let projected = waterbodies
        .iter()
        .map(|w| Ok((w.geometry_in(&grid.crs)?, w.wb_id, w.uid.as_str())))
        .collect::<Result<Vec<_>>>()?;

    let mut written = Vec::new();
    for &tile in tiles {
        let geobox = grid.tile_geobox(tile);
        let extent = geobox.extent();
        let intersecting: Vec<_> = projected.iter().filter(|(p, _, _)| p.intersects(&extent)).collect();
        if intersecting.is_empty() {
            continue;
        }

        let shapes: Vec<(Polygon<f64>, i32)> = intersecting.iter().map(|(p, id, _)| (p.clone(), *id)).collect();
        let (rows, cols) = geobox.shape;
        let mut raster = rasterize(&shapes, rows, cols, geobox.transform)?;
        raster.set_crs(Some(geobox.crs.clone()));

        let table: BTreeMap<i32, &str> = intersecting.iter().map(|(_, id, uid)| (*id, *uid)).collect();
        let mut metadata = GeoTiffMetadata::new();
        metadata.insert(WB_ID_TO_UID_TAG, serde_json::to_string(&table)?);
        let options = GeoTiffOptions::default()
            .with_sample_format(SampleFormat::Int32)
            .with_metadata(metadata);

        let path = historical_extent_raster_path(directory, tile);
        write_geotiff(&raster, &path, Some(options))?;
        info!("Tile {}: {} waterbodies rasterised to {}", tile, shapes.len(), path.display());
        written.push(path);
    }
    Ok(written)
}
