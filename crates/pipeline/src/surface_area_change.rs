//! Surface area change: per-waterbody wet, dry and invalid pixel counts for
//! one `(solar day, tile)` task.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};
use waterbodies_algorithms::statistics::label_class_counts;
use waterbodies_core::Raster;
use waterbodies_core::io::read_geotiff_with_metadata;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::grid::{GeoBox, TileIndex};
use crate::historical_extent::WB_ID_TO_UID_TAG;
use crate::loader::{DatasetLoader, load_aligned};
use crate::tasks::DayTileTask;
use crate::text;

/// Water classification measurement of the per-scene product
pub const WATER_MEASUREMENT: &str = "water";
/// No-data bit value of the water classification
pub const WATER_NODATA: u8 = 1;
/// Clear and wet in the water classification
const CLEAR_WET: u8 = 128;
/// Clear and dry in the water classification
const CLEAR_DRY: u8 = 0;

pub const DRY: u8 = 0;
pub const WET: u8 = 1;
pub const INVALID: u8 = 2;

/// Reduce a water classification to dry (0), wet (1) or invalid (2).
pub fn mask_wofl(water: &Raster<u8>) -> Raster<u8> {
    let mut masked = water.map(|v| match v {
        CLEAR_WET => WET,
        CLEAR_DRY => DRY,
        _ => INVALID,
    });
    masked.set_nodata(None);
    masked
}

/// One waterbody seen on one solar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterbodyObservation {
    pub obs_id: String,
    pub task_id: String,
    pub uid: String,
    pub date: NaiveDate,
    pub px_total: i64,
    pub px_wet: i64,
    pub area_wet_m2: f64,
    pub px_dry: i64,
    pub area_dry_m2: f64,
    pub px_invalid: i64,
    pub area_invalid_m2: f64,
}

/// A tile's rasterised historical extent and its wb_id → uid table.
#[derive(Debug, Clone)]
pub struct HistoricalExtentRaster {
    pub labels: Raster<i32>,
    pub wb_id_to_uid: BTreeMap<i32, String>,
}

impl HistoricalExtentRaster {
    pub fn geobox(&self) -> Result<GeoBox> {
        let crs = self
            .labels
            .crs()
            .cloned()
            .ok_or_else(|| Error::InvalidArgument("historical extent raster has no CRS".into()))?;
        Ok(GeoBox::new(*self.labels.transform(), self.labels.shape(), crs))
    }

    pub fn uid(&self, wb_id: i32) -> Result<&str> {
        self.wb_id_to_uid.get(&wb_id).map(String::as_str).ok_or_else(|| {
            Error::InvariantViolation(format!("wb_id {} missing from the {} table", wb_id, WB_ID_TO_UID_TAG))
        })
    }
}

/// Load the historical extent raster of `tile` from `directory`.
pub fn load_historical_extent_raster(directory: &Path, tile: TileIndex) -> Result<HistoricalExtentRaster> {
    let tile_str = tile.to_string();
    let files = text::find_geotiff_files(directory, Some(&tile_str))?;
    let path = files.first().ok_or_else(|| {
        Error::NotFound(format!(
            "historical extent raster for tile {} in {}",
            tile_str,
            directory.display()
        ))
    })?;

    let (labels, metadata) = read_geotiff_with_metadata::<i32, _>(path)?;
    let table = metadata.get(WB_ID_TO_UID_TAG).ok_or_else(|| {
        Error::InvariantViolation(format!("{} has no {} metadata", path.display(), WB_ID_TO_UID_TAG))
    })?;
    let raw: HashMap<String, String> = serde_json::from_str(table)?;
    let wb_id_to_uid = raw
        .into_iter()
        .map(|(k, uid)| {
            k.parse::<i32>()
                .map(|wb_id| (wb_id, uid))
                .map_err(|_| Error::InvariantViolation(format!("bad wb_id key '{}'", k)))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;
    debug!("Loaded {} with {} waterbodies", path.display(), wb_id_to_uid.len());
    Ok(HistoricalExtentRaster { labels, wb_id_to_uid })
}

/// Build the observations of a task from a classified raster on the
/// historical extent grid. `None` when no waterbody is covered.
pub fn observations_from_classes(
    task: &DayTileTask,
    extent: &HistoricalExtentRaster,
    classes: &Raster<u8>,
) -> Result<Option<Vec<WaterbodyObservation>>> {
    let counts = label_class_counts::<3>(&extent.labels, classes)?;
    if counts.is_empty() {
        return Ok(None);
    }

    let pixel_area = extent.labels.pixel_area();
    let task_id = task.task_id();
    let observations = counts
        .into_iter()
        .map(|(wb_id, c)| {
            let uid = extent.uid(wb_id)?;
            let [dry, wet, invalid] = c.map(|n| n as i64);
            Ok(WaterbodyObservation {
                obs_id: text::observation_id(&task_id, uid),
                task_id: task_id.clone(),
                uid: uid.to_string(),
                date: task.solar_day(),
                px_total: dry + wet + invalid,
                px_wet: wet,
                area_wet_m2: wet as f64 * pixel_area,
                px_dry: dry,
                area_dry_m2: dry as f64 * pixel_area,
                px_invalid: invalid,
                area_invalid_m2: invalid as f64 * pixel_area,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(observations))
}

/// Observations of every waterbody in the task's tile on the task's solar day.
///
/// The task must list its datasets; complete placeholder tasks first.
pub fn get_waterbody_observations<L: DatasetLoader>(
    task: &DayTileTask,
    catalog: &dyn Catalog,
    loader: &L,
    historical_extent_rasters_directory: &Path,
) -> Result<Option<Vec<WaterbodyObservation>>> {
    if task.is_placeholder() {
        return Err(Error::InvalidTask(format!("task {} lists no datasets", task.task_id())));
    }
    let extent = load_historical_extent_raster(historical_extent_rasters_directory, task.tile())?;
    let geobox = extent.geobox()?;

    let datasets = catalog.get(task.dataset_ids())?;
    let water = load_aligned(loader, &datasets, WATER_MEASUREMENT, &geobox, WATER_NODATA)?;
    let classes = mask_wofl(&water);

    let observations = observations_from_classes(task, &extent, &classes)?;
    match &observations {
        Some(obs) => info!("Task {} has {} waterbody observations", task.task_id(), obs.len()),
        None => info!("Task {} has no waterbody observations", task.task_id()),
    }
    Ok(observations)
}
