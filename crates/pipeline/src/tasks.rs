//! Units of work and the task binner.
//!
//! Datasets are assigned to every grid tile their footprint intersects and
//! then binned either by tile (historical extent) or by `(solar day, tile)`
//! (surface area change). Each bin becomes one task.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, DatasetRecord, TimeFilter, WATER_OBSERVATIONS_PRODUCT};
use crate::error::{Error, Result};
use crate::grid::{GridSpec, TileIndex};
use crate::temporal::TemporalRange;
use crate::text;

/// File name of the chunked task list
pub const TASKS_CHUNKS_FILE: &str = "tasks_chunks";
/// File name holding the number of chunks
pub const TASKS_CHUNKS_COUNT_FILE: &str = "tasks_chunks_count";

/// Gap-filling ranges longer than this are allowed but slow.
const GAP_FILLING_MAX_DAYS: i64 = 7;

fn normalize_ids(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// All datasets covering one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TileTaskRecord", into = "TileTaskRecord")]
pub struct TileTask {
    tile: TileIndex,
    dataset_ids: Vec<String>,
}

impl TileTask {
    pub fn new(tile: TileIndex, dataset_ids: impl IntoIterator<Item = String>) -> Self {
        Self { tile, dataset_ids: normalize_ids(dataset_ids) }
    }

    pub fn tile(&self) -> TileIndex {
        self.tile
    }

    pub fn dataset_ids(&self) -> &[String] {
        &self.dataset_ids
    }
}

#[derive(Serialize, Deserialize)]
struct TileTaskRecord {
    tile_index_x: i32,
    tile_index_y: i32,
    task_datasets_ids: Vec<String>,
}

impl From<TileTaskRecord> for TileTask {
    fn from(r: TileTaskRecord) -> Self {
        Self::new(TileIndex::new(r.tile_index_x, r.tile_index_y), r.task_datasets_ids)
    }
}

impl From<TileTask> for TileTaskRecord {
    fn from(t: TileTask) -> Self {
        Self { tile_index_x: t.tile.x, tile_index_y: t.tile.y, task_datasets_ids: t.dataset_ids }
    }
}

/// The datasets acquired over one tile on one local solar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DayTileTaskRecord", into = "DayTileTaskRecord")]
pub struct DayTileTask {
    solar_day: NaiveDate,
    tile: TileIndex,
    dataset_ids: Vec<String>,
}

impl DayTileTask {
    pub fn new(
        solar_day: NaiveDate,
        tile: TileIndex,
        dataset_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self { solar_day, tile, dataset_ids: normalize_ids(dataset_ids) }
    }

    /// Task without datasets, to be completed by a catalog lookup
    pub fn placeholder(solar_day: NaiveDate, tile: TileIndex) -> Self {
        Self::new(solar_day, tile, Vec::new())
    }

    pub fn solar_day(&self) -> NaiveDate {
        self.solar_day
    }

    pub fn tile(&self) -> TileIndex {
        self.tile
    }

    pub fn dataset_ids(&self) -> &[String] {
        &self.dataset_ids
    }

    pub fn is_placeholder(&self) -> bool {
        self.dataset_ids.is_empty()
    }

    /// `"{solar_day}/x{X:03}/y{Y:03}"`
    pub fn task_id(&self) -> String {
        text::task_id(self.solar_day, self.tile)
    }
}

#[derive(Serialize, Deserialize)]
struct DayTileTaskRecord {
    solar_day: NaiveDate,
    tile_id_x: i32,
    tile_id_y: i32,
    task_datasets_ids: Vec<String>,
}

impl From<DayTileTaskRecord> for DayTileTask {
    fn from(r: DayTileTaskRecord) -> Self {
        Self::new(r.solar_day, TileIndex::new(r.tile_id_x, r.tile_id_y), r.task_datasets_ids)
    }
}

impl From<DayTileTask> for DayTileTaskRecord {
    fn from(t: DayTileTask) -> Self {
        Self {
            solar_day: t.solar_day,
            tile_id_x: t.tile.x,
            tile_id_y: t.tile.y,
            task_datasets_ids: t.dataset_ids,
        }
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Task {
    DayTile(DayTileTask),
    Tile(TileTask),
}

impl Task {
    pub fn tile(&self) -> TileIndex {
        match self {
            Task::DayTile(t) => t.tile(),
            Task::Tile(t) => t.tile(),
        }
    }

    pub fn dataset_ids(&self) -> &[String] {
        match self {
            Task::DayTile(t) => t.dataset_ids(),
            Task::Tile(t) => t.dataset_ids(),
        }
    }

    pub fn solar_day(&self) -> Option<NaiveDate> {
        match self {
            Task::DayTile(t) => Some(t.solar_day()),
            Task::Tile(_) => None,
        }
    }

    pub fn as_day_tile(&self) -> Result<&DayTileTask> {
        match self {
            Task::DayTile(t) => Ok(t),
            Task::Tile(t) => Err(Error::InvalidTask(format!("tile {} has no solar day", t.tile()))),
        }
    }

    pub fn as_tile(&self) -> Result<&TileTask> {
        match self {
            Task::Tile(t) => Ok(t),
            Task::DayTile(t) => Err(Error::InvalidTask(format!(
                "{} is a solar day task, expected a tile task",
                t.task_id()
            ))),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::DayTile(t) => write!(f, "{}", t.task_id()),
            Task::Tile(t) => write!(f, "{}", t.tile()),
        }
    }
}

// ---------------------------------------------------------------------------
// Binning
// ---------------------------------------------------------------------------

/// How datasets are grouped into tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinMode {
    Tile,
    SolarDayTile,
}

/// What the binner saw besides the tasks it produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinSummary {
    /// Earliest and latest acquisition time of the binned datasets
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Datasets skipped for a missing or unusable footprint
    pub skipped: usize,
}

fn footprint_in_grid(dataset: &DatasetRecord, grid: &GridSpec) -> Option<geo::Polygon<f64>> {
    let Some(footprint) = dataset.footprint.as_ref().filter(|f| !f.is_empty()) else {
        warn!("Dataset {} has no footprint, skipping", dataset.id);
        return None;
    };
    match footprint.to_polygon(&grid.crs) {
        Ok(polygon) => Some(polygon),
        Err(e) => {
            warn!("Dataset {} footprint cannot be used ({}), skipping", dataset.id, e);
            None
        }
    }
}

/// Bin datasets into tasks.
///
/// Tasks come out sorted by their bin key; `tile_filter` is applied before
/// solar days are computed.
pub fn bin_datasets(
    datasets: &[DatasetRecord],
    grid: &GridSpec,
    tile_filter: Option<&BTreeSet<TileIndex>>,
    mode: BinMode,
) -> Result<(Vec<Task>, BinSummary)> {
    let mut tile_datasets: BTreeMap<TileIndex, Vec<&DatasetRecord>> = BTreeMap::new();
    let mut binned: Vec<&DatasetRecord> = Vec::new();
    let mut skipped = 0;

    for dataset in datasets {
        let Some(polygon) = footprint_in_grid(dataset, grid) else {
            skipped += 1;
            continue;
        };
        binned.push(dataset);
        for tile in grid.tiles_intersecting(&polygon) {
            tile_datasets.entry(tile).or_default().push(dataset);
        }
    }

    if let Some(filter) = tile_filter {
        tile_datasets.retain(|tile, _| filter.contains(tile));
    }

    let time_range = binned
        .iter()
        .map(|d| d.acquisition_time)
        .fold(None, |range: Option<(DateTime<Utc>, DateTime<Utc>)>, t| {
            Some(range.map_or((t, t), |(start, end)| (start.min(t), end.max(t))))
        });

    let tasks = match mode {
        BinMode::Tile => tile_datasets
            .into_iter()
            .map(|(tile, ds)| Task::Tile(TileTask::new(tile, ds.iter().map(|d| d.id.clone()))))
            .collect(),
        BinMode::SolarDayTile => {
            let mut bins: BTreeMap<(NaiveDate, TileIndex), Vec<String>> = BTreeMap::new();
            for (tile, ds) in tile_datasets {
                let offset: TimeDelta = grid.utc_offset(tile)?;
                for d in ds {
                    let solar_day = (d.acquisition_time + offset).date_naive();
                    bins.entry((solar_day, tile)).or_default().push(d.id.clone());
                }
            }
            bins.into_iter()
                .map(|((day, tile), ids)| Task::DayTile(DayTileTask::new(day, tile, ids)))
                .collect()
        }
    };

    let summary = BinSummary { time_range, skipped };
    if let Some((start, end)) = summary.time_range {
        debug!("Binned datasets acquired between {} and {}", start, end);
    }
    Ok((tasks, summary))
}

/// Sort by tile x, then tile y.
pub fn sort_by_tile_x(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| (t.tile().x, t.tile().y));
}

/// Sort by solar day, then tile.
pub fn sort_by_solar_day(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| (t.solar_day(), t.tile()));
}

/// Split into at most `max_chunks` contiguous chunks of near-equal size.
///
/// The first `len % max_chunks` chunks hold one extra item; empty chunks are
/// dropped.
pub fn chunk_tasks<T: Clone>(items: &[T], max_chunks: usize) -> Result<Vec<Vec<T>>> {
    if max_chunks == 0 {
        return Err(Error::InvalidArgument("max_parallel_steps must be at least 1".into()));
    }
    let (base, extra) = (items.len() / max_chunks, items.len() % max_chunks);
    let mut chunks = Vec::with_capacity(max_chunks);
    let mut start = 0;
    for i in 0..max_chunks {
        let size = base + usize::from(i < extra);
        if size > 0 {
            chunks.push(items[start..start + size].to_vec());
        }
        start += size;
    }
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Task files
// ---------------------------------------------------------------------------

/// Write the chunked task list and its chunk count into `directory`.
pub fn write_task_chunks(directory: &Path, chunks: &[Vec<Task>]) -> Result<PathBuf> {
    std::fs::create_dir_all(directory)?;
    let tasks_file = directory.join(TASKS_CHUNKS_FILE);
    std::fs::write(&tasks_file, serde_json::to_string(chunks)?)?;
    std::fs::write(directory.join(TASKS_CHUNKS_COUNT_FILE), chunks.len().to_string())?;
    info!("{} task chunks written to {}", chunks.len(), tasks_file.display());
    Ok(tasks_file)
}

/// Parse a task list: an array of tasks, or an array of task arrays.
pub fn parse_tasks(json: &str) -> Result<Vec<Task>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let items = value
        .as_array()
        .ok_or_else(|| Error::InvalidTask("task list must be a JSON array".into()))?;
    let chunked = !items.is_empty() && items.iter().all(serde_json::Value::is_array);
    if chunked {
        let chunks: Vec<Vec<Task>> = serde_json::from_value(value)?;
        Ok(chunks.into_iter().flatten().collect())
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

/// Read a task list file, flattening chunks.
pub fn read_tasks_file(path: &Path) -> Result<Vec<Task>> {
    parse_tasks(&std::fs::read_to_string(path)?)
}

// ---------------------------------------------------------------------------
// Task generation
// ---------------------------------------------------------------------------

/// Surface area change run type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunType {
    BacklogProcessing,
    GapFilling,
}

impl FromStr for RunType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "backlog-processing" => Ok(Self::BacklogProcessing),
            "gap-filling" => Ok(Self::GapFilling),
            other => Err(Error::InvalidArgument(format!("unknown run type '{}'", other))),
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BacklogProcessing => "backlog-processing",
            Self::GapFilling => "gap-filling",
        })
    }
}

/// Tiles that have a historical extent raster in `directory`.
pub fn tiles_with_historical_extent(directory: &Path) -> Result<BTreeSet<TileIndex>> {
    if !directory.is_dir() {
        return Err(Error::NotFound(format!("directory {}", directory.display())));
    }
    text::find_geotiff_files(directory, None)?
        .iter()
        .map(|path| text::tile_index_from_path(path))
        .collect()
}

/// One tile task per tile covered by the summary product, sorted by tile x.
pub fn historical_extent_tasks(
    catalog: &dyn Catalog,
    grid: &GridSpec,
    product: &str,
) -> Result<Vec<Task>> {
    let datasets = catalog.search(product, None)?;
    info!("Found {} {} datasets", datasets.len(), product);
    let (mut tasks, summary) = bin_datasets(&datasets, grid, None, BinMode::Tile)?;
    if summary.skipped > 0 {
        warn!("{} datasets skipped while binning", summary.skipped);
    }
    sort_by_tile_x(&mut tasks);
    Ok(tasks)
}

/// Day-tile tasks for scenes acquired in `range` over tiles with waterbodies.
pub fn backlog_processing_tasks(
    catalog: &dyn Catalog,
    grid: &GridSpec,
    range: &TemporalRange,
    tiles: &BTreeSet<TileIndex>,
) -> Result<Vec<Task>> {
    let datasets = catalog.search(WATER_OBSERVATIONS_PRODUCT, Some(TimeFilter::acquired(*range)))?;
    info!("Found {} datasets acquired in {}", datasets.len(), range);
    let (mut tasks, _) = bin_datasets(&datasets, grid, Some(tiles), BinMode::SolarDayTile)?;
    sort_by_solar_day(&mut tasks);
    Ok(tasks)
}

/// Complete tasks for the given tiles on one solar day.
///
/// Acquisitions in `[day - 1, day + 2)` are rebinned and only bins on `day`
/// are kept, so a scene belongs to the same solar day as in backlog runs.
pub fn resolve_solar_day(
    catalog: &dyn Catalog,
    grid: &GridSpec,
    day: NaiveDate,
    tiles: &BTreeSet<TileIndex>,
) -> Result<Vec<DayTileTask>> {
    let window_start = day.pred_opt().unwrap_or(day);
    let window_end = day
        .succ_opt()
        .and_then(|d| d.succ_opt())
        .ok_or_else(|| Error::InvalidArgument(format!("solar day {} out of range", day)))?;
    let window = TemporalRange::from_dates(window_start, window_end);

    let datasets = catalog.search(WATER_OBSERVATIONS_PRODUCT, Some(TimeFilter::acquired(window)))?;
    let (tasks, _) = bin_datasets(&datasets, grid, Some(tiles), BinMode::SolarDayTile)?;
    Ok(tasks
        .into_iter()
        .filter_map(|task| match task {
            Task::DayTile(t) if t.solar_day() == day => Some(t),
            _ => None,
        })
        .collect())
}

/// Fill in the datasets of a placeholder task; complete tasks are returned as is.
pub fn complete_day_tile_task(
    catalog: &dyn Catalog,
    grid: &GridSpec,
    task: &DayTileTask,
) -> Result<DayTileTask> {
    if !task.is_placeholder() {
        return Ok(task.clone());
    }
    let tiles = BTreeSet::from([task.tile()]);
    let resolved = resolve_solar_day(catalog, grid, task.solar_day(), &tiles)?;
    resolved
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("datasets for task {}", task.task_id())))
}

/// Day-tile tasks for scenes added to the catalog during `range`.
pub fn gap_filling_tasks(
    catalog: &dyn Catalog,
    grid: &GridSpec,
    range: &TemporalRange,
    tiles: &BTreeSet<TileIndex>,
) -> Result<Vec<Task>> {
    if range.duration() > TimeDelta::days(GAP_FILLING_MAX_DAYS) {
        warn!(
            "Gap-filling is meant for temporal ranges of {} days or less; expect long run times",
            GAP_FILLING_MAX_DAYS
        );
    }

    let created = catalog.search(WATER_OBSERVATIONS_PRODUCT, Some(TimeFilter::created(*range)))?;
    info!("Found {} datasets created in {}", created.len(), range);
    let (placeholders, _) = bin_datasets(&created, grid, Some(tiles), BinMode::SolarDayTile)?;

    let mut by_day: BTreeMap<NaiveDate, BTreeSet<TileIndex>> = BTreeMap::new();
    for task in &placeholders {
        let task = task.as_day_tile()?;
        by_day.entry(task.solar_day()).or_default().insert(task.tile());
    }

    let mut tasks = Vec::new();
    for (idx, (day, day_tiles)) in by_day.iter().enumerate() {
        info!("Updating datasets for solar day {} {}/{}", day, idx + 1, by_day.len());
        tasks.extend(resolve_solar_day(catalog, grid, *day, day_tiles)?.into_iter().map(Task::DayTile));
    }
    sort_by_solar_day(&mut tasks);
    Ok(tasks)
}

/// Surface area change tasks for a run type.
pub fn surface_area_change_tasks(
    catalog: &dyn Catalog,
    grid: &GridSpec,
    range: &TemporalRange,
    run_type: RunType,
    tiles: &BTreeSet<TileIndex>,
) -> Result<Vec<Task>> {
    match run_type {
        RunType::BacklogProcessing => backlog_processing_tasks(catalog, grid, range, tiles),
        RunType::GapFilling => gap_filling_tasks(catalog, grid, range, tiles),
    }
}
