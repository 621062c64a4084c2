//! Sequential task runners for both pipelines.
//!
//! A failing task is logged and collected; the batch carries on with the
//! next one. Collected failures can be appended to a failed-tasks file as one
//! JSON array per line.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::grid::GridSpec;
use crate::historical_extent::{
    HistoricalExtentParams, LandSeaMasks, TilePolygons, get_waterbodies, tile_polygons_path,
    write_tile_polygons,
};
use crate::loader::DatasetLoader;
use crate::store::WaterbodyStore;
use crate::surface_area_change::get_waterbody_observations;
use crate::tasks::{DayTileTask, RunType, Task, TileTask, complete_day_tile_task};

/// What happened to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Output written for this many waterbodies or observations
    Written(usize),
    /// Processed, nothing to write
    Empty,
    /// Output already present
    Skipped,
}

/// Result of a batch run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub written: usize,
    pub empty: usize,
    pub skipped: usize,
    pub failed: Vec<Task>,
}

impl BatchSummary {
    fn record(&mut self, task: &Task, outcome: Result<TaskOutcome>) {
        match outcome {
            Ok(TaskOutcome::Written(_)) => self.written += 1,
            Ok(TaskOutcome::Empty) => self.empty += 1,
            Ok(TaskOutcome::Skipped) => self.skipped += 1,
            Err(e) => {
                error!("Failed to process task {}: {}", task, e);
                self.failed.push(task.clone());
            }
        }
    }
}

/// Append `failed` as a single JSON array line.
pub fn append_failed_tasks(path: &Path, failed: &[Task]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(failed)?)?;
    info!("{} failed tasks written to {}", failed.len(), path.display());
    Ok(())
}

/// Per-tile polygon extraction into an output directory.
pub struct HistoricalExtentRunner<'a, L> {
    pub catalog: &'a dyn Catalog,
    pub loader: &'a L,
    pub grid: GridSpec,
    pub land_sea_masks: Option<LandSeaMasks>,
    pub output_directory: PathBuf,
    pub overwrite: bool,
    pub params: HistoricalExtentParams,
}

impl<L: DatasetLoader> HistoricalExtentRunner<'_, L> {
    pub fn process_task(&self, task: &TileTask) -> Result<TaskOutcome> {
        let tile = task.tile();
        let output = tile_polygons_path(&self.output_directory, tile);
        if !self.overwrite && output.exists() {
            info!("Task {} already exists, skipping", tile);
            return Ok(TaskOutcome::Skipped);
        }

        let datasets = self.catalog.get(task.dataset_ids())?;
        let polygons = get_waterbodies(
            self.loader,
            &self.grid,
            tile,
            &datasets,
            self.land_sea_masks.as_ref(),
            &self.params,
        )?;
        if polygons.is_empty() {
            info!("Task {} has no waterbody polygons", tile);
            return Ok(TaskOutcome::Empty);
        }

        let epsg = self
            .grid
            .crs
            .epsg()
            .ok_or_else(|| Error::InvalidArgument("grid CRS has no EPSG code".into()))?;
        let count = polygons.len();
        std::fs::create_dir_all(&self.output_directory)?;
        let path = write_tile_polygons(&self.output_directory, &TilePolygons { tile, epsg, polygons })?;
        info!("Waterbodies written to {}", path.display());
        Ok(TaskOutcome::Written(count))
    }

    /// Process every task; `progress` is called before each one.
    pub fn process_tasks(&self, tasks: &[Task], mut progress: impl FnMut(usize, &Task)) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (idx, task) in tasks.iter().enumerate() {
            progress(idx, task);
            info!("Processing task {} {}/{}", task, idx + 1, tasks.len());
            let outcome = task.as_tile().and_then(|t| self.process_task(t));
            summary.record(task, outcome);
        }
        summary
    }
}

/// Observation extraction into a store.
pub struct SurfaceAreaChangeRunner<'a, L, S> {
    pub catalog: &'a dyn Catalog,
    pub loader: &'a L,
    pub store: &'a mut S,
    pub grid: GridSpec,
    pub historical_extent_rasters_directory: PathBuf,
    pub run_type: RunType,
    pub overwrite: bool,
}

impl<L: DatasetLoader, S: WaterbodyStore> SurfaceAreaChangeRunner<'_, L, S> {
    /// Extract and upsert the observations of one task.
    ///
    /// Backlog runs skip tasks already in the store unless overwriting;
    /// gap-filling always processes and completes placeholder tasks first.
    pub fn process_task(&mut self, task: &DayTileTask) -> Result<TaskOutcome> {
        let task_id = task.task_id();
        if self.run_type == RunType::BacklogProcessing
            && !self.overwrite
            && self.store.task_exists(&task_id)?
        {
            info!("Task {} already exists, skipping", task_id);
            return Ok(TaskOutcome::Skipped);
        }

        let task = complete_day_tile_task(self.catalog, &self.grid, task)?;
        let observations = get_waterbody_observations(
            &task,
            self.catalog,
            self.loader,
            &self.historical_extent_rasters_directory,
        )?;
        match observations {
            Some(observations) => {
                self.store.upsert_observations(&observations, true)?;
                Ok(TaskOutcome::Written(observations.len()))
            }
            None => Ok(TaskOutcome::Empty),
        }
    }

    /// Process every task; `progress` is called before each one.
    pub fn process_tasks(&mut self, tasks: &[Task], mut progress: impl FnMut(usize, &Task)) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (idx, task) in tasks.iter().enumerate() {
            progress(idx, task);
            info!("Processing task {} {}/{}", task, idx + 1, tasks.len());
            let outcome = task.as_day_tile().and_then(|t| self.process_task(t));
            summary.record(task, outcome);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileIndex;
    use chrono::NaiveDate;

    #[test]
    fn test_append_failed_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp").join("failed_tasks");
        let day = NaiveDate::from_ymd_opt(2016, 4, 5).unwrap();
        let first = vec![Task::DayTile(DayTileTask::placeholder(day, TileIndex::new(1, 2)))];
        let second = vec![Task::Tile(TileTask::new(TileIndex::new(3, 4), vec!["a".to_string()]))];

        append_failed_tasks(&path, &first).unwrap();
        append_failed_tasks(&path, &second).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Vec<Task> = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, second);
    }

    #[test]
    fn test_summary_records_failures() {
        let mut summary = BatchSummary::default();
        let task = Task::Tile(TileTask::new(TileIndex::new(0, 0), vec![]));
        summary.record(&task, Ok(TaskOutcome::Written(3)));
        summary.record(&task, Ok(TaskOutcome::Skipped));
        summary.record(&task, Err(Error::NotFound("raster".into())));
        assert_eq!((summary.written, summary.skipped, summary.failed.len()), (1, 1, 1));
    }
}
