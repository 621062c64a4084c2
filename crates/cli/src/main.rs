//! Waterbodies CLI - historical extent and surface area change pipelines

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use waterbodies_pipeline::batch::{
    append_failed_tasks, BatchSummary, HistoricalExtentRunner, SurfaceAreaChangeRunner,
};
use waterbodies_pipeline::catalog::{JsonCatalog, HISTORICAL_EXTENT_PRODUCT};
use waterbodies_pipeline::historical_extent::{
    process_polygons, rasterise_polygons, read_tile_polygons, split_land_sea_mask, HistoricalExtentParams,
    LandSeaMasks,
};
use waterbodies_pipeline::loader::GeoTiffLoader;
use waterbodies_pipeline::store::{SqliteStore, WaterbodyStore, DATABASE_ENV};
use waterbodies_pipeline::tasks::{self, DayTileTask, RunType, Task};
use waterbodies_pipeline::{GridSpec, TemporalRange, TileIndex};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "waterbodies")]
#[command(author, version, about = "Waterbody detection and surface area tracking", long_about = None)]
struct Cli {
    /// Verbosity: -v info, -vv debug, -vvv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the historical extent polygons from the water frequency summary
    HistoricalExtent {
        #[command(subcommand)]
        step: HistoricalExtentCommands,
    },
    /// Record per-waterbody wet/dry/invalid observations for new scenes
    SurfaceAreaChange {
        #[command(subcommand)]
        step: SurfaceAreaChangeCommands,
    },
}

#[derive(Args)]
struct CatalogArgs {
    /// JSON dataset catalog
    #[arg(long)]
    catalog: PathBuf,
}

#[derive(Args)]
struct DatabaseArgs {
    /// SQLite database file
    #[arg(long, env = DATABASE_ENV)]
    database: PathBuf,
}

#[derive(Subcommand)]
enum HistoricalExtentCommands {
    /// Bin the summary product datasets into per-tile tasks
    GenerateTasks {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Summary product name
        #[arg(long, default_value = HISTORICAL_EXTENT_PRODUCT)]
        product: String,
        /// Number of task chunks for parallel workers
        #[arg(long, default_value = "1")]
        max_parallel_steps: usize,
        /// Directory for the task chunk files
        #[arg(long)]
        output_directory: PathBuf,
    },
    /// Cut a land mask GeoTIFF into per-tile land/sea mask rasters
    SplitLandSeaMask {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Summary product name
        #[arg(long, default_value = HISTORICAL_EXTENT_PRODUCT)]
        product: String,
        /// Land mask GeoTIFF (1 = land, 0 = ocean)
        #[arg(long)]
        land_sea_mask_file: PathBuf,
        /// Directory for the per-tile mask rasters
        #[arg(long)]
        output_directory: PathBuf,
    },
    /// Extract waterbody polygons for every task in a task list file
    ProcessTasks {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Task list file written by generate-tasks
        #[arg(long)]
        tasks_list_file: PathBuf,
        /// Directory of per-tile land/sea mask rasters
        #[arg(long)]
        land_sea_mask_rasters_directory: Option<PathBuf>,
        /// Fail tiles without a land/sea mask raster
        #[arg(long)]
        require_land_sea_mask: bool,
        /// Directory for the per-tile polygon files
        #[arg(long)]
        output_directory: PathBuf,
        /// Reprocess tiles that already have a polygon file
        #[arg(long)]
        overwrite: bool,
    },
    /// Merge the per-tile polygons, assign identifiers and store them
    ProcessPolygons {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Summary product name
        #[arg(long, default_value = HISTORICAL_EXTENT_PRODUCT)]
        product: String,
        /// Directory of per-tile polygon files
        #[arg(long)]
        polygons_directory: PathBuf,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Rasterise the stored waterbodies into per-tile label rasters
    RasterisePolygons {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Summary product name
        #[arg(long, default_value = HISTORICAL_EXTENT_PRODUCT)]
        product: String,
        /// Output directory for the label rasters
        #[arg(long)]
        historical_extent_rasters_directory: PathBuf,
        #[command(flatten)]
        database: DatabaseArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RunTypeArg {
    BacklogProcessing,
    GapFilling,
}

impl From<RunTypeArg> for RunType {
    fn from(arg: RunTypeArg) -> Self {
        match arg {
            RunTypeArg::BacklogProcessing => RunType::BacklogProcessing,
            RunTypeArg::GapFilling => RunType::GapFilling,
        }
    }
}

#[derive(Subcommand)]
enum SurfaceAreaChangeCommands {
    /// Bin water observation scenes into (solar day, tile) tasks
    GenerateTasks {
        #[command(flatten)]
        catalog: CatalogArgs,
        /// Temporal range, e.g. 2016-04-05--P1M
        #[arg(long)]
        temporal_range: TemporalRange,
        #[arg(long, value_enum)]
        run_type: RunTypeArg,
        /// Only tiles with a raster in this directory get tasks
        #[arg(long)]
        historical_extent_rasters_directory: PathBuf,
        /// Number of task chunks for parallel workers
        #[arg(long, default_value = "1")]
        max_parallel_steps: usize,
        /// Directory for the task chunk files
        #[arg(long)]
        output_directory: PathBuf,
    },
    /// Process a single (solar day, tile) task
    ProcessTask {
        #[command(flatten)]
        catalog: CatalogArgs,
        #[arg(long, value_enum)]
        run_type: RunTypeArg,
        /// Solar day, YYYY-MM-DD
        #[arg(long)]
        solar_day: NaiveDate,
        #[arg(long)]
        tile_id_x: i32,
        #[arg(long)]
        tile_id_y: i32,
        /// JSON array of dataset ids; looked up in the catalog when omitted
        #[arg(long)]
        task_datasets_ids: Option<String>,
        #[arg(long)]
        historical_extent_rasters_directory: PathBuf,
        #[command(flatten)]
        database: DatabaseArgs,
        /// Reprocess tasks that already have observations
        #[arg(long)]
        overwrite: bool,
    },
    /// Process every task in a task list file
    ProcessTasks {
        #[command(flatten)]
        catalog: CatalogArgs,
        #[arg(long, value_enum)]
        run_type: RunTypeArg,
        /// Task list file written by generate-tasks
        #[arg(long)]
        tasks_list_file: PathBuf,
        #[arg(long)]
        historical_extent_rasters_directory: PathBuf,
        #[command(flatten)]
        database: DatabaseArgs,
        /// Reprocess tasks that already have observations
        #[arg(long)]
        overwrite: bool,
        /// Append failed tasks to this file as a JSON array line
        #[arg(long)]
        failed_tasks_file: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")
}

fn spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn task_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn open_catalog(args: &CatalogArgs) -> Result<JsonCatalog> {
    let catalog = JsonCatalog::open(&args.catalog)
        .with_context(|| format!("Failed to open catalog {}", args.catalog.display()))?;
    info!("Catalog {} has {} datasets", args.catalog.display(), catalog.len());
    Ok(catalog)
}

fn open_store(args: &DatabaseArgs) -> Result<SqliteStore> {
    SqliteStore::open(&args.database)
        .with_context(|| format!("Failed to open database {}", args.database.display()))
}

fn read_tasks(path: &Path) -> Result<Vec<Task>> {
    let tasks = tasks::read_tasks_file(path)
        .with_context(|| format!("Failed to read tasks from {}", path.display()))?;
    info!("Read {} tasks from {}", tasks.len(), path.display());
    Ok(tasks)
}

fn write_chunks(tasks: &[Task], max_parallel_steps: usize, output_directory: &Path) -> Result<()> {
    let chunks = tasks::chunk_tasks(tasks, max_parallel_steps).context("Failed to chunk tasks")?;
    let path = tasks::write_task_chunks(output_directory, &chunks).context("Failed to write tasks")?;
    println!("{} tasks in {} chunks written to: {}", tasks.len(), chunks.len(), path.display());
    Ok(())
}

/// Tiles covered by the summary product, used for the boundary merge and rasterising
fn summary_tiles(catalog: &JsonCatalog, grid: &GridSpec, product: &str) -> Result<Vec<TileIndex>> {
    let tasks = tasks::historical_extent_tasks(catalog, grid, product)
        .context("Failed to bin summary datasets into tiles")?;
    let tiles: BTreeSet<TileIndex> = tasks.iter().map(Task::tile).collect();
    Ok(tiles.into_iter().collect())
}

fn report(summary: &BatchSummary, elapsed: std::time::Duration) {
    println!(
        "Tasks: {} written, {} empty, {} skipped, {} failed",
        summary.written,
        summary.empty,
        summary.skipped,
        summary.failed.len()
    );
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let grid = GridSpec::default();

    match cli.command {
        // ── Historical extent ────────────────────────────────────────
        Commands::HistoricalExtent { step } => match step {
            HistoricalExtentCommands::GenerateTasks {
                catalog,
                product,
                max_parallel_steps,
                output_directory,
            } => {
                let catalog = open_catalog(&catalog)?;
                let pb = spinner("Binning datasets...")?;
                let tasks = tasks::historical_extent_tasks(&catalog, &grid, &product)
                    .context("Failed to generate tasks")?;
                pb.finish_and_clear();
                write_chunks(&tasks, max_parallel_steps, &output_directory)?;
            }

            HistoricalExtentCommands::SplitLandSeaMask {
                catalog,
                product,
                land_sea_mask_file,
                output_directory,
            } => {
                let catalog = open_catalog(&catalog)?;
                let tiles = summary_tiles(&catalog, &grid, &product)?;
                let pb = spinner("Splitting land/sea mask...")?;
                let start = Instant::now();
                let written = split_land_sea_mask(&land_sea_mask_file, &tiles, &grid, &output_directory)
                    .with_context(|| format!("Failed to split {}", land_sea_mask_file.display()))?;
                pb.finish_and_clear();
                println!(
                    "{} of {} tiles need a land/sea mask, saved to: {}",
                    written.len(),
                    tiles.len(),
                    output_directory.display()
                );
                println!("  Processing time: {:.2?}", start.elapsed());
            }

            HistoricalExtentCommands::ProcessTasks {
                catalog,
                tasks_list_file,
                land_sea_mask_rasters_directory,
                require_land_sea_mask,
                output_directory,
                overwrite,
            } => {
                let catalog = open_catalog(&catalog)?;
                let tasks = read_tasks(&tasks_list_file)?;
                let land_sea_masks = land_sea_mask_rasters_directory
                    .map(|dir| LandSeaMasks::new(dir, require_land_sea_mask))
                    .transpose()
                    .context("Failed to open land/sea mask directory")?;
                let runner = HistoricalExtentRunner {
                    catalog: &catalog,
                    loader: &GeoTiffLoader,
                    grid,
                    land_sea_masks,
                    output_directory,
                    overwrite,
                    params: HistoricalExtentParams::default(),
                };

                let pb = task_bar(tasks.len())?;
                let start = Instant::now();
                let summary = runner.process_tasks(&tasks, |idx, task| {
                    pb.set_position(idx as u64);
                    pb.set_message(task.tile().to_string());
                });
                pb.finish_and_clear();
                report(&summary, start.elapsed());
                if !summary.failed.is_empty() {
                    warn!("{} tasks failed", summary.failed.len());
                }
            }

            HistoricalExtentCommands::ProcessPolygons {
                catalog,
                product,
                polygons_directory,
                database,
            } => {
                let catalog = open_catalog(&catalog)?;
                let tiles = summary_tiles(&catalog, &grid, &product)?;
                let pb = spinner("Merging polygons...")?;
                let polygons = read_tile_polygons(&polygons_directory, &grid)
                    .with_context(|| format!("Failed to read polygons from {}", polygons_directory.display()))?;
                info!("Read {} polygons from {} tiles", polygons.len(), tiles.len());
                let waterbodies =
                    process_polygons(polygons, &tiles, &grid).context("Failed to process polygons")?;
                pb.finish_and_clear();

                let mut store = open_store(&database)?;
                let summary = store
                    .upsert_waterbodies(&waterbodies, true)
                    .context("Failed to write waterbodies")?;
                println!(
                    "{} waterbodies: {} inserted, {} updated",
                    waterbodies.len(),
                    summary.inserted,
                    summary.updated
                );
            }

            HistoricalExtentCommands::RasterisePolygons {
                catalog,
                product,
                historical_extent_rasters_directory,
                database,
            } => {
                let catalog = open_catalog(&catalog)?;
                let tiles = summary_tiles(&catalog, &grid, &product)?;
                let store = open_store(&database)?;
                let waterbodies = store.load_waterbodies().context("Failed to load waterbodies")?;
                info!("Loaded {} waterbodies", waterbodies.len());

                let pb = spinner("Rasterising polygons...")?;
                let start = Instant::now();
                let written = rasterise_polygons(&waterbodies, &tiles, &grid, &historical_extent_rasters_directory)
                    .context("Failed to rasterise polygons")?;
                pb.finish_and_clear();
                println!(
                    "{} historical extent rasters saved to: {}",
                    written.len(),
                    historical_extent_rasters_directory.display()
                );
                println!("  Processing time: {:.2?}", start.elapsed());
            }
        },

        // ── Surface area change ──────────────────────────────────────
        Commands::SurfaceAreaChange { step } => match step {
            SurfaceAreaChangeCommands::GenerateTasks {
                catalog,
                temporal_range,
                run_type,
                historical_extent_rasters_directory,
                max_parallel_steps,
                output_directory,
            } => {
                let catalog = open_catalog(&catalog)?;
                let tiles = tasks::tiles_with_historical_extent(&historical_extent_rasters_directory)
                    .context("Failed to list historical extent tiles")?;
                info!("{} tiles with a historical extent", tiles.len());

                let pb = spinner("Binning datasets...")?;
                let tasks = tasks::surface_area_change_tasks(
                    &catalog,
                    &grid,
                    &temporal_range,
                    run_type.into(),
                    &tiles,
                )
                .context("Failed to generate tasks")?;
                pb.finish_and_clear();
                write_chunks(&tasks, max_parallel_steps, &output_directory)?;
            }

            SurfaceAreaChangeCommands::ProcessTask {
                catalog,
                run_type,
                solar_day,
                tile_id_x,
                tile_id_y,
                task_datasets_ids,
                historical_extent_rasters_directory,
                database,
                overwrite,
            } => {
                let catalog = open_catalog(&catalog)?;
                let mut store = open_store(&database)?;
                let tile = TileIndex::new(tile_id_x, tile_id_y);
                let task = match task_datasets_ids {
                    Some(json) => {
                        let ids: Vec<String> =
                            serde_json::from_str(&json).context("Invalid --task-datasets-ids")?;
                        DayTileTask::new(solar_day, tile, ids)
                    }
                    None => DayTileTask::placeholder(solar_day, tile),
                };

                let mut runner = SurfaceAreaChangeRunner {
                    catalog: &catalog,
                    loader: &GeoTiffLoader,
                    store: &mut store,
                    grid,
                    historical_extent_rasters_directory,
                    run_type: run_type.into(),
                    overwrite,
                };
                let outcome = runner
                    .process_task(&task)
                    .with_context(|| format!("Failed to process task {}", task.task_id()))?;
                println!("Task {}: {:?}", task.task_id(), outcome);
            }

            SurfaceAreaChangeCommands::ProcessTasks {
                catalog,
                run_type,
                tasks_list_file,
                historical_extent_rasters_directory,
                database,
                overwrite,
                failed_tasks_file,
            } => {
                let catalog = open_catalog(&catalog)?;
                let tasks = read_tasks(&tasks_list_file)?;
                let mut store = open_store(&database)?;
                let mut runner = SurfaceAreaChangeRunner {
                    catalog: &catalog,
                    loader: &GeoTiffLoader,
                    store: &mut store,
                    grid,
                    historical_extent_rasters_directory,
                    run_type: run_type.into(),
                    overwrite,
                };

                let pb = task_bar(tasks.len())?;
                let start = Instant::now();
                let summary = runner.process_tasks(&tasks, |idx, task| {
                    pb.set_position(idx as u64);
                    pb.set_message(task.to_string());
                });
                pb.finish_and_clear();
                report(&summary, start.elapsed());

                if !summary.failed.is_empty() {
                    match failed_tasks_file {
                        Some(path) => append_failed_tasks(&path, &summary.failed)
                            .with_context(|| format!("Failed to write {}", path.display()))?,
                        None => warn!("{} tasks failed", summary.failed.len()),
                    }
                }
            }
        },
    }

    Ok(())
}
