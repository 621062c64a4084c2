//! End-to-end runs of both pipelines on small synthetic GeoTIFF fixtures.
//!
//! Fixtures are written into temporary directories: summary rasters for the
//! historical extent, a rasterised historical extent for one tile, and a
//! water classification scene in geographic coordinates.

use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use waterbodies_core::io::{GeoTiffMetadata, GeoTiffOptions, SampleFormat, write_geotiff};
use waterbodies_core::{CRS, GeoTransform, Raster, RasterElement};
use waterbodies_pipeline::batch::{SurfaceAreaChangeRunner, TaskOutcome};
use waterbodies_pipeline::catalog::{
    DatasetRecord, Footprint, HISTORICAL_EXTENT_PRODUCT, JsonCatalog, WATER_OBSERVATIONS_PRODUCT,
};
use waterbodies_pipeline::historical_extent::{
    self, HistoricalExtentParams, LandSeaMasks, WB_ID_TO_UID_TAG, WaterbodyPolygon, get_waterbodies,
};
use waterbodies_pipeline::loader::GeoTiffLoader;
use waterbodies_pipeline::store::{SqliteStore, WaterbodyStore};
use waterbodies_pipeline::tasks::{self, DayTileTask, RunType, Task};
use waterbodies_pipeline::{GridSpec, TemporalRange, TileIndex};

const TILE: TileIndex = TileIndex { x: 199, y: 35 };
const SCENE_A: &str = "9b916e21-2229-5121-8333-0a8b3736d440";
const SCENE_B: &str = "180340f9-b365-506b-b561-153af5b1490d";

// ── Fixture helpers ───────────────────────────────────────────────────

/// Transform of a window starting at (row, col) of the tile's pixel grid
fn tile_window(grid: &GridSpec, tile: TileIndex, row: usize, col: usize) -> GeoTransform {
    let t = grid.tile_geobox(tile).transform;
    let (x, y) = t.pixel_to_geo_corner(col, row);
    GeoTransform::new(x, y, t.pixel_width, t.pixel_height)
}

fn write_raster<T: RasterElement>(
    path: &Path,
    mut raster: Raster<T>,
    transform: GeoTransform,
    crs: CRS,
    format: SampleFormat,
    metadata: GeoTiffMetadata,
) {
    raster.set_transform(transform);
    raster.set_crs(Some(crs));
    let options = GeoTiffOptions::default()
        .with_sample_format(format)
        .with_metadata(metadata);
    write_geotiff(&raster, path, Some(options)).unwrap();
}

fn geographic_footprint(west: f64, south: f64, east: f64, north: f64) -> Footprint {
    Footprint {
        epsg: 4326,
        coordinates: vec![[west, north], [east, north], [east, south], [west, south], [west, north]],
    }
}

fn scene_record(id: &str, water: Option<PathBuf>) -> DatasetRecord {
    DatasetRecord {
        id: id.to_string(),
        product: WATER_OBSERVATIONS_PRODUCT.to_string(),
        acquisition_time: Utc.with_ymd_and_hms(2016, 4, 5, 8, 25, 0).unwrap(),
        creation_time: Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap(),
        footprint: Some(geographic_footprint(17.5, -32.5, 18.5, -31.5)),
        measurements: water.map(|p| HashMap::from([("water".to_string(), p)])).unwrap_or_default(),
    }
}

/// A 20 x 20 historical extent window with two waterbodies (36 and 48 px)
fn write_historical_extent(dir: &Path, grid: &GridSpec) -> BTreeMap<i32, String> {
    let mut labels: Raster<i32> = Raster::new(20, 20);
    for r in 2..8 {
        for c in 2..8 {
            labels.set(r, c, 1).unwrap();
        }
    }
    for r in 10..16 {
        for c in 10..18 {
            labels.set(r, c, 2).unwrap();
        }
    }
    let table = BTreeMap::from([(1, "k3vng8bz5u".to_string()), (2, "k3vng8bz5v".to_string())]);
    let mut metadata = GeoTiffMetadata::new();
    metadata.insert(WB_ID_TO_UID_TAG, serde_json::to_string(&table).unwrap());
    write_raster(
        &dir.join(format!("{}.tif", TILE)),
        labels,
        tile_window(grid, TILE, 100, 100),
        CRS::ease_grid_global(),
        SampleFormat::Int32,
        metadata,
    );
    table
}

fn stored_waterbodies(table: &BTreeMap<i32, String>) -> Vec<WaterbodyPolygon> {
    table
        .iter()
        .map(|(&wb_id, uid)| WaterbodyPolygon {
            uid: uid.clone(),
            wb_id,
            geometry: geo::Rect::new((18.0, -32.0), (18.01, -31.99)).to_polygon(),
            area_m2: 40_000.0,
            length_m: 200.0,
            perim_m: 800.0,
        })
        .collect()
}

// ── Scenario 1: backlog task generation ──────────────────────────────

#[test]
fn backlog_generation_bins_both_scenes_into_one_task() {
    let dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::default();
    write_historical_extent(dir.path(), &grid);

    let catalog = JsonCatalog::from_records(vec![scene_record(SCENE_A, None), scene_record(SCENE_B, None)]);
    let tiles = tasks::tiles_with_historical_extent(dir.path()).unwrap();
    let range: TemporalRange = "2016-04-05--P1D".parse().unwrap();
    let generated =
        tasks::surface_area_change_tasks(&catalog, &grid, &range, RunType::BacklogProcessing, &tiles).unwrap();

    assert_eq!(generated.len(), 1);
    assert_eq!(
        serde_json::to_value(&generated[0]).unwrap(),
        serde_json::json!({
            "solar_day": "2016-04-05",
            "tile_id_x": 199,
            "tile_id_y": 35,
            "task_datasets_ids": [SCENE_B, SCENE_A],
        })
    );

    let chunks = tasks::chunk_tasks(&generated, 4).unwrap();
    let path = tasks::write_task_chunks(dir.path(), &chunks).unwrap();
    assert_eq!(tasks::read_tasks_file(&path).unwrap(), generated);
}

// ── Scenario 2: a mid-sized waterbody stays whole ─────────────────────

#[test]
fn single_region_yields_one_polygon_through_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::default();
    let transform = tile_window(&grid, TILE, 200, 200);

    let mut frequency: Raster<f32> = Raster::new(100, 100);
    for r in 30..50 {
        for c in 40..65 {
            frequency.set(r, c, 0.5).unwrap();
        }
    }
    let count_clear: Raster<i16> = Raster::filled(100, 100, 120);
    let frequency_path = dir.path().join("frequency.tif");
    let count_path = dir.path().join("count_clear.tif");
    write_raster(&frequency_path, frequency, transform, CRS::ease_grid_global(), SampleFormat::Float32, GeoTiffMetadata::new());
    write_raster(&count_path, count_clear, transform, CRS::ease_grid_global(), SampleFormat::Int16, GeoTiffMetadata::new());

    let summary = DatasetRecord {
        id: "summary".to_string(),
        product: HISTORICAL_EXTENT_PRODUCT.to_string(),
        acquisition_time: Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap(),
        creation_time: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
        footprint: None,
        measurements: HashMap::from([
            ("frequency".to_string(), frequency_path),
            ("count_clear".to_string(), count_path),
        ]),
    };

    let polygons = get_waterbodies(
        &GeoTiffLoader,
        &grid,
        TILE,
        &[summary],
        None,
        &HistoricalExtentParams::default(),
    )
    .unwrap();
    assert_eq!(polygons.len(), 1);
    approx::assert_relative_eq!(
        waterbodies_algorithms::vector::area(&polygons[0]),
        500.0 * 900.0,
        epsilon = 1.0
    );
}

// ── Scenario 2b: the land/sea mask removes a coastal lagoon ──────────

#[test]
fn land_sea_mask_drops_waterbodies_in_the_ocean() {
    let dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::default();
    let transform = tile_window(&grid, TILE, 200, 200);

    // An inland lake and a lagoon 20 px further east
    let mut frequency: Raster<f32> = Raster::new(200, 200);
    for r in 30..50 {
        for c in (40..65).chain(120..145) {
            frequency.set(r, c, 0.5).unwrap();
        }
    }
    let count_clear: Raster<i16> = Raster::filled(200, 200, 120);
    let frequency_path = dir.path().join("frequency.tif");
    let count_path = dir.path().join("count_clear.tif");
    write_raster(&frequency_path, frequency, transform, CRS::ease_grid_global(), SampleFormat::Float32, GeoTiffMetadata::new());
    write_raster(&count_path, count_clear, transform, CRS::ease_grid_global(), SampleFormat::Int16, GeoTiffMetadata::new());

    // Land up to tile column 300, ocean beyond and outside the window
    let masks_dir = dir.path().join("land_sea_masks");
    std::fs::create_dir(&masks_dir).unwrap();
    let mut land: Raster<u8> = Raster::new(400, 400);
    for r in 0..400 {
        for c in 0..300 {
            land.set(r, c, 1).unwrap();
        }
    }
    write_raster(
        &masks_dir.join(format!("{}.tif", TILE)),
        land,
        tile_window(&grid, TILE, 0, 0),
        CRS::ease_grid_global(),
        SampleFormat::UInt8,
        GeoTiffMetadata::new(),
    );

    let summary = DatasetRecord {
        id: "summary".to_string(),
        product: HISTORICAL_EXTENT_PRODUCT.to_string(),
        acquisition_time: Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap(),
        creation_time: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
        footprint: None,
        measurements: HashMap::from([
            ("frequency".to_string(), frequency_path),
            ("count_clear".to_string(), count_path),
        ]),
    };
    let params = HistoricalExtentParams::default();

    let masks = LandSeaMasks::new(&masks_dir, true).unwrap();
    let masked = get_waterbodies(&GeoTiffLoader, &grid, TILE, std::slice::from_ref(&summary), Some(&masks), &params).unwrap();
    assert_eq!(masked.len(), 1);
    // The survivor is the inland lake starting at tile column 240
    let min_x = masked[0].exterior().0.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
    approx::assert_relative_eq!(min_x, tile_window(&grid, TILE, 0, 240).origin_x, epsilon = 1e-6);
    approx::assert_relative_eq!(
        waterbodies_algorithms::vector::area(&masked[0]),
        500.0 * 900.0,
        epsilon = 1.0
    );

    // A tile without a mask file is processed unmasked when masks are optional
    let empty_dir = dir.path().join("no_masks");
    std::fs::create_dir(&empty_dir).unwrap();
    let optional = LandSeaMasks::new(&empty_dir, false).unwrap();
    let unmasked = get_waterbodies(&GeoTiffLoader, &grid, TILE, &[summary], Some(&optional), &params).unwrap();
    assert_eq!(unmasked.len(), 2);
}

// ── Scenario 3: an oversized waterbody is split by its two cores ─────

#[test]
fn oversized_region_with_two_cores_yields_two_polygons() {
    let (rows, cols) = (40, 50);
    let mut frequency: Raster<f32> = Raster::filled(rows, cols, 0.07);
    for (r0, c0) in [(12, 2), (12, 33)] {
        for r in r0..r0 + 15 {
            for c in c0..c0 + 15 {
                frequency.set(r, c, 0.6).unwrap();
            }
        }
    }
    frequency.set_transform(GeoTransform::new(0.0, 1200.0, 30.0, -30.0));
    let count_clear: Raster<i16> = Raster::filled(rows, cols, 200);
    let params = HistoricalExtentParams::default();

    let masks = historical_extent::threshold_frequency(&frequency, &count_clear, None, &params).unwrap();
    assert_eq!(masks.extent.count_nonzero(), 2000);
    let labels = historical_extent::segment_waterbodies(&masks, &params).unwrap();
    let polygons = waterbodies_algorithms::vector::polygonize(&labels).unwrap();

    assert_eq!(polygons.len(), 2);
    let total: f64 = polygons.iter().map(|p| waterbodies_algorithms::vector::area(&p.polygon)).sum();
    approx::assert_relative_eq!(total, 2000.0 * 900.0, epsilon = 1e-6);
}

// ── Scenario 4: reprocessing with and without overwrite ──────────────

#[test]
fn reprocessing_skips_without_overwrite_and_updates_with_it() {
    let dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::default();
    let extent_dir = dir.path().join("historical_extent");
    std::fs::create_dir_all(&extent_dir).unwrap();
    let table = write_historical_extent(&extent_dir, &grid);

    // Clear and wet everywhere, 0.001° pixels over 17.5..18.5°E, 31.5..32.5°S
    let scene_path = dir.path().join("scene_water.tif");
    let mut water: Raster<u8> = Raster::filled(1000, 1000, 128);
    water.set_nodata(Some(1));
    write_raster(
        &scene_path,
        water,
        GeoTransform::new(17.5, -31.5, 0.001, -0.001),
        CRS::wgs84(),
        SampleFormat::UInt8,
        GeoTiffMetadata::new(),
    );

    let catalog_path = dir.path().join("catalog.json");
    let records = vec![scene_record(SCENE_A, Some(PathBuf::from("scene_water.tif")))];
    std::fs::write(&catalog_path, serde_json::to_string(&records).unwrap()).unwrap();
    let catalog = JsonCatalog::open(&catalog_path).unwrap();

    let mut store = SqliteStore::open(dir.path().join("waterbodies.db")).unwrap();
    store.upsert_waterbodies(&stored_waterbodies(&table), true).unwrap();

    let day = NaiveDate::from_ymd_opt(2016, 4, 5).unwrap();
    let task = DayTileTask::new(day, TILE, vec![SCENE_A.to_string()]);
    let mut runner = SurfaceAreaChangeRunner {
        catalog: &catalog,
        loader: &GeoTiffLoader,
        store: &mut store,
        grid: grid.clone(),
        historical_extent_rasters_directory: extent_dir.clone(),
        run_type: RunType::BacklogProcessing,
        overwrite: false,
    };

    assert_eq!(runner.process_task(&task).unwrap(), TaskOutcome::Written(2));
    assert_eq!(runner.process_task(&task).unwrap(), TaskOutcome::Skipped);
    runner.overwrite = true;
    assert_eq!(runner.process_task(&task).unwrap(), TaskOutcome::Written(2));

    let rows = store.load_observations(&task.task_id()).unwrap();
    assert_eq!(rows.len(), 2);
    let sizes: Vec<i64> = rows.iter().map(|o| o.px_total).collect();
    assert_eq!(sizes, vec![36, 48]);
    for row in &rows {
        assert_eq!(row.px_total, row.px_wet + row.px_dry + row.px_invalid);
        assert_eq!(row.px_wet, row.px_total);
        assert_eq!(row.area_wet_m2, row.px_wet as f64 * 900.0);
        assert_eq!(row.date, day);
        assert_eq!(row.obs_id, format!("2016-04-05/x199/y035_{}", row.uid));
    }
    assert_eq!(store.last_observation_date().unwrap(), Some(day));
}

#[test]
fn gap_filling_completes_placeholder_tasks_before_processing() {
    let dir = tempfile::tempdir().unwrap();
    let grid = GridSpec::default();
    let table = write_historical_extent(dir.path(), &grid);

    let scene_path = dir.path().join("scene_water.tif");
    let mut water: Raster<u8> = Raster::filled(1000, 1000, 0);
    water.set_nodata(Some(1));
    write_raster(&scene_path, water, GeoTransform::new(17.5, -31.5, 0.001, -0.001), CRS::wgs84(), SampleFormat::UInt8, GeoTiffMetadata::new());
    let catalog = JsonCatalog::from_records(vec![scene_record(SCENE_B, Some(scene_path))]);

    let mut store = SqliteStore::open_in_memory().unwrap();
    store.upsert_waterbodies(&stored_waterbodies(&table), true).unwrap();

    let placeholder = DayTileTask::placeholder(NaiveDate::from_ymd_opt(2016, 4, 5).unwrap(), TILE);
    let mut runner = SurfaceAreaChangeRunner {
        catalog: &catalog,
        loader: &GeoTiffLoader,
        store: &mut store,
        grid,
        historical_extent_rasters_directory: dir.path().to_path_buf(),
        run_type: RunType::GapFilling,
        overwrite: false,
    };
    let summary = runner.process_tasks(&[Task::DayTile(placeholder.clone()), Task::DayTile(placeholder.clone())], |_, _| {});
    assert_eq!(summary.written, 2);
    assert!(summary.failed.is_empty());

    let rows = store.load_observations(&placeholder.task_id()).unwrap();
    assert!(rows.iter().all(|o| o.px_dry == o.px_total && o.px_wet == 0));
}

#[test]
fn batch_collects_tasks_without_historical_extent() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = JsonCatalog::from_records(vec![scene_record(SCENE_A, None)]);
    let mut store = SqliteStore::open_in_memory().unwrap();
    let day = NaiveDate::from_ymd_opt(2016, 4, 5).unwrap();
    let tasks = vec![
        Task::DayTile(DayTileTask::new(day, TileIndex::new(1, 1), vec![SCENE_A.to_string()])),
        Task::DayTile(DayTileTask::new(day, TileIndex::new(2, 1), vec![SCENE_A.to_string()])),
    ];

    let mut runner = SurfaceAreaChangeRunner {
        catalog: &catalog,
        loader: &GeoTiffLoader,
        store: &mut store,
        grid: GridSpec::default(),
        historical_extent_rasters_directory: dir.path().to_path_buf(),
        run_type: RunType::BacklogProcessing,
        overwrite: false,
    };
    let mut seen = Vec::new();
    let summary = runner.process_tasks(&tasks, |idx, _| seen.push(idx));
    assert_eq!(seen, vec![0, 1]);
    assert_eq!(summary.failed, tasks);

    let failed_file = dir.path().join("failed_tasks");
    waterbodies_pipeline::batch::append_failed_tasks(&failed_file, &summary.failed).unwrap();
    let line = std::fs::read_to_string(&failed_file).unwrap();
    assert_eq!(line.lines().count(), 1);
}
