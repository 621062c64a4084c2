//! # Waterbodies Pipeline
//!
//! Detection and tracking of surface water bodies on a fixed equal-area tile
//! grid.
//!
//! - **historical extent**: canonical waterbody polygons from the multi-year
//!   water frequency summary, with geohash uids and dense wb_ids
//! - **surface area change**: per-waterbody wet/dry/invalid pixel counts for
//!   every `(solar day, tile)` of new scenes, stored as a time series
//!
//! External systems sit behind traits: [`catalog::Catalog`] for dataset
//! discovery, [`loader::DatasetLoader`] for raster loading and
//! [`store::WaterbodyStore`] for persistence.

pub mod batch;
pub mod catalog;
pub mod error;
pub mod grid;
pub mod historical_extent;
pub mod loader;
pub mod store;
pub mod surface_area_change;
pub mod tasks;
pub mod temporal;
pub mod text;

pub use error::{Error, Result};
pub use grid::{GeoBox, GridSpec, TileIndex};
pub use historical_extent::{HistoricalExtentParams, WaterbodyPolygon};
pub use surface_area_change::WaterbodyObservation;
pub use tasks::{DayTileTask, RunType, Task, TileTask};
pub use temporal::TemporalRange;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::batch::{BatchSummary, HistoricalExtentRunner, SurfaceAreaChangeRunner, TaskOutcome};
    pub use crate::catalog::{Catalog, DatasetRecord, Footprint, JsonCatalog};
    pub use crate::error::{Error, Result};
    pub use crate::grid::{GeoBox, GridSpec, TileIndex};
    pub use crate::historical_extent::{HistoricalExtentParams, LandSeaMasks, WaterbodyPolygon};
    pub use crate::loader::{DatasetLoader, GeoTiffLoader};
    pub use crate::store::{SqliteStore, UpsertSummary, WaterbodyStore};
    pub use crate::surface_area_change::WaterbodyObservation;
    pub use crate::tasks::{BinMode, BinSummary, DayTileTask, RunType, Task, TileTask};
    pub use crate::temporal::TemporalRange;
}
