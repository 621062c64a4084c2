//! Vector operations on waterbody polygons
//!
//! - Polygonize: trace raster regions into polygons
//! - Rasterize: burn polygons back onto a grid
//! - Merge: dissolve polygons split by tile boundaries
//! - Measurements: area, perimeter, length

mod measurements;
mod merge;
mod polygonize;
mod rasterize;

pub use measurements::{area, length, perimeter};
pub use merge::merge_across_boundaries;
pub use polygonize::{LabelledPolygon, polygonize};
pub use rasterize::rasterize;
