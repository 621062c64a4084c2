//! # Waterbodies Algorithms
//!
//! Raster and vector algorithms behind waterbody extraction.
//!
//! ## Available Algorithm Categories
//!
//! - **morphology**: structuring elements, binary erosion
//! - **segmentation**: labeling, size filtering, distance transform, watershed
//! - **statistics**: per-label class counts
//! - **vector**: polygonize, rasterize, boundary merge, measurements

mod maybe_rayon;

pub mod morphology;
pub mod segmentation;
pub mod statistics;
pub mod vector;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::morphology::{Erode, ErodeParams, StructuringElement, binary_erode};
    pub use crate::segmentation::{
        Label, LabelParams, Watershed, WatershedInput, WatershedParams, distance_transform_edt,
        label, region_sizes, remove_small_objects, select_large_objects, watershed,
    };
    pub use crate::statistics::{LabelClassCounts, label_class_counts};
    pub use crate::vector::{
        LabelledPolygon, area, length, merge_across_boundaries, perimeter, polygonize, rasterize,
    };
    pub use waterbodies_core::prelude::*;
}
