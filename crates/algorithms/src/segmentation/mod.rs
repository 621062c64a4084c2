//! Region segmentation of label and mask rasters
//!
//! - **label**: connected regions of equal non-zero value
//! - **remove_small_objects** / **select_large_objects**: size filtering by
//!   pixel count
//! - **distance_transform_edt**: exact Euclidean distance to the background
//! - **watershed**: marker-controlled priority flood

mod distance;
mod label;
mod size_filter;
mod watershed;

pub use distance::distance_transform_edt;
pub use label::{Label, LabelParams, label};
pub use size_filter::{region_sizes, remove_small_objects, select_large_objects};
pub use watershed::{Watershed, WatershedInput, WatershedParams, watershed};
