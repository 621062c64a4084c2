//! Statistics of class rasters over labelled regions
//!
//! - **class_counts**: per-label histogram of a small set of class codes

mod class_counts;

pub use class_counts::{LabelClassCounts, label_class_counts};
