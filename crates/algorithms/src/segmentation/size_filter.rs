//! Size filtering of labelled regions by pixel count

use std::collections::HashMap;
use waterbodies_core::raster::Raster;

/// Pixel count of every positive label
pub fn region_sizes(labels: &Raster<i32>) -> HashMap<i32, usize> {
    let mut sizes = HashMap::new();
    for &value in labels.data().iter().filter(|&&v| v > 0) {
        *sizes.entry(value).or_insert(0) += 1;
    }
    sizes
}

/// Zero out labels with fewer than `min_size` pixels.
///
/// Sizes are counted per label value, so the input must already be labelled.
pub fn remove_small_objects(labels: &Raster<i32>, min_size: usize) -> Raster<i32> {
    let sizes = region_sizes(labels);
    labels.map(|v| {
        if v > 0 && sizes.get(&v).copied().unwrap_or(0) >= min_size {
            v
        } else {
            0
        }
    })
}

/// Binary mask of labels with strictly more than `max_size` pixels
pub fn select_large_objects(labels: &Raster<i32>, max_size: usize) -> Raster<u8> {
    let sizes = region_sizes(labels);
    labels.map(|v| u8::from(v > 0 && sizes.get(&v).copied().unwrap_or(0) > max_size))
}
