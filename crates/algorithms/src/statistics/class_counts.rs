//! Per-label class histograms
//!
//! Computes, in a single pass over a label raster, how many pixels of each
//! label fall in each class of a co-registered class raster. Classes are
//! small dense codes `0..N`.

use std::collections::BTreeMap;
use waterbodies_core::raster::Raster;
use waterbodies_core::{Error, Result};

/// Class counts keyed by positive label, in label order
pub type LabelClassCounts<const N: usize> = BTreeMap<i32, [u64; N]>;

/// Count the pixels of every class code `0..N` under every positive label.
///
/// Labels ≤ 0 are background and ignored. A class code outside `0..N` under a
/// positive label is an error.
pub fn label_class_counts<const N: usize>(
    labels: &Raster<i32>,
    classes: &Raster<u8>,
) -> Result<LabelClassCounts<N>> {
    labels.check_same_shape(classes)?;

    let mut counts: LabelClassCounts<N> = BTreeMap::new();
    for (&label, &class) in labels.data().iter().zip(classes.data().iter()) {
        if label <= 0 {
            continue;
        }
        let slot = usize::from(class);
        if slot >= N {
            return Err(Error::InvalidParameter {
                name: "class",
                value: class.to_string(),
                reason: format!("class codes must be below {}", N),
            });
        }
        counts.entry(label).or_insert([0; N])[slot] += 1;
    }

    Ok(counts)
}
