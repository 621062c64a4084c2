//! Connected-component labeling
//!
//! Pixels belong to the same region when they hold the same non-zero value and
//! are connected under the chosen connectivity. Regions are numbered 1..=n in
//! raster scan order of their first pixel; background (zero or nodata) is 0.

use std::collections::VecDeque;
use waterbodies_core::raster::{Connectivity, Raster, RasterElement};
use waterbodies_core::{Algorithm, Error, Result};

/// Parameters for labeling
#[derive(Debug, Clone, Default)]
pub struct LabelParams {
    pub connectivity: Connectivity,
}

/// Labeling algorithm
#[derive(Debug, Clone, Default)]
pub struct Label;

impl Algorithm for Label {
    type Input = Raster<i32>;
    type Output = Raster<i32>;
    type Params = LabelParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Label"
    }

    fn description(&self) -> &'static str {
        "Label connected regions of equal non-zero value"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        label(&input, params.connectivity)
    }
}

/// Label connected regions of equal non-zero value.
///
/// Works on binary masks (every set pixel has the same value) as well as on
/// already labelled images, where it splits labels that are not connected.
pub fn label<T: RasterElement>(raster: &Raster<T>, connectivity: Connectivity) -> Result<Raster<i32>> {
    let (rows, cols) = raster.shape();
    let data = raster.data();
    let mut output: Raster<i32> = raster.with_same_meta();
    let mut queue = VecDeque::new();
    let mut next_label: i32 = 0;

    for row in 0..rows {
        for col in 0..cols {
            let value = data[(row, col)];
            if value == T::zero() || raster.is_nodata(value) || output.data()[(row, col)] != 0 {
                continue;
            }

            next_label = next_label
                .checked_add(1)
                .ok_or_else(|| Error::Algorithm("label count overflows i32".to_string()))?;
            output.data_mut()[(row, col)] = next_label;
            queue.push_back((row, col));

            while let Some((r, c)) = queue.pop_front() {
                for (nr, nc) in connectivity.neighbors(r, c, rows, cols) {
                    if data[(nr, nc)] == value && output.data()[(nr, nc)] == 0 {
                        output.data_mut()[(nr, nc)] = next_label;
                        queue.push_back((nr, nc));
                    }
                }
            }
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[i32]]) -> Raster<i32> {
        let cols = rows[0].len();
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Raster::from_vec(data, rows.len(), cols).unwrap()
    }

    #[test]
    fn test_rook_keeps_diagonals_apart() {
        let mask = grid(&[&[1, 0, 0], &[0, 1, 0], &[0, 0, 1]]);
        let rook = label(&mask, Connectivity::Rook).unwrap();
        assert_eq!(rook.data().iter().copied().max(), Some(3));

        let queen = label(&mask, Connectivity::Queen).unwrap();
        assert_eq!(queen.data().iter().copied().max(), Some(1));
    }

    #[test]
    fn test_scan_order_numbering() {
        let mask = grid(&[&[0, 0, 1], &[1, 0, 1], &[1, 0, 0]]);
        let labels = label(&mask, Connectivity::Rook).unwrap();
        assert_eq!(labels.get(0, 2).unwrap(), 1);
        assert_eq!(labels.get(1, 2).unwrap(), 1);
        assert_eq!(labels.get(1, 0).unwrap(), 2);
        assert_eq!(labels.get(2, 0).unwrap(), 2);
    }

    #[test]
    fn test_adjacent_different_values_split() {
        let image = grid(&[&[5, 5, 7, 7], &[5, 5, 7, 7]]);
        let labels = label(&image, Connectivity::Rook).unwrap();
        assert_eq!(labels.get(0, 0).unwrap(), 1);
        assert_eq!(labels.get(1, 3).unwrap(), 2);
    }

    #[test]
    fn test_same_value_disconnected_relabels() {
        let image = grid(&[&[4, 0, 4]]);
        let labels = label(&image, Connectivity::Rook).unwrap();
        assert_eq!(labels.data().as_slice().unwrap(), &[1, 0, 2]);
    }

    #[test]
    fn test_float_mask_nodata_is_background() {
        let mut raster = Raster::from_vec(vec![1.0f32, f32::NAN, 1.0], 1, 3).unwrap();
        raster.set_nodata(Some(f32::NAN));
        let labels = label(&raster, Connectivity::Rook).unwrap();
        assert_eq!(labels.data().as_slice().unwrap(), &[1, 0, 2]);
    }
}
