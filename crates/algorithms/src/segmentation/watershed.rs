//! Marker-controlled watershed
//!
//! Priority flood from labelled markers over an elevation image: the lowest
//! queued pixel is popped first and hands its label to every unlabelled
//! neighbour inside the mask. Equal elevations are served first-in,
//! first-out, so plateaus are split evenly between competing markers.
//!
//! Reference:
//! Beucher, S., & Meyer, F. (1993). The morphological approach to
//! segmentation: the watershed transformation. *Mathematical Morphology in
//! Image Processing*, 433–481.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use waterbodies_core::raster::{Connectivity, Raster};
use waterbodies_core::{Algorithm, Error, Result};

/// A queued pixel, ordered by elevation then insertion age (min-heap).
#[derive(Debug, Clone)]
struct Cell {
    elevation: f64,
    age: u64,
    row: usize,
    col: usize,
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so BinaryHeap (max-heap) pops the lowest, oldest cell
impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .elevation
            .total_cmp(&self.elevation)
            .then_with(|| other.age.cmp(&self.age))
    }
}

/// Parameters for watershed segmentation
#[derive(Debug, Clone, Default)]
pub struct WatershedParams {
    pub connectivity: Connectivity,
}

/// Watershed input: elevation, markers and an optional mask
#[derive(Debug, Clone)]
pub struct WatershedInput {
    pub elevation: Raster<f64>,
    pub markers: Raster<i32>,
    pub mask: Option<Raster<u8>>,
}

/// Watershed algorithm
#[derive(Debug, Clone, Default)]
pub struct Watershed;

impl Algorithm for Watershed {
    type Input = WatershedInput;
    type Output = Raster<i32>;
    type Params = WatershedParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Watershed"
    }

    fn description(&self) -> &'static str {
        "Marker-controlled watershed segmentation by priority flood"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        watershed(
            &input.elevation,
            &input.markers,
            input.mask.as_ref(),
            params.connectivity,
        )
    }
}

/// Flood `elevation` from the positive labels in `markers`.
///
/// Markers outside `mask` are discarded. Pixels inside the mask that no marker
/// can reach keep label 0.
pub fn watershed(
    elevation: &Raster<f64>,
    markers: &Raster<i32>,
    mask: Option<&Raster<u8>>,
    connectivity: Connectivity,
) -> Result<Raster<i32>> {
    elevation.check_same_shape(markers)?;
    if let Some(mask) = mask {
        elevation.check_same_shape(mask)?;
    }

    let (rows, cols) = elevation.shape();
    let inside = |row: usize, col: usize| mask.is_none_or(|m| m.data()[(row, col)] != 0);

    let mut output: Raster<i32> = elevation.with_same_meta();
    let mut heap = BinaryHeap::new();
    let mut age: u64 = 0;

    for row in 0..rows {
        for col in 0..cols {
            let marker = markers.data()[(row, col)];
            if marker > 0 && inside(row, col) {
                output.data_mut()[(row, col)] = marker;
                heap.push(Cell {
                    elevation: elevation.data()[(row, col)],
                    age,
                    row,
                    col,
                });
                age += 1;
            }
        }
    }

    while let Some(cell) = heap.pop() {
        let current = output.data()[(cell.row, cell.col)];
        for (nr, nc) in connectivity.neighbors(cell.row, cell.col, rows, cols) {
            if output.data()[(nr, nc)] != 0 || !inside(nr, nc) {
                continue;
            }
            output.data_mut()[(nr, nc)] = current;
            heap.push(Cell {
                elevation: elevation.data()[(nr, nc)],
                age,
                row: nr,
                col: nc,
            });
            age += 1;
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::distance_transform_edt;

    #[test]
    fn test_two_basins_split_at_ridge() {
        // Elevation rises toward the middle column
        let elevation =
            Raster::from_vec(vec![0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0], 1, 7).unwrap();
        let mut markers = Raster::new(1, 7);
        markers.set(0, 0, 1).unwrap();
        markers.set(0, 6, 2).unwrap();

        let out = watershed(&elevation, &markers, None, Connectivity::Rook).unwrap();
        assert_eq!(&out.data().as_slice().unwrap()[..3], &[1, 1, 1]);
        assert_eq!(&out.data().as_slice().unwrap()[4..], &[2, 2, 2]);
        assert!(out.get(0, 3).unwrap() > 0);
    }

    #[test]
    fn test_mask_limits_flooding() {
        let elevation = Raster::filled(1, 5, 0.0);
        let mask = Raster::from_vec(vec![1u8, 1, 0, 1, 1], 1, 5).unwrap();
        let mut markers = Raster::new(1, 5);
        markers.set(0, 0, 9).unwrap();

        let out = watershed(&elevation, &markers, Some(&mask), Connectivity::Rook).unwrap();
        // (0, 3) and (0, 4) are not reachable from the marker
        assert_eq!(out.data().as_slice().unwrap(), &[9, 9, 0, 0, 0]);
    }

    #[test]
    fn test_markers_outside_mask_are_dropped() {
        let elevation = Raster::filled(1, 3, 0.0);
        let mask = Raster::from_vec(vec![0u8, 1, 1], 1, 3).unwrap();
        let mut markers = Raster::new(1, 3);
        markers.set(0, 0, 4).unwrap();

        let out = watershed(&elevation, &markers, Some(&mask), Connectivity::Rook).unwrap();
        assert_eq!(out.count_nonzero(), 0);
    }

    #[test]
    fn test_dumbbell_on_negative_distance() {
        // Two 5x5 blobs joined by a one-pixel neck
        let mut mask = Raster::new(5, 11);
        for r in 0..5 {
            for c in 0..5 {
                mask.set(r, c, 1u8).unwrap();
                mask.set(r, c + 6, 1u8).unwrap();
            }
        }
        mask.set(2, 5, 1u8).unwrap();

        let edt = distance_transform_edt(&mask);
        let elevation = edt.map(|d| -d);
        let mut markers = Raster::new(5, 11);
        markers.set(2, 2, 1).unwrap();
        markers.set(2, 8, 2).unwrap();

        let out = watershed(&elevation, &markers, Some(&mask), Connectivity::Rook).unwrap();
        assert_eq!(out.get(0, 0).unwrap(), 1);
        assert_eq!(out.get(4, 4).unwrap(), 1);
        assert_eq!(out.get(0, 10).unwrap(), 2);
        assert_eq!(out.get(4, 6).unwrap(), 2);
        assert_eq!(out.count_nonzero(), mask.count_nonzero());
    }

    #[test]
    fn test_shape_mismatch() {
        let elevation = Raster::filled(2, 2, 0.0);
        let markers: Raster<i32> = Raster::new(3, 2);
        assert!(watershed(&elevation, &markers, None, Connectivity::Rook).is_err());
    }
}
