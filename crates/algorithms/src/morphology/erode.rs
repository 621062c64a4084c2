//! Binary erosion
//!
//! A set pixel survives only if every pixel covered by the structuring element
//! is set. Pixels of the element falling outside the raster are ignored, so
//! the raster edge does not erode anything by itself.

use crate::maybe_rayon::*;
use ndarray::Array2;
use waterbodies_core::raster::Raster;
use waterbodies_core::{Algorithm, Error, Result};

use super::element::StructuringElement;

/// Parameters for binary erosion
#[derive(Debug, Clone, Default)]
pub struct ErodeParams {
    /// Structuring element shape
    pub element: StructuringElement,
}

/// Erosion algorithm
#[derive(Debug, Clone, Default)]
pub struct Erode;

impl Algorithm for Erode {
    type Input = Raster<u8>;
    type Output = Raster<u8>;
    type Params = ErodeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Erode"
    }

    fn description(&self) -> &'static str {
        "Binary erosion of a mask over a structuring element"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        binary_erode(&input, &params.element)
    }
}

/// Erode a binary mask (non-zero = set) with a structuring element.
///
/// Output values are 0 or 1.
pub fn binary_erode(mask: &Raster<u8>, element: &StructuringElement) -> Result<Raster<u8>> {
    element.validate()?;

    let (rows, cols) = mask.shape();
    let offsets = element.offsets();
    let data = mask.data();

    let output: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for col in 0..cols {
                if data[(row, col)] == 0 {
                    continue;
                }
                let r = row as isize;
                let c = col as isize;
                let survives = offsets.iter().all(|&(dr, dc)| {
                    let nr = r + dr;
                    let nc = c + dc;
                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        return true;
                    }
                    data[(nr as usize, nc as usize)] != 0
                });
                row_data[col] = u8::from(survives);
            }
            row_data
        })
        .collect();

    let array =
        Array2::from_shape_vec((rows, cols), output).map_err(|e| Error::Other(e.to_string()))?;
    mask.with_data(array)
}
