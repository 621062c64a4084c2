//! Binary morphology for masks
//!
//! - **Erosion**: a pixel stays set only if every in-bounds pixel under the
//!   structuring element is set

mod element;
mod erode;

pub use element::StructuringElement;
pub use erode::{Erode, ErodeParams, binary_erode};
