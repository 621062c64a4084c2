//! Structuring element definitions for morphological operations
//!
//! A structuring element defines the neighborhood shape used in erosion.

use waterbodies_core::{Error, Result};

/// Shape of a structuring element for morphological operations
#[derive(Debug, Clone, PartialEq)]
pub enum StructuringElement {
    /// Square element of given radius (side = 2*radius + 1)
    Square(usize),
    /// Cross (plus-shaped) element of given radius
    Cross(usize),
    /// Disk of a possibly fractional radius: offsets with dr² + dc² ≤ r²
    Disk(f64),
}

impl Default for StructuringElement {
    fn default() -> Self {
        StructuringElement::Disk(1.0)
    }
}

impl StructuringElement {
    /// Validate the structuring element, returning an error for invalid configurations
    pub fn validate(&self) -> Result<()> {
        match self {
            StructuringElement::Square(r) | StructuringElement::Cross(r) => {
                if *r == 0 {
                    return Err(Error::InvalidParameter {
                        name: "radius",
                        value: "0".to_string(),
                        reason: "structuring element radius must be at least 1".to_string(),
                    });
                }
                Ok(())
            }
            StructuringElement::Disk(r) => {
                if !r.is_finite() || *r < 1.0 {
                    return Err(Error::InvalidParameter {
                        name: "radius",
                        value: r.to_string(),
                        reason: "disk radius must be finite and at least 1".to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Get the integer radius (half the element's side)
    pub fn radius(&self) -> usize {
        match self {
            StructuringElement::Square(r) | StructuringElement::Cross(r) => *r,
            StructuringElement::Disk(r) => r.floor() as usize,
        }
    }

    /// Compute (dr, dc) offsets relative to center for all active cells
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let r = self.radius() as isize;
        match self {
            StructuringElement::Square(_) => (-r..=r)
                .flat_map(|dr| (-r..=r).map(move |dc| (dr, dc)))
                .collect(),
            StructuringElement::Cross(_) => {
                let mut offsets = Vec::new();
                for d in -r..=r {
                    offsets.push((d, 0));
                    if d != 0 {
                        offsets.push((0, d));
                    }
                }
                offsets
            }
            StructuringElement::Disk(radius) => {
                let r2 = radius * radius;
                (-r..=r)
                    .flat_map(|dr| (-r..=r).map(move |dc| (dr, dc)))
                    .filter(|&(dr, dc)| ((dr * dr + dc * dc) as f64) <= r2)
                    .collect()
            }
        }
    }
}
