//! Exact Euclidean distance transform
//!
//! Separable lower-envelope-of-parabolas algorithm (Felzenszwalb &
//! Huttenlocher 2012): one 1D pass down the columns, then one along the rows.
//!
//! Reference:
//! Felzenszwalb, P. F., & Huttenlocher, D. P. (2012). Distance transforms of
//! sampled functions. *Theory of Computing*, 8, 415–428.

use crate::maybe_rayon::*;
use ndarray::{Array2, Axis};
use waterbodies_core::raster::Raster;

/// Stand-in for infinity that keeps the parabola intersections finite
const FAR: f64 = 1e20;

/// Distance (in pixels) from every set pixel to the nearest unset pixel.
///
/// Unset pixels get 0. The area outside the raster is not background, so a
/// mask without unset pixels yields very large distances everywhere.
pub fn distance_transform_edt(mask: &Raster<u8>) -> Raster<f64> {
    let (rows, cols) = mask.shape();
    let mut squared = mask.data().mapv(|v| if v == 0 { 0.0 } else { FAR });

    // Columns
    let columns: Vec<Vec<f64>> = (0..cols)
        .into_par_iter()
        .map(|col| {
            let f: Vec<f64> = squared.column(col).to_vec();
            squared_distance_1d(&f)
        })
        .collect();
    for (col, values) in columns.into_iter().enumerate() {
        for (row, v) in values.into_iter().enumerate() {
            squared[(row, col)] = v;
        }
    }

    // Rows
    let rows_out: Vec<f64> = squared
        .axis_iter(Axis(0))
        .map(|row| row.to_vec())
        .collect::<Vec<_>>()
        .into_par_iter()
        .flat_map(|f| squared_distance_1d(&f))
        .collect();

    let distances = Array2::from_shape_vec((rows, cols), rows_out)
        .map(|a| a.mapv(f64::sqrt))
        .unwrap_or_else(|_| Array2::zeros((rows, cols)));

    let mut output: Raster<f64> = mask.with_same_meta();
    *output.data_mut() = distances;
    output
}

/// 1D squared distance transform of a sampled function `f`
fn squared_distance_1d(f: &[f64]) -> Vec<f64> {
    let n = f.len();
    if n == 0 {
        return Vec::new();
    }

    // v: parabola vertices, z: boundaries between parabolas
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    let intersect = |q: usize, p: usize| -> f64 {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    for q in 1..n {
        let mut s = intersect(q, v[k]);
        // z[0] is -inf, so k never drops below zero
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    let mut d = vec![0.0; n];
    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let diff = q as f64 - v[k] as f64;
        *out = diff * diff + f[v[k]];
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_1d_distances() {
        let f = [FAR, 0.0, FAR, FAR, FAR, 0.0];
        let d = squared_distance_1d(&f);
        assert_eq!(d, vec![1.0, 0.0, 1.0, 4.0, 1.0, 0.0]);
    }

    #[test]
    fn test_single_background_pixel() {
        let mut mask = Raster::filled(5, 5, 1u8);
        mask.set(2, 2, 0).unwrap();
        let edt = distance_transform_edt(&mask);
        assert_relative_eq!(edt.get(2, 2).unwrap(), 0.0);
        assert_relative_eq!(edt.get(2, 4).unwrap(), 2.0);
        assert_relative_eq!(edt.get(0, 0).unwrap(), 8f64.sqrt());
        assert_relative_eq!(edt.get(1, 4).unwrap(), 5f64.sqrt());
    }

    #[test]
    fn test_block_interior_is_farther() {
        let mut mask = Raster::new(7, 7);
        for r in 1..6 {
            for c in 1..6 {
                mask.set(r, c, 1u8).unwrap();
            }
        }
        let edt = distance_transform_edt(&mask);
        assert_relative_eq!(edt.get(1, 1).unwrap(), 1.0);
        assert_relative_eq!(edt.get(3, 3).unwrap(), 3.0);
        assert_relative_eq!(edt.get(0, 3).unwrap(), 0.0);
    }

    #[test]
    fn test_no_background_is_far() {
        let mask = Raster::filled(3, 3, 1u8);
        let edt = distance_transform_edt(&mask);
        assert!(edt.data().iter().all(|&d| d > 1e9));
    }
}
