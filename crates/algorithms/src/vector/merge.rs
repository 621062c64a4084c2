//! Merging polygons split by tile boundaries

use geo::{BooleanOps, Intersects, MultiPolygon, Polygon};

/// Union every polygon touching any of `bands` and explode the result.
///
/// Polygons that touch no band are returned untouched, followed by the
/// simple polygons of the union. Polygons sharing an edge inside a band end
/// up in the same output polygon.
pub fn merge_across_boundaries(polygons: Vec<Polygon<f64>>, bands: &[Polygon<f64>]) -> Vec<Polygon<f64>> {
    let (touching, mut output): (Vec<_>, Vec<_>) = polygons
        .into_iter()
        .partition(|polygon| bands.iter().any(|band| band.intersects(polygon)));

    if touching.is_empty() {
        return output;
    }

    let merged = touching
        .into_iter()
        .fold(MultiPolygon::new(vec![]), |acc, polygon| {
            acc.union(&MultiPolygon::new(vec![polygon]))
        });

    output.extend(merged.0);
    output
}
