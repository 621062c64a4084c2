//! Raster to polygon conversion
//!
//! Every rook-connected region of equal positive value becomes one polygon.
//! Boundaries are traced along pixel edges, oriented so the region lies on
//! the left of each directed edge (in pixel space, rows growing downward).
//! Where a vertex is shared by two diagonal region pixels the trace turns
//! left, which keeps diagonal neighbours apart as rook connectivity demands.

use crate::segmentation::label;
use geo::{Coord, LineString, Polygon};
use std::collections::HashMap;
use waterbodies_core::raster::{Connectivity, GeoTransform, Raster};
use waterbodies_core::Result;

/// A polygon traced from a raster region, with the region's value
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledPolygon {
    pub value: i32,
    pub polygon: Polygon<f64>,
}

// Headings in pixel space: column grows east, row grows south
const EAST: u8 = 0;
const SOUTH: u8 = 1;
const WEST: u8 = 2;
const NORTH: u8 = 3;

#[derive(Debug, Clone, Copy)]
struct Edge {
    start: (usize, usize),
    end: (usize, usize),
    heading: u8,
}

/// Vectorize all regions with a positive value.
///
/// Polygons are returned in raster scan order of each region's first pixel,
/// with coordinates mapped through the raster's geotransform.
pub fn polygonize(raster: &Raster<i32>) -> Result<Vec<LabelledPolygon>> {
    let (rows, cols) = raster.shape();
    let values = raster.data();
    let positive = raster.map(|v| if v > 0 { v } else { 0 });
    let regions = label(&positive, Connectivity::Rook)?;
    let ids = regions.data();

    let mut edges: Vec<Vec<Edge>> = Vec::new();
    let mut region_values: Vec<i32> = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            let id = ids[(row, col)];
            if id <= 0 {
                continue;
            }
            let slot = (id - 1) as usize;
            if slot == edges.len() {
                edges.push(Vec::new());
                region_values.push(values[(row, col)]);
            }
            let same = |r: Option<usize>, c: Option<usize>| match (r, c) {
                (Some(r), Some(c)) if r < rows && c < cols => ids[(r, c)] == id,
                _ => false,
            };
            let region_edges = &mut edges[slot];
            if !same(row.checked_sub(1), Some(col)) {
                region_edges.push(Edge { start: (col + 1, row), end: (col, row), heading: WEST });
            }
            if !same(Some(row + 1), Some(col)) {
                region_edges.push(Edge { start: (col, row + 1), end: (col + 1, row + 1), heading: EAST });
            }
            if !same(Some(row), col.checked_sub(1)) {
                region_edges.push(Edge { start: (col, row), end: (col, row + 1), heading: SOUTH });
            }
            if !same(Some(row), Some(col + 1)) {
                region_edges.push(Edge { start: (col + 1, row + 1), end: (col + 1, row), heading: NORTH });
            }
        }
    }

    let transform = raster.transform();
    Ok(edges
        .iter()
        .zip(region_values)
        .filter_map(|(region_edges, value)| {
            assemble_polygon(region_edges, transform).map(|polygon| LabelledPolygon { value, polygon })
        })
        .collect())
}

/// Link the boundary edges of one region into rings and build the polygon
fn assemble_polygon(edges: &[Edge], transform: &GeoTransform) -> Option<Polygon<f64>> {
    let mut outgoing: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (i, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.start).or_default().push(i);
    }

    // Next edge after `i`: prefer a left turn, then straight, then right
    let next = |i: usize| -> Option<usize> {
        let heading = edges[i].heading;
        let candidates = outgoing.get(&edges[i].end)?;
        [(heading + 3) % 4, heading, (heading + 1) % 4]
            .iter()
            .find_map(|&h| candidates.iter().copied().find(|&j| edges[j].heading == h))
    };

    let mut used = vec![false; edges.len()];
    let mut exteriors: Vec<(Vec<(usize, usize)>, f64)> = Vec::new();
    let mut holes: Vec<Vec<(usize, usize)>> = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        let mut ring: Vec<((usize, usize), u8)> = Vec::new();
        let mut current = first;
        loop {
            used[current] = true;
            // Keep only corners where the heading changes
            if ring.last().map(|&(_, h)| h) != Some(edges[current].heading) {
                ring.push((edges[current].start, edges[current].heading));
            }
            current = next(current)?;
            if current == first {
                break;
            }
        }
        // The trace may have started mid-side
        if ring.len() > 1 && ring.last().map(|r| r.1) == Some(ring[0].1) {
            ring.remove(0);
        }

        let vertices: Vec<(usize, usize)> = ring.into_iter().map(|(v, _)| v).collect();
        let signed = signed_area(&vertices);
        // Region on the left with rows growing down: exteriors are negative
        if signed < 0.0 {
            exteriors.push((vertices, -signed));
        } else {
            holes.push(vertices);
        }
    }

    if exteriors.is_empty() {
        return None;
    }

    let to_ring = |vertices: &[(usize, usize)]| -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = vertices
            .iter()
            .map(|&(c, r)| {
                let (x, y) = transform.apply(c as f64, r as f64);
                Coord { x, y }
            })
            .collect();
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
        LineString::new(coords)
    };

    // A rook-connected region has a single outer contour, so every hole
    // belongs to it
    exteriors.sort_by(|a, b| b.1.total_cmp(&a.1));
    let exterior = to_ring(&exteriors[0].0);
    let interiors = holes.iter().map(|h| to_ring(h)).collect();

    Some(Polygon::new(exterior, interiors))
}

/// Shoelace signed area in pixel space
fn signed_area(vertices: &[(usize, usize)]) -> f64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = vertices[i];
            let (x1, y1) = vertices[(i + 1) % n];
            x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64
        })
        .sum::<f64>()
        / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;

    fn raster(rows: &[&[i32]]) -> Raster<i32> {
        let cols = rows[0].len();
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Raster::from_vec(data, rows.len(), cols).unwrap()
    }

    #[test]
    fn test_single_pixel() {
        let mut r = raster(&[&[0, 0, 0], &[0, 7, 0], &[0, 0, 0]]);
        r.set_transform(GeoTransform::new(1000.0, 2000.0, 30.0, -30.0));
        let polys = polygonize(&r).unwrap();
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].value, 7);
        assert_relative_eq!(polys[0].polygon.unsigned_area(), 900.0);
        assert_eq!(polys[0].polygon.exterior().0.len(), 5);
        assert!(polys[0].polygon.interiors().is_empty());
    }

    #[test]
    fn test_ring_with_hole() {
        let r = raster(&[&[1, 1, 1], &[1, 0, 1], &[1, 1, 1]]);
        let polys = polygonize(&r).unwrap();
        assert_eq!(polys.len(), 1);
        let poly = &polys[0].polygon;
        assert_eq!(poly.interiors().len(), 1);
        assert_relative_eq!(poly.unsigned_area(), 8.0);
    }

    #[test]
    fn test_diagonal_pixels_are_separate_polygons() {
        let r = raster(&[&[3, 0], &[0, 3]]);
        let polys = polygonize(&r).unwrap();
        assert_eq!(polys.len(), 2);
        for p in &polys {
            assert_relative_eq!(p.polygon.unsigned_area(), 1.0);
        }
    }

    #[test]
    fn test_adjacent_labels_make_adjacent_polygons() {
        let r = raster(&[&[1, 1, 2], &[1, 1, 2]]);
        let polys = polygonize(&r).unwrap();
        assert_eq!(polys.len(), 2);
        assert_eq!(polys[0].value, 1);
        assert_relative_eq!(polys[0].polygon.unsigned_area(), 4.0);
        assert_eq!(polys[1].value, 2);
        assert_relative_eq!(polys[1].polygon.unsigned_area(), 2.0);
    }

    #[test]
    fn test_l_shape_vertices() {
        let r = raster(&[&[5, 0], &[5, 5]]);
        let polys = polygonize(&r).unwrap();
        assert_eq!(polys.len(), 1);
        // Six corners plus the closing coordinate
        assert_eq!(polys[0].polygon.exterior().0.len(), 7);
        assert_relative_eq!(polys[0].polygon.unsigned_area(), 3.0);
    }

    #[test]
    fn test_area_matches_pixel_count() {
        let r = raster(&[
            &[1, 1, 0, 0, 2],
            &[0, 1, 1, 0, 2],
            &[0, 0, 1, 0, 2],
            &[4, 0, 1, 1, 0],
        ]);
        let polys = polygonize(&r).unwrap();
        let total: f64 = polys.iter().map(|p| p.polygon.unsigned_area()).sum();
        assert_relative_eq!(total, 11.0);
    }
}
