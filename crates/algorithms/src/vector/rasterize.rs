//! Polygon to raster burning
//!
//! Scanline fill at pixel centres with the even-odd rule, so holes stay
//! unburnt. A pixel is burnt when its centre lies inside the polygon; centres
//! exactly on a left edge are in, on a right edge out.

use geo::{BoundingRect, Polygon};
use waterbodies_core::raster::{GeoTransform, Raster};
use waterbodies_core::{Error, Result};

/// Burn `(polygon, value)` pairs into a new zero-filled raster.
///
/// Later polygons overwrite earlier ones where they overlap.
pub fn rasterize(
    shapes: &[(Polygon<f64>, i32)],
    rows: usize,
    cols: usize,
    transform: GeoTransform,
) -> Result<Raster<i32>> {
    if !transform.is_north_up() || transform.pixel_width <= 0.0 {
        return Err(Error::Algorithm(
            "rasterize requires a north-up geotransform".to_string(),
        ));
    }

    let mut raster: Raster<i32> = Raster::new(rows, cols);
    raster.set_transform(transform);

    for (polygon, value) in shapes {
        let Some(bbox) = polygon.bounding_rect() else {
            continue;
        };
        let (_, row_top) = transform.geo_to_pixel(bbox.min().x, bbox.max().y);
        let (_, row_bottom) = transform.geo_to_pixel(bbox.min().x, bbox.min().y);
        let row_start = (row_top - 0.5).ceil().max(0.0) as usize;
        let row_end = ((row_bottom - 0.5).ceil().max(0.0) as usize).min(rows);

        let edges: Vec<((f64, f64), (f64, f64))> = std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .flat_map(|ring| ring.lines())
            .map(|line| ((line.start.x, line.start.y), (line.end.x, line.end.y)))
            .collect();

        let mut crossings = Vec::new();
        for row in row_start..row_end {
            let (_, y) = transform.pixel_to_geo(0, row);
            crossings.clear();
            for &((x0, y0), (x1, y1)) in &edges {
                if (y0 <= y && y < y1) || (y1 <= y && y < y0) {
                    crossings.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
                }
            }
            crossings.sort_by(f64::total_cmp);

            for pair in crossings.chunks_exact(2) {
                let (col_a, _) = transform.geo_to_pixel(pair[0], y);
                let (col_b, _) = transform.geo_to_pixel(pair[1], y);
                let start = (col_a - 0.5).ceil().max(0.0) as usize;
                let end = ((col_b - 0.5).ceil().max(0.0) as usize).min(cols);
                for col in start..end {
                    raster.data_mut()[(row, col)] = *value;
                }
            }
        }
    }

    Ok(raster)
}
