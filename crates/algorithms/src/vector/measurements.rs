//! Geometric measurements of polygons: area, perimeter, length

use geo::{Area, Euclidean, Length, MinimumRotatedRect, Polygon};

/// Unsigned area in CRS units squared
pub fn area(polygon: &Polygon<f64>) -> f64 {
    polygon.unsigned_area()
}

/// Total length of the exterior and interior rings
pub fn perimeter(polygon: &Polygon<f64>) -> f64 {
    let ext = polygon.exterior().length::<Euclidean>();
    let int: f64 = polygon
        .interiors()
        .iter()
        .map(|r| r.length::<Euclidean>())
        .sum();
    ext + int
}

/// Length of a polygon: the longest edge of its minimum rotated rectangle.
///
/// Returns 0 for degenerate polygons.
pub fn length(polygon: &Polygon<f64>) -> f64 {
    let Some(rect) = polygon.minimum_rotated_rect() else {
        return 0.0;
    };
    rect.exterior()
        .lines()
        .map(|line| {
            let dx = line.end.x - line.start.x;
            let dy = line.end.y - line.start.y;
            (dx * dx + dy * dy).sqrt()
        })
        .fold(0.0, f64::max)
}
