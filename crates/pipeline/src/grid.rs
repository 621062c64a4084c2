//! The fixed equal-area tile grid.
//!
//! Tiles are 96 km squares in EPSG:6933 counted from the lower-left corner of
//! the projection's world extent. Each tile is a 3200 x 3200 pixel geobox at
//! 30 m resolution whose affine origin is the tile's top-left corner.

use chrono::TimeDelta;
use geo::{Intersects, LineString, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use waterbodies_core::{CRS, GeoTransform};

use crate::error::{Error, Result};

/// Tile size of the waterbodies grid in metres.
pub const TILE_SIZE_M: f64 = 96_000.0;
/// Pixel size of the waterbodies grid in metres.
pub const RESOLUTION_M: f64 = 30.0;
/// Lower-left corner of the EPSG:6933 world extent.
pub const GRID_ORIGIN: (f64, f64) = (-17_367_530.445_161_38, -7_314_540.830_638_51);

/// Index of a tile in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub x: i32,
    pub y: i32,
}

impl TileIndex {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{:03}_y{:03}", self.x, self.y)
    }
}

impl std::str::FromStr for TileIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        crate::text::tile_index_from_str(s)
    }
}

/// A pixel grid: affine transform, shape and CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoBox {
    pub transform: GeoTransform,
    /// (rows, cols)
    pub shape: (usize, usize),
    pub crs: CRS,
}

impl GeoBox {
    pub fn new(transform: GeoTransform, shape: (usize, usize), crs: CRS) -> Self {
        Self { transform, shape, crs }
    }

    /// Bounding rectangle in the geobox CRS
    pub fn bounding_rect(&self) -> Rect<f64> {
        let (min_x, min_y, max_x, max_y) = self.transform.bounds(self.shape.1, self.shape.0);
        Rect::new((min_x, min_y), (max_x, max_y))
    }

    /// Extent as a polygon in the geobox CRS
    pub fn extent(&self) -> Polygon<f64> {
        self.bounding_rect().to_polygon()
    }
}

/// Parameters of a regular tile grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub crs: CRS,
    pub tile_size: f64,
    pub resolution: f64,
    pub origin: (f64, f64),
}

impl Default for GridSpec {
    /// The waterbodies grid: EPSG:6933, 96 km tiles, 30 m pixels.
    fn default() -> Self {
        Self {
            crs: CRS::ease_grid_global(),
            tile_size: TILE_SIZE_M,
            resolution: RESOLUTION_M,
            origin: GRID_ORIGIN,
        }
    }
}

impl GridSpec {
    /// Pixels along each side of a tile
    pub fn tile_pixels(&self) -> usize {
        (self.tile_size / self.resolution).round() as usize
    }

    /// Rectangle covered by a tile in the grid CRS
    pub fn tile_rect(&self, tile: TileIndex) -> Rect<f64> {
        let (ox, oy) = self.origin;
        let min_x = ox + f64::from(tile.x) * self.tile_size;
        let min_y = oy + f64::from(tile.y) * self.tile_size;
        Rect::new((min_x, min_y), (min_x + self.tile_size, min_y + self.tile_size))
    }

    /// Pixel grid of a tile
    pub fn tile_geobox(&self, tile: TileIndex) -> GeoBox {
        let rect = self.tile_rect(tile);
        let n = self.tile_pixels();
        let transform = GeoTransform::new(rect.min().x, rect.max().y, self.resolution, -self.resolution);
        GeoBox::new(transform, (n, n), self.crs.clone())
    }

    /// Tiles whose extent intersects a geometry given in the grid CRS.
    ///
    /// Candidates come from the geometry's bounding box; the result is sorted
    /// and free of duplicates.
    pub fn tiles_intersecting(&self, geometry: &Polygon<f64>) -> Vec<TileIndex> {
        use geo::BoundingRect;

        let Some(bbox) = geometry.bounding_rect() else {
            return Vec::new();
        };
        let (ox, oy) = self.origin;
        let index = |v: f64, o: f64| ((v - o) / self.tile_size).floor() as i32;
        let (x0, x1) = (index(bbox.min().x, ox), index(bbox.max().x, ox));
        let (y0, y1) = (index(bbox.min().y, oy), index(bbox.max().y, oy));

        let mut tiles = Vec::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                let tile = TileIndex::new(x, y);
                if self.tile_rect(tile).to_polygon().intersects(geometry) {
                    tiles.push(tile);
                }
            }
        }
        tiles.sort();
        tiles.dedup();
        tiles
    }

    /// Offset from UTC to local solar time at the tile's geographic centroid.
    pub fn utc_offset(&self, tile: TileIndex) -> Result<TimeDelta> {
        let centre = self.tile_rect(tile).center();
        let (lon, _) = self.crs.projection()?.inverse(centre.x, centre.y);
        let hours = (lon * 24.0 / 360.0 + 0.5).trunc() as i64;
        Ok(TimeDelta::hours(hours))
    }

    /// Band of `width` metres on both sides of a tile's boundary.
    pub fn tile_boundary_band(&self, tile: TileIndex, width: f64) -> Polygon<f64> {
        let rect = self.tile_rect(tile);
        let (min, max) = (rect.min(), rect.max());
        let ring = |grow: f64| {
            LineString::from(vec![
                (min.x - grow, min.y - grow),
                (max.x + grow, min.y - grow),
                (max.x + grow, max.y + grow),
                (min.x - grow, max.y + grow),
                (min.x - grow, min.y - grow),
            ])
        };
        Polygon::new(ring(width), vec![ring(-width)])
    }

    /// Tile containing a point of the grid CRS
    pub fn tile_containing(&self, x: f64, y: f64) -> TileIndex {
        let (ox, oy) = self.origin;
        TileIndex::new(
            ((x - ox) / self.tile_size).floor() as i32,
            ((y - oy) / self.tile_size).floor() as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{Area, Contains, Point};

    #[test]
    fn test_tile_string() {
        assert_eq!(TileIndex::new(199, 35).to_string(), "x199_y035");
        assert_eq!(TileIndex::new(7, 0).to_string(), "x007_y000");
    }

    #[test]
    fn test_tile_geobox() {
        let grid = GridSpec::default();
        let gbox = grid.tile_geobox(TileIndex::new(199, 35));
        assert_eq!(gbox.shape, (3200, 3200));
        assert_eq!(gbox.crs.epsg(), Some(6933));
        assert_relative_eq!(gbox.transform.origin_x, -17_367_530.445_161_38 + 199.0 * 96_000.0);
        assert_relative_eq!(gbox.transform.origin_y, -7_314_540.830_638_51 + 36.0 * 96_000.0);
        assert_relative_eq!(gbox.transform.pixel_height, -30.0);
        assert_relative_eq!(gbox.extent().unsigned_area(), 96_000.0 * 96_000.0, epsilon = 1.0);
    }

    #[test]
    fn test_tiles_intersecting_interior_and_corner() {
        let grid = GridSpec::default();
        let rect = grid.tile_rect(TileIndex::new(10, 20));
        let inner = Rect::new(
            (rect.min().x + 1000.0, rect.min().y + 1000.0),
            (rect.min().x + 2000.0, rect.min().y + 2000.0),
        )
        .to_polygon();
        assert_eq!(grid.tiles_intersecting(&inner), vec![TileIndex::new(10, 20)]);

        let corner = Rect::new(
            (rect.max().x - 500.0, rect.max().y - 500.0),
            (rect.max().x + 500.0, rect.max().y + 500.0),
        )
        .to_polygon();
        assert_eq!(
            grid.tiles_intersecting(&corner),
            vec![
                TileIndex::new(10, 20),
                TileIndex::new(10, 21),
                TileIndex::new(11, 20),
                TileIndex::new(11, 21),
            ]
        );
    }

    #[test]
    fn test_tiles_intersecting_skips_bbox_only_candidates() {
        let grid = GridSpec::default();
        let rect = grid.tile_rect(TileIndex::new(0, 0));
        let (x0, y0) = (rect.min().x, rect.min().y);
        // Thin diagonal triangle whose bbox spans 2x2 tiles but misses (1, 0)
        let triangle = Polygon::new(
            LineString::from(vec![
                (x0 + 1000.0, y0 + 1000.0),
                (x0 + 1000.0, y0 + 190_000.0),
                (x0 + 150_000.0, y0 + 190_000.0),
                (x0 + 1000.0, y0 + 1000.0),
            ]),
            vec![],
        );
        let tiles = grid.tiles_intersecting(&triangle);
        assert!(!tiles.contains(&TileIndex::new(1, 0)));
        assert!(tiles.contains(&TileIndex::new(0, 0)));
        assert!(tiles.contains(&TileIndex::new(1, 1)));
    }

    #[test]
    fn test_utc_offset() {
        let grid = GridSpec::default();
        // Around 18.5°E: 18.5 * 24 / 360 + 0.5 = 1.73 -> 1 hour
        assert_eq!(grid.utc_offset(TileIndex::new(199, 35)).unwrap(), TimeDelta::hours(1));
        // Far west of the grid: about -179.6°
        assert_eq!(grid.utc_offset(TileIndex::new(0, 50)).unwrap(), TimeDelta::hours(-11));
    }

    #[test]
    fn test_boundary_band() {
        let grid = GridSpec::default();
        let tile = TileIndex::new(5, 5);
        let rect = grid.tile_rect(tile);
        let band = grid.tile_boundary_band(tile, 30.0);
        let inside_edge = Point::new(rect.min().x + 10.0, rect.center().y);
        let outside_edge = Point::new(rect.min().x - 10.0, rect.center().y);
        let centre = Point::new(rect.center().x, rect.center().y);
        assert!(band.contains(&inside_edge));
        assert!(band.contains(&outside_edge));
        assert!(!band.contains(&centre));
    }

    #[test]
    fn test_tile_containing() {
        let grid = GridSpec::default();
        let rect = grid.tile_rect(TileIndex::new(-3, 4));
        let c = rect.center();
        assert_eq!(grid.tile_containing(c.x, c.y), TileIndex::new(-3, 4));
    }
}
