//! Pure-Rust projections between WGS84 and the projected CRSs the pipelines
//! touch (Snyder 1987, USGS Prof. Paper 1395).
//!
//! Covers EPSG:4326, EPSG:6933 (cylindrical equal-area, standard parallel
//! 30°) and EPSG 326xx/327xx (UTM North/South). No libproj.

use crate::crs::{CRS, EPSG_EASE_GRID_GLOBAL, EPSG_WGS84};
use crate::error::{Error, Result};

// ── WGS84 ellipsoid constants ────────────────────────────────────────────

const A: f64 = 6_378_137.0; // semi-major axis (m)
const F: f64 = 1.0 / 298.257_223_563; // flattening
const E2: f64 = 2.0 * F - F * F; // eccentricity squared
const E_PRIME2: f64 = E2 / (1.0 - E2); // second eccentricity squared

const UTM_K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

const EASE_STANDARD_PARALLEL_DEG: f64 = 30.0;

/// A supported map projection, forward = geographic → projected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Longitude/latitude degrees, identity
    Geographic,
    /// Cylindrical equal-area on WGS84 (EPSG:6933)
    EqualAreaCylindrical,
    /// Transverse Mercator UTM zone
    Utm { zone: u32, north: bool },
}

impl Projection {
    /// Resolve an EPSG code into a projection
    pub fn from_epsg(epsg: u32) -> Result<Self> {
        match epsg {
            EPSG_WGS84 => Ok(Self::Geographic),
            EPSG_EASE_GRID_GLOBAL => Ok(Self::EqualAreaCylindrical),
            _ => parse_utm_epsg(epsg)
                .map(|(zone, north)| Self::Utm { zone, north })
                .ok_or_else(|| Error::UnsupportedCrs(format!("EPSG:{}", epsg))),
        }
    }

    /// Geographic (lon, lat) degrees to projected (x, y)
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            Self::Geographic => (lon, lat),
            Self::EqualAreaCylindrical => cea_forward(lon, lat),
            Self::Utm { zone, north } => wgs84_to_utm(lon, lat, zone, north),
        }
    }

    /// Projected (x, y) to geographic (lon, lat) degrees
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Self::Geographic => (x, y),
            Self::EqualAreaCylindrical => cea_inverse(x, y),
            Self::Utm { zone, north } => utm_to_wgs84(x, y, zone, north),
        }
    }
}

/// Reproject a single point between two supported CRSs
pub fn reproject_point(from: &CRS, to: &CRS, x: f64, y: f64) -> Result<(f64, f64)> {
    if from.is_equivalent(to) {
        return Ok((x, y));
    }
    let (lon, lat) = from.projection()?.inverse(x, y);
    Ok(to.projection()?.forward(lon, lat))
}

/// Parse an EPSG code into UTM zone info: `Some((zone, is_north))`.
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}

// ── Cylindrical equal-area (Snyder pp. 76-85) ────────────────────────────

fn cea_k0() -> f64 {
    let phi_s = EASE_STANDARD_PARALLEL_DEG.to_radians();
    phi_s.cos() / (1.0 - E2 * phi_s.sin().powi(2)).sqrt()
}

/// Authalic q (Snyder eq. 3-12)
fn authalic_q(sin_phi: f64) -> f64 {
    let e = E2.sqrt();
    (1.0 - E2)
        * (sin_phi / (1.0 - E2 * sin_phi * sin_phi)
            - (1.0 / (2.0 * e)) * ((1.0 - e * sin_phi) / (1.0 + e * sin_phi)).ln())
}

fn cea_forward(lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let k0 = cea_k0();
    let x = A * k0 * lon_deg.to_radians();
    let y = A * authalic_q(lat_deg.to_radians().sin()) / (2.0 * k0);
    (x, y)
}

fn cea_inverse(x: f64, y: f64) -> (f64, f64) {
    let k0 = cea_k0();
    let qp = authalic_q(1.0);
    let beta = (2.0 * y * k0 / (A * qp)).clamp(-1.0, 1.0).asin();

    // Authalic to geodetic latitude (Snyder eq. 3-18)
    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let phi = beta
        + (E2 / 3.0 + 31.0 * e4 / 180.0 + 517.0 * e6 / 5040.0) * (2.0 * beta).sin()
        + (23.0 * e4 / 360.0 + 251.0 * e6 / 3780.0) * (4.0 * beta).sin()
        + (761.0 * e6 / 45360.0) * (6.0 * beta).sin();

    let lon = x / (A * k0);
    (lon.to_degrees(), phi.to_degrees())
}

// ── Transverse Mercator (Snyder pp. 61-64) ───────────────────────────────

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a_coeff = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a_coeff * a_coeff;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    // Snyder eq. 8-9
    let easting = UTM_K0
        * n
        * (a_coeff
            + (1.0 - t + c) * a2 * a_coeff / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a_coeff / 120.0)
        + FALSE_EASTING;

    // Snyder eq. 8-10
    let northing = UTM_K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };

    (easting, northing)
}

fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };
    let x = easting - FALSE_EASTING;

    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let m = y / UTM_K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    // Footpoint latitude (Snyder eq. 3-26)
    let sqrt_1me2 = (1.0 - E2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();
    let c1 = E_PRIME2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let w = 1.0 - E2 * sin1 * sin1;
    let n1 = A / w.sqrt();
    let r1 = A * (1.0 - E2) / w.powf(1.5);
    let d = x / (n1 * UTM_K0);

    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    // Snyder eq. 8-17, 8-18
    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * E_PRIME2 - 3.0 * c1 * c1)
                    * d6
                    / 720.0);
    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d4
                * d
                / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Meridional arc from equator to latitude `lat` (radians), Snyder eq. 3-21.
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(
            diff < tol,
            "{msg}: expected {b}, got {a}, diff {diff} exceeds tolerance {tol}"
        );
    }

    #[test]
    fn parse_utm_zones() {
        assert_eq!(parse_utm_epsg(32630), Some((30, true)));
        assert_eq!(parse_utm_epsg(32734), Some((34, false)));
        assert_eq!(parse_utm_epsg(32600), None);
        assert_eq!(parse_utm_epsg(32761), None);
    }

    #[test]
    fn ease_grid_world_extent() {
        // x of the antimeridian is the grid's western edge
        let (x, _) = cea_forward(-180.0, 0.0);
        assert_close(x, -17_367_530.445_161_38, 1e-3, "west edge");
        let (_, y) = cea_forward(0.0, 0.0);
        assert_close(y, 0.0, 1e-9, "equator");
    }

    #[test]
    fn ease_grid_forward_cape_town_area() {
        let (x, y) = cea_forward(18.0, -32.5);
        assert_close(x, 1_736_753.04, 1.0, "x");
        assert_close(y, -3_932_412.50, 1.0, "y");
    }

    #[test]
    fn ease_grid_roundtrip() {
        for &(lon, lat) in &[(18.0, -32.5), (-70.2, 45.1), (120.0, 80.0), (0.0, 0.0)] {
            let (x, y) = cea_forward(lon, lat);
            let (lon2, lat2) = cea_inverse(x, y);
            assert_close(lon2, lon, 1e-9, "lon");
            assert_close(lat2, lat, 1e-7, "lat");
        }
    }

    // Reference values from pyproj (PROJ 9.x):
    //   Transformer.from_crs(4326, 32630, always_xy=True).transform(-3.7037, 40.4168)
    #[test]
    fn madrid_wgs84_to_utm30n() {
        let (e, n) = wgs84_to_utm(-3.7037, 40.4168, 30, true);
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");
    }

    #[test]
    fn utm_roundtrip_southern_hemisphere() {
        let (e, n) = wgs84_to_utm(-58.3816, -34.6037, 21, false);
        assert_close(e, 373_317.50, 1.0, "easting");
        assert_close(n, 6_170_036.17, 1.0, "northing");

        let (lon, lat) = utm_to_wgs84(e, n, 21, false);
        assert_close(lon, -58.3816, 1e-6, "lon");
        assert_close(lat, -34.6037, 1e-6, "lat");
    }

    #[test]
    fn reproject_between_projected_crs() {
        let utm = CRS::from_epsg(32734);
        let ease = CRS::ease_grid_global();
        let (e, n) = Projection::from_epsg(32734).unwrap().forward(18.0, -32.5);
        let (x, y) = reproject_point(&utm, &ease, e, n).unwrap();
        let (x2, y2) = cea_forward(18.0, -32.5);
        assert_close(x, x2, 0.01, "x");
        assert_close(y, y2, 0.01, "y");
    }

    #[test]
    fn unsupported_epsg_is_an_error() {
        assert!(matches!(
            Projection::from_epsg(3857),
            Err(Error::UnsupportedCrs(_))
        ));
    }
}
