//! Per-cell coordinates for a decoded grid.
//!
//! A [`CoordinateGrid`] holds the latitude and longitude of every cell in
//! row-major order, rows along `nj` and columns along `ni`, in the order the
//! values are stored in the message. Longitudes are normalized to [-180, 180).

use std::f64::consts::PI;

use crate::error::{Grib2Error, Result};
use crate::sections::{GridDefinition, Projection};

/// Scanning mode flag: points of the first row scan in the -i direction.
const SCAN_NEGATIVE_I: u8 = 0x80;
/// Scanning mode flag: points scan in the +j direction.
const SCAN_POSITIVE_J: u8 = 0x40;
/// Scanning mode flag: adjacent points are consecutive in j.
const SCAN_J_CONSECUTIVE: u8 = 0x20;
/// Scanning mode flag: rows alternate direction.
const SCAN_BOUSTROPHEDON: u8 = 0x10;

/// Latitude/longitude of every cell of a 2-D grid.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateGrid {
    rows: usize,
    cols: usize,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
}

impl CoordinateGrid {
    /// Build a grid from explicit row-major coordinate arrays.
    pub fn new(rows: usize, cols: usize, latitudes: Vec<f64>, longitudes: Vec<f64>) -> Result<Self> {
        let expected = rows * cols;
        if rows == 0 || cols == 0 {
            return Err(Grib2Error::InvalidFormat("Grid has no cells".to_string()));
        }
        if latitudes.len() != expected || longitudes.len() != expected {
            return Err(Grib2Error::InvalidFormat(format!(
                "Coordinate arrays ({}, {}) do not match a {}x{} grid",
                latitudes.len(),
                longitudes.len(),
                rows,
                cols
            )));
        }
        if let Some(idx) = latitudes
            .iter()
            .zip(&longitudes)
            .position(|(lat, lon)| !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0)
        {
            return Err(Grib2Error::InvalidFormat(format!(
                "Cell ({}, {}) has an undefined coordinate",
                idx / cols,
                idx % cols
            )));
        }

        Ok(Self {
            rows,
            cols,
            latitudes,
            longitudes: longitudes.into_iter().map(normalize_longitude).collect(),
        })
    }

    /// Compute cell coordinates from a section 3 grid definition.
    pub fn from_definition(definition: &GridDefinition) -> Result<Self> {
        let scan = definition.scanning_mode;
        if scan & (SCAN_J_CONSECUTIVE | SCAN_BOUSTROPHEDON) != 0 {
            return Err(Grib2Error::UnsupportedScanningMode(scan));
        }

        let cols = definition.ni as usize;
        let rows = definition.nj as usize;
        if rows * cols != definition.num_points as usize {
            return Err(Grib2Error::InvalidSection {
                section: 3,
                reason: format!(
                    "{}x{} grid does not match {} data points",
                    cols, rows, definition.num_points
                ),
            });
        }

        let i_sign = if scan & SCAN_NEGATIVE_I != 0 { -1.0 } else { 1.0 };
        let j_sign = if scan & SCAN_POSITIVE_J != 0 { 1.0 } else { -1.0 };

        let mut latitudes = Vec::with_capacity(rows * cols);
        let mut longitudes = Vec::with_capacity(rows * cols);

        match &definition.projection {
            Projection::LatLon { la1, lo1, di, dj, .. } => {
                for row in 0..rows {
                    let lat = la1 + j_sign * row as f64 * dj;
                    for col in 0..cols {
                        latitudes.push(lat);
                        longitudes.push(lo1 + i_sign * col as f64 * di);
                    }
                }
            }
            Projection::LambertConformal {
                la1,
                lo1,
                lov,
                dx_m,
                dy_m,
                latin1,
                latin2,
                ..
            } => {
                let lambert = LambertConformal::new(*lov, *latin1, *latin2, definition.earth_radius_m);
                let (x1, y1) = lambert.forward(*la1, *lo1);
                for row in 0..rows {
                    let y = y1 + j_sign * row as f64 * dy_m;
                    for col in 0..cols {
                        let x = x1 + i_sign * col as f64 * dx_m;
                        let (lat, lon) = lambert.inverse(x, y);
                        latitudes.push(lat);
                        longitudes.push(lon);
                    }
                }
            }
        }

        Self::new(rows, cols, latitudes, longitudes)
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.latitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latitudes.is_empty()
    }

    /// Coordinates of a cell. Panics when out of range, like slice indexing.
    pub fn lat_lon(&self, row: usize, col: usize) -> (f64, f64) {
        let idx = row * self.cols + col;
        (self.latitudes[idx], self.longitudes[idx])
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    pub fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }
}

/// Normalize a longitude in degrees to [-180, 180).
pub fn normalize_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Lambert conformal conic projection on a sphere.
///
/// Projected coordinates are metres relative to the cone apex, with y
/// increasing northward for a north-pole projection centre.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    /// Central meridian (LoV) in radians
    lon0: f64,
    earth_radius: f64,
    /// Cone constant
    n: f64,
    /// R * F
    rf: f64,
}

impl LambertConformal {
    /// Angles in degrees, radius in metres.
    pub fn new(lov_deg: f64, latin1_deg: f64, latin2_deg: f64, earth_radius: f64) -> Self {
        let latin1 = latin1_deg.to_radians();
        let latin2 = latin2_deg.to_radians();

        let n = if (latin1 - latin2).abs() < 1e-10 {
            // Tangent cone
            latin1.sin()
        } else {
            let ln_ratio = (latin1.cos() / latin2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + latin2 / 2.0).tan() / (PI / 4.0 + latin1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };

        let f = latin1.cos() * (PI / 4.0 + latin1 / 2.0).tan().powf(n) / n;

        Self {
            lon0: lov_deg.to_radians(),
            earth_radius,
            n,
            rf: earth_radius * f,
        }
    }

    /// Geographic degrees to projected metres.
    pub fn forward(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let lat = lat_deg.to_radians();
        let dlon = normalize_longitude(lon_deg - self.lon0.to_degrees()).to_radians();

        let rho = self.rf / (PI / 4.0 + lat / 2.0).tan().powf(self.n);
        let theta = self.n * dlon;
        (rho * theta.sin(), -rho * theta.cos())
    }

    /// Projected metres to geographic degrees, longitude in [-180, 180).
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let sign = self.n.signum();
        let rho = sign * (x * x + y * y).sqrt();
        let theta = (sign * x).atan2(-sign * y);

        let lon = self.lon0 + theta / self.n;
        let lat = if rho == 0.0 {
            sign * PI / 2.0
        } else {
            2.0 * (self.rf / rho).powf(1.0 / self.n).atan() - PI / 2.0
        };

        (lat.to_degrees(), normalize_longitude(lon.to_degrees()))
    }

    pub fn earth_radius(&self) -> f64 {
        self.earth_radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hrrr_definition() -> GridDefinition {
        GridDefinition {
            num_points: 1799 * 1059,
            ni: 1799,
            nj: 1059,
            scanning_mode: 0x40,
            earth_radius_m: 6_371_229.0,
            projection: Projection::LambertConformal {
                la1: 21.138123,
                lo1: 237.280472,
                lad: 38.5,
                lov: 262.5,
                dx_m: 3000.0,
                dy_m: 3000.0,
                latin1: 38.5,
                latin2: 38.5,
                south_pole: false,
            },
        }
    }

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(237.5), -122.5);
        assert_eq!(normalize_longitude(180.0), -180.0);
        assert_eq!(normalize_longitude(-180.0), -180.0);
        assert_eq!(normalize_longitude(359.0), -1.0);
        assert_eq!(normalize_longitude(-97.5), -97.5);
    }

    #[test]
    fn test_lambert_round_trip() {
        let lambert = LambertConformal::new(262.5, 38.5, 38.5, 6_371_229.0);
        let (x, y) = lambert.forward(40.0, -105.0);
        let (lat, lon) = lambert.inverse(x, y);
        assert!((lat - 40.0).abs() < 1e-9);
        assert!((lon + 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_lambert_secant_round_trip() {
        let lambert = LambertConformal::new(-95.0, 25.0, 45.0, 6_371_229.0);
        let (x, y) = lambert.forward(33.3, -80.2);
        let (lat, lon) = lambert.inverse(x, y);
        assert!((lat - 33.3).abs() < 1e-9);
        assert!((lon + 80.2).abs() < 1e-9);
    }

    #[test]
    fn test_hrrr_corners() {
        let grid = CoordinateGrid::from_definition(&hrrr_definition()).unwrap();
        assert_eq!(grid.shape(), (1059, 1799));

        let (lat, lon) = grid.lat_lon(0, 0);
        assert!((lat - 21.138123).abs() < 1e-6);
        assert!((lon + 122.719528).abs() < 1e-6);

        // Far corner of the CONUS domain
        let (lat, lon) = grid.lat_lon(1058, 1798);
        assert!((lat - 47.842).abs() < 0.05, "lat {}", lat);
        assert!((lon + 60.917).abs() < 0.05, "lon {}", lon);
    }

    #[test]
    fn test_latlon_scanning_directions() {
        let definition = GridDefinition {
            num_points: 6,
            ni: 3,
            nj: 2,
            scanning_mode: 0x00,
            earth_radius_m: 6_371_229.0,
            projection: Projection::LatLon {
                la1: 50.0,
                lo1: 350.0,
                la2: 49.0,
                lo2: 352.0,
                di: 1.0,
                dj: 1.0,
            },
        };
        let grid = CoordinateGrid::from_definition(&definition).unwrap();
        // Default scanning: +i, -j
        assert_eq!(grid.lat_lon(0, 0), (50.0, -10.0));
        assert_eq!(grid.lat_lon(1, 2), (49.0, -8.0));
    }

    #[test]
    fn test_rejects_boustrophedon() {
        let mut definition = hrrr_definition();
        definition.scanning_mode = 0x50;
        assert!(matches!(
            CoordinateGrid::from_definition(&definition),
            Err(Grib2Error::UnsupportedScanningMode(0x50))
        ));
    }

    #[test]
    fn test_point_count_mismatch() {
        let mut definition = hrrr_definition();
        definition.num_points -= 1;
        assert!(CoordinateGrid::from_definition(&definition).is_err());
    }
}
