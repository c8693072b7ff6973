//! Nearest grid cell lookup for query points.
//!
//! Cells are compared on the unit sphere by squared chord length, which is
//! monotone in great-circle distance and needs no trigonometry per cell.
//! The scan is row-major with a strict `<`, so among equidistant cells the
//! one with the smallest `(row, col)` wins.
//!
//! A point is out of domain when its nearest cell is farther than the
//! threshold: one nominal cell spacing unless overridden.

use grib2_parser::CoordinateGrid;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::points::QueryPoint;

/// Earth radius used for reported distances (GRIB2 shape 6).
pub const EARTH_RADIUS_M: f64 = 6_371_229.0;

/// Grids with fewer cells build their vectors sequentially.
const PARALLEL_THRESHOLD: usize = 16_384;

/// The grid cell chosen for a query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedIndex {
    pub row: usize,
    pub col: usize,
    pub grid_latitude: f64,
    pub grid_longitude: f64,
    /// Great-circle distance from the query point to the cell centre
    pub distance_m: f64,
    pub point: QueryPoint,
}

/// A query point with no grid cell within the domain threshold.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize)]
#[error("Point {point} is outside the grid domain (nearest cell {nearest_distance_m:.0} m away, threshold {threshold_m:.0} m)")]
pub struct OutOfDomain {
    pub point: QueryPoint,
    pub nearest_distance_m: f64,
    pub threshold_m: f64,
}

/// Nearest-neighbour index over one grid.
///
/// Borrows the grid, so it lives no longer than the decoded file it was
/// built for.
#[derive(Debug)]
pub struct SpatialIndex<'a> {
    grid: &'a CoordinateGrid,
    vectors: Vec<[f64; 3]>,
    spacing_m: Option<f64>,
    max_distance_m: Option<f64>,
}

impl<'a> SpatialIndex<'a> {
    pub fn new(grid: &'a CoordinateGrid) -> Self {
        let vectors: Vec<[f64; 3]> = if grid.len() >= PARALLEL_THRESHOLD {
            grid.latitudes()
                .par_iter()
                .zip(grid.longitudes().par_iter())
                .map(|(&lat, &lon)| unit_vector(lat, lon))
                .collect()
        } else {
            grid.latitudes()
                .iter()
                .zip(grid.longitudes())
                .map(|(&lat, &lon)| unit_vector(lat, lon))
                .collect()
        };

        let spacing_m = nominal_spacing(grid);
        debug!(
            rows = grid.rows(),
            cols = grid.cols(),
            spacing_m = ?spacing_m,
            "Built spatial index"
        );

        Self {
            grid,
            vectors,
            spacing_m,
            max_distance_m: None,
        }
    }

    /// Override the out-of-domain threshold.
    pub fn with_max_distance_m(mut self, max_distance_m: f64) -> Self {
        self.max_distance_m = Some(max_distance_m);
        self
    }

    /// Estimated cell spacing, `None` for a single-cell grid.
    pub fn nominal_spacing_m(&self) -> Option<f64> {
        self.spacing_m
    }

    /// Effective out-of-domain threshold in metres.
    pub fn threshold_m(&self) -> f64 {
        self.max_distance_m
            .or(self.spacing_m)
            .unwrap_or(f64::INFINITY)
    }

    pub fn resolve(&self, point: QueryPoint) -> Result<ResolvedIndex, OutOfDomain> {
        let target = unit_vector(point.latitude, point.longitude);

        let mut best_idx = 0;
        let mut best_chord2 = f64::INFINITY;
        for (idx, v) in self.vectors.iter().enumerate() {
            let chord2 = chord_squared(v, &target);
            if chord2 < best_chord2 {
                best_chord2 = chord2;
                best_idx = idx;
            }
        }

        let distance_m = chord_to_distance(best_chord2);
        let threshold_m = self.threshold_m();
        if distance_m > threshold_m {
            return Err(OutOfDomain {
                point,
                nearest_distance_m: distance_m,
                threshold_m,
            });
        }

        let cols = self.grid.cols();
        let (row, col) = (best_idx / cols, best_idx % cols);
        let (grid_latitude, grid_longitude) = self.grid.lat_lon(row, col);
        Ok(ResolvedIndex {
            row,
            col,
            grid_latitude,
            grid_longitude,
            distance_m,
            point,
        })
    }

    /// Resolve many points in parallel; output order equals input order.
    pub fn resolve_all(&self, points: &[QueryPoint]) -> Vec<Result<ResolvedIndex, OutOfDomain>> {
        points.par_iter().map(|p| self.resolve(*p)).collect()
    }
}

fn unit_vector(lat_deg: f64, lon_deg: f64) -> [f64; 3] {
    let (lat, lon) = (lat_deg.to_radians(), lon_deg.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

fn chord_squared(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

fn chord_to_distance(chord2: f64) -> f64 {
    let half = (chord2.max(0.0).sqrt() / 2.0).min(1.0);
    2.0 * EARTH_RADIUS_M * half.asin()
}

/// Great-circle distance between two lat/lon points, metres.
pub fn great_circle_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    chord_to_distance(chord_squared(
        &unit_vector(lat1, lon1),
        &unit_vector(lat2, lon2),
    ))
}

/// Largest distance between adjacent cells, sampled at the four corners
/// and the centre.
fn nominal_spacing(grid: &CoordinateGrid) -> Option<f64> {
    let (rows, cols) = grid.shape();
    if rows * cols < 2 {
        return None;
    }

    let samples = [
        (0, 0),
        (0, cols - 1),
        (rows - 1, 0),
        (rows - 1, cols - 1),
        (rows / 2, cols / 2),
    ];

    let mut spacing: Option<f64> = None;
    for (row, col) in samples {
        let (lat, lon) = grid.lat_lon(row, col);
        let mut neighbours = Vec::with_capacity(2);
        if cols > 1 {
            neighbours.push((row, if col + 1 < cols { col + 1 } else { col - 1 }));
        }
        if rows > 1 {
            neighbours.push((if row + 1 < rows { row + 1 } else { row - 1 }, col));
        }
        for (r, c) in neighbours {
            let (nlat, nlon) = grid.lat_lon(r, c);
            let d = great_circle_distance_m(lat, lon, nlat, nlon);
            spacing = Some(spacing.map_or(d, |s: f64| s.max(d)));
        }
    }
    spacing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lat_lon_grid(rows: usize, cols: usize, la1: f64, lo1: f64, step: f64) -> CoordinateGrid {
        let mut lats = Vec::new();
        let mut lons = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                lats.push(la1 + r as f64 * step);
                lons.push(lo1 + c as f64 * step);
            }
        }
        CoordinateGrid::new(rows, cols, lats, lons).unwrap()
    }

    #[test]
    fn test_exact_cell_hit() {
        let grid = lat_lon_grid(5, 6, 30.0, -100.0, 0.5);
        let index = SpatialIndex::new(&grid);
        let r = index.resolve(QueryPoint::new(31.0, -98.0)).unwrap();
        assert_eq!((r.row, r.col), (2, 4));
        assert_eq!((r.grid_latitude, r.grid_longitude), (31.0, -98.0));
        assert!(r.distance_m < 1e-3);
    }

    #[test]
    fn test_tie_breaks_to_first_cell_row_major() {
        let grid = CoordinateGrid::new(2, 2, vec![10.0; 4], vec![20.0; 4]).unwrap();
        let index = SpatialIndex::new(&grid).with_max_distance_m(1.0e6);
        let r = index.resolve(QueryPoint::new(10.1, 20.1)).unwrap();
        assert_eq!((r.row, r.col), (0, 0));
    }

    #[test]
    fn test_brute_force_minimality() {
        let grid = lat_lon_grid(12, 15, 35.0, -105.0, 0.25);
        let index = SpatialIndex::new(&grid);

        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 10_000) as f64 / 10_000.0
        };

        for _ in 0..200 {
            let point = QueryPoint::new(35.0 + next() * 2.75, -105.0 + next() * 3.5);
            let r = index.resolve(point).unwrap();
            let best = grid
                .latitudes()
                .iter()
                .zip(grid.longitudes())
                .map(|(&lat, &lon)| {
                    great_circle_distance_m(point.latitude, point.longitude, lat, lon)
                })
                .fold(f64::INFINITY, f64::min);
            assert!(r.distance_m <= best + 1e-6, "{} > {}", r.distance_m, best);
        }
    }

    #[test]
    fn test_out_of_domain_beyond_spacing() {
        let grid = lat_lon_grid(4, 4, 40.0, -100.0, 0.1);
        let index = SpatialIndex::new(&grid);
        let spacing = index.nominal_spacing_m().unwrap();
        assert!(spacing > 11_000.0 && spacing < 11_200.0);

        let err = index.resolve(QueryPoint::new(0.0, 0.0)).unwrap_err();
        assert_eq!(err.threshold_m, spacing);
        assert!(err.nearest_distance_m > 1.0e6);

        // Just outside the last row, within one spacing.
        assert!(index.resolve(QueryPoint::new(40.35, -99.9)).is_ok());
        assert!(index.resolve(QueryPoint::new(40.55, -99.9)).is_err());
    }

    #[test]
    fn test_max_distance_override() {
        let grid = lat_lon_grid(4, 4, 40.0, -100.0, 0.1);
        let index = SpatialIndex::new(&grid).with_max_distance_m(100.0);
        assert!(index.resolve(QueryPoint::new(40.0, -100.0)).is_ok());
        assert!(index.resolve(QueryPoint::new(40.05, -100.05)).is_err());
    }

    #[test]
    fn test_single_cell_grid_requires_threshold() {
        let grid = CoordinateGrid::new(1, 1, vec![40.0], vec![-100.0]).unwrap();
        let index = SpatialIndex::new(&grid);
        assert_eq!(index.nominal_spacing_m(), None);
        assert!(index.resolve(QueryPoint::new(-40.0, 80.0)).is_ok());

        let bounded = SpatialIndex::new(&grid).with_max_distance_m(5_000.0);
        assert!(bounded.resolve(QueryPoint::new(-40.0, 80.0)).is_err());
    }

    #[test]
    fn test_dateline_neighbours() {
        let grid = CoordinateGrid::new(1, 2, vec![0.0, 0.0], vec![179.9, -179.9]).unwrap();
        let index = SpatialIndex::new(&grid);
        let r = index.resolve(QueryPoint::new(0.0, -179.95)).unwrap();
        assert_eq!(r.col, 1);
    }

    #[test]
    fn test_resolve_all_preserves_order() {
        let grid = lat_lon_grid(3, 3, 10.0, 10.0, 1.0);
        let index = SpatialIndex::new(&grid);
        let points = [
            QueryPoint::new(12.0, 12.0),
            QueryPoint::new(-50.0, 10.0),
            QueryPoint::new(10.0, 11.0),
        ];
        let resolved = index.resolve_all(&points);
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].as_ref().map(|r| (r.row, r.col)), Ok((2, 2)));
        assert!(resolved[1].is_err());
        assert_eq!(resolved[2].as_ref().map(|r| r.point), Ok(points[2]));
    }

    #[test]
    fn test_known_distance() {
        // One degree of latitude.
        let d = great_circle_distance_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_198.8).abs() < 1.0, "{}", d);
    }
}
