//! Common test fixtures for hrrr-ingest tests.

/// Parameters of the operational HRRR CONUS Lambert conformal grid.
pub mod hrrr {
    /// Latitude of the first (south-west) grid point
    pub const LA1: f64 = 21.138123;
    /// Longitude of the first grid point, 0-360 convention
    pub const LO1: f64 = 237.280472;
    /// Orientation meridian
    pub const LOV: f64 = 262.5;
    /// Both standard parallels
    pub const LATIN: f64 = 38.5;
    /// Grid spacing in metres
    pub const DX_M: f64 = 3000.0;
    pub const NX: u32 = 1799;
    pub const NY: u32 = 1059;
}

/// Named query points.
pub mod points {
    /// (name, latitude, longitude)
    pub const CONUS_CITIES: [(&str, f64, f64); 4] = [
        ("denver", 39.7392, -104.9903),
        ("kansas_city", 39.0997, -94.5786),
        ("chicago", 41.8781, -87.6298),
        ("seattle", 47.6062, -122.3321),
    ];

    /// Render points as a headered CSV file body.
    pub fn to_csv(points: &[(f64, f64)]) -> String {
        let mut out = String::from("lat,lon\n");
        for (lat, lon) in points {
            out.push_str(&format!("{},{}\n", lat, lon));
        }
        out
    }
}

/// Common time values for testing.
pub mod time {
    /// A fixed run date for tests (2024-01-15, 12Z cycle)
    pub const RUN_DATE: &str = "2024-01-15";

    /// HRRR model run times (hourly)
    pub const HRRR_CYCLES: [&str; 24] = [
        "00", "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12", "13", "14",
        "15", "16", "17", "18", "19", "20", "21", "22", "23",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_csv() {
        let csv = points::to_csv(&[(39.5, -105.25), (40.0, -100.0)]);
        assert_eq!(csv, "lat,lon\n39.5,-105.25\n40,-100\n");
    }

    #[test]
    fn test_hrrr_grid_size() {
        assert_eq!(hrrr::NX * hrrr::NY, 1_905_141);
        assert_eq!(time::HRRR_CYCLES.len(), 24);
    }
}
