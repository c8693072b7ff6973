//! Run times, source locators and file name metadata.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::path::Path;

use crate::error::{IngestionError, Result};

/// Default locator prefix of the HRRR archive on AWS Open Data.
pub const DEFAULT_BASE_PATH: &str = "s3://noaa-hrrr-bdp-pds/hrrr";

/// Longest forecast horizon of the extended HRRR cycles.
pub const MAX_FORECAST_HOURS: u32 = 48;

/// Parse a `YYYY-MM-DD` run date and cycle hour into the run time.
pub fn parse_run_date(date: &str, cycle: u32) -> Result<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| {
        IngestionError::configuration(format!(
            "Invalid run date '{}' (expected YYYY-MM-DD): {}",
            date, e
        ))
    })?;
    if cycle > 23 {
        return Err(IngestionError::configuration(format!(
            "Invalid cycle hour {} (expected 0-23)",
            cycle
        )));
    }
    day.and_hms_opt(cycle, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| IngestionError::configuration(format!("Invalid run time {} {:02}Z", date, cycle)))
}

/// Forecast offsets `0..num_hours`.
pub fn forecast_hours(num_hours: u32) -> Result<Vec<u32>> {
    if !(1..=MAX_FORECAST_HOURS).contains(&num_hours) {
        return Err(IngestionError::configuration(format!(
            "Number of hours must be between 1 and {}, got {}",
            MAX_FORECAST_HOURS, num_hours
        )));
    }
    Ok((0..num_hours).collect())
}

/// Locator of the surface file of one run and forecast hour.
///
/// `{base}.{YYYYMMDD}/conus/hrrr.t{HH}z.wrfsfcf{FF}.grib2`
pub fn build_source_url(base: &str, run_time: DateTime<Utc>, forecast_hour: u32) -> String {
    format!(
        "{}.{}/conus/hrrr.t{}z.wrfsfcf{:02}.grib2",
        base.trim_end_matches('/'),
        run_time.format("%Y%m%d"),
        run_time.format("%H"),
        forecast_hour
    )
}

/// Extract forecast hour from filename.
///
/// Supports patterns:
/// - `wrfsfcf##` (HRRR format)
/// - `_f###` (e.g., `hrrr_20250124_06z_f012.grib2`)
pub fn extract_forecast_hour(file_path: &str) -> Option<u32> {
    let filename = Path::new(file_path).file_name().and_then(|s| s.to_str())?;

    // Pattern: wrfsfcf## (HRRR)
    if let Some(pos) = filename.find("wrfsfcf") {
        let rest = &filename[pos + 7..];
        if let Some(hour) = rest.get(..2).and_then(|s| s.parse::<u32>().ok()) {
            return Some(hour);
        }
    }

    // Pattern: _f###
    if let Some(pos) = filename.rfind("_f") {
        let rest = &filename[pos + 2..];
        if let Some(hour) = rest.get(..3).and_then(|s| s.parse::<u32>().ok()) {
            return Some(hour);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_date_with_cycle() {
        let t = parse_run_date("2025-01-24", 6).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 1, 24, 6, 0, 0).unwrap());
        assert_eq!(
            parse_run_date(" 2024-02-29 ", 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_run_date_rejects_bad_input() {
        assert!(parse_run_date("2025-13-01", 0).unwrap_err().is_configuration());
        assert!(parse_run_date("24/01/2025", 0).is_err());
        assert!(parse_run_date("2023-02-29", 0).is_err());
        assert!(parse_run_date("2025-01-24", 24).is_err());
    }

    #[test]
    fn test_forecast_hours_range() {
        assert_eq!(forecast_hours(1).unwrap(), vec![0]);
        assert_eq!(forecast_hours(48).unwrap().len(), 48);
        assert!(forecast_hours(0).is_err());
        assert!(forecast_hours(49).is_err());
    }

    #[test]
    fn test_build_source_url() {
        let run = parse_run_date("2025-01-24", 6).unwrap();
        assert_eq!(
            build_source_url(DEFAULT_BASE_PATH, run, 12),
            "s3://noaa-hrrr-bdp-pds/hrrr.20250124/conus/hrrr.t06z.wrfsfcf12.grib2"
        );
        assert_eq!(
            build_source_url("https://example.org/hrrr/", run, 0),
            "https://example.org/hrrr.20250124/conus/hrrr.t06z.wrfsfcf00.grib2"
        );
    }

    #[test]
    fn test_extract_forecast_hour() {
        assert_eq!(extract_forecast_hour("/data/hrrr.t06z.wrfsfcf12.grib2"), Some(12));
        assert_eq!(extract_forecast_hour("hrrr.t00z.wrfsfcf03.grib2.gz"), Some(3));
        assert_eq!(extract_forecast_hour("hrrr_20250124_06z_f007.grib2"), Some(7));
        assert_eq!(extract_forecast_hour("surface.grib2"), None);
    }
}
