//! Query points and the points file format.
//!
//! One `lat,lon` pair per line. Blank lines and lines starting with `#`
//! are ignored, as is a leading `lat,lon` header.

use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::error::{IngestionError, Result};

/// A caller-supplied location, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl QueryPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for QueryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Read and parse a points file.
pub fn read_points_file(path: &Path) -> Result<Vec<QueryPoint>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        IngestionError::configuration(format!(
            "Cannot read points file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_points(&content).map_err(|e| match e {
        IngestionError::Configuration(msg) => {
            IngestionError::configuration(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Parse points file content.
pub fn parse_points(content: &str) -> Result<Vec<QueryPoint>> {
    let mut points = Vec::new();
    let mut seen_data = false;

    for (index, raw) in content.lines().enumerate() {
        let line_num = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !seen_data && is_header(line) {
            seen_data = true;
            continue;
        }
        seen_data = true;
        points.push(parse_line(line, line_num)?);
    }

    if points.is_empty() {
        return Err(IngestionError::configuration("No points found"));
    }
    Ok(points)
}

fn is_header(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    let parts: Vec<&str> = lower.split(',').map(str::trim).collect();
    matches!(parts.as_slice(), ["lat", "lon"] | ["latitude", "longitude"])
}

fn parse_line(line: &str, line_num: usize) -> Result<QueryPoint> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    let [lat, lon] = parts.as_slice() else {
        return Err(IngestionError::configuration(format!(
            "Line {}: expected 'lat,lon', got '{}'",
            line_num, line
        )));
    };

    let parse = |s: &str, what: &str| {
        s.parse::<f64>().ok().filter(|v| v.is_finite()).ok_or_else(|| {
            IngestionError::configuration(format!("Line {}: invalid {} '{}'", line_num, what, s))
        })
    };
    let point = QueryPoint::new(parse(*lat, "latitude")?, parse(*lon, "longitude")?);

    if !point.is_valid() {
        return Err(IngestionError::configuration(format!(
            "Line {}: coordinates {} out of range",
            line_num, point
        )));
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_blanks_and_header() {
        let content = "# stations\nlat,lon\n\n39.74,-104.99\n  # inline\n 41.88 , -87.63 \n";
        let points = parse_points(content).unwrap();
        assert_eq!(
            points,
            vec![QueryPoint::new(39.74, -104.99), QueryPoint::new(41.88, -87.63)]
        );
    }

    #[test]
    fn test_header_only_allowed_first() {
        let err = parse_points("39.0,-100.0\nlat,lon\n").unwrap_err();
        assert!(err.to_string().contains("Line 2"));
    }

    #[test]
    fn test_malformed_line_names_line() {
        let err = parse_points("39.0,-100.0\n40.0\n").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Line 2"));

        let err = parse_points("39.0,-100.0,5\n").unwrap_err();
        assert!(err.to_string().contains("Line 1"));

        let err = parse_points("abc,-100.0\n").unwrap_err();
        assert!(err.to_string().contains("invalid latitude"));
    }

    #[test]
    fn test_range_validation() {
        assert!(parse_points("90.0,180.0\n-90.0,-180.0\n").is_ok());
        let err = parse_points("# x\n91.0,0.0\n").unwrap_err();
        assert!(err.to_string().contains("Line 2"));
        assert!(parse_points("0.0,180.5\n").is_err());
        assert!(parse_points("NaN,0.0\n").is_err());
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(parse_points("").unwrap_err().is_configuration());
        assert!(parse_points("# only comments\n\n").is_err());
    }

    #[test]
    fn test_read_points_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.txt");
        std::fs::write(&path, "39.0,-100.0\n").unwrap();
        assert_eq!(read_points_file(&path).unwrap().len(), 1);

        let missing = dir.path().join("nope.txt");
        let err = read_points_file(&missing).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }
}
