//! The persisted record type and its uniqueness key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// One value of one variable at one grid cell for one valid time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub valid_time_utc: DateTime<Utc>,
    pub run_time_utc: DateTime<Utc>,
    /// Grid cell latitude (not the query point)
    pub latitude: f64,
    /// Grid cell longitude (not the query point)
    pub longitude: f64,
    pub variable: String,
    pub value: f64,
    /// Origin locator of the decoded file
    pub source_s3: String,
}

impl ForecastRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(
            self.valid_time_utc,
            self.latitude,
            self.longitude,
            self.variable.clone(),
        )
    }
}

/// Uniqueness key: (valid_time_utc, latitude, longitude, variable).
///
/// Coordinates compare bit-exactly, with `-0.0` folded into `0.0`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordKey {
    pub valid_time_utc: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub variable: String,
}

impl RecordKey {
    pub fn new(
        valid_time_utc: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        variable: impl Into<String>,
    ) -> Self {
        Self {
            valid_time_utc,
            latitude,
            longitude,
            variable: variable.into(),
        }
    }

    fn coordinate_bits(&self) -> (u64, u64) {
        (canonical_bits(self.latitude), canonical_bits(self.longitude))
    }
}

fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.valid_time_utc == other.valid_time_utc
            && self.coordinate_bits() == other.coordinate_bits()
            && self.variable == other.variable
    }
}

impl Eq for RecordKey {}

impl Hash for RecordKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.valid_time_utc.hash(state);
        self.coordinate_bits().hash(state);
        self.variable.hash(state);
    }
}
