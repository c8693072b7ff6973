//! Reshaping decoded fields into long-format forecast records.

use chrono::{DateTime, Duration, Utc};
use grib2_parser::DecodedFile;
use storage::ForecastRecord;

use crate::spatial::ResolvedIndex;
use crate::variables::VariableAlias;

/// Builds the records of one decoded file.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    run_time: DateTime<Utc>,
    forecast_hour: u32,
    source: String,
}

impl RecordBuilder {
    pub fn new(run_time: DateTime<Utc>, forecast_hour: u32, source: impl Into<String>) -> Self {
        Self {
            run_time,
            forecast_hour,
            source: source.into(),
        }
    }

    /// Run time plus the forecast offset.
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.run_time + Duration::hours(i64::from(self.forecast_hour))
    }

    pub fn run_time(&self) -> DateTime<Utc> {
        self.run_time
    }

    pub fn forecast_hour(&self) -> u32 {
        self.forecast_hour
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// One record per (point, variable) with a defined value.
    ///
    /// Records are ordered by point, then by variable. Undefined cells and
    /// variables absent from the file produce no records.
    pub fn build(
        &self,
        decoded: &DecodedFile,
        variables: &[&VariableAlias],
        resolved: &[ResolvedIndex],
    ) -> Vec<ForecastRecord> {
        let valid_time = self.valid_time();
        let fields: Vec<_> = variables
            .iter()
            .filter_map(|v| decoded.field(v.name))
            .collect();

        let mut records = Vec::with_capacity(resolved.len() * fields.len());
        for index in resolved {
            for field in &fields {
                let Some(value) = field.value_at(index.row, index.col) else {
                    continue;
                };
                records.push(ForecastRecord {
                    valid_time_utc: valid_time,
                    run_time_utc: self.run_time,
                    latitude: index.grid_latitude,
                    longitude: index.grid_longitude,
                    variable: field.name.clone(),
                    value: f64::from(value),
                    source_s3: self.source.clone(),
                });
            }
        }
        records
    }
}
