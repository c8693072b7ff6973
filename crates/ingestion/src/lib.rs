//! HRRR point forecast ingestion.
//!
//! Turns GRIB2 surface files into long-format point records and merges
//! them into a [`storage::ForecastStore`] without duplicating keys.
//!
//! # Architecture
//!
//! - [`variables`]: static alias table, resolved before any file is opened
//! - [`points`]: query points and the points file format
//! - [`spatial`]: nearest grid cell lookup with a domain check
//! - [`records`]: reshaping decoded fields into [`ForecastRecord`]s
//! - [`dedup`]: merge policies over a store
//! - [`pipeline`]: bounded-concurrency driver over a list of files
//! - [`metadata`]: run times, source locators, file name parsing

pub mod dedup;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod points;
pub mod records;
pub mod spatial;
pub mod variables;

// Re-exports
pub use dedup::{Deduplicator, MergeError, MergeOutcome, MergePolicy};
pub use error::{IngestionError, Result};
pub use metadata::{
    build_source_url, extract_forecast_hour, forecast_hours, parse_run_date, DEFAULT_BASE_PATH,
    MAX_FORECAST_HOURS,
};
pub use pipeline::{
    FileFailure, IngestPipeline, IngestPlan, MissingVariable, PointFailure, RunSummary,
    SourceFile, DEFAULT_WORKERS,
};
pub use points::{parse_points, read_points_file, QueryPoint};
pub use records::RecordBuilder;
pub use spatial::{OutOfDomain, ResolvedIndex, SpatialIndex};
pub use storage::ForecastRecord;
pub use variables::{resolve_variables, VariableAlias, VARIABLE_ALIASES};
