//! Persistence of point forecast records.
//!
//! Records live in the `hrrr_forecasts` table, unique on
//! `(valid_time_utc, latitude, longitude, variable)`. The [`ForecastStore`]
//! trait is the seam used by the ingestion deduplicator;
//! [`SqliteForecastStore`] implements it on an embedded SQLite database and
//! [`MemoryForecastStore`] in process.

pub mod error;
pub mod memory;
pub mod record;
pub mod sqlite;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryForecastStore, MemoryStoreStats};
pub use record::{ForecastRecord, RecordKey};
pub use sqlite::SqliteForecastStore;
pub use store::{ForecastStore, WriteMode};
