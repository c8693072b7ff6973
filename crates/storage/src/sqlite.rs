//! `hrrr_forecasts` table on SQLite via sqlx.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::record::{ForecastRecord, RecordKey};
use crate::store::{ForecastStore, WriteMode};

/// Rows per INSERT statement (7 bound parameters each).
const INSERT_CHUNK: usize = 128;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS hrrr_forecasts (
    valid_time_utc TIMESTAMP NOT NULL,
    run_time_utc TIMESTAMP NOT NULL,
    latitude DOUBLE NOT NULL,
    longitude DOUBLE NOT NULL,
    variable TEXT NOT NULL,
    value DOUBLE NOT NULL,
    source_s3 TEXT NOT NULL,
    UNIQUE (valid_time_utc, latitude, longitude, variable)
);
CREATE INDEX IF NOT EXISTS idx_hrrr_valid_time ON hrrr_forecasts (valid_time_utc);
CREATE INDEX IF NOT EXISTS idx_hrrr_location ON hrrr_forecasts (latitude, longitude);
CREATE INDEX IF NOT EXISTS idx_hrrr_variable ON hrrr_forecasts (variable);
CREATE INDEX IF NOT EXISTS idx_hrrr_run_time ON hrrr_forecasts (run_time_utc)
"#;

const CONFLICT_TARGET: &str = " ON CONFLICT (valid_time_utc, latitude, longitude, variable)";

/// Forecast store backed by a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteForecastStore {
    pool: SqlitePool,
}

impl SqliteForecastStore {
    /// Open or create the database at the given path and ensure the schema.
    pub async fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.display(), "Opened forecast database");
        Ok(store)
    }

    /// Open an existing database without creating, migrating or writing.
    ///
    /// Returns `None` when the file or the `hrrr_forecasts` table does not
    /// exist yet; every key is new in that case.
    pub async fn open_read_only(path: &Path) -> StorageResult<Option<Self>> {
        if !path.exists() {
            debug!(path = %path.display(), "No forecast database yet");
            return Ok(None);
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'hrrr_forecasts'",
        )
        .fetch_one(&pool)
        .await?;
        if tables == 0 {
            pool.close().await;
            debug!(path = %path.display(), "Forecast table not created yet");
            return Ok(None);
        }

        info!(path = %path.display(), "Opened forecast database read-only");
        Ok(Some(Self { pool }))
    }

    /// A private in-memory database, for tests and dry runs without a file.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // One connection that never expires, or the database vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the table and indexes if missing.
    pub async fn migrate(&self) -> StorageResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    /// Total number of stored rows.
    pub async fn count(&self) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM hrrr_forecasts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// All rows ordered by valid time, location and variable.
    pub async fn fetch_all(&self) -> StorageResult<Vec<ForecastRecord>> {
        let rows = sqlx::query(
            "SELECT valid_time_utc, run_time_utc, latitude, longitude, variable, value, source_s3 \
             FROM hrrr_forecasts \
             ORDER BY valid_time_utc, latitude, longitude, variable",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ForecastStore for SqliteForecastStore {
    async fn existing_keys(&self, keys: &[RecordKey]) -> StorageResult<HashSet<RecordKey>> {
        let Some(bounds) = KeyBounds::of(keys) else {
            return Ok(HashSet::new());
        };

        // Narrow by range in SQL, then match exact keys in memory
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT valid_time_utc, latitude, longitude, variable FROM hrrr_forecasts \
             WHERE valid_time_utc BETWEEN ",
        );
        qb.push_bind(format_time(bounds.min_time))
            .push(" AND ")
            .push_bind(format_time(bounds.max_time))
            .push(" AND latitude BETWEEN ")
            .push_bind(bounds.min_lat)
            .push(" AND ")
            .push_bind(bounds.max_lat)
            .push(" AND longitude BETWEEN ")
            .push_bind(bounds.min_lon)
            .push(" AND ")
            .push_bind(bounds.max_lon)
            .push(" AND variable IN (");
        let mut separated = qb.separated(", ");
        for variable in &bounds.variables {
            separated.push_bind(variable.clone());
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;

        let wanted: HashSet<&RecordKey> = keys.iter().collect();
        let mut existing = HashSet::new();
        for row in &rows {
            let key = RecordKey::new(
                parse_time(row.try_get("valid_time_utc")?)?,
                row.try_get("latitude")?,
                row.try_get("longitude")?,
                row.try_get::<String, _>("variable")?,
            );
            if wanted.contains(&key) {
                existing.insert(key);
            }
        }

        debug!(
            requested = keys.len(),
            candidates = rows.len(),
            existing = existing.len(),
            "Checked existing keys"
        );
        Ok(existing)
    }

    async fn write(&self, records: &[ForecastRecord], mode: WriteMode) -> StorageResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        // Dropping the transaction without commit rolls it back
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in records.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO hrrr_forecasts \
                 (valid_time_utc, run_time_utc, latitude, longitude, variable, value, source_s3) ",
            );
            qb.push_values(chunk, |mut b, record| {
                b.push_bind(format_time(record.valid_time_utc))
                    .push_bind(format_time(record.run_time_utc))
                    .push_bind(record.latitude)
                    .push_bind(record.longitude)
                    .push_bind(record.variable.clone())
                    .push_bind(record.value)
                    .push_bind(record.source_s3.clone());
            });
            qb.push(CONFLICT_TARGET);
            match mode {
                WriteMode::InsertIgnore => {
                    qb.push(" DO NOTHING");
                }
                WriteMode::Upsert => {
                    qb.push(
                        " DO UPDATE SET value = excluded.value, \
                         run_time_utc = excluded.run_time_utc, \
                         source_s3 = excluded.source_s3",
                    );
                }
            }

            let result = qb.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        debug!(rows = records.len(), written, mode = ?mode, "Committed forecast batch");
        Ok(written)
    }
}

/// SQL range covering a set of keys.
struct KeyBounds {
    min_time: DateTime<Utc>,
    max_time: DateTime<Utc>,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    variables: BTreeSet<String>,
}

impl KeyBounds {
    fn of(keys: &[RecordKey]) -> Option<Self> {
        let first = keys.first()?;
        let mut bounds = Self {
            min_time: first.valid_time_utc,
            max_time: first.valid_time_utc,
            min_lat: first.latitude,
            max_lat: first.latitude,
            min_lon: first.longitude,
            max_lon: first.longitude,
            variables: BTreeSet::new(),
        };
        for key in keys {
            bounds.min_time = bounds.min_time.min(key.valid_time_utc);
            bounds.max_time = bounds.max_time.max(key.valid_time_utc);
            bounds.min_lat = bounds.min_lat.min(key.latitude);
            bounds.max_lat = bounds.max_lat.max(key.latitude);
            bounds.min_lon = bounds.min_lon.min(key.longitude);
            bounds.max_lon = bounds.max_lon.max(key.longitude);
            bounds.variables.insert(key.variable.clone());
        }
        Some(bounds)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so string order is time order.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(text: String) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidRow(format!("bad timestamp '{}': {}", text, e)))
}

fn record_from_row(row: &SqliteRow) -> StorageResult<ForecastRecord> {
    Ok(ForecastRecord {
        valid_time_utc: parse_time(row.try_get("valid_time_utc")?)?,
        run_time_utc: parse_time(row.try_get("run_time_utc")?)?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        variable: row.try_get("variable")?,
        value: row.try_get("value")?,
        source_s3: row.try_get("source_s3")?,
    })
}
