//! File-by-file ingestion: decode, resolve, build, merge.
//!
//! Decoding and record building run on blocking threads, at most
//! `workers` files at a time. A single consumer merges the resulting
//! batches into the store in input order, so only one writer touches the
//! store per run.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use grib2_parser::{GridDecoder, VariableSelector};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{ForecastRecord, ForecastStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dedup::{Deduplicator, MergeError, MergeOutcome, MergePolicy};
use crate::error::{IngestionError, Result};
use crate::points::QueryPoint;
use crate::records::RecordBuilder;
use crate::spatial::{OutOfDomain, SpatialIndex};
use crate::variables::{self, VariableAlias};

/// Default number of files decoded concurrently.
pub const DEFAULT_WORKERS: usize = 2;

/// A GRIB2 file to ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Local path of the (possibly cached) file
    pub path: PathBuf,
    /// Locator recorded as `source_s3` on every record
    pub origin: String,
    pub forecast_hour: u32,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<String>, forecast_hour: u32) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
            forecast_hour,
        }
    }
}

/// Validated configuration of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestPlan {
    pub run_time: DateTime<Utc>,
    pub variables: Vec<&'static VariableAlias>,
    pub points: Vec<QueryPoint>,
    pub policy: MergePolicy,
    pub dry_run: bool,
    pub workers: usize,
    pub storage_timeout: Option<Duration>,
    pub max_distance_m: Option<f64>,
}

impl IngestPlan {
    pub fn new(
        run_time: DateTime<Utc>,
        variables: Vec<&'static VariableAlias>,
        points: Vec<QueryPoint>,
    ) -> Result<Self> {
        if variables.is_empty() {
            return Err(IngestionError::configuration("No variables requested"));
        }
        if points.is_empty() {
            return Err(IngestionError::configuration("No points given"));
        }
        if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
            return Err(IngestionError::configuration(format!(
                "Point {} out of range",
                bad
            )));
        }

        Ok(Self {
            run_time,
            variables,
            points,
            policy: MergePolicy::default(),
            dry_run: false,
            workers: DEFAULT_WORKERS,
            storage_timeout: None,
            max_distance_m: None,
        })
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(IngestionError::configuration("At least one worker is required"));
        }
        self.workers = workers;
        Ok(self)
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(IngestionError::configuration("Storage timeout must be positive"));
        }
        self.storage_timeout = Some(timeout);
        Ok(self)
    }

    pub fn with_max_distance_m(mut self, max_distance_m: f64) -> Result<Self> {
        if !max_distance_m.is_finite() || max_distance_m <= 0.0 {
            return Err(IngestionError::configuration(format!(
                "Maximum distance must be a positive number of metres, got {}",
                max_distance_m
            )));
        }
        self.max_distance_m = Some(max_distance_m);
        Ok(self)
    }

    pub fn selectors(&self) -> Vec<VariableSelector> {
        variables::selectors(&self.variables)
    }
}

/// A file that could not be decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub origin: String,
    pub message: String,
}

/// A point outside one file's grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointFailure {
    pub origin: String,
    pub point: QueryPoint,
    pub nearest_distance_m: f64,
    pub threshold_m: f64,
}

/// A requested variable absent from one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingVariable {
    pub origin: String,
    pub variable: String,
}

/// Totals of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub files_processed: u64,
    pub files_failed: u64,
    pub records_built: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub replaced: u64,
    pub batch_duplicates: u64,
    pub file_failures: Vec<FileFailure>,
    pub point_failures: Vec<PointFailure>,
    pub missing_variables: Vec<MissingVariable>,
}

impl RunSummary {
    fn add_outcome(&mut self, outcome: &MergeOutcome) {
        self.inserted += outcome.inserted;
        self.skipped += outcome.skipped;
        self.replaced += outcome.replaced;
        self.batch_duplicates += outcome.batch_duplicates;
    }

    /// Records inserted or replaced.
    pub fn committed(&self) -> u64 {
        self.inserted + self.replaced
    }

    pub fn is_clean(&self) -> bool {
        self.files_failed == 0 && self.point_failures.is_empty() && self.missing_variables.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        writeln!(f, "Ingestion summary{}", mode)?;
        writeln!(
            f,
            "  files:   {} processed, {} failed",
            self.files_processed, self.files_failed
        )?;
        writeln!(f, "  records: {} built", self.records_built)?;
        writeln!(
            f,
            "  merged:  {} inserted, {} skipped, {} replaced",
            self.inserted, self.skipped, self.replaced
        )?;
        if self.batch_duplicates > 0 {
            writeln!(f, "  duplicate keys within batches: {}", self.batch_duplicates)?;
        }
        for failure in &self.file_failures {
            writeln!(f, "  failed file {}: {}", failure.origin, failure.message)?;
        }
        for failure in &self.point_failures {
            writeln!(
                f,
                "  point {} outside grid of {} (nearest cell {:.1} km)",
                failure.point,
                failure.origin,
                failure.nearest_distance_m / 1000.0
            )?;
        }
        for missing in &self.missing_variables {
            writeln!(f, "  variable {} missing from {}", missing.variable, missing.origin)?;
        }
        Ok(())
    }
}

/// Records and diagnostics built from one file.
#[derive(Debug)]
struct FileBatch {
    origin: String,
    records: Vec<ForecastRecord>,
    out_of_domain: Vec<OutOfDomain>,
    missing: Vec<String>,
}

enum FileOutcome {
    Built(FileBatch),
    Failed(FileFailure),
    /// Not started because the run was stopping
    Abandoned,
}

/// Runs an [`IngestPlan`] over a list of files.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    plan: Arc<IngestPlan>,
    selectors: Arc<Vec<VariableSelector>>,
    decoder: Arc<GridDecoder>,
    dedup: Deduplicator,
}

impl IngestPipeline {
    pub fn new(plan: IngestPlan) -> Self {
        let mut dedup = Deduplicator::new(plan.policy).dry_run(plan.dry_run);
        if let Some(timeout) = plan.storage_timeout {
            dedup = dedup.timeout(timeout);
        }
        Self {
            selectors: Arc::new(plan.selectors()),
            plan: Arc::new(plan),
            decoder: Arc::new(GridDecoder::new()),
            dedup,
        }
    }

    pub fn plan(&self) -> &IngestPlan {
        &self.plan
    }

    /// Ingest `files` in order.
    ///
    /// Per-file decode failures and per-point domain misses are collected
    /// in the summary. A storage failure, timeout or cancellation stops the
    /// run; the error carries the records committed so far and the records
    /// built but not committed.
    pub async fn run(
        &self,
        files: Vec<SourceFile>,
        store: &dyn ForecastStore,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            dry_run: self.plan.dry_run,
            ..Default::default()
        };
        info!(
            files = files.len(),
            points = self.plan.points.len(),
            variables = self.plan.variables.len(),
            workers = self.plan.workers,
            dry_run = self.plan.dry_run,
            "Starting ingestion"
        );

        let stopping = cancel.child_token();
        let mut outcomes = stream::iter(files)
            .map(|file| {
                let plan = Arc::clone(&self.plan);
                let selectors = Arc::clone(&self.selectors);
                let decoder = Arc::clone(&self.decoder);
                let stopping = stopping.clone();
                async move {
                    if stopping.is_cancelled() {
                        return FileOutcome::Abandoned;
                    }
                    let origin = file.origin.clone();
                    let task = tokio::task::spawn_blocking(move || {
                        process_file(&plan, &decoder, &selectors, &file)
                    });
                    match task.await {
                        Ok(Ok(batch)) => FileOutcome::Built(batch),
                        Ok(Err(e)) => FileOutcome::Failed(FileFailure {
                            origin,
                            message: e.to_string(),
                        }),
                        Err(e) => FileOutcome::Failed(FileFailure {
                            origin,
                            message: format!("Worker task failed: {}", e),
                        }),
                    }
                }
            })
            .buffered(self.plan.workers.max(1));

        let mut abandoned = 0u64;
        while let Some(outcome) = outcomes.next().await {
            let batch = match outcome {
                FileOutcome::Built(batch) => batch,
                FileOutcome::Failed(failure) => {
                    error!(origin = %failure.origin, error = %failure.message, "Failed to process file");
                    summary.files_failed += 1;
                    summary.file_failures.push(failure);
                    continue;
                }
                FileOutcome::Abandoned => {
                    abandoned += 1;
                    continue;
                }
            };

            summary.records_built += batch.records.len() as u64;
            summary
                .point_failures
                .extend(batch.out_of_domain.iter().map(|o| PointFailure {
                    origin: batch.origin.clone(),
                    point: o.point,
                    nearest_distance_m: o.nearest_distance_m,
                    threshold_m: o.threshold_m,
                }));
            summary
                .missing_variables
                .extend(batch.missing.iter().map(|v| MissingVariable {
                    origin: batch.origin.clone(),
                    variable: v.clone(),
                }));

            match self.dedup.merge(batch.records, store, cancel).await {
                Ok(outcome) => {
                    summary.files_processed += 1;
                    summary.add_outcome(&outcome);
                }
                Err(e) => {
                    stopping.cancel();
                    let mut uncommitted = e.uncommitted();
                    while let Some(rest) = outcomes.next().await {
                        if let FileOutcome::Built(b) = rest {
                            uncommitted += b.records.len() as u64;
                        }
                    }
                    let committed = summary.committed();
                    error!(error = %e, committed, uncommitted, "Stopping ingestion");
                    return Err(match e {
                        MergeError::Cancelled { .. } => IngestionError::Cancelled {
                            committed,
                            uncommitted,
                        },
                        source => IngestionError::Storage {
                            source,
                            committed,
                            uncommitted,
                        },
                    });
                }
            }
        }

        // A cancel that lands after the last merge leaves a complete run
        if abandoned > 0 {
            warn!(
                committed = summary.committed(),
                abandoned,
                "Ingestion cancelled"
            );
            return Err(IngestionError::Cancelled {
                committed: summary.committed(),
                uncommitted: 0,
            });
        }

        info!(
            files_processed = summary.files_processed,
            files_failed = summary.files_failed,
            records = summary.records_built,
            inserted = summary.inserted,
            skipped = summary.skipped,
            replaced = summary.replaced,
            "Ingestion complete"
        );
        Ok(summary)
    }
}

/// Decode one file and build its records. Runs on a blocking thread; the
/// decoded grid and fields are dropped on return.
#[instrument(skip_all, fields(origin = %file.origin, forecast_hour = file.forecast_hour))]
fn process_file(
    plan: &IngestPlan,
    decoder: &GridDecoder,
    selectors: &[VariableSelector],
    file: &SourceFile,
) -> Result<FileBatch> {
    let decoded = decoder.decode_file(&file.path, selectors)?;

    for hours in decoded.forecast_hours() {
        if (hours - f64::from(file.forecast_hour)).abs() > 1e-6 {
            warn!(
                expected = file.forecast_hour,
                found = hours,
                "Forecast time in file differs from expected hour"
            );
        }
    }
    if let Some(reference) = decoded.reference_time {
        if reference != plan.run_time {
            warn!(
                expected = %plan.run_time,
                found = %reference,
                "Reference time in file differs from run time"
            );
        }
    }

    let builder = RecordBuilder::new(plan.run_time, file.forecast_hour, file.origin.clone());
    let Some(grid) = decoded.grid.as_ref() else {
        debug!("No requested variable present");
        return Ok(FileBatch {
            origin: file.origin.clone(),
            records: Vec::new(),
            out_of_domain: Vec::new(),
            missing: decoded.missing.clone(),
        });
    };

    let mut index = SpatialIndex::new(grid);
    if let Some(max) = plan.max_distance_m {
        index = index.with_max_distance_m(max);
    }

    let mut resolved = Vec::with_capacity(plan.points.len());
    let mut out_of_domain = Vec::new();
    for result in index.resolve_all(&plan.points) {
        match result {
            Ok(r) => resolved.push(r),
            Err(e) => {
                warn!(error = %e, "Point outside grid");
                out_of_domain.push(e);
            }
        }
    }

    let records = builder.build(&decoded, &plan.variables, &resolved);
    info!(
        records = records.len(),
        resolved = resolved.len(),
        out_of_domain = out_of_domain.len(),
        "Built records"
    );

    Ok(FileBatch {
        origin: file.origin.clone(),
        records,
        out_of_domain,
        missing: decoded.missing.clone(),
    })
}
