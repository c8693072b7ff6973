//! HRRR point forecast ingester.
//!
//! Downloads (or reads) HRRR surface GRIB2 files, extracts the requested
//! variables at the nearest grid cell of each point and merges the records
//! into SQLite. Running the same command twice leaves the table unchanged.

mod config;
mod fetch;

use anyhow::{Context, Result};
use clap::Parser;
use ingestion::{FileFailure, IngestPipeline, SourceFile, VARIABLE_ALIASES};
use std::path::Path;
use storage::{ForecastStore, MemoryForecastStore, SqliteForecastStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Args, Settings, Sources};
use fetch::{FetchConfig, Fetcher};

#[tokio::main]
async fn main() {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args);

    if args.list_variables {
        print_variables();
        return;
    }

    if let Err(e) = run(args).await {
        error!(error = %format!("{:#}", e), "Ingestion failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(args: &Args) {
    let level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level.to_lowercase()
    };
    // RUST_LOG wins over the command line
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_variables() {
    print!("{}", variable_table());
}

/// The alias table as printed by `--list-variables`.
fn variable_table() -> String {
    let mut table = format!("{:<40} {:<6} {:<9} {}\n", "NAME", "GRIB", "CODE", "LEVEL");
    for alias in VARIABLE_ALIASES {
        let (discipline, category, number) = alias.code;
        let code = format!("{}.{}.{}", discipline, category, number);
        table.push_str(&format!(
            "{:<40} {:<6} {:<9} type {} value {}\n",
            alias.name, alias.parameter, code, alias.level_type, alias.level_value
        ));
    }
    table
}

async fn run(args: Args) -> Result<()> {
    let settings = Settings::from_args(&args)?;
    info!(
        run_time = %settings.plan.run_time,
        variables = settings.plan.variables.len(),
        points = settings.plan.points.len(),
        db_path = %settings.db_path.display(),
        "Starting HRRR ingestion"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let (files, download_failures) = resolve_sources(&settings, &cancel).await?;

    let store = open_store(&settings.db_path, settings.plan.dry_run)
        .await
        .with_context(|| format!("Failed to open database {}", settings.db_path.display()))?;

    let pipeline = IngestPipeline::new(settings.plan);
    let result = pipeline.run(files, store.as_store(), &cancel).await;
    store.close().await;

    let mut summary = result?;
    summary.files_failed += download_failures.len() as u64;
    summary.file_failures.extend(download_failures);

    if args.log_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary);
    }
    info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        replaced = summary.replaced,
        clean = summary.is_clean(),
        "Ingestion finished"
    );
    Ok(())
}

/// Store a run merges into.
enum RunStore {
    Sqlite(SqliteForecastStore),
    /// Dry run against a database that does not exist yet
    Empty(MemoryForecastStore),
}

impl RunStore {
    fn as_store(&self) -> &dyn ForecastStore {
        match self {
            Self::Sqlite(store) => store,
            Self::Empty(store) => store,
        }
    }

    async fn close(&self) {
        if let Self::Sqlite(store) = self {
            store.close().await;
        }
    }
}

/// A dry run opens the database read-only and never creates it.
async fn open_store(path: &Path, dry_run: bool) -> Result<RunStore> {
    if !dry_run {
        return Ok(RunStore::Sqlite(SqliteForecastStore::open(path).await?));
    }
    Ok(match SqliteForecastStore::open_read_only(path).await? {
        Some(store) => RunStore::Sqlite(store),
        None => {
            info!(path = %path.display(), "No forecast table yet, every record is new");
            RunStore::Empty(MemoryForecastStore::new())
        }
    })
}

/// Local paths for every source, downloading remote ones. A download
/// failure is reported with the other per-file failures.
async fn resolve_sources(
    settings: &Settings,
    cancel: &CancellationToken,
) -> Result<(Vec<SourceFile>, Vec<FileFailure>)> {
    match &settings.sources {
        Sources::Local(files) => Ok((files.clone(), Vec::new())),
        Sources::Remote(locators) => {
            let fetcher = Fetcher::new(FetchConfig::new(&settings.cache_dir))?;
            let mut files = Vec::with_capacity(locators.len());
            let mut failures = Vec::new();

            for (hour, locator) in locators {
                if cancel.is_cancelled() {
                    break;
                }
                match fetcher.fetch(locator, cancel).await {
                    Ok(path) => files.push(SourceFile::new(path, locator.clone(), *hour)),
                    Err(e) => {
                        warn!(locator = %locator, error = %format!("{:#}", e), "Skipping forecast hour");
                        failures.push(FileFailure {
                            origin: locator.clone(),
                            message: format!("{:#}", e),
                        });
                    }
                }
            }
            if cancel.is_cancelled() {
                anyhow::bail!("Interrupted while downloading");
            }
            Ok((files, failures))
        }
    }
}
