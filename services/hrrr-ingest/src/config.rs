//! Command line arguments and the validated run settings built from them.

use clap::Parser;
use ingestion::{
    build_source_url, extract_forecast_hour, forecast_hours, parse_run_date, read_points_file,
    resolve_variables, IngestPlan, IngestionError, MergePolicy, SourceFile, DEFAULT_BASE_PATH,
    DEFAULT_WORKERS,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "hrrr-ingest")]
#[command(about = "Extract HRRR forecast values at points and store them idempotently")]
#[command(after_help = "Examples:\n  \
    hrrr-ingest points.txt --run-date 2025-01-24 --variables temperature_2m --num-hours 2\n  \
    hrrr-ingest points.txt --run-date 2025-01-24 --cycle 6 --variables wind_speed_80m --upsert")]
pub struct Args {
    /// File of `lat,lon` points, one per line
    #[arg(required_unless_present = "list_variables")]
    pub points_file: Option<PathBuf>,

    /// Run date (YYYY-MM-DD)
    #[arg(long, required_unless_present = "list_variables")]
    pub run_date: Option<String>,

    /// Run cycle hour (UTC)
    #[arg(long, default_value_t = 0)]
    pub cycle: u32,

    /// Comma-separated variable names
    #[arg(long, required_unless_present = "list_variables")]
    pub variables: Option<String>,

    /// Number of forecast hours to process, starting at 0
    #[arg(long, default_value_t = 1)]
    pub num_hours: u32,

    /// SQLite database file
    #[arg(long, env = "HRRR_DB_PATH", default_value = "data.db")]
    pub db_path: PathBuf,

    /// Directory for downloaded GRIB2 files
    #[arg(long, env = "HRRR_CACHE_DIR", default_value = "./cache")]
    pub cache_dir: PathBuf,

    /// Locator prefix of the HRRR archive
    #[arg(long, env = "HRRR_BASE_URL", default_value = DEFAULT_BASE_PATH)]
    pub base_path: String,

    /// Ingest local files instead of downloading (repeatable)
    #[arg(long = "grib-file")]
    pub grib_files: Vec<PathBuf>,

    /// Overwrite stored values for existing keys
    #[arg(long)]
    pub upsert: bool,

    /// Decode and check existing keys without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Files decoded concurrently
    #[arg(long, env = "HRRR_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Timeout for each storage call, seconds
    #[arg(long, env = "HRRR_STORAGE_TIMEOUT_SECS", default_value_t = 60)]
    pub storage_timeout_secs: u64,

    /// Reject points farther than this from the nearest grid cell
    #[arg(long, allow_negative_numbers = true)]
    pub max_distance_km: Option<f64>,

    /// Print the supported variables and exit
    #[arg(long)]
    pub list_variables: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

/// Where the GRIB2 files come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Sources {
    /// Locators to download, one per forecast hour
    Remote(Vec<(u32, String)>),
    Local(Vec<SourceFile>),
}

/// Everything a run needs, validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub plan: IngestPlan,
    pub sources: Sources,
    pub db_path: PathBuf,
    pub cache_dir: PathBuf,
}

impl Settings {
    /// Validate arguments. The points file is the only file read here, and
    /// only after every other argument has been checked.
    pub fn from_args(args: &Args) -> Result<Self, IngestionError> {
        let variables = resolve_variables(args.variables.as_deref().unwrap_or_default())?;
        let run_date = args
            .run_date
            .as_deref()
            .ok_or_else(|| IngestionError::configuration("--run-date is required"))?;
        let run_time = parse_run_date(run_date, args.cycle)?;

        let sources = if args.grib_files.is_empty() {
            let hours = forecast_hours(args.num_hours)?;
            Sources::Remote(
                hours
                    .into_iter()
                    .map(|h| (h, build_source_url(&args.base_path, run_time, h)))
                    .collect(),
            )
        } else {
            Sources::Local(local_sources(&args.grib_files)?)
        };

        let points_file = args
            .points_file
            .as_ref()
            .ok_or_else(|| IngestionError::configuration("A points file is required"))?;

        if args.workers == 0 {
            return Err(IngestionError::configuration("--workers must be at least 1"));
        }
        if args.storage_timeout_secs == 0 {
            return Err(IngestionError::configuration(
                "--storage-timeout-secs must be positive",
            ));
        }
        let max_distance_m = match args.max_distance_km {
            Some(km) if km.is_finite() && km > 0.0 => Some(km * 1000.0),
            Some(km) => {
                return Err(IngestionError::configuration(format!(
                    "--max-distance-km must be positive, got {}",
                    km
                )))
            }
            None => None,
        };

        let points = read_points_file(points_file)?;
        let mut plan = IngestPlan::new(run_time, variables, points)?
            .with_policy(if args.upsert {
                MergePolicy::ReplaceOnConflict
            } else {
                MergePolicy::RejectDuplicates
            })
            .with_dry_run(args.dry_run)
            .with_workers(args.workers)?
            .with_storage_timeout(Duration::from_secs(args.storage_timeout_secs))?;
        if let Some(max_distance_m) = max_distance_m {
            plan = plan.with_max_distance_m(max_distance_m)?;
        }

        Ok(Self {
            plan,
            sources,
            db_path: args.db_path.clone(),
            cache_dir: args.cache_dir.clone(),
        })
    }
}

fn local_sources(paths: &[PathBuf]) -> Result<Vec<SourceFile>, IngestionError> {
    paths
        .iter()
        .map(|path| {
            let display = path.display().to_string();
            let hour = extract_forecast_hour(&display).ok_or_else(|| {
                IngestionError::configuration(format!(
                    "Cannot determine the forecast hour of {} (expected wrfsfcfNN or _fNNN in the name)",
                    display
                ))
            })?;
            Ok(SourceFile::new(path, display, hour))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn points_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lat,lon\n39.74,-104.99\n40.71,-74.01").unwrap();
        file
    }

    fn parse(extra: &[&str], points: &str) -> Args {
        let mut argv = vec![
            "hrrr-ingest",
            points,
            "--run-date",
            "2025-01-24",
            "--variables",
            "temperature_2m,wind_speed_80m",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from([
            "hrrr-ingest",
            "points.txt",
            "--run-date",
            "2025-01-24",
            "--variables",
            "temperature_2m",
        ])
        .unwrap();
        assert_eq!(args.cycle, 0);
        assert_eq!(args.num_hours, 1);
        assert_eq!(args.workers, DEFAULT_WORKERS);
        assert!(!args.upsert);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_list_variables_needs_nothing_else() {
        let args = Args::try_parse_from(["hrrr-ingest", "--list-variables"]).unwrap();
        assert!(args.list_variables);
        assert!(Args::try_parse_from(["hrrr-ingest"]).is_err());
    }

    #[test]
    fn test_remote_sources_per_hour() {
        let file = points_file();
        let args = parse(&["--cycle", "6", "--num-hours", "3"], file.path().to_str().unwrap());
        let settings = Settings::from_args(&args).unwrap();

        let Sources::Remote(urls) = &settings.sources else {
            panic!("expected remote sources");
        };
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[2].0, 2);
        assert_eq!(
            urls[2].1,
            "s3://noaa-hrrr-bdp-pds/hrrr.20250124/conus/hrrr.t06z.wrfsfcf02.grib2"
        );
        assert_eq!(settings.plan.points.len(), 2);
        assert_eq!(settings.plan.variables.len(), 2);
        assert_eq!(settings.plan.policy, MergePolicy::RejectDuplicates);
    }

    #[test]
    fn test_unknown_variable_checked_before_points_file() {
        let args = Args::try_parse_from([
            "hrrr-ingest",
            "/nonexistent/points.txt",
            "--run-date",
            "2025-01-24",
            "--variables",
            "temperature_2m,bogus",
        ])
        .unwrap();
        let err = Settings::from_args(&args).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let file = points_file();
        let path = file.path().to_str().unwrap();
        for extra in [
            &["--cycle", "24"][..],
            &["--num-hours", "0"][..],
            &["--num-hours", "49"][..],
            &["--workers", "0"][..],
            &["--storage-timeout-secs", "0"][..],
            &["--max-distance-km", "-1"][..],
        ] {
            let args = parse(extra, path);
            assert!(
                Settings::from_args(&args).unwrap_err().is_configuration(),
                "{extra:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_negative_max_distance_reaches_validation() {
        let file = points_file();
        let args = parse(&["--max-distance-km", "-2.5"], file.path().to_str().unwrap());
        assert_eq!(args.max_distance_km, Some(-2.5));

        let err = Settings::from_args(&args).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("--max-distance-km must be positive"));
    }

    #[test]
    fn test_local_files_and_options() {
        let file = points_file();
        let args = parse(
            &[
                "--grib-file",
                "/data/hrrr.t00z.wrfsfcf05.grib2",
                "--upsert",
                "--dry-run",
                "--max-distance-km",
                "5",
            ],
            file.path().to_str().unwrap(),
        );
        let settings = Settings::from_args(&args).unwrap();

        assert_eq!(
            settings.sources,
            Sources::Local(vec![SourceFile::new(
                "/data/hrrr.t00z.wrfsfcf05.grib2",
                "/data/hrrr.t00z.wrfsfcf05.grib2",
                5
            )])
        );
        assert_eq!(settings.plan.policy, MergePolicy::ReplaceOnConflict);
        assert!(settings.plan.dry_run);
        assert_eq!(settings.plan.max_distance_m, Some(5000.0));
    }

    #[test]
    fn test_local_file_without_hour_rejected() {
        let file = points_file();
        let args = parse(&["--grib-file", "/data/latest.grib2"], file.path().to_str().unwrap());
        let err = Settings::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("latest.grib2"));
    }
}
