//! Runs a JSON batch plan of max-min searches and stores one artifact per
//! source motif. Re-running the same plan skips finished artifacts.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use motifscape::batch::{BatchPlan, BatchReport, BatchRunner};
use motifscape::storage::DirStore;
use motifscape::MotifError;

mod paths;

use paths::AppPaths;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("could not determine data directory")]
    NoDataDir,

    #[error("usage: {0}")]
    Usage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad batch plan: {0}")]
    Plan(#[from] serde_json::Error),

    #[error(transparent)]
    Motif(#[from] MotifError),
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    plan: PathBuf,
    out: Option<PathBuf>,
    threads: Option<usize>,
}

fn parse_args(raw: &[String]) -> Result<Args, BatchError> {
    let mut args = Args::default();
    let mut plan = None;
    let mut it = raw.iter();
    while let Some(a) = it.next() {
        match a.as_str() {
            "--out" => {
                let dir = it
                    .next()
                    .ok_or_else(|| BatchError::Usage("--out needs a directory".into()))?;
                args.out = Some(PathBuf::from(dir));
            }
            "--threads" => {
                let n = it
                    .next()
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or_else(|| BatchError::Usage("--threads needs a number".into()))?;
                args.threads = Some(n);
            }
            other if other.starts_with("--") => {
                return Err(BatchError::Usage(format!("unknown flag {other}")));
            }
            other => {
                if plan.replace(PathBuf::from(other)).is_some() {
                    return Err(BatchError::Usage("only one plan file".into()));
                }
            }
        }
    }
    args.plan = plan.ok_or_else(|| {
        BatchError::Usage("motif_batch <plan.json> [--out <dir>] [--threads N]".into())
    })?;
    Ok(args)
}

#[derive(Debug, Serialize)]
struct ReportFile<'a> {
    plan: String,
    ran: &'a [String],
    skipped: &'a [String],
    failed: Vec<FailedEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct FailedEntry<'a> {
    key: &'a str,
    error: &'a str,
}

fn write_report(paths: &AppPaths, plan: &str, report: &BatchReport) -> Result<(), BatchError> {
    let file = ReportFile {
        plan: plan.to_string(),
        ran: &report.ran,
        skipped: &report.skipped,
        failed: report
            .failed
            .iter()
            .map(|(key, error)| FailedEntry { key, error })
            .collect(),
    };
    std::fs::write(paths.report_file(), serde_json::to_vec_pretty(&file)?)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    let paths = match &args.out {
        Some(dir) => AppPaths::at(dir.clone())?,
        None => AppPaths::new()?,
    };
    let store = DirStore::open(paths.artifacts_dir())?;
    info!(
        "Data in {}; artifacts in {}",
        paths.data_dir().display(),
        store.root().display()
    );

    let text = std::fs::read_to_string(&args.plan)?;
    let mut plan: BatchPlan = serde_json::from_str(&text).map_err(BatchError::Plan)?;
    if let Some(n) = args.threads {
        plan.max_parallelism = n;
    }
    info!(
        jobs = plan.jobs.len(),
        threads = plan.max_parallelism,
        "Running batch plan {}",
        args.plan.display()
    );

    let mut runner = BatchRunner::new(&store);
    let report = runner.run_plan(&plan);

    info!(
        ran = report.ran.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Batch finished"
    );
    if let Err(e) = write_report(&paths, &args.plan.display().to_string(), &report) {
        warn!("Could not write report: {e}");
    }
    if !report.is_success() {
        for (key, e) in &report.failed {
            error!("{key}: {e}");
        }
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_plan_and_flags() {
        let args = parse_args(&strings(&["plan.json", "--out", "/tmp/x", "--threads", "3"])).unwrap();
        assert_eq!(args.plan, PathBuf::from("plan.json"));
        assert_eq!(args.out, Some(PathBuf::from("/tmp/x")));
        assert_eq!(args.threads, Some(3));
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(matches!(parse_args(&[]), Err(BatchError::Usage(_))));
        assert!(matches!(
            parse_args(&strings(&["a.json", "b.json"])),
            Err(BatchError::Usage(_))
        ));
        assert!(matches!(
            parse_args(&strings(&["a.json", "--threads", "many"])),
            Err(BatchError::Usage(_))
        ));
        assert!(matches!(
            parse_args(&strings(&["a.json", "--verbose"])),
            Err(BatchError::Usage(_))
        ));
    }

    #[test]
    fn app_paths_at_explicit_dir() {
        let dir = std::env::temp_dir().join(format!("motif-batch-paths-{}", std::process::id()));
        let paths = AppPaths::at(dir.clone()).unwrap();
        assert_eq!(paths.data_dir(), &dir);
        assert!(dir.is_dir());
        assert_eq!(paths.artifacts_dir(), dir.join("artifacts"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
