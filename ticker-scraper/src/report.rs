//! Per-run failure report.
//!
//! One `ScrapingReport-<unix seconds>.log` file per batch, one JSON object
//! per line. Files older than the retention window are removed by
//! [`cleanup_reports`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use ticker_common::util::truncate_with_ellipsis;

use crate::error::ScrapeError;

const REPORT_PREFIX: &str = "ScrapingReport-";
const REPORT_EXTENSION: &str = ".log";
/// CDP errors can carry whole scripts
const MAX_REASON_CHARS: usize = 500;

/// Where in the pipeline a ticker failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Never started: bad seed or cancelled batch
    Scheduling,
    Resolve,
    Browser,
    Navigation,
    Extraction,
    Store,
    Crash,
}

impl From<&ScrapeError> for FailureStage {
    fn from(err: &ScrapeError) -> Self {
        match err {
            ScrapeError::InvalidSeed(_) | ScrapeError::Cancelled => Self::Scheduling,
            ScrapeError::ExchangeNotFound(_) => Self::Resolve,
            ScrapeError::Browser(e) => match e {
                ticker_browser::BrowserError::NavigationFailed { .. }
                | ticker_browser::BrowserError::NavigationTimeout { .. } => Self::Navigation,
                ticker_browser::BrowserError::ElementNotFound { .. } => Self::Extraction,
                _ => Self::Browser,
            },
            ScrapeError::CurrencyMismatch { .. }
            | ScrapeError::MissingField(_)
            | ScrapeError::InvalidField { .. }
            | ScrapeError::InvertedRange { .. }
            | ScrapeError::UnknownTypology(_) => Self::Extraction,
            ScrapeError::Crashed(_) => Self::Crash,
        }
    }
}

/// One failed ticker.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub seed: String,
    pub stage: FailureStage,
    pub reason: String,
    pub severity: &'static str,
}

impl Failure {
    pub fn new(seed: impl Into<String>, err: &ScrapeError) -> Self {
        Self {
            seed: seed.into(),
            stage: FailureStage::from(err),
            reason: truncate_with_ellipsis(&err.to_string(), MAX_REASON_CHARS),
            severity: err.severity(),
        }
    }

    /// A result that could not be persisted. Not counted as a failed ticker.
    pub fn store(seed: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self {
            seed: seed.into(),
            stage: FailureStage::Store,
            reason: truncate_with_ellipsis(&reason, MAX_REASON_CHARS),
            severity: "ERROR",
        }
    }
}

#[derive(Serialize)]
struct ReportLine<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    failure: &'a Failure,
}

/// Append-only report file for one batch.
pub struct FailureReport {
    path: PathBuf,
    file: Mutex<File>,
}

impl FailureReport {
    /// Create `<dir>/ScrapingReport-<unix seconds>.log`.
    pub fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = dir.join(format!("{REPORT_PREFIX}{stamp}{REPORT_EXTENSION}"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        debug!(path = %path.display(), "Opened failure report");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, failure: &Failure) -> io::Result<()> {
        let line = ReportLine {
            timestamp: Utc::now(),
            failure,
        };
        let mut json = serde_json::to_string(&line).map_err(io::Error::other)?;
        json.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(json.as_bytes())?;
        file.flush()
    }
}

/// Unix timestamp embedded in a report file name.
fn report_stamp(name: &str) -> Option<u64> {
    name.strip_prefix(REPORT_PREFIX)?
        .strip_suffix(REPORT_EXTENSION)?
        .parse()
        .ok()
}

/// Remove report files created more than `retention` before `now`.
///
/// Other files in the directory are left alone. Returns how many were removed.
pub fn cleanup_reports(dir: &Path, retention: Duration, now: SystemTime) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = now
        .checked_sub(retention)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(stamp) = name.to_str().and_then(report_stamp) else {
            continue;
        };
        if stamp >= cutoff {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove report"),
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "Removed expired failure reports");
    }
    Ok(removed)
}
