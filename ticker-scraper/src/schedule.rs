//! Cron-driven batch scheduling.
//!
//! # Jobs
//!
//! - one re-scrape per distinct exchange close time (`0 MM HH * * *`, UTC),
//!   covering every ticker the store holds for the venues closing then
//! - a daily discovery batch drawn from the seed files
//! - a daily cleanup of expired failure reports
//!
//! When the store is empty at startup a discovery batch runs immediately.
//!
//! ```json
//! {
//!   "schedule": {
//!     "enabled": true,
//!     "discovery_cron": "0 0 9 * * *",
//!     "cleanup_cron": "0 0 0 * * *",
//!     "report_retention_days": 7
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use cron::Schedule;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ticker_common::ScheduleConfig;

use crate::exchange::{self, Exchange};
use crate::orchestrator::{BatchReport, ScrapeOrchestrator};
use crate::report::cleanup_reports;
use crate::seeds::SeedSource;
use crate::store::SecurityStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Scheduled job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduledJob {
    /// Re-scrape venues closing at this UTC time
    Close { hour: u32, minute: u32 },
    Discovery,
    Cleanup,
}

impl fmt::Display for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close { hour, minute } => write!(f, "close_{hour:02}{minute:02}"),
            Self::Discovery => f.write_str("discovery"),
            Self::Cleanup => f.write_str("cleanup"),
        }
    }
}

struct ParsedSchedule {
    job: ScheduledJob,
    schedule: Schedule,
    /// Exchange titles re-scraped by a close job
    exchanges: Vec<&'static str>,
}

/// Venues grouped by close time, earliest first.
pub fn close_groups(exchanges: &'static [Exchange]) -> BTreeMap<NaiveTime, Vec<&'static str>> {
    let mut groups: BTreeMap<NaiveTime, Vec<&'static str>> = BTreeMap::new();
    for exchange in exchanges {
        groups.entry(exchange.close_time()).or_default().push(exchange.title);
    }
    groups
}

/// Daily six-field cron expression firing at `time`.
pub fn close_cron(time: NaiveTime) -> String {
    format!("0 {} {} * * *", time.minute(), time.hour())
}

/// Whether `schedule` has a slot in the last minute not yet covered by `last`.
pub fn is_due(schedule: &Schedule, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let after = last.unwrap_or_else(|| now - chrono::Duration::hours(1));

    for scheduled in schedule.after(&after).take(10) {
        if scheduled > now {
            break;
        }
        if now.signed_duration_since(scheduled) >= chrono::Duration::seconds(60) {
            continue;
        }
        if last.is_some_and(|last| last >= scheduled) {
            continue;
        }
        return true;
    }
    false
}

fn parse_cron(expr: &str, what: &str) -> Result<Schedule> {
    Schedule::from_str(expr).with_context(|| format!("Invalid {what} cron: {expr}"))
}

/// Batch sizes and locations the scheduler needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub schedule: ScheduleConfig,
    pub batch_load: usize,
    pub report_dir: PathBuf,
    pub report_retention: Duration,
}

pub struct ScrapeScheduler {
    settings: SchedulerSettings,
    orchestrator: Arc<ScrapeOrchestrator>,
    store: Arc<dyn SecurityStore>,
    seeds: SeedSource,
    schedules: Vec<ParsedSchedule>,
    last_executions: RwLock<HashMap<ScheduledJob, DateTime<Utc>>>,
    failure_counts: RwLock<HashMap<ScheduledJob, u32>>,
    max_retries: u32,
    alert_threshold: u32,
    cancel: CancellationToken,
}

impl ScrapeScheduler {
    pub fn new(
        settings: SchedulerSettings,
        orchestrator: Arc<ScrapeOrchestrator>,
        store: Arc<dyn SecurityStore>,
        seeds: SeedSource,
    ) -> Result<Self> {
        let mut schedules = Vec::new();

        if settings.schedule.enabled {
            for (time, exchanges) in close_groups(exchange::all()) {
                let expr = close_cron(time);
                schedules.push(ParsedSchedule {
                    job: ScheduledJob::Close {
                        hour: time.hour(),
                        minute: time.minute(),
                    },
                    schedule: parse_cron(&expr, "close")?,
                    exchanges,
                });
            }
            schedules.push(ParsedSchedule {
                job: ScheduledJob::Discovery,
                schedule: parse_cron(&settings.schedule.discovery_cron, "discovery")?,
                exchanges: Vec::new(),
            });
            schedules.push(ParsedSchedule {
                job: ScheduledJob::Cleanup,
                schedule: parse_cron(&settings.schedule.cleanup_cron, "cleanup")?,
                exchanges: Vec::new(),
            });

            info!(
                jobs = schedules.len(),
                discovery = %settings.schedule.discovery_cron,
                cleanup = %settings.schedule.cleanup_cron,
                "Scheduler configured"
            );
        }

        let cancel = orchestrator.cancellation_token();
        Ok(Self {
            settings,
            orchestrator,
            store,
            seeds,
            schedules,
            last_executions: RwLock::new(HashMap::new()),
            failure_counts: RwLock::new(HashMap::new()),
            max_retries: 3,
            alert_threshold: 5,
            cancel,
        })
    }

    /// Run until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        if let Err(e) = self.startup_batch().await {
            error!(error = %e, "Startup batch failed");
        }

        if !self.settings.schedule.enabled {
            info!("Scheduler disabled, not starting");
            return Ok(());
        }
        info!("Scheduler started");

        let mut check_interval = interval(CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Scheduler stopped");
                    break;
                }
                _ = check_interval.tick() => {}
            }

            let now = Utc::now();
            for parsed in &self.schedules {
                if self.cancel.is_cancelled() {
                    break;
                }
                let last = self.last_executions.read().await.get(&parsed.job).copied();
                if is_due(&parsed.schedule, last, now) {
                    self.execute(parsed).await;
                }
            }
        }
        Ok(())
    }

    /// Discovery batch when nothing has been stored yet.
    pub async fn startup_batch(&self) -> Result<Option<BatchReport>> {
        let count = self.store.count().await.context("Failed to count stored securities")?;
        if count > 0 {
            debug!(stored = count, "Store populated, skipping startup batch");
            return Ok(None);
        }

        info!(load = self.settings.batch_load, "Empty store, running startup batch");
        self.discovery().await.map(Some)
    }

    async fn discovery(&self) -> Result<BatchReport> {
        let seeds = self
            .seeds
            .batch(self.settings.batch_load, None)
            .context("Failed to read seed files")?;
        Ok(self.orchestrator.run(seeds).await)
    }

    async fn close(&self, exchanges: &[&'static str]) -> Result<BatchReport> {
        let seeds = self
            .store
            .seeds_for_exchanges(exchanges)
            .await
            .context("Failed to list stored tickers")?;
        if seeds.is_empty() {
            debug!(?exchanges, "No stored tickers for closing exchanges");
        }
        Ok(self.orchestrator.run(seeds).await)
    }

    fn cleanup(&self) -> Result<()> {
        let dir = &self.settings.report_dir;
        cleanup_reports(dir, self.settings.report_retention, SystemTime::now())
            .with_context(|| format!("Failed to clean reports in {}", dir.display()))?;
        Ok(())
    }

    /// Run one job, retrying its preparation with exponential backoff.
    async fn execute(&self, parsed: &ParsedSchedule) {
        let job = parsed.job;
        info!(job = %job, "Executing scheduled job");
        self.last_executions.write().await.insert(job, Utc::now());

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            let result = match job {
                ScheduledJob::Close { .. } => self.close(&parsed.exchanges).await.map(|_| ()),
                ScheduledJob::Discovery => self.discovery().await.map(|_| ()),
                ScheduledJob::Cleanup => self.cleanup(),
            };

            match result {
                Ok(()) => {
                    self.failure_counts.write().await.insert(job, 0);
                    return;
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let backoff_ms = 1000 * (1u64 << (attempt - 1));
                        debug!(job = %job, attempt, backoff_ms, "Job failed, retrying");
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                        }
                    }
                }
            }
        }

        if let Some(e) = last_error {
            error!(job = %job, error = %e, max_retries = self.max_retries, "Job failed after all retries");
            self.track_failure(job).await;
        }
    }

    async fn track_failure(&self, job: ScheduledJob) {
        let failure_count = {
            let mut failures = self.failure_counts.write().await;
            let count = failures.entry(job).or_insert(0);
            *count += 1;
            *count
        };

        if failure_count >= self.alert_threshold {
            warn!(
                job = %job,
                failure_count,
                threshold = self.alert_threshold,
                "Job keeps failing"
            );
            self.failure_counts.write().await.insert(job, 0);
        }
    }

    /// Next fire time of every job.
    pub fn next_runs(&self) -> Vec<(ScheduledJob, DateTime<Utc>)> {
        let mut runs: Vec<_> = self
            .schedules
            .iter()
            .filter_map(|p| p.schedule.upcoming(Utc).next().map(|t| (p.job, t)))
            .collect();
        runs.sort_by_key(|(_, t)| *t);
        runs
    }
}
