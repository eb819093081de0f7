//! Bounded-concurrency batch runs.
//!
//! Every seed handed to [`ScrapeOrchestrator::run`] ends up either in the
//! successes or in the failures of the returned [`BatchReport`], including
//! seeds that never started because the batch was cancelled and workers
//! that panicked.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use ticker_common::logging::generate_run_id;
use ticker_common::run_span;

use crate::error::ScrapeError;
use crate::model::ScrapedSecurity;
use crate::report::{Failure, FailureReport};
use crate::seeds::Seed;
use crate::store::SecurityStore;
use crate::worker::Scraper;

/// Outcome of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub run_id: String,
    pub successes: Vec<ScrapedSecurity>,
    pub failures: Vec<Failure>,
    /// Successes the store rejected
    pub store_errors: usize,
    pub elapsed: Duration,
    pub report_path: Option<PathBuf>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

type TaskOutput = (String, Result<ScrapedSecurity, ScrapeError>);

/// Runs seeds through a [`Scraper`] with at most `concurrency` in flight.
pub struct ScrapeOrchestrator {
    scraper: Arc<dyn Scraper>,
    store: Option<Arc<dyn SecurityStore>>,
    report_dir: Option<PathBuf>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl ScrapeOrchestrator {
    pub fn new(scraper: Arc<dyn Scraper>, concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            scraper,
            store: None,
            report_dir: None,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SecurityStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Write a failure report per batch under `dir`.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, seeds: Vec<String>) -> BatchReport {
        let run_id = generate_run_id();
        let span = run_span!(run_id, seeds.len());
        self.run_inner(run_id, seeds).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, seeds: Vec<String>) -> BatchReport {
        let started = Instant::now();
        let total = seeds.len();
        info!(seeds = total, concurrency = self.concurrency, "Starting scrape batch");

        let report = self.report_dir.as_deref().and_then(|dir| match FailureReport::create(dir) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failure report unavailable");
                None
            }
        });
        let mut batch = Batch {
            report: BatchReport {
                run_id,
                report_path: report.as_ref().map(|r| r.path().to_path_buf()),
                ..Default::default()
            },
            file: report,
            store: self.store.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut pending = seeds.into_iter();

        while let Some(raw) = pending.next() {
            let seed = match Seed::parse(&raw) {
                Ok(seed) => seed,
                Err(e) => {
                    batch.fail(&raw, &ScrapeError::InvalidSeed(e.to_string()));
                    continue;
                }
            };

            // Wait for a free slot, handling finished tasks meanwhile.
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break None,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        batch.finish(joined).await;
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => break permit.ok(),
                }
            };
            let Some(permit) = permit else {
                let skipped = 1 + pending.len();
                warn!(skipped, "Batch cancelled, remaining seeds not started");
                batch.fail(&raw, &ScrapeError::Cancelled);
                for raw in pending.by_ref() {
                    batch.fail(&raw, &ScrapeError::Cancelled);
                }
                break;
            };

            let scraper = Arc::clone(&self.scraper);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(scraper.scrape(&seed)).catch_unwind().await;
                let result = outcome.unwrap_or_else(|payload| Err(ScrapeError::Crashed(panic_message(&*payload))));
                (raw, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            batch.finish(joined).await;
        }

        let mut report = batch.report;
        report.elapsed = started.elapsed();
        info!(
            total,
            successes = report.successes.len(),
            failures = report.failures.len(),
            store_errors = report.store_errors,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Scrape batch finished"
        );
        report
    }
}

/// Accumulates outcomes of one run.
struct Batch {
    report: BatchReport,
    file: Option<FailureReport>,
    store: Option<Arc<dyn SecurityStore>>,
}

impl Batch {
    fn write(&self, failure: &Failure) {
        if let Some(file) = &self.file {
            if let Err(e) = file.record(failure) {
                warn!(error = %e, "Failed to write failure report line");
            }
        }
    }

    fn fail(&mut self, seed: &str, err: &ScrapeError) {
        let failure = Failure::new(seed, err);
        match err {
            ScrapeError::Crashed(_) => error!(seed, stage = ?failure.stage, error = %err, "Worker crashed"),
            ScrapeError::Cancelled => {}
            _ => warn!(seed, stage = ?failure.stage, error = %err, "Scrape failed"),
        }
        self.write(&failure);
        self.report.failures.push(failure);
    }

    async fn finish(&mut self, joined: Result<TaskOutput, JoinError>) {
        let (seed, result) = match joined {
            Ok(output) => output,
            // Panics are caught inside the task; this is an aborted task.
            Err(e) => {
                self.fail("<unknown>", &ScrapeError::Crashed(e.to_string()));
                return;
            }
        };

        let scraped = match result {
            Ok(scraped) => scraped,
            Err(e) => {
                self.fail(&seed, &e);
                return;
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.store(&scraped).await {
                self.report.store_errors += 1;
                error!(seed = %seed, error = %e, "Failed to store security");
                self.write(&Failure::store(&seed, e.to_string()));
            }
        }
        self.report.successes.push(scraped);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
