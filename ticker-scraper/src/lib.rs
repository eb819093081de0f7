//! Ticker Scraper Library
//!
//! Collects market data for listed securities by driving a pool of headless
//! browsers over public quote pages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   seeds   ┌───────────────────┐  permits  ┌──────────────┐
//! │  SeedSource  │ ────────► │ ScrapeOrchestrator│ ────────► │ ScrapeWorker │
//! └──────────────┘           └───────────────────┘           └──────┬───────┘
//!        ▲                        │          │                      │ lease
//!        │ holdings               │ store    │ failures             ▼
//! ┌──────────────┐           ┌─────────┐  ┌────────┐         ┌─────────────┐
//! │  Discoverer  │           │  SQLite │  │ report │         │ BrowserPool │
//! └──────────────┘           └─────────┘  └────────┘         └─────────────┘
//! ```
//!
//! # Values
//!
//! Prices, percentages and ratios are stored as integers ×100; volumes, market
//! caps and share counts as whole units. See [`normalize`].

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod discoverer;
pub mod enrichment;
pub mod error;
pub mod exchange;
pub mod extractor;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod schedule;
pub mod seeds;
pub mod selectors;
pub mod store;
pub mod worker;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ticker_browser::{start_monitors, BrowserPool, ChromiumLauncher};
use ticker_common::Config;

pub use discoverer::Discoverer;
pub use error::{NormalizeError, ScrapeError, SeedError, StoreError};
pub use model::{ScrapedSecurity, Security, Typology};
pub use orchestrator::{BatchReport, ScrapeOrchestrator};
pub use schedule::{ScrapeScheduler, SchedulerSettings};
pub use seeds::{Seed, SeedSource};
pub use store::{MemoryStore, SecurityStore, SqliteStore};
pub use worker::{ScrapeWorker, Scraper};

/// Wires configuration, browser pool, store and scheduler together.
pub struct ScraperService {
    config: Config,
    cancel: CancellationToken,
}

impl ScraperService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the scheduler and any running batch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled, then shut the browser pool down.
    pub async fn start(self) -> Result<()> {
        let config = &self.config;
        let paths = &config.paths;

        let store: Arc<dyn SecurityStore> = Arc::new(
            SqliteStore::open(&paths.database)
                .with_context(|| format!("Failed to open database {}", paths.database.display()))?,
        );
        let discoverer = Arc::new(
            Discoverer::open(&paths.discovered_ledger).with_context(|| {
                format!("Failed to open discovery ledger {}", paths.discovered_ledger.display())
            })?,
        );

        let launcher = Arc::new(ChromiumLauncher::new(config.browser.clone()));
        let pool = BrowserPool::new(launcher, config.pool.clone())
            .await
            .context("Failed to launch browser pool")?;
        start_monitors(&pool);

        let worker = ScrapeWorker::new(pool.clone(), Some(Arc::clone(&discoverer)), config.scraper.clone());
        let orchestrator = Arc::new(
            ScrapeOrchestrator::new(Arc::new(worker), config.scraper.concurrency, self.cancel.clone())
                .with_store(Arc::clone(&store))
                .with_report_dir(&paths.report_dir),
        );

        let settings = SchedulerSettings {
            schedule: config.schedule.clone(),
            batch_load: config.scraper.batch_load(config.environment),
            report_dir: paths.report_dir.clone(),
            report_retention: config.schedule.report_retention(config.environment),
        };
        let seeds = SeedSource::new(&paths.seed_dir, config.scraper.max_symbol_len);
        let scheduler = ScrapeScheduler::new(settings, orchestrator, store, seeds)?;

        for (job, at) in scheduler.next_runs() {
            info!(job = %job, next_run = %at, "Scheduled job");
        }

        let result = scheduler.run().await;

        pool.shutdown().await;
        drop(scheduler);
        match Arc::try_unwrap(discoverer) {
            Ok(discoverer) => match discoverer.close() {
                Ok(found) => info!(discovered = found, "Discovery ledger closed"),
                Err(e) => error!(error = %e, "Failed to close discovery ledger"),
            },
            Err(_) => warn!("Discovery ledger still shared at shutdown"),
        }

        result
    }
}
