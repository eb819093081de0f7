//! Ticker Scraper - scheduled market data collection over a headless browser pool.

use anyhow::Result;
use ticker_common::logging::init_from_config;
use ticker_common::Config;
use ticker_scraper::ScraperService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    let config = Config::load_and_validate()?;
    init_from_config(&config.observability);

    tracing::info!(
        environment = ?config.environment,
        "Ticker Scraper v{}",
        env!("CARGO_PKG_VERSION")
    );

    let service = ScraperService::new(config);

    let cancel = service.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            cancel.cancel();
        }
    });

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
