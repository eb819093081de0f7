//! Scraping of a single ticker on a borrowed browser session.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ticker_browser::browser::goto_within;
use ticker_browser::{stealth, BrowserPool, PageHandle};
use ticker_common::ScraperConfig;

use crate::discoverer::Discoverer;
use crate::enrichment::{scrape_dividend_history, scrape_marketbeat, DividendHistory, MarketBeatProfile};
use crate::error::ScrapeError;
use crate::exchange::{self, Exchange};
use crate::extractor::{apply_profile, extract_dividend, extract_etf, extract_security, FieldExtractor};
use crate::model::{Extension, Holding, ReitExtension, ScrapedSecurity, Typology};
use crate::seeds::Seed;
use crate::selectors;

/// Turns one seed into one result.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, seed: &Seed) -> Result<ScrapedSecurity, ScrapeError>;
}

/// A page plus the mouse-movement task attached to it.
///
/// Dropping it without [`OpenPage::close`] (a panicking worker) still stops
/// the task and closes the tab in the background.
struct OpenPage {
    page: Arc<dyn PageHandle>,
    behavior: Option<(CancellationToken, JoinHandle<()>)>,
    closed: bool,
}

impl OpenPage {
    fn handle(&self) -> &dyn PageHandle {
        self.page.as_ref()
    }

    async fn close(mut self) {
        self.closed = true;
        if let Some((token, handle)) = self.behavior.take() {
            token.cancel();
            let _ = handle.await;
        }
        if let Err(e) = self.page.close().await {
            debug!(error = %e, "Page close failed");
        }
    }
}

impl Drop for OpenPage {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some((token, _)) = self.behavior.take() {
            token.cancel();
        }
        let page = Arc::clone(&self.page);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

/// Scrapes tickers on pages of a shared [`BrowserPool`].
pub struct ScrapeWorker {
    pool: BrowserPool,
    discoverer: Option<Arc<Discoverer>>,
    config: ScraperConfig,
}

impl ScrapeWorker {
    pub fn new(pool: BrowserPool, discoverer: Option<Arc<Discoverer>>, config: ScraperConfig) -> Self {
        Self {
            pool,
            discoverer,
            config,
        }
    }

    async fn open_page(&self, session: &dyn ticker_browser::BrowserSession) -> Result<OpenPage, ScrapeError> {
        let page = session.new_page().await?;
        stealth::apply_fingerprint_evasion(page.as_ref()).await;

        let behavior = self.config.human_behavior.then(|| {
            let token = self.pool.cancellation_token();
            let handle = stealth::spawn_human_behavior(Arc::clone(&page), token.clone());
            (token, handle)
        });

        Ok(OpenPage {
            page,
            behavior,
            closed: false,
        })
    }

    /// Exchange from the seed, or from the label on the bare quote page.
    ///
    /// Returns the URL the page was left on when it had to navigate.
    async fn resolve_exchange(
        &self,
        page: &dyn PageHandle,
        seed: &Seed,
    ) -> Result<(&'static Exchange, Option<String>), ScrapeError> {
        if let Some(exchange) = seed.exchange {
            return Ok((exchange, None));
        }

        let url = selectors::quote_url(&seed.ticker, None);
        goto_within(page, &url, self.config.navigation_timeout()).await?;
        stealth::disable_webrtc(page).await;

        let seed_label = seed.to_string();
        let fx = FieldExtractor::new(page, self.config.element_timeout(), &seed_label);
        let label = fx.text("exchange", selectors::EXCHANGE_LABEL).await?;
        let exchange = label
            .as_deref()
            .and_then(exchange::by_page_label)
            .ok_or_else(|| ScrapeError::ExchangeNotFound(seed.ticker.clone()))?;

        debug!(seed = %seed_label, exchange = exchange.title, "Resolved exchange from quote page");
        Ok((exchange, Some(url)))
    }

    async fn scrape_page(&self, page: &dyn PageHandle, seed: &Seed) -> Result<ScrapedSecurity, ScrapeError> {
        let (exchange, mut current_url) = self.resolve_exchange(page, seed).await?;
        let resolved = Seed {
            ticker: seed.ticker.clone(),
            exchange: Some(exchange),
        };
        let label = resolved.to_string();

        let (profile, history) = if self.config.enrich {
            current_url = None;
            self.enrich(page, &resolved, &label).await
        } else {
            (MarketBeatProfile::default(), DividendHistory::default())
        };

        let url = selectors::quote_url(&resolved.ticker, Some(exchange));
        if current_url.as_deref() != Some(url.as_str()) {
            goto_within(page, &url, self.config.navigation_timeout()).await?;
            stealth::disable_webrtc(page).await;
        }

        let fx = FieldExtractor::new(page, self.config.element_timeout(), &label);
        let mut security = extract_security(&fx, &resolved.ticker, exchange).await?;
        apply_profile(&mut security, profile);
        let dividend = extract_dividend(&fx, &security, &history).await;

        let extension = match security.typology {
            Typology::Etf => {
                let etf = extract_etf(&fx).await;
                self.record_holdings(&etf.holdings, &label);
                Some(Extension::Etf(etf))
            }
            Typology::Reit => Some(Extension::Reit(ReitExtension::default())),
            Typology::Stock => None,
        };

        Ok(ScrapedSecurity {
            security,
            dividend,
            extension,
        })
    }

    async fn enrich(&self, page: &dyn PageHandle, seed: &Seed, label: &str) -> (MarketBeatProfile, DividendHistory) {
        let Some(exchange) = seed.exchange else {
            return Default::default();
        };
        let profile = scrape_marketbeat(
            page,
            &selectors::marketbeat_url(&seed.ticker, exchange),
            self.config.navigation_timeout(),
            self.config.element_timeout(),
            label,
        )
        .await;
        let history = scrape_dividend_history(
            page,
            &selectors::dividend_history_url(&seed.ticker, exchange),
            self.config.navigation_timeout(),
            self.config.element_timeout(),
            label,
            Utc::now().date_naive(),
        )
        .await;
        (profile, history)
    }

    /// Feed holdings to the discovery ledger.
    fn record_holdings(&self, holdings: &[Holding], label: &str) {
        let Some(discoverer) = &self.discoverer else {
            return;
        };
        let mut added = 0;
        for holding in holdings {
            let symbol = holding_symbol(holding);
            match discoverer.collect(&symbol) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!(seed = label, holding = %symbol, error = %e, "Failed to record holding"),
            }
        }
        if added > 0 {
            debug!(seed = label, added, "Discovered tickers from holdings");
        }
    }
}

/// Ledger symbol for a holding: `TICKER.SUFFIX` where the venue has one.
fn holding_symbol(holding: &Holding) -> String {
    let suffix = holding
        .exchange
        .as_deref()
        .and_then(exchange::by_title)
        .and_then(|e| e.suffix);
    match suffix {
        Some(suffix) => format!("{}.{suffix}", holding.ticker),
        None => holding.ticker.clone(),
    }
}

#[async_trait]
impl Scraper for ScrapeWorker {
    async fn scrape(&self, seed: &Seed) -> Result<ScrapedSecurity, ScrapeError> {
        let lease = self.pool.acquire()?;
        let page = match self.open_page(&*lease).await {
            Ok(page) => page,
            Err(e) => {
                lease.release().await;
                return Err(e);
            }
        };

        let result = self.scrape_page(page.handle(), seed).await;

        page.close().await;
        lease.release().await;

        if let Ok(scraped) = &result {
            info!(
                seed = %seed,
                ticker = %scraped.security.ticker,
                exchange = %scraped.security.exchange,
                typology = %scraped.security.typology,
                price = scraped.security.price,
                "Scraped security"
            );
        }
        result
    }
}
