//! End-to-end batches over an in-memory browser.
//!
//! The stub site maps URLs to `selector -> texts` tables, so every scrape
//! path (stock, ETF, enrichment, exchange lookup, hard failures) runs
//! without Chrome.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use ticker_browser::{BrowserError, BrowserPool, BrowserSession, PageHandle, SessionLauncher};
use ticker_common::{PoolConfig, ScraperConfig};
use ticker_scraper::model::{Extension, Frequency, Timing};
use ticker_scraper::report::FailureStage;
use ticker_scraper::selectors::*;
use ticker_scraper::{
    BatchReport, Discoverer, ScrapeOrchestrator, ScrapeWorker, SecurityStore, SqliteStore, Typology,
};

type Page = HashMap<&'static str, Vec<String>>;

#[derive(Default)]
struct Site {
    pages: HashMap<String, Page>,
    /// Page operations in call order, across every tab.
    calls: Mutex<Vec<String>>,
}

impl Site {
    fn page(mut self, url: &str, fields: &[(&'static str, &[&str])]) -> Self {
        let page = fields
            .iter()
            .map(|(selector, texts)| (*selector, texts.iter().map(|t| t.to_string()).collect()))
            .collect();
        self.pages.insert(url.to_string(), page);
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct StubPage {
    site: Arc<Site>,
    current: Mutex<Option<String>>,
}

impl StubPage {
    fn lookup(&self, selector: &str) -> Vec<String> {
        let current = self.current.lock().unwrap();
        current
            .as_ref()
            .and_then(|url| self.site.pages.get(url))
            .and_then(|page| page.get(selector))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageHandle for StubPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.site.record(format!("goto {url}"));
        if !self.site.pages.contains_key(url) {
            return Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: "404".to_string(),
            });
        }
        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn find_text(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        Ok(self.lookup(selector).into_iter().next())
    }

    async fn find_texts(&self, selector: &str) -> Result<Vec<String>, BrowserError> {
        Ok(self.lookup(selector))
    }

    async fn evaluate(&self, _script: &str) -> Result<(), BrowserError> {
        self.site.record("evaluate".to_string());
        Ok(())
    }

    async fn evaluate_on_new_document(&self, _script: &str) -> Result<(), BrowserError> {
        self.site.record("new document script".to_string());
        Ok(())
    }

    async fn set_user_agent(&self, _user_agent: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn move_mouse(&self, _x: f64, _y: f64) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

struct StubSession {
    site: Arc<Site>,
}

#[async_trait]
impl BrowserSession for StubSession {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>, BrowserError> {
        Ok(Arc::new(StubPage {
            site: Arc::clone(&self.site),
            current: Mutex::new(None),
        }))
    }

    async fn probe(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

struct StubLauncher {
    site: Arc<Site>,
}

#[async_trait]
impl SessionLauncher for StubLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        Ok(Arc::new(StubSession {
            site: Arc::clone(&self.site),
        }))
    }
}

fn quote(symbol: &str) -> String {
    format!("{YAHOO_QUOTE_URL}{symbol}")
}

type Fields = Vec<(&'static str, &'static [&'static str])>;

/// Required and optional quote fields shared by every stub quote page.
fn quote_fields(currency: &'static [&'static str], name: &'static [&'static str]) -> Fields {
    let fields: &[(&'static str, &'static [&'static str])] = &[
        (CURRENCY, currency),
        (FULL_NAME, name),
        (PRICE, &["150.25"]),
        (PRICE_CHANGE, &["-1.20"]),
        (PRICE_CHANGE_PCT, &["(-0.79%)"]),
        (YEAR_RANGE, &["123.40 - 199.62"]),
        (DAY_RANGE, &["149.00 - 151.00"]),
        (PREVIOUS_CLOSE, &["151.45"]),
        (OPEN, &["150.00"]),
        (BID, &["150.20 x 100"]),
        (ASK, &["150.30 x 200"]),
        (MARKET_CAP, &["2.3T"]),
        (VOLUME, &["55.2M"]),
        (AVG_VOLUME, &["60.1M"]),
        (BETA, &["1.24"]),
        (TRAILING_PE, &["29.50", "6.09"]),
    ];
    fields.to_vec()
}

/// Later entries win, so `extra` can also replace a shared field.
fn with(mut fields: Fields, extra: &[(&'static str, &'static [&'static str])]) -> Fields {
    fields.extend_from_slice(extra);
    fields
}

fn without(mut fields: Fields, selector: &str) -> Fields {
    fields.retain(|(s, _)| *s != selector);
    fields
}

const USD: &[&str] = &["Currency in USD"];
const EUR: &[&str] = &["Currency in EUR"];

fn site() -> Site {
    Site::default()
        .page(
            &quote("AAPL"),
            &with(quote_fields(USD, &["Apple Inc."]), &[(FORWARD_YIELD, &["1.00 (0.64%)"])]),
        )
        .page(
            &quote("SPY"),
            &with(
                quote_fields(USD, &["SPDR S&P 500 ETF Trust"]),
                &[
                    (ETF_YIELD, &["1.25%"]),
                    (NET_ASSETS, &["500.5B"]),
                    (EXPENSE_RATIO, &["0.09%"]),
                    (NAV, &["450.10"]),
                    (FUND_OVERVIEW, &["SPDR State Street Global Advisors", "Large Blend", "--", "1993-01-22"]),
                    (HOLDING_TICKERS, &["NVDA", "MSFT", "RY.TO"]),
                    (HOLDING_ALLOCATIONS, &["7.10%", "6.50%", "0.50%"]),
                ],
            ),
        )
        .page(&quote("SAP"), &quote_fields(EUR, &["SAP SE"]))
        .page(&quote("NONAM"), &quote_fields(USD, &["N/A"]))
        .page(&quote("BLANK"), &quote_fields(USD, &["   "]))
        .page(&quote("NOPX"), &without(quote_fields(USD, &["No Price Corp"]), PRICE))
        .page(
            &quote("ZCLS"),
            &with(quote_fields(USD, &["Zero Close Inc."]), &[(PREVIOUS_CLOSE, &["0.00"])]),
        )
        .page(
            &quote("FLIP"),
            &with(quote_fields(USD, &["Flipped Range Inc."]), &[(DAY_RANGE, &["151.00 - 149.00"])]),
        )
        .page(
            &quote("JUNK"),
            &with(
                quote_fields(USD, &["Junk Stats Inc."]),
                &[(MARKET_CAP, &["abc"]), (BETA, &["--"]), (VOLUME, &["-5.0M"])],
            ),
        )
        .page(
            &quote("XYZ"),
            &with(
                quote_fields(USD, &["Xyz Holdings"]),
                &[(EXCHANGE_LABEL, &["NasdaqGS - Nasdaq Real Time Price"])],
            ),
        )
        .page(&quote("ZZZZ"), &[(EXCHANGE_LABEL, &["Toronto - Delayed Quote"])])
        .page(
            &quote("KO"),
            &with(quote_fields(USD, &["The Coca-Cola Company"]), &[(FORWARD_YIELD, &["1.94 (2.90%)"])]),
        )
        .page(
            &format!("{MARKETBEAT_URL}NYSE/KO"),
            &[
                (MB_KEYS, &["Sector", "Industry", "Consensus Rating", "Research Coverage"]),
                (MB_VALUES, &["Consumer Staples", "Beverages", "Buy", "18 Analysts"]),
            ],
        )
        .page(
            &format!("{DIVIDEND_HISTORY_URL}KO"),
            &[
                (DH_PARAGRAPHS, &["Payout Ratio: 72.5%", "Frequency: Quarterly"]),
                (
                    DH_ROWS,
                    &[
                        "Ex-Dividend Date\tPayout Date\tCash Amount",
                        "2020-03-13\t2020-04-01\t0.41",
                        "2019-11-29\t2019-12-16\t0.40",
                    ],
                ),
            ],
        )
}

fn scraper_config(enrich: bool) -> ScraperConfig {
    ScraperConfig {
        concurrency: 2,
        element_timeout_secs: 0,
        navigation_timeout_secs: 1,
        human_behavior: false,
        enrich,
        ..Default::default()
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<SqliteStore>,
    discoverer: Arc<Discoverer>,
    pool: BrowserPool,
    orchestrator: ScrapeOrchestrator,
}

async fn harness(enrich: bool) -> Harness {
    let dir = tempdir().unwrap();
    let launcher = Arc::new(StubLauncher {
        site: Arc::new(site()),
    });
    let pool = BrowserPool::new(launcher, PoolConfig::default()).await.unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("securities.db")).unwrap());
    let discoverer = Arc::new(Discoverer::open(dir.path().join("seeds/discovered.csv")).unwrap());

    let worker = ScrapeWorker::new(pool.clone(), Some(Arc::clone(&discoverer)), scraper_config(enrich));
    let orchestrator = ScrapeOrchestrator::new(Arc::new(worker), 2, CancellationToken::new())
        .with_store(store.clone())
        .with_report_dir(dir.path().join("reports"));

    Harness {
        _dir: dir,
        store,
        discoverer,
        pool,
        orchestrator,
    }
}

async fn run(harness: &Harness, seeds: &[&str]) -> BatchReport {
    harness
        .orchestrator
        .run(seeds.iter().map(|s| s.to_string()).collect())
        .await
}

#[tokio::test]
async fn test_stock_scrape_stores_scaled_values() {
    let h = harness(false).await;
    let report = run(&h, &["NYSE:AAPL"]).await;

    assert_eq!(report.successes.len(), 1);
    assert!(report.failures.is_empty());

    let scraped = &report.successes[0];
    let security = &scraped.security;
    assert_eq!(security.typology, Typology::Stock);
    assert_eq!(security.exchange, "NYSE");
    assert_eq!(security.price, 15_025);
    assert_eq!(security.price_change, -120);
    assert_eq!(security.price_change_pct, -79);
    assert_eq!((security.year_low, security.year_high), (12_340, 19_962));
    assert_eq!((security.bid, security.bid_size), (15_020, Some(100)));
    assert_eq!(security.market_cap, Some(2_300_000_000_000));
    assert_eq!(security.volume, Some(55_200_000));
    assert_eq!(security.pe, Some(2_950));
    assert_eq!(security.eps, Some(609));

    let dividend = scraped.dividend.as_ref().unwrap();
    assert_eq!(dividend.yield_pct, 64);
    assert_eq!(dividend.timing, Timing::Fwd);
    assert_eq!(dividend.annual_payout, Some(96));

    let stored = h.store.security("AAPL", "NYSE").await.unwrap().unwrap();
    assert_eq!(stored.price, 15_025);
    assert_eq!(h.store.dividend_yield("AAPL", "NYSE").await.unwrap(), Some(64));
    assert_eq!(h.pool.stats().active_borrowers, 0);
}

#[tokio::test]
async fn test_trust_takes_etf_path_and_feeds_discovery() {
    let h = harness(false).await;
    let report = run(&h, &["NYSE:SPY"]).await;

    assert_eq!(report.successes.len(), 1);
    let scraped = &report.successes[0];
    assert_eq!(scraped.security.typology, Typology::Etf);

    let dividend = scraped.dividend.as_ref().unwrap();
    assert_eq!((dividend.yield_pct, dividend.timing), (125, Timing::Ttm));

    let Some(Extension::Etf(etf)) = &scraped.extension else {
        panic!("expected ETF extension");
    };
    assert_eq!(etf.aum, Some(500_500_000_000));
    assert_eq!(etf.expense_ratio, Some(9));
    assert_eq!(etf.family.as_deref(), Some("SPDR State Street Global Advisors"));
    assert_eq!(etf.holdings.len(), 3);

    assert!(h.discoverer.contains("NVDA"));
    assert!(h.discoverer.contains("RY.TO"));
    assert_eq!(h.discoverer.discoveries(), 3);
    assert_eq!(h.store.holdings("SPY", "NYSE").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_hard_failures_are_reported_per_ticker() {
    let h = harness(false).await;
    let report = run(&h, &["NYSE:SAP", "ZZZZ", "NYSE:GONE", "AAPL:NYSE", "NYSE:"]).await;

    assert_eq!(report.total(), 5);
    assert_eq!(report.successes.len(), 1);
    assert_eq!(report.successes[0].security.ticker, "AAPL");

    let stage = |seed: &str| report.failures.iter().find(|f| f.seed == seed).map(|f| f.stage);
    assert_eq!(stage("NYSE:SAP"), Some(FailureStage::Extraction));
    assert_eq!(stage("ZZZZ"), Some(FailureStage::Resolve));
    assert_eq!(stage("NYSE:GONE"), Some(FailureStage::Navigation));
    assert_eq!(stage("NYSE:"), Some(FailureStage::Scheduling));

    let mismatch = report.failures.iter().find(|f| f.seed == "NYSE:SAP").unwrap();
    assert!(mismatch.reason.contains("EUR"));

    let lines = std::fs::read_to_string(report.report_path.as_ref().unwrap()).unwrap();
    assert_eq!(lines.lines().count(), 4);
    assert_eq!(h.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_exchange_resolved_from_quote_page() {
    let h = harness(false).await;
    let report = run(&h, &["xyz"]).await;

    assert_eq!(report.successes.len(), 1);
    assert_eq!(report.successes[0].security.exchange, "NASDAQ");
    assert!(h.store.security("XYZ", "NASDAQ").await.unwrap().is_some());
}

#[tokio::test]
async fn test_enrichment_fills_profile_and_dividend_history() {
    let h = harness(true).await;
    let report = run(&h, &["NYSE:KO"]).await;

    assert_eq!(report.successes.len(), 1);
    let scraped = &report.successes[0];
    assert_eq!(scraped.security.sector.as_deref(), Some("Consumer Staples"));
    assert_eq!(scraped.security.industry.as_deref(), Some("Beverages"));
    assert_eq!(scraped.security.coverage, Some(18));

    let dividend = scraped.dividend.as_ref().unwrap();
    assert_eq!(dividend.yield_pct, 290);
    assert_eq!(dividend.payout_ratio, Some(7_250));
    assert_eq!(dividend.frequency, Some(Frequency::Quarterly));
    assert_eq!(dividend.last_announced, Some(41));
    assert_eq!(dividend.annual_payout, Some(164));
}

#[tokio::test]
async fn test_missing_enrichment_pages_do_not_fail_scrape() {
    let h = harness(true).await;
    let report = run(&h, &["NYSE:AAPL"]).await;

    assert_eq!(report.successes.len(), 1);
    assert_eq!(report.successes[0].security.sector, None);
    assert_eq!(report.successes[0].dividend.as_ref().unwrap().annual_payout, Some(96));
}

#[tokio::test]
async fn test_fingerprint_scripts_registered_before_navigation() {
    let site = Arc::new(site());
    let launcher = Arc::new(StubLauncher { site: Arc::clone(&site) });
    let pool = BrowserPool::new(launcher, PoolConfig::default()).await.unwrap();
    let worker = ScrapeWorker::new(pool, None, scraper_config(false));
    let orchestrator = ScrapeOrchestrator::new(Arc::new(worker), 1, CancellationToken::new());

    let report = orchestrator.run(vec!["NYSE:AAPL".to_string()]).await;
    assert_eq!(report.successes.len(), 1);

    let calls = site.calls();
    let first_goto = calls.iter().position(|c| c.starts_with("goto ")).unwrap();
    let before: Vec<&str> = calls[..first_goto].iter().map(String::as_str).collect();
    assert_eq!(before, ["new document script", "new document script"]);
    assert_eq!(calls[first_goto], format!("goto {}", quote("AAPL")));
    // WebRTC is patched in the loaded document
    assert!(calls[first_goto..].iter().any(|c| c == "evaluate"));
}

#[tokio::test]
async fn test_required_field_failures_abort_only_their_ticker() {
    let h = harness(false).await;
    let report = run(
        &h,
        &["NYSE:NONAM", "NYSE:BLANK", "NYSE:NOPX", "NYSE:ZCLS", "NYSE:FLIP", "NYSE:AAPL"],
    )
    .await;

    assert_eq!(report.total(), 6);
    assert_eq!(report.successes.len(), 1);
    assert_eq!(report.successes[0].security.ticker, "AAPL");
    assert!(report.failures.iter().all(|f| f.stage == FailureStage::Extraction));

    let reason = |seed: &str| {
        report
            .failures
            .iter()
            .find(|f| f.seed == seed)
            .map(|f| f.reason.clone())
            .unwrap()
    };
    assert_eq!(reason("NYSE:NONAM"), "missing required field full_name");
    assert_eq!(reason("NYSE:BLANK"), "missing required field full_name");
    assert_eq!(reason("NYSE:NOPX"), "missing required field price");
    assert_eq!(reason("NYSE:ZCLS"), r#"invalid previous_close: "0.00""#);
    assert_eq!(reason("NYSE:FLIP"), "inverted day_range: high 14900 < low 15100");

    assert_eq!(h.store.count().await.unwrap(), 1);
    assert_eq!(h.pool.stats().active_borrowers, 0);
}

#[tokio::test]
async fn test_unparseable_optional_fields_are_absent() {
    let h = harness(false).await;
    let report = run(&h, &["NYSE:JUNK"]).await;

    assert!(report.failures.is_empty());
    let security = &report.successes[0].security;
    assert_eq!(security.market_cap, None);
    assert_eq!(security.beta, None);
    assert_eq!(security.volume, None);
    assert_eq!(security.avg_volume, Some(60_100_000));
    assert_eq!(security.price, 15_025);

    let stored = h.store.security("JUNK", "NYSE").await.unwrap().unwrap();
    assert_eq!(stored.market_cap, None);
    assert_eq!(stored.beta, None);
}
