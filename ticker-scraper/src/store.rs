//! Persistence of scrape results.
//!
//! The scraper hands each successful result to a [`SecurityStore`]; a store
//! failure is logged by the caller and never fails the ticker.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{Extension, ScrapedSecurity, Security, Timing, Typology};

/// Store-or-update sink for scrape results.
#[async_trait]
pub trait SecurityStore: Send + Sync {
    /// Insert or replace everything known about one security.
    async fn store(&self, scraped: &ScrapedSecurity) -> Result<(), StoreError>;

    /// Number of securities held.
    async fn count(&self) -> Result<u64, StoreError>;

    /// `EXCHANGE:TICKER` seeds for every security listed on one of `exchanges`.
    async fn seeds_for_exchanges(&self, exchanges: &[&str]) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// SQLite
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS securities (
    ticker TEXT NOT NULL,
    exchange TEXT NOT NULL,
    typology TEXT NOT NULL,
    full_name TEXT NOT NULL,
    currency TEXT NOT NULL,
    price INTEGER NOT NULL,
    price_change INTEGER NOT NULL,
    price_change_pct INTEGER NOT NULL,
    year_low INTEGER NOT NULL,
    year_high INTEGER NOT NULL,
    day_low INTEGER NOT NULL,
    day_high INTEGER NOT NULL,
    previous_close INTEGER NOT NULL,
    open INTEGER NOT NULL,
    bid INTEGER NOT NULL,
    bid_size INTEGER,
    ask INTEGER NOT NULL,
    ask_size INTEGER,
    market_cap INTEGER,
    volume INTEGER,
    avg_volume INTEGER,
    beta INTEGER,
    pe INTEGER,
    eps INTEGER,
    stm TEXT NOT NULL,
    sector TEXT,
    industry TEXT,
    sub_industry TEXT,
    consensus TEXT,
    score INTEGER,
    coverage INTEGER,
    shares_outstanding INTEGER,
    scraped_at TEXT NOT NULL,
    PRIMARY KEY (ticker, exchange)
);

CREATE INDEX IF NOT EXISTS idx_securities_exchange
ON securities(exchange);

CREATE TABLE IF NOT EXISTS dividends (
    ticker TEXT NOT NULL,
    exchange TEXT NOT NULL,
    yield_pct INTEGER NOT NULL,
    timing TEXT NOT NULL,
    annual_payout INTEGER,
    payout_ratio INTEGER,
    growth_rate INTEGER,
    years_growth INTEGER,
    last_announced INTEGER,
    frequency TEXT,
    ex_div_date TEXT,
    payout_date TEXT,
    PRIMARY KEY (ticker, exchange)
);

CREATE TABLE IF NOT EXISTS etfs (
    ticker TEXT NOT NULL,
    exchange TEXT NOT NULL,
    family TEXT,
    aum INTEGER,
    expense_ratio INTEGER,
    nav INTEGER,
    inception_date TEXT,
    PRIMARY KEY (ticker, exchange)
);

CREATE TABLE IF NOT EXISTS etf_holdings (
    etf_ticker TEXT NOT NULL,
    etf_exchange TEXT NOT NULL,
    holding_ticker TEXT NOT NULL,
    holding_exchange TEXT,
    allocation INTEGER NOT NULL,
    PRIMARY KEY (etf_ticker, etf_exchange, holding_ticker)
);
"#;

/// SQLite-backed store.
pub struct SqliteStore {
    /// rusqlite connections are Send but not Sync
    db: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(CREATE_TABLES_SQL)?;

        info!(db_path = %path.display(), "Initialized security store");
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored core fields of one security.
    pub async fn security(&self, ticker: &str, exchange: &str) -> Result<Option<Security>, StoreError> {
        let db = self.db.lock().await;
        let security = db
            .query_row(
                "SELECT ticker, exchange, typology, full_name, currency, price, price_change,
                        price_change_pct, year_low, year_high, day_low, day_high, previous_close,
                        open, bid, bid_size, ask, ask_size, market_cap, volume, avg_volume, beta,
                        pe, eps, stm, sector, industry, sub_industry, consensus, score, coverage,
                        shares_outstanding, scraped_at
                 FROM securities WHERE ticker = ?1 AND exchange = ?2",
                params![ticker, exchange],
                row_to_security,
            )
            .optional()?;
        Ok(security)
    }

    /// Holding tickers stored for an ETF, largest allocation first.
    pub async fn holdings(&self, ticker: &str, exchange: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT holding_ticker, allocation FROM etf_holdings
             WHERE etf_ticker = ?1 AND etf_exchange = ?2
             ORDER BY allocation DESC",
        )?;
        let rows = stmt.query_map(params![ticker, exchange], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Stored yield ×100, if the security pays a dividend.
    pub async fn dividend_yield(&self, ticker: &str, exchange: &str) -> Result<Option<i64>, StoreError> {
        let db = self.db.lock().await;
        let value = db
            .query_row(
                "SELECT yield_pct FROM dividends WHERE ticker = ?1 AND exchange = ?2",
                params![ticker, exchange],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

fn row_to_security(row: &rusqlite::Row) -> rusqlite::Result<Security> {
    let typology: String = row.get(2)?;
    let stm: String = row.get(24)?;
    let scraped_at: String = row.get(32)?;

    Ok(Security {
        ticker: row.get(0)?,
        exchange: row.get(1)?,
        typology: typology.parse().unwrap_or(Typology::Stock),
        full_name: row.get(3)?,
        currency: row.get(4)?,
        price: row.get(5)?,
        price_change: row.get(6)?,
        price_change_pct: row.get(7)?,
        year_low: row.get(8)?,
        year_high: row.get(9)?,
        day_low: row.get(10)?,
        day_high: row.get(11)?,
        previous_close: row.get(12)?,
        open: row.get(13)?,
        bid: row.get(14)?,
        bid_size: row.get(15)?,
        ask: row.get(16)?,
        ask_size: row.get(17)?,
        market_cap: row.get(18)?,
        volume: row.get(19)?,
        avg_volume: row.get(20)?,
        beta: row.get(21)?,
        pe: row.get(22)?,
        eps: row.get(23)?,
        stm: if stm == "FWD" { Timing::Fwd } else { Timing::Ttm },
        sector: row.get(25)?,
        industry: row.get(26)?,
        sub_industry: row.get(27)?,
        consensus: row.get(28)?,
        score: row.get(29)?,
        coverage: row.get(30)?,
        shares_outstanding: row.get(31)?,
        scraped_at: DateTime::parse_from_rfc3339(&scraped_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

#[async_trait]
impl SecurityStore for SqliteStore {
    async fn store(&self, scraped: &ScrapedSecurity) -> Result<(), StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let s = &scraped.security;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO securities
            (ticker, exchange, typology, full_name, currency, price, price_change, price_change_pct,
             year_low, year_high, day_low, day_high, previous_close, open, bid, bid_size, ask,
             ask_size, market_cap, volume, avg_volume, beta, pe, eps, stm, sector, industry,
             sub_industry, consensus, score, coverage, shares_outstanding, scraped_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                    ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33)
            "#,
            params![
                s.ticker,
                s.exchange,
                s.typology.as_str(),
                s.full_name,
                s.currency,
                s.price,
                s.price_change,
                s.price_change_pct,
                s.year_low,
                s.year_high,
                s.day_low,
                s.day_high,
                s.previous_close,
                s.open,
                s.bid,
                s.bid_size,
                s.ask,
                s.ask_size,
                s.market_cap,
                s.volume,
                s.avg_volume,
                s.beta,
                s.pe,
                s.eps,
                s.stm.as_str(),
                s.sector,
                s.industry,
                s.sub_industry,
                s.consensus,
                s.score,
                s.coverage,
                s.shares_outstanding,
                s.scraped_at.to_rfc3339(),
            ],
        )?;

        match &scraped.dividend {
            Some(d) => {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO dividends
                    (ticker, exchange, yield_pct, timing, annual_payout, payout_ratio, growth_rate,
                     years_growth, last_announced, frequency, ex_div_date, payout_date)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    "#,
                    params![
                        s.ticker,
                        s.exchange,
                        d.yield_pct,
                        d.timing.as_str(),
                        d.annual_payout,
                        d.payout_ratio,
                        d.growth_rate,
                        d.years_growth,
                        d.last_announced,
                        d.frequency.map(|f| f.as_str()),
                        date_text(d.ex_div_date),
                        date_text(d.payout_date),
                    ],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM dividends WHERE ticker = ?1 AND exchange = ?2",
                    params![s.ticker, s.exchange],
                )?;
            }
        }

        if let Some(Extension::Etf(etf)) = &scraped.extension {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO etfs
                (ticker, exchange, family, aum, expense_ratio, nav, inception_date)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    s.ticker,
                    s.exchange,
                    etf.family,
                    etf.aum,
                    etf.expense_ratio,
                    etf.nav,
                    date_text(etf.inception_date),
                ],
            )?;

            tx.execute(
                "DELETE FROM etf_holdings WHERE etf_ticker = ?1 AND etf_exchange = ?2",
                params![s.ticker, s.exchange],
            )?;
            for holding in &etf.holdings {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO etf_holdings
                    (etf_ticker, etf_exchange, holding_ticker, holding_exchange, allocation)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![s.ticker, s.exchange, holding.ticker, holding.exchange, holding.allocation],
                )?;
            }
        }

        tx.commit()?;
        debug!(ticker = %s.ticker, exchange = %s.exchange, "Stored security");
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM securities", [], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
    }

    async fn seeds_for_exchanges(&self, exchanges: &[&str]) -> Result<Vec<String>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT ticker FROM securities WHERE exchange = ?1 ORDER BY ticker")?;

        let mut seeds = Vec::new();
        for exchange in exchanges {
            let rows = stmt.query_map(params![exchange], |row| row.get::<_, String>(0))?;
            for ticker in rows {
                seeds.push(format!("{exchange}:{}", ticker?));
            }
        }
        Ok(seeds)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Keeps results in a map keyed by `(ticker, exchange)`.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<(String, String), ScrapedSecurity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, ticker: &str, exchange: &str) -> Option<ScrapedSecurity> {
        self.items
            .lock()
            .await
            .get(&(ticker.to_string(), exchange.to_string()))
            .cloned()
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn store(&self, scraped: &ScrapedSecurity) -> Result<(), StoreError> {
        let key = (
            scraped.security.ticker.clone(),
            scraped.security.exchange.clone(),
        );
        self.items.lock().await.insert(key, scraped.clone());
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.items.lock().await.len() as u64)
    }

    async fn seeds_for_exchanges(&self, exchanges: &[&str]) -> Result<Vec<String>, StoreError> {
        let items = self.items.lock().await;
        let mut seeds: Vec<String> = items
            .keys()
            .filter(|(_, exchange)| exchanges.contains(&exchange.as_str()))
            .map(|(ticker, exchange)| format!("{exchange}:{ticker}"))
            .collect();
        seeds.sort();
        Ok(seeds)
    }
}
