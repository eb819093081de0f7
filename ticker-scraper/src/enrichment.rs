//! Secondary sources visited before the quote page.
//!
//! Nothing here can fail a scrape: an unreachable page or an unexpected
//! layout just leaves the corresponding fields empty.

use chrono::NaiveDate;
use std::time::Duration;
use tracing::{debug, warn};

use ticker_browser::browser::goto_within;
use ticker_browser::{stealth, PageHandle};

use crate::extractor::FieldExtractor;
use crate::model::Frequency;
use crate::normalize::{is_empty, parse_count, parse_fixed, parse_magnitude};
use crate::selectors;

/// Analyst and classification data from MarketBeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketBeatProfile {
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub sub_industry: Option<String>,
    pub consensus: Option<String>,
    /// ×100
    pub score: Option<i64>,
    pub coverage: Option<i64>,
    pub shares_outstanding: Option<i64>,
}

impl MarketBeatProfile {
    /// Build from the `dt` labels and `strong` values of the price data area.
    pub fn from_pairs(keys: &[String], values: &[String]) -> Self {
        let mut profile = Self::default();
        for (key, value) in keys.iter().zip(values) {
            let key = key.trim().trim_end_matches(':').to_lowercase();
            let value = value.trim();
            if is_empty(value) {
                continue;
            }

            if key.contains("sector") {
                profile.sector = Some(value.to_string());
            }
            if key == "industry" {
                profile.industry = Some(value.to_string());
            }
            if key.contains("sub") {
                profile.sub_industry = Some(value.to_string());
            }
            if key.contains("consensus") {
                profile.consensus = Some(value.to_string());
            }
            if key.contains("score") {
                profile.score = parse_fixed(value).ok();
            }
            if key.contains("coverage") {
                profile.coverage = value
                    .split_whitespace()
                    .next()
                    .and_then(|n| parse_count(n).ok());
            }
            if key.contains("outstanding") {
                profile.shares_outstanding = parse_magnitude(value).ok().filter(|v| *v > 0);
            }
        }
        profile
    }
}

/// Payout data from DividendHistory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DividendHistory {
    /// ×100
    pub payout_ratio: Option<i64>,
    pub frequency: Option<Frequency>,
    /// Most recent paid amount, ×100
    pub last_announced: Option<i64>,
    pub ex_div_date: Option<NaiveDate>,
    pub payout_date: Option<NaiveDate>,
}

impl DividendHistory {
    /// Read `Payout Ratio: 65.2%` and `Frequency: Quarterly` style paragraphs.
    pub fn apply_paragraphs(&mut self, paragraphs: &[String]) {
        for paragraph in paragraphs {
            let compact: String = paragraph
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            let Some((label, value)) = compact.split_once(':') else {
                continue;
            };

            if label.contains("payoutratio") {
                match parse_fixed(value) {
                    Ok(ratio) => self.payout_ratio = Some(ratio),
                    Err(e) => debug!(value, error = %e, "Unparseable payout ratio"),
                }
            }
            if label.contains("frequency") {
                self.frequency = Some(Frequency::parse(value));
            }
        }
    }

    /// Take dates and amount from the newest row already paid by `today`.
    ///
    /// Rows are newest first, cells tab-separated: ex-dividend date, payout
    /// date, amount. Rows without a parseable payout date are skipped.
    pub fn apply_rows(&mut self, rows: &[String], today: NaiveDate) {
        for row in rows {
            let cells: Vec<&str> = row.split('\t').map(str::trim).collect();
            let Some(payout) = cells.get(1).and_then(|d| parse_date(d)) else {
                continue;
            };
            if payout > today {
                continue;
            }

            self.payout_date = Some(payout);
            self.ex_div_date = cells.first().and_then(|d| parse_date(d));
            self.last_announced = cells
                .get(2)
                .and_then(|a| parse_fixed(a).ok())
                .filter(|v| *v > 0);
            return;
        }
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// Navigate to a secondary page, `false` if it did not load.
async fn visit(page: &dyn PageHandle, url: &str, limit: Duration, seed: &str) -> bool {
    match goto_within(page, url, limit).await {
        Ok(()) => {
            stealth::disable_webrtc(page).await;
            true
        }
        Err(e) => {
            warn!(seed, url, error = %e, "Secondary page did not load");
            false
        }
    }
}

pub async fn scrape_marketbeat(
    page: &dyn PageHandle,
    url: &str,
    navigation_timeout: Duration,
    element_timeout: Duration,
    seed: &str,
) -> MarketBeatProfile {
    if !visit(page, url, navigation_timeout, seed).await {
        return MarketBeatProfile::default();
    }

    let fx = FieldExtractor::new(page, element_timeout, seed);
    let keys = fx.texts(selectors::MB_KEYS).await.unwrap_or_default();
    let values = fx.texts(selectors::MB_VALUES).await.unwrap_or_default();
    if keys.is_empty() || values.is_empty() {
        warn!(seed, "No MarketBeat profile data");
        return MarketBeatProfile::default();
    }

    let profile = MarketBeatProfile::from_pairs(&keys, &values);
    debug!(seed, ?profile, "Scraped MarketBeat profile");
    profile
}

pub async fn scrape_dividend_history(
    page: &dyn PageHandle,
    url: &str,
    navigation_timeout: Duration,
    element_timeout: Duration,
    seed: &str,
    today: NaiveDate,
) -> DividendHistory {
    let mut history = DividendHistory::default();
    if !visit(page, url, navigation_timeout, seed).await {
        return history;
    }

    let fx = FieldExtractor::new(page, element_timeout, seed);
    let paragraphs = fx.texts(selectors::DH_PARAGRAPHS).await.unwrap_or_default();
    history.apply_paragraphs(&paragraphs);

    let rows = fx.texts(selectors::DH_ROWS).await.unwrap_or_default();
    history.apply_rows(&rows, today);

    debug!(seed, ?history, "Scraped dividend history");
    history
}
