//! Quote-page field extraction.
//!
//! Every lookup is bounded by the element timeout. Required fields turn a
//! missing or invalid value into a [`ScrapeError`]; optional fields log it
//! and come back as `None`.

use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use ticker_browser::browser::{wait_for_text, wait_for_texts};
use ticker_browser::{BrowserError, PageHandle};
use ticker_common::util::collapse_whitespace;

use crate::enrichment::{DividendHistory, MarketBeatProfile};
use crate::error::ScrapeError;
use crate::exchange::Exchange;
use crate::model::{
    annual_payout, Dividend, EtfExtension, Holding, Security, Timing, Typology,
};
use crate::normalize::{extract_parenthesized, is_empty, parse_count, parse_fixed, parse_magnitude};
use crate::seeds::Seed;
use crate::selectors;

/// Split `"123.40 - 150.25"` into `(low, high)`, both ×100 and positive.
pub fn parse_range(text: &str) -> Option<(i64, i64)> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let parts: Vec<&str> = compact.split('-').collect();
    let [low, high] = parts.as_slice() else {
        return None;
    };
    let low = parse_fixed(low).ok().filter(|v| *v > 0)?;
    let high = parse_fixed(high).ok().filter(|v| *v > 0)?;
    Some((low, high))
}

/// Split `"150.20 x 1,200"` into a positive price ×100 and an optional size.
pub fn parse_quote(text: &str) -> Option<(i64, Option<i64>)> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let parts: Vec<&str> = compact.split('x').collect();
    let [price, size] = parts.as_slice() else {
        return None;
    };
    let price = parse_fixed(price).ok().filter(|v| *v > 0)?;
    let size = parse_count(size).ok().filter(|v| *v >= 0);
    Some((price, size))
}

/// ISO code from `"Currency in USD"` or a bare `"USD"`.
pub fn parse_currency(text: &str) -> Option<&str> {
    text.split_whitespace().last().filter(|c| !is_empty(c))
}

/// Bounded, per-field lookups against one page.
pub struct FieldExtractor<'a> {
    page: &'a dyn PageHandle,
    timeout: Duration,
    seed: String,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(page: &'a dyn PageHandle, timeout: Duration, seed: impl Into<String>) -> Self {
        Self {
            page,
            timeout,
            seed: seed.into(),
        }
    }

    pub fn page(&self) -> &'a dyn PageHandle {
        self.page
    }

    /// Text of the first match, `None` if it never rendered or is a placeholder.
    pub async fn text(&self, field: &'static str, selector: &str) -> Result<Option<String>, ScrapeError> {
        match wait_for_text(self.page, selector, self.timeout).await {
            Ok(text) if is_empty(&text) => {
                debug!(seed = %self.seed, field, "Field is a placeholder");
                Ok(None)
            }
            Ok(text) => Ok(Some(text)),
            Err(BrowserError::ElementNotFound { .. }) => {
                debug!(seed = %self.seed, field, selector, "Field not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Text of every match, empty if nothing rendered.
    pub async fn texts(&self, selector: &str) -> Result<Vec<String>, ScrapeError> {
        match wait_for_texts(self.page, selector, self.timeout).await {
            Ok(texts) => Ok(texts),
            Err(BrowserError::ElementNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Single attempt, no waiting. For hints on an already rendered page.
    pub async fn peek(&self, selector: &str) -> Option<String> {
        match self.page.find_text(selector).await {
            Ok(text) => text.map(|t| t.trim().to_string()),
            Err(e) => {
                debug!(seed = %self.seed, selector, error = %e, "Hint lookup failed");
                None
            }
        }
    }

    pub async fn required_text(&self, field: &'static str, selector: &str) -> Result<String, ScrapeError> {
        self.text(field, selector)
            .await?
            .ok_or(ScrapeError::MissingField(field))
    }

    /// ×100 value; `positive` rejects zero and negatives.
    pub async fn required_fixed(
        &self,
        field: &'static str,
        selector: &str,
        positive: bool,
    ) -> Result<i64, ScrapeError> {
        let text = self.required_text(field, selector).await?;
        parse_fixed(&text)
            .ok()
            .filter(|v| !positive || *v > 0)
            .ok_or(ScrapeError::InvalidField { field, value: text })
    }

    pub async fn required_range(&self, field: &'static str, selector: &str) -> Result<(i64, i64), ScrapeError> {
        let text = self.required_text(field, selector).await?;
        let (low, high) = parse_range(&text).ok_or_else(|| ScrapeError::InvalidField {
            field,
            value: text.clone(),
        })?;
        if high < low {
            return Err(ScrapeError::InvertedRange { field, low, high });
        }
        Ok((low, high))
    }

    pub async fn required_quote(
        &self,
        field: &'static str,
        selector: &str,
    ) -> Result<(i64, Option<i64>), ScrapeError> {
        let text = self.required_text(field, selector).await?;
        parse_quote(&text).ok_or(ScrapeError::InvalidField { field, value: text })
    }

    /// Positive value parsed with `parse`, or `None`.
    pub async fn optional<F>(&self, field: &'static str, selector: &str, parse: F) -> Option<i64>
    where
        F: Fn(&str) -> Option<i64>,
    {
        let text = match self.text(field, selector).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!(seed = %self.seed, field, error = %e, "Optional field lookup failed");
                return None;
            }
        };
        let value = parse(&text).filter(|v| *v > 0);
        if value.is_none() {
            warn!(seed = %self.seed, field, value = %text, "Invalid optional field");
        }
        value
    }
}

fn fixed(text: &str) -> Option<i64> {
    parse_fixed(text).ok()
}

fn magnitude(text: &str) -> Option<i64> {
    parse_magnitude(text).ok()
}

/// Currency, name, typology, required prices and optional statistics.
pub async fn extract_security(
    fx: &FieldExtractor<'_>,
    ticker: &str,
    exchange: &'static Exchange,
) -> Result<Security, ScrapeError> {
    let currency_text = fx.required_text("currency", selectors::CURRENCY).await?;
    let currency = parse_currency(&currency_text).ok_or(ScrapeError::MissingField("currency"))?;
    if !exchange.accepts_currency(currency) {
        return Err(ScrapeError::CurrencyMismatch {
            expected: exchange.currency().unwrap_or("unknown").to_string(),
            found: currency.to_string(),
        });
    }
    let currency = currency.to_string();

    let full_name = collapse_whitespace(&fx.required_text("full_name", selectors::FULL_NAME).await?);
    let typology = classify(fx, &full_name).await;
    debug!(seed = %fx.seed, %full_name, %typology, "Classified security");

    let price = fx.required_fixed("price", selectors::PRICE, true).await?;
    let price_change = fx.required_fixed("price_change", selectors::PRICE_CHANGE, false).await?;
    let price_change_pct = fx
        .required_fixed("price_change_pct", selectors::PRICE_CHANGE_PCT, false)
        .await?;
    let (year_low, year_high) = fx.required_range("year_range", selectors::YEAR_RANGE).await?;
    let (day_low, day_high) = fx.required_range("day_range", selectors::DAY_RANGE).await?;
    let previous_close = fx.required_fixed("previous_close", selectors::PREVIOUS_CLOSE, true).await?;
    let open = fx.required_fixed("open", selectors::OPEN, true).await?;
    let (bid, bid_size) = fx.required_quote("bid", selectors::BID).await?;
    let (ask, ask_size) = fx.required_quote("ask", selectors::ASK).await?;

    let market_cap = fx.optional("market_cap", selectors::MARKET_CAP, magnitude).await;
    let volume = fx.optional("volume", selectors::VOLUME, magnitude).await;
    let avg_volume = fx.optional("avg_volume", selectors::AVG_VOLUME, magnitude).await;
    let beta = fx.optional("beta", selectors::BETA, fixed).await;

    let trailing = fx.texts(selectors::TRAILING_PE).await.unwrap_or_default();
    let positive_fixed = |text: Option<&String>| {
        text.filter(|t| !is_empty(t))
            .and_then(|t| fixed(t))
            .filter(|v| *v > 0)
    };
    let pe = positive_fixed(trailing.first());
    let eps = positive_fixed(trailing.get(1));

    Ok(Security {
        ticker: ticker.to_string(),
        exchange: exchange.title.to_string(),
        typology,
        full_name,
        currency,
        price,
        price_change,
        price_change_pct,
        year_low,
        year_high,
        day_low,
        day_high,
        previous_close,
        open,
        bid,
        bid_size,
        ask,
        ask_size,
        market_cap,
        volume,
        avg_volume,
        beta,
        pe,
        eps,
        stm: Timing::Ttm,
        sector: None,
        industry: None,
        sub_industry: None,
        consensus: None,
        score: None,
        coverage: None,
        shares_outstanding: None,
        scraped_at: Utc::now(),
    })
}

/// Name heuristic first; page hints can only refine a plain stock.
async fn classify(fx: &FieldExtractor<'_>, full_name: &str) -> Typology {
    let typology = Typology::from_name(full_name);
    if typology != Typology::Stock {
        return typology;
    }
    if fx
        .peek(selectors::FUND_HINT)
        .await
        .is_some_and(|hint| hint.to_lowercase().contains("fund family"))
    {
        return Typology::Etf;
    }
    if fx
        .peek(selectors::REIT_HINT)
        .await
        .is_some_and(|hint| hint.to_lowercase().contains("reit"))
    {
        return Typology::Reit;
    }
    typology
}

/// Copy MarketBeat profile fields onto the security.
pub fn apply_profile(security: &mut Security, profile: MarketBeatProfile) {
    security.sector = profile.sector;
    security.industry = profile.industry;
    security.sub_industry = profile.sub_industry;
    security.consensus = profile.consensus;
    security.score = profile.score;
    security.coverage = profile.coverage;
    security.shares_outstanding = profile.shares_outstanding;
}

/// Dividend snapshot, `None` when the page shows no yield.
pub async fn extract_dividend(
    fx: &FieldExtractor<'_>,
    security: &Security,
    history: &DividendHistory,
) -> Option<Dividend> {
    let (selector, timing) = match security.typology {
        Typology::Etf => (selectors::ETF_YIELD, Timing::Ttm),
        Typology::Stock | Typology::Reit => (selectors::FORWARD_YIELD, Timing::Fwd),
    };

    let text = match fx.text("yield", selector).await {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(e) => {
            warn!(seed = %fx.seed, error = %e, "Yield lookup failed");
            return None;
        }
    };
    let raw_yield = match timing {
        Timing::Fwd => extract_parenthesized(&text)?,
        Timing::Ttm => text.as_str(),
    };
    let yield_pct = fixed(raw_yield).filter(|v| *v > 0)?;

    Some(Dividend {
        yield_pct,
        timing,
        annual_payout: annual_payout(
            history.last_announced,
            history.frequency,
            security.price,
            yield_pct,
        ),
        payout_ratio: history.payout_ratio,
        growth_rate: None,
        years_growth: None,
        last_announced: history.last_announced,
        frequency: history.frequency,
        ex_div_date: history.ex_div_date,
        payout_date: history.payout_date,
    })
}

/// Fund figures and top holdings. Every field is optional.
pub async fn extract_etf(fx: &FieldExtractor<'_>) -> EtfExtension {
    let aum = fx.optional("aum", selectors::NET_ASSETS, magnitude).await;
    let expense_ratio = fx.optional("expense_ratio", selectors::EXPENSE_RATIO, fixed).await;
    let nav = fx.optional("nav", selectors::NAV, fixed).await;

    let overview = fx.texts(selectors::FUND_OVERVIEW).await.unwrap_or_default();
    let family = overview.first().filter(|f| !is_empty(f)).cloned();
    let inception_date = overview
        .get(3)
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());

    let tickers = fx.texts(selectors::HOLDING_TICKERS).await.unwrap_or_default();
    let allocations = fx.texts(selectors::HOLDING_ALLOCATIONS).await.unwrap_or_default();

    EtfExtension {
        family,
        aum,
        expense_ratio,
        nav,
        inception_date,
        holdings: parse_holdings(&tickers, &allocations),
    }
}

/// Pair holding symbols with allocations, skipping pairs that do not parse.
pub fn parse_holdings(tickers: &[String], allocations: &[String]) -> Vec<Holding> {
    tickers
        .iter()
        .zip(allocations)
        .filter_map(|(symbol, allocation)| {
            if is_empty(symbol) {
                return None;
            }
            let seed = match Seed::parse(symbol) {
                Ok(seed) => seed,
                Err(e) => {
                    debug!(holding = %symbol, error = %e, "Skipping holding");
                    return None;
                }
            };
            let allocation = fixed(allocation).filter(|v| *v > 0)?;
            Some(Holding {
                ticker: seed.ticker,
                exchange: seed.exchange.map(|e| e.title.to_string()),
                allocation,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("123.40 - 150.25", Some((12_340, 15_025)); "spaced")]
    #[test_case("1,200.00-1,350.50", Some((120_000, 135_050)); "thousands")]
    #[test_case("150.25 - 123.40", Some((15_025, 12_340)); "inverted parses")]
    #[test_case("0.00 - 12.00", None; "zero low")]
    #[test_case("12.00", None; "single value")]
    #[test_case("1 - 2 - 3", None; "three parts")]
    fn test_parse_range(input: &str, expected: Option<(i64, i64)>) {
        assert_eq!(parse_range(input), expected);
    }

    #[test_case("150.20 x 1,200", Some((15_020, Some(1_200))); "with size")]
    #[test_case("150.20 x --", Some((15_020, None)); "missing size")]
    #[test_case("0.00 x 100", None; "zero price")]
    #[test_case("--", None; "placeholder")]
    fn test_parse_quote(input: &str, expected: Option<(i64, Option<i64>)>) {
        assert_eq!(parse_quote(input), expected);
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("Currency in USD"), Some("USD"));
        assert_eq!(parse_currency("EUR"), Some("EUR"));
        assert_eq!(parse_currency("  "), None);
    }

    #[test]
    fn test_parse_holdings_skips_bad_pairs() {
        let tickers = vec!["NVDA".to_string(), "RY.TO".to_string(), "--".to_string(), "MSFT".to_string()];
        let allocations = vec!["6.89%".to_string(), "1.10%".to_string(), "2%".to_string(), "n/a".to_string()];

        let holdings = parse_holdings(&tickers, &allocations);
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].ticker, "NVDA");
        assert_eq!(holdings[0].allocation, 689);
        assert_eq!(holdings[1].ticker, "RY");
        assert_eq!(holdings[1].exchange.as_deref(), Some("TSX"));
    }
}
