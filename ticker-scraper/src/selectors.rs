//! Target page addresses and DOM anchors.
//!
//! These track third-party markup and break whenever it changes; a broken
//! selector shows up as a missing field, not a crash.

use crate::exchange::Exchange;

pub const YAHOO_QUOTE_URL: &str = "https://finance.yahoo.com/quote/";
pub const MARKETBEAT_URL: &str = "https://www.marketbeat.com/stocks/";
pub const DIVIDEND_HISTORY_URL: &str = "https://dividendhistory.org/payout/";

// Quote page header
pub const EXCHANGE_LABEL: &str = "span.exchange span";
pub const CURRENCY: &str = "span.exchange span:nth-child(3)";
pub const FULL_NAME: &str = ".yf-xxbei9";
pub const REIT_HINT: &str = ".titleInfo.yf-1d08kze";
pub const FUND_HINT: &str = "h3.yf-1ja4ll8";

// Quote page prices
pub const PRICE: &str = "span[data-testid='qsp-price']";
pub const PRICE_CHANGE: &str = "span[data-testid='qsp-price-change']";
pub const PRICE_CHANGE_PCT: &str = "span[data-testid='qsp-price-change-percent']";
pub const YEAR_RANGE: &str = "[data-field='fiftyTwoWeekRange']";
pub const DAY_RANGE: &str = "[data-field='regularMarketDayRange']";
pub const PREVIOUS_CLOSE: &str = "[data-field='regularMarketPreviousClose']";
pub const OPEN: &str = "[data-field='regularMarketOpen']";
pub const BID: &str = "span[title='Bid'] ~ span";
pub const ASK: &str = "span[title='Ask'] ~ span";

// Quote page statistics
pub const MARKET_CAP: &str = "[data-field='marketCap']";
pub const VOLUME: &str = "[data-field='regularMarketVolume']";
pub const AVG_VOLUME: &str = "[data-field='averageVolume']";
pub const BETA: &str = "span[title='Beta (5Y Monthly)'] ~ span";
/// PE first, EPS second
pub const TRAILING_PE: &str = "[data-field='trailingPE']";

// Dividend yield
pub const ETF_YIELD: &str = "span[title='Yield'] ~ span";
pub const FORWARD_YIELD: &str = "span[title='Forward Dividend & Yield'] ~ span";

// ETF extension
pub const NET_ASSETS: &str = "span[title='Net Assets'] ~ span";
pub const EXPENSE_RATIO: &str = "span[title='Expense Ratio (net)'] ~ span";
pub const NAV: &str = "span[title='NAV'] ~ span";
/// Family first, inception date fourth
pub const FUND_OVERVIEW: &str = "section[data-testid='company-overview-card'] p[title]";
pub const HOLDING_TICKERS: &str = "section[data-testid='top-holdings'] a[data-testid='ticker-container']";
pub const HOLDING_ALLOCATIONS: &str =
    "section[data-testid='top-holdings'] a[data-testid='ticker-container'] ~ span.data";

// Discovery
pub const TRENDING_CARDS: &str = ".carousel-top a.card-link";

// MarketBeat profile
pub const MB_KEYS: &str = ".price-data-area dt";
pub const MB_VALUES: &str = ".price-data-area strong";

// DividendHistory
pub const DH_PARAGRAPHS: &str = "p";
pub const DH_ROWS: &str = "table#dividend_table tr";

/// Yahoo quote page, `TICKER.SUFFIX` for venues with a suffix.
pub fn quote_url(ticker: &str, exchange: Option<&Exchange>) -> String {
    match exchange.and_then(|e| e.suffix) {
        Some(suffix) => format!("{YAHOO_QUOTE_URL}{ticker}.{suffix}"),
        None => format!("{YAHOO_QUOTE_URL}{ticker}"),
    }
}

/// MarketBeat profile under the venue prefix, or its title when it has none.
pub fn marketbeat_url(ticker: &str, exchange: &Exchange) -> String {
    let venue = exchange.prefix.unwrap_or(exchange.title);
    format!("{MARKETBEAT_URL}{venue}/{}", ticker.replace("-UN", ""))
}

/// DividendHistory payout table. US tickers sit at the root, Cboe Canada
/// listings under `tsx/`, London under `uk/`, anything else under the
/// lowercase venue title.
pub fn dividend_history_url(ticker: &str, exchange: &Exchange) -> String {
    let path = if exchange.is_us() {
        ticker.to_string()
    } else {
        let venue = match (exchange.suffix, exchange.country) {
            (Some("NE"), _) => "tsx".to_string(),
            (_, "GB") => "uk".to_string(),
            _ => exchange.title.to_lowercase(),
        };
        format!("{venue}/{ticker}")
    };
    format!("{DIVIDEND_HISTORY_URL}{}", path.replace("-UN", ".UN"))
}
