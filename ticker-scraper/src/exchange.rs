//! Built-in exchange reference data.
//!
//! Read-only for the lifetime of the process. Used to build quote URLs,
//! validate the currency a page reports, and derive close-time schedules.

use chrono::NaiveTime;
use serde::Serialize;

/// One listing venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub title: &'static str,
    pub full_name: &'static str,
    /// Marker used by MarketBeat and `EXCHANGE:TICKER` seeds
    pub prefix: Option<&'static str>,
    /// Marker appended to Yahoo quote symbols (`RY.TO`)
    pub suffix: Option<&'static str>,
    pub country: &'static str,
    /// Session open, UTC `(hour, minute)`
    pub open: (u32, u32),
    /// Session close, UTC `(hour, minute)`
    pub close: (u32, u32),
}

const US_SESSION: ((u32, u32), (u32, u32)) = ((14, 30), (21, 0));
const EU_SESSION: ((u32, u32), (u32, u32)) = ((8, 0), (16, 30));
const APAC_SESSION: ((u32, u32), (u32, u32)) = ((0, 0), (6, 0));

const fn venue(
    title: &'static str,
    full_name: &'static str,
    prefix: Option<&'static str>,
    suffix: Option<&'static str>,
    country: &'static str,
    session: ((u32, u32), (u32, u32)),
) -> Exchange {
    Exchange {
        title,
        full_name,
        prefix,
        suffix,
        country,
        open: session.0,
        close: session.1,
    }
}

pub static EXCHANGES: &[Exchange] = &[
    venue("NYSE", "New York Stock Exchange", None, None, "US", US_SESSION),
    venue(
        "NASDAQ",
        "National Association of Securities Dealers Automated Quotations",
        None,
        None,
        "US",
        US_SESSION,
    ),
    venue("CBOEUS", "Chicago Board Options Exchange", None, None, "US", US_SESSION),
    venue("TSX", "Toronto Stock Exchange", Some("TSE"), Some("TO"), "CA", US_SESSION),
    venue("TSXV", "TSX Venture Exchange", Some("CVE"), Some("V"), "CA", US_SESSION),
    venue("CBOE", "CBOE Canada", Some("NEOA"), Some("NE"), "CA", US_SESSION),
    venue("LSE", "London Stock Exchange", Some("LON"), Some("L"), "GB", EU_SESSION),
    venue("MIL", "Milan Stock Exchange", None, Some("MI"), "IT", EU_SESSION),
    venue("JPY", "Tokyo Stock Exchange", None, Some("T"), "JP", APAC_SESSION),
    venue("FWB", "Frankfurt Stock Exchange", Some("FRA"), Some("F"), "DE", EU_SESSION),
    venue("SIX", "SIX Swiss Exchange", None, Some("SW"), "CH", EU_SESSION),
    venue("ASX", "Australian Securities Exchange", None, Some("AX"), "AU", APAC_SESSION),
];

impl Exchange {
    /// ISO currency the venue quotes in.
    pub fn currency(&self) -> Option<&'static str> {
        currency_for_country(self.country)
    }

    /// Whether a page-reported currency matches this venue.
    ///
    /// London quotes are often in pence (`GBp` / `GBX`).
    pub fn accepts_currency(&self, found: &str) -> bool {
        let Some(expected) = self.currency() else {
            return false;
        };
        let found = found.trim();
        found.eq_ignore_ascii_case(expected)
            || (expected == "GBP" && found.eq_ignore_ascii_case("GBX"))
    }

    pub fn is_us(&self) -> bool {
        self.country == "US"
    }

    pub fn open_time(&self) -> NaiveTime {
        hm(self.open)
    }

    pub fn close_time(&self) -> NaiveTime {
        hm(self.close)
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title)
    }
}

fn hm((hour, minute): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

pub fn currency_for_country(country: &str) -> Option<&'static str> {
    match country {
        "US" => Some("USD"),
        "CA" => Some("CAD"),
        "GB" => Some("GBP"),
        "IT" | "DE" => Some("EUR"),
        "JP" => Some("JPY"),
        "CH" => Some("CHF"),
        "AU" => Some("AUD"),
        _ => None,
    }
}

pub fn all() -> &'static [Exchange] {
    EXCHANGES
}

pub fn by_title(title: &str) -> Option<&'static Exchange> {
    let title = title.trim();
    EXCHANGES.iter().find(|e| e.title.eq_ignore_ascii_case(title))
}

/// Venue whose suffix or prefix equals `marker`.
pub fn by_marker(marker: &str) -> Option<&'static Exchange> {
    let marker = marker.trim();
    EXCHANGES.iter().find(|e| {
        e.suffix.is_some_and(|s| s.eq_ignore_ascii_case(marker))
            || e.prefix.is_some_and(|p| p.eq_ignore_ascii_case(marker))
    })
}

/// Title first, then prefix. Used for the `EXCHANGE:TICKER` seed form.
pub fn by_title_or_prefix(name: &str) -> Option<&'static Exchange> {
    by_title(name).or_else(|| {
        let name = name.trim();
        EXCHANGES
            .iter()
            .find(|e| e.prefix.is_some_and(|p| p.eq_ignore_ascii_case(name)))
    })
}

/// Resolve the exchange label a bare quote page shows ("NasdaqGS - Nasdaq Real Time Price").
///
/// Only the two US primary venues are recognised this way. The venue name
/// before ` - ` wins over the feed name after it.
pub fn by_page_label(label: &str) -> Option<&'static Exchange> {
    let upper = label.to_ascii_uppercase();
    let venue = upper.split(" - ").next().unwrap_or_default();
    let found = [venue, upper.as_str()].into_iter().find_map(|text| {
        if text.contains("NYSE") {
            by_title("NYSE")
        } else if text.contains("NASDAQ") {
            by_title("NASDAQ")
        } else {
            None
        }
    });
    found
}

/// Every registered suffix, e.g. `TO`, `L`.
pub fn suffixes() -> impl Iterator<Item = &'static str> {
    EXCHANGES.iter().filter_map(|e| e.suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_marker() {
        assert_eq!(by_marker("TO").map(|e| e.title), Some("TSX"));
        assert_eq!(by_marker("tse").map(|e| e.title), Some("TSX"));
        assert_eq!(by_marker("NEOA").map(|e| e.title), Some("CBOE"));
        assert!(by_marker("ZZ").is_none());
    }

    #[test]
    fn test_lookup_by_title_or_prefix() {
        assert_eq!(by_title_or_prefix("nyse").map(|e| e.title), Some("NYSE"));
        assert_eq!(by_title_or_prefix("LON").map(|e| e.title), Some("LSE"));
    }

    #[test]
    fn test_currency_acceptance() {
        let nyse = by_title("NYSE").unwrap();
        assert!(nyse.accepts_currency("USD"));
        assert!(!nyse.accepts_currency("EUR"));

        let lse = by_title("LSE").unwrap();
        assert!(lse.accepts_currency("GBP"));
        assert!(lse.accepts_currency("GBp"));
        assert!(lse.accepts_currency("GBX"));
    }

    #[test]
    fn test_page_label() {
        assert_eq!(by_page_label("NasdaqGS - Nasdaq Real Time Price").map(|e| e.title), Some("NASDAQ"));
        assert_eq!(by_page_label("NYSE - Nasdaq Real Time Price").map(|e| e.title), Some("NYSE"));
        assert_eq!(by_page_label("NYSE - Delayed Quote").map(|e| e.title), Some("NYSE"));
        assert!(by_page_label("Toronto - Delayed Quote").is_none());
    }

    #[test]
    fn test_session_times() {
        let tsx = by_title("TSX").unwrap();
        assert_eq!(tsx.close_time(), NaiveTime::from_hms_opt(21, 0, 0).unwrap());
        assert!(EXCHANGES.iter().all(|e| e.open_time() < e.close_time()));
    }

    #[test]
    fn test_every_country_has_currency() {
        assert!(EXCHANGES.iter().all(|e| e.currency().is_some()));
    }
}
