//! Scrape results.
//!
//! Monetary values, percentages and ratios are integers ×100; counts and
//! magnitudes (volume, market cap, AUM, shares) are whole units. Optional
//! fields are `None` when the page did not provide a valid value, never zero.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScrapeError;

/// Security classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Typology {
    Stock,
    Etf,
    Reit,
}

impl Typology {
    /// Classify from a full name: "etf" or "trust" is an ETF, "reit" a REIT.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("etf") || lower.contains("trust") {
            Self::Etf
        } else if lower.contains("reit") {
            Self::Reit
        } else {
            Self::Stock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "STOCK",
            Self::Etf => "ETF",
            Self::Reit => "REIT",
        }
    }
}

impl fmt::Display for Typology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Typology {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STOCK" => Ok(Self::Stock),
            "ETF" => Ok(Self::Etf),
            "REIT" => Ok(Self::Reit),
            other => Err(ScrapeError::UnknownTypology(other.to_string())),
        }
    }
}

/// Whether a figure is trailing or forward-looking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Timing {
    Ttm,
    Fwd,
}

impl Timing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ttm => "TTM",
            Self::Fwd => "FWD",
        }
    }
}

/// Dividend payment cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
    Unknown,
}

impl Frequency {
    /// Parse the label DividendHistory prints ("Quarterly", "Semi-Annual").
    pub fn parse(label: &str) -> Self {
        let compact: String = label
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_lowercase();
        match compact.as_str() {
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            "quarterly" => Self::Quarterly,
            "semiannual" | "semiannually" | "biannual" => Self::SemiAnnual,
            "annual" | "annually" | "yearly" => Self::Annual,
            _ => Self::Unknown,
        }
    }

    /// Payments per year, `None` when unknown.
    pub fn payments_per_year(&self) -> Option<i64> {
        match self {
            Self::Weekly => Some(52),
            Self::Monthly => Some(12),
            Self::Quarterly => Some(4),
            Self::SemiAnnual => Some(2),
            Self::Annual => Some(1),
            Self::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::SemiAnnual => "semi-annual",
            Self::Annual => "annual",
            Self::Unknown => "unknown",
        }
    }
}

/// Core quote fields for any typology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    pub ticker: String,
    /// Exchange title, e.g. `NYSE`
    pub exchange: String,
    pub typology: Typology,
    pub full_name: String,
    pub currency: String,

    pub price: i64,
    pub price_change: i64,
    pub price_change_pct: i64,
    pub year_low: i64,
    pub year_high: i64,
    pub day_low: i64,
    pub day_high: i64,
    pub previous_close: i64,
    pub open: i64,
    pub bid: i64,
    pub bid_size: Option<i64>,
    pub ask: i64,
    pub ask_size: Option<i64>,

    pub market_cap: Option<i64>,
    pub volume: Option<i64>,
    pub avg_volume: Option<i64>,
    pub beta: Option<i64>,
    pub pe: Option<i64>,
    pub eps: Option<i64>,
    /// Timing of PE and EPS
    pub stm: Timing,

    pub sector: Option<String>,
    pub industry: Option<String>,
    pub sub_industry: Option<String>,
    pub consensus: Option<String>,
    pub score: Option<i64>,
    pub coverage: Option<i64>,
    pub shares_outstanding: Option<i64>,

    pub scraped_at: DateTime<Utc>,
}

/// Dividend snapshot. Present only when a yield was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub yield_pct: i64,
    pub timing: Timing,
    pub annual_payout: Option<i64>,
    pub payout_ratio: Option<i64>,
    pub growth_rate: Option<i64>,
    pub years_growth: Option<i64>,
    pub last_announced: Option<i64>,
    pub frequency: Option<Frequency>,
    pub ex_div_date: Option<NaiveDate>,
    pub payout_date: Option<NaiveDate>,
}

/// One line of an ETF's top holdings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub exchange: Option<String>,
    /// Portfolio weight ×100
    pub allocation: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EtfExtension {
    pub family: Option<String>,
    pub aum: Option<i64>,
    pub expense_ratio: Option<i64>,
    pub nav: Option<i64>,
    pub inception_date: Option<NaiveDate>,
    pub holdings: Vec<Holding>,
}

/// REIT-specific figures. No source currently provides any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReitExtension {
    pub ffo: Option<i64>,
    pub p_ffo: Option<i64>,
    pub occupation: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Extension {
    Etf(EtfExtension),
    Reit(ReitExtension),
}

/// Everything one successful scrape produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedSecurity {
    pub security: Security,
    pub dividend: Option<Dividend>,
    pub extension: Option<Extension>,
}

impl ScrapedSecurity {
    pub fn etf(&self) -> Option<&EtfExtension> {
        match &self.extension {
            Some(Extension::Etf(etf)) => Some(etf),
            _ => None,
        }
    }
}

/// Yearly payout ×100.
///
/// Last announced amount times payments per year when both are known,
/// otherwise price × yield (both ×100), floored. `None` on overflow.
pub fn annual_payout(
    last_announced: Option<i64>,
    frequency: Option<Frequency>,
    price: i64,
    yield_pct: i64,
) -> Option<i64> {
    match (last_announced, frequency.and_then(|f| f.payments_per_year())) {
        (Some(amount), Some(per_year)) => amount.checked_mul(per_year),
        _ => price
            .checked_mul(yield_pct)
            .map(|product| product.div_euclid(10_000)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Apple Inc.", Typology::Stock)]
    #[test_case("SPDR S&P 500 ETF Trust", Typology::Etf)]
    #[test_case("Grayscale Bitcoin Trust", Typology::Etf)]
    #[test_case("Realty Income REIT Corp", Typology::Reit)]
    fn test_typology_from_name(name: &str, expected: Typology) {
        assert_eq!(Typology::from_name(name), expected);
    }

    #[test]
    fn test_typology_parse() {
        assert_eq!("etf".parse::<Typology>().unwrap(), Typology::Etf);
        assert!(matches!("BOND".parse::<Typology>(), Err(ScrapeError::UnknownTypology(_))));
    }

    #[test_case("Quarterly", Frequency::Quarterly)]
    #[test_case("Semi-Annual", Frequency::SemiAnnual)]
    #[test_case("monthly", Frequency::Monthly)]
    #[test_case("sporadic", Frequency::Unknown)]
    fn test_frequency_parse(label: &str, expected: Frequency) {
        assert_eq!(Frequency::parse(label), expected);
    }

    #[test]
    fn test_annual_payout() {
        assert_eq!(annual_payout(Some(24), Some(Frequency::Quarterly), 15_025, 64), Some(96));
        // $150.25 at 0.64% yields $0.96
        assert_eq!(annual_payout(None, None, 15_025, 64), Some(96));
        assert_eq!(annual_payout(Some(24), Some(Frequency::Unknown), 10_000, 250), Some(250));
    }

    #[test]
    fn test_annual_payout_overflow_is_absent() {
        assert_eq!(annual_payout(None, None, 15_025, i64::MAX / 100), None);
        assert_eq!(annual_payout(Some(i64::MAX / 2), Some(Frequency::Monthly), 15_025, 64), None);
    }

    #[test]
    fn test_typology_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Typology::Reit).unwrap(), "\"REIT\"");
    }
}
