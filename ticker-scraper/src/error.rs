//! Error types for seeds, parsing, scraping and persistence.

use thiserror::Error;
use ticker_browser::BrowserError;

/// Failure to turn page text into a scaled integer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty value")]
    Empty,

    #[error("not a number: {0:?}")]
    NotNumeric(String),

    #[error("value out of range: {0:?}")]
    Overflow(String),
}

/// Failure while reading or interpreting seeds.
#[derive(Error, Debug)]
pub enum SeedError {
    #[error("empty seed")]
    Empty,

    #[error("unknown exchange {0:?}")]
    UnknownExchange(String),

    #[error("no symbol or ticker column in {path}")]
    MissingColumn { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a single ticker could not be scraped.
///
/// Every variant is a hard failure for that ticker only.
#[derive(Error, Debug, Clone)]
pub enum ScrapeError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("could not resolve exchange: {0}")]
    ExchangeNotFound(String),

    #[error("currency mismatch: expected {expected}, page shows {found}")]
    CurrencyMismatch { expected: String, found: String },

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("inverted {field}: high {high} < low {low}")]
    InvertedRange { field: &'static str, low: i64, high: i64 },

    #[error("unknown typology {0:?}")]
    UnknownTypology(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("worker crashed: {0}")]
    Crashed(String),

    #[error("cancelled before start")]
    Cancelled,
}

impl ScrapeError {
    /// Severity written to the failure report.
    pub fn severity(&self) -> &'static str {
        match self {
            Self::Crashed(_) => "PANIC",
            _ => "ERROR",
        }
    }
}

/// Failure of the persistence collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_severity() {
        assert_eq!(ScrapeError::Crashed("boom".into()).severity(), "PANIC");
        assert_eq!(ScrapeError::MissingField("price").severity(), "ERROR");
    }

    #[test]
    fn test_mismatch_message() {
        let err = ScrapeError::CurrencyMismatch {
            expected: "USD".into(),
            found: "EUR".into(),
        };
        assert_eq!(err.to_string(), "currency mismatch: expected USD, page shows EUR");
    }
}
