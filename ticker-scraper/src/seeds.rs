//! Seed normalisation, parsing and the CSV seed source.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::SeedError;
use crate::exchange::{self, Exchange};

/// File whose US symbols are also cross-listed in Toronto.
const CROSS_LISTED_SOURCE: &str = "canadian-stocks-us-stocks";

/// Canonical spelling of a raw symbol.
///
/// Uppercase, no whitespace, `/` and `.` become `-`, then a trailing
/// `-SUFFIX` naming a registered exchange suffix becomes `.SUFFIX`. Colon
/// forms keep their marker and skip the suffix rewrite. Idempotent.
pub fn normalize_seed(raw: &str) -> String {
    let mut seed: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .map(|c| if c == '/' || c == '.' { '-' } else { c })
        .collect();

    if seed.contains(':') {
        return seed;
    }

    if let Some(suffix) = exchange::suffixes().find(|s| {
        seed.len() > s.len() && seed.ends_with(s) && seed[..seed.len() - s.len()].ends_with('-')
    }) {
        let dash = seed.len() - suffix.len() - 1;
        seed.replace_range(dash..=dash, ".");
    }
    seed
}

/// A normalised ticker with its exchange, when the seed names one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub ticker: String,
    pub exchange: Option<&'static Exchange>,
}

impl Seed {
    /// Parse `TICKER`, `TICKER.SUFFIX` or `EXCHANGE:TICKER`.
    pub fn parse(raw: &str) -> Result<Self, SeedError> {
        let normalized = normalize_seed(raw);
        if normalized.is_empty() {
            return Err(SeedError::Empty);
        }

        if let Some((left, right)) = normalized.split_once(':') {
            // Either side may carry the exchange; left is the common form.
            let (ticker, exchange) = match exchange::by_title_or_prefix(left) {
                Some(exchange) => (right, exchange),
                None => {
                    let exchange = exchange::by_title_or_prefix(right)
                        .ok_or_else(|| SeedError::UnknownExchange(left.to_string()))?;
                    (left, exchange)
                }
            };
            return Self::qualified(ticker, exchange);
        }

        if let Some((ticker, suffix)) = normalized.rsplit_once('.') {
            let exchange =
                exchange::by_marker(suffix).ok_or_else(|| SeedError::UnknownExchange(suffix.to_string()))?;
            return Self::qualified(ticker, exchange);
        }

        Ok(Self {
            ticker: normalized,
            exchange: None,
        })
    }

    /// Seed for a ticker whose exchange is already known.
    pub fn with_exchange(ticker: &str, exchange: &'static Exchange) -> Result<Self, SeedError> {
        Self::qualified(&normalize_seed(ticker), exchange)
    }

    fn qualified(ticker: &str, exchange: &'static Exchange) -> Result<Self, SeedError> {
        if ticker.is_empty() || ticker == "-" {
            return Err(SeedError::Empty);
        }
        Ok(Self {
            ticker: ticker.to_string(),
            exchange: Some(exchange),
        })
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exchange {
            Some(exchange) => write!(f, "{}:{}", exchange.title, self.ticker),
            None => f.write_str(&self.ticker),
        }
    }
}

/// Index of the first header containing "symbol" or "ticker", case-insensitively.
pub fn symbol_column(headers: &csv::StringRecord) -> Option<usize> {
    headers.iter().position(|h| {
        let lower = h.to_lowercase();
        lower.contains("symbol") || lower.contains("ticker")
    })
}

/// Normalised, deduplicated symbols from one CSV file.
pub fn read_seed_file(path: &Path) -> Result<Vec<String>, SeedError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(File::open(path)?);

    let column = symbol_column(reader.headers()?).ok_or_else(|| SeedError::MissingColumn {
        path: path.display().to_string(),
    })?;
    let cross_listed = path.to_string_lossy().contains(CROSS_LISTED_SOURCE);

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(raw) = record.get(column) else {
            continue;
        };
        let symbol = normalize_seed(raw);
        if symbol.is_empty() {
            continue;
        }

        if cross_listed {
            let variant = format!("{symbol}.TO");
            if seen.insert(variant.clone()) {
                symbols.push(variant);
            }
        }
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    debug!(path = %path.display(), count = symbols.len(), "Read seed file");
    Ok(symbols)
}

/// All seed files under a directory, filtered and deduplicated.
#[derive(Debug, Clone)]
pub struct SeedSource {
    dir: PathBuf,
    max_symbol_len: usize,
}

impl SeedSource {
    pub fn new(dir: impl Into<PathBuf>, max_symbol_len: usize) -> Self {
        Self {
            dir: dir.into(),
            max_symbol_len,
        }
    }

    /// Symbols from every `*.csv` below the directory, shorter than the length cap.
    ///
    /// A file without a symbol column is skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<String>, SeedError> {
        let mut files = Vec::new();
        collect_csv_files(&self.dir, &mut files)?;
        files.sort();

        let mut seen = HashSet::new();
        let mut seeds = Vec::new();
        for file in &files {
            let symbols = match read_seed_file(file) {
                Ok(symbols) => symbols,
                Err(e @ SeedError::MissingColumn { .. }) => {
                    warn!(error = %e, "Skipping seed file");
                    continue;
                }
                Err(e) => return Err(e),
            };
            seeds.extend(
                symbols
                    .into_iter()
                    .filter(|s| s.len() < self.max_symbol_len)
                    .filter(|s| seen.insert(s.clone())),
            );
        }

        info!(files = files.len(), seeds = seeds.len(), "Loaded seeds");
        Ok(seeds)
    }

    /// Shuffled batch of at most `load` seeds.
    ///
    /// `suffix` narrows the batch: `"."` keeps unsuffixed symbols only, any
    /// other value keeps symbols ending in `.{suffix}`.
    pub fn batch(&self, load: usize, suffix: Option<&str>) -> Result<Vec<String>, SeedError> {
        let mut seeds = self.read_all()?;
        seeds.shuffle(&mut rand::thread_rng());
        Ok(select_batch(seeds, load, suffix))
    }
}

pub fn select_batch(seeds: Vec<String>, load: usize, suffix: Option<&str>) -> Vec<String> {
    let filtered = seeds.into_iter().filter(|seed| match suffix {
        None => true,
        Some(".") => !seed.contains('.'),
        Some(suffix) => seed.ends_with(&format!(".{}", suffix.to_uppercase())),
    });
    filtered.take(load).collect()
}

fn collect_csv_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_csv_files(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        {
            out.push(path);
        }
    }
    Ok(())
}
