//! Append-only ledger of tickers found while crawling.
//!
//! The ledger lives in the seed directory, so tickers it records are picked
//! up by the next run's [`SeedSource`](crate::seeds::SeedSource).

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::SeedError;
use crate::seeds::{normalize_seed, symbol_column};

const LEDGER_HEADER: &str = "Symbol";

struct Ledger {
    file: File,
    seen: HashSet<String>,
    discoveries: usize,
}

/// Thread-safe, write-through set of known tickers.
pub struct Discoverer {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl Discoverer {
    /// Open the ledger at `path`, creating it with a header if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SeedError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let seen = if path.exists() && std::fs::metadata(&path)?.len() > 0 {
            load_entries(&path)?
        } else {
            std::fs::write(&path, format!("{LEDGER_HEADER}\n"))?;
            HashSet::new()
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        info!(path = %path.display(), known = seen.len(), "Loaded discovery ledger");

        Ok(Self {
            path,
            ledger: Mutex::new(Ledger {
                file,
                seen,
                discoveries: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `ticker` if it is new. Returns whether a line was written.
    pub fn collect(&self, ticker: &str) -> Result<bool, SeedError> {
        let ticker = normalize_seed(ticker);
        if ticker.is_empty() {
            return Err(SeedError::Empty);
        }

        let mut ledger = self.lock();
        if ledger.seen.contains(&ticker) {
            return Ok(false);
        }

        // Disk first: the set never holds a ticker the file is missing.
        let mut writer = csv::Writer::from_writer(&mut ledger.file);
        writer.write_record([ticker.as_str()])?;
        writer.flush()?;
        drop(writer);

        ledger.seen.insert(ticker.clone());
        ledger.discoveries += 1;
        info!(seed = %ticker, "Discovered new seed");
        Ok(true)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.lock().seen.contains(&normalize_seed(ticker))
    }

    /// Tickers known to the ledger, including those loaded at open.
    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tickers added since this instance was opened.
    pub fn discoveries(&self) -> usize {
        self.lock().discoveries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and log how many tickers this instance added.
    pub fn close(self) -> Result<usize, SeedError> {
        let mut ledger = self.ledger.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        ledger.file.flush()?;
        info!(discovered = ledger.discoveries, "Closed discovery ledger");
        Ok(ledger.discoveries)
    }
}

fn load_entries(path: &Path) -> Result<HashSet<String>, SeedError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let column = symbol_column(reader.headers()?).ok_or_else(|| SeedError::MissingColumn {
        path: path.display().to_string(),
    })?;

    let mut seen = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(raw) = record.get(column) {
            let ticker = normalize_seed(raw);
            if !ticker.is_empty() {
                seen.insert(ticker);
            }
        }
    }
    debug!(count = seen.len(), "Read discovery ledger");
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn data_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_collect_twice_writes_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seeds/discovered.csv");
        let discoverer = Discoverer::open(&path).unwrap();

        assert!(discoverer.collect("aapl").unwrap());
        assert!(!discoverer.collect("AAPL ").unwrap());
        assert_eq!(data_lines(&path), vec!["AAPL"]);
        assert_eq!(discoverer.discoveries(), 1);
    }

    #[test]
    fn test_reopen_keeps_dedup_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("discovered.csv");
        {
            let discoverer = Discoverer::open(&path).unwrap();
            discoverer.collect("RY-TO").unwrap();
            assert_eq!(discoverer.close().unwrap(), 1);
        }

        let reopened = Discoverer::open(&path).unwrap();
        assert!(reopened.contains("RY.TO"));
        assert!(!reopened.collect("ry.to").unwrap());
        assert_eq!(reopened.discoveries(), 0);
        assert_eq!(data_lines(&path), vec!["RY.TO"]);
    }

    #[test]
    fn test_existing_ledger_header_detection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("discovered.csv");
        std::fs::write(&path, "name,ticker\nApple,aapl\n").unwrap();

        let discoverer = Discoverer::open(&path).unwrap();
        assert!(discoverer.contains("AAPL"));
        assert_eq!(discoverer.len(), 1);
    }

    #[test]
    fn test_empty_ticker_rejected() {
        let dir = tempdir().unwrap();
        let discoverer = Discoverer::open(dir.path().join("d.csv")).unwrap();
        assert!(matches!(discoverer.collect("  "), Err(SeedError::Empty)));
        assert!(discoverer.is_empty());
    }

    #[test]
    fn test_concurrent_collect_single_line_per_ticker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("discovered.csv");
        let discoverer = Arc::new(Discoverer::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let discoverer = discoverer.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        discoverer.collect(&format!("T{i}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut lines = data_lines(&path);
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), 20);
        assert_eq!(data_lines(&path).len(), 20);
        assert_eq!(discoverer.discoveries(), 20);
    }
}
