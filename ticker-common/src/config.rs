//! Configuration management for the ticker scraper.
//!
//! The scraper reads a single configuration file at `~/.ticker-scraper/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (TICKER_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TICKER_ENV` → environment (development | production)
//! - `TICKER_LOG_LEVEL` → observability.log_level
//! - `TICKER_LOG_FORMAT` → observability.log_format
//! - `TICKER_CONCURRENCY` → scraper.concurrency
//! - `TICKER_SEED_DIR` → paths.seed_dir
//! - `TICKER_DATABASE_PATH` → paths.database
//! - `CHROME_PATH` → browser.chrome_path

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".ticker-scraper"),
        |dirs| dirs.home_dir().join(".ticker-scraper"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Environment
// ============================================================================

/// Deployment environment. Production runs larger batches with fewer workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Parse an environment name, accepting the short forms used in deploy scripts.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to force down to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Scraper
// ============================================================================

/// Scrape orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Maximum number of concurrent scrape workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Bounded wait for each DOM lookup, in seconds
    #[serde(default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,

    /// Bounded wait for page navigation, in seconds
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Seeds per discovery batch. Falls back to 750 in production, 50 otherwise.
    #[serde(default)]
    pub default_load: Option<usize>,

    /// Symbols at least this long are dropped from seed files
    #[serde(default = "default_max_symbol_len")]
    pub max_symbol_len: usize,

    /// Run the background mouse-movement routine on each page
    #[serde(default = "default_true")]
    pub human_behavior: bool,

    /// Visit MarketBeat and DividendHistory before the quote page
    #[serde(default = "default_true")]
    pub enrich: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            element_timeout_secs: default_element_timeout_secs(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            default_load: None,
            max_symbol_len: default_max_symbol_len(),
            human_behavior: true,
            enrich: true,
        }
    }
}

impl ScraperConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Batch size for discovery runs in the given environment.
    pub fn batch_load(&self, environment: Environment) -> usize {
        self.default_load.unwrap_or(if environment.is_production() {
            750
        } else {
            50
        })
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_element_timeout_secs() -> u64 {
    5
}

fn default_navigation_timeout_secs() -> u64 {
    10
}

fn default_max_symbol_len() -> usize {
    6
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Browser pool
// ============================================================================

/// Browser pool rotation and monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Requests served by one session before it is rotated
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Host memory usage (percent) that triggers a rotation
    #[serde(default = "default_memory_threshold_pct")]
    pub memory_threshold_pct: f64,

    /// Interval between memory and health checks, in seconds
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Consecutive failed probes before the active session is rotated
    #[serde(default = "default_health_failure_threshold")]
    pub health_failure_threshold: u32,

    /// Timeout for a single liveness probe, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            memory_threshold_pct: default_memory_threshold_pct(),
            monitor_interval_secs: default_monitor_interval_secs(),
            health_failure_threshold: default_health_failure_threshold(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl PoolConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_max_requests() -> u32 {
    100
}

fn default_memory_threshold_pct() -> f64 {
    70.0
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_health_failure_threshold() -> u32 {
    3
}

fn default_probe_timeout_secs() -> u64 {
    10
}

// ============================================================================
// Browser launch
// ============================================================================

/// Headless browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chrome sandbox. Disabled by default since the scraper usually runs in a container.
    #[serde(default)]
    pub sandbox: bool,

    /// Explicit Chrome/Chromium binary
    #[serde(default)]
    pub chrome_path: Option<String>,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    /// Extra command-line switches passed to Chrome
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: false,
            chrome_path: None,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            extra_args: Vec::new(),
        }
    }
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

// ============================================================================
// Paths
// ============================================================================

/// Filesystem locations for inputs and outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory of delimited seed files
    #[serde(default = "default_seed_dir")]
    pub seed_dir: PathBuf,

    /// Append-only ledger of discovered tickers
    #[serde(default = "default_discovered_ledger")]
    pub discovered_ledger: PathBuf,

    /// SQLite database for scraped securities
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Directory for per-run failure reports
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            seed_dir: default_seed_dir(),
            discovered_ledger: default_discovered_ledger(),
            database: default_database(),
            report_dir: default_report_dir(),
        }
    }
}

fn default_seed_dir() -> PathBuf {
    PathBuf::from("seeds")
}

fn default_discovered_ledger() -> PathBuf {
    PathBuf::from("seeds/discovered.csv")
}

fn default_database() -> PathBuf {
    PathBuf::from("data/securities.db")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

// ============================================================================
// Schedule
// ============================================================================

/// Periodic job configuration.
///
/// Cron expressions use the six-field form (seconds first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Daily discovery batch from the seed files
    #[serde(default = "default_discovery_cron")]
    pub discovery_cron: String,

    /// Daily removal of expired failure reports
    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,

    /// Days to keep failure reports. Falls back to 7 in production, 1 otherwise.
    #[serde(default)]
    pub report_retention_days: Option<u32>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            discovery_cron: default_discovery_cron(),
            cleanup_cron: default_cleanup_cron(),
            report_retention_days: None,
        }
    }
}

impl ScheduleConfig {
    pub fn report_retention(&self, environment: Environment) -> Duration {
        let days = self
            .report_retention_days
            .unwrap_or(if environment.is_production() { 7 } else { 1 });
        Duration::from_secs(u64::from(days) * 86_400)
    }
}

fn default_discovery_cron() -> String {
    "0 0 9 * * *".into()
}

fn default_cleanup_cron() -> String {
    "0 0 0 * * *".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply process environment overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("TICKER_ENV").as_deref().and_then(Environment::parse) {
            self.environment = env;
        }

        if let Some(level) = lookup("TICKER_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(format) = lookup("TICKER_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Some(concurrency) = lookup("TICKER_CONCURRENCY") {
            match concurrency.parse() {
                Ok(n) => self.scraper.concurrency = n,
                Err(_) => tracing::warn!(value = %concurrency, "Ignoring invalid TICKER_CONCURRENCY"),
            }
        }

        if let Some(dir) = lookup("TICKER_SEED_DIR") {
            self.paths.seed_dir = PathBuf::from(dir);
        }

        if let Some(db) = lookup("TICKER_DATABASE_PATH") {
            self.paths.database = PathBuf::from(db);
        }

        if let Some(chrome) = lookup("CHROME_PATH") {
            self.browser.chrome_path = Some(chrome);
        }
    }
}
