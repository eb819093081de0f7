//! Configuration validation.
//!
//! Every section implements [`Validate`]; [`Config::validate`] collects all
//! section errors so a bad config file is reported in one pass.

use std::str::FromStr;
use thiserror::Error;

use crate::config::{
    BrowserConfig, Config, ObservabilityConfig, PathsConfig, PoolConfig, ScheduleConfig,
    ScraperConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Number of individual problems carried by this error.
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.iter().map(Self::count).sum(),
            _ => 1,
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn collect(errors: Vec<ValidationError>) -> ValidationResult<()> {
    let mut errors = errors;
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.observability,
            &self.scraper,
            &self.pool,
            &self.browser,
            &self.paths,
            &self.schedule,
        ];

        let errors = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .collect();

        collect(errors)
    }

    /// Load, apply environment overrides, and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(ValidationError::invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            errors.push(ValidationError::invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        collect(errors)
    }
}

impl Validate for ScraperConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.concurrency == 0 {
            errors.push(ValidationError::invalid(
                "scraper.concurrency",
                "must be at least 1",
            ));
        }

        if self.element_timeout_secs == 0 {
            errors.push(ValidationError::invalid(
                "scraper.element_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.navigation_timeout_secs == 0 {
            errors.push(ValidationError::invalid(
                "scraper.navigation_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.default_load == Some(0) {
            errors.push(ValidationError::invalid(
                "scraper.default_load",
                "must be greater than 0 when set",
            ));
        }

        if self.max_symbol_len < 2 {
            errors.push(ValidationError::invalid(
                "scraper.max_symbol_len",
                "must be at least 2",
            ));
        }

        collect(errors)
    }
}

impl Validate for PoolConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.max_requests == 0 {
            errors.push(ValidationError::invalid(
                "pool.max_requests",
                "must be greater than 0",
            ));
        }

        if !(self.memory_threshold_pct > 0.0 && self.memory_threshold_pct <= 100.0) {
            errors.push(ValidationError::invalid(
                "pool.memory_threshold_pct",
                "must be in (0, 100]",
            ));
        }

        if self.monitor_interval_secs == 0 {
            errors.push(ValidationError::invalid(
                "pool.monitor_interval_secs",
                "must be greater than 0",
            ));
        }

        if self.health_failure_threshold == 0 {
            errors.push(ValidationError::invalid(
                "pool.health_failure_threshold",
                "must be at least 1",
            ));
        }

        if self.probe_timeout_secs == 0 {
            errors.push(ValidationError::invalid(
                "pool.probe_timeout_secs",
                "must be greater than 0",
            ));
        }

        collect(errors)
    }
}

impl Validate for BrowserConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(ValidationError::invalid(
                "browser.viewport",
                "width and height must be greater than 0",
            ));
        }

        if let Some(ref path) = self.chrome_path {
            if path.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "browser.chrome_path".into(),
                });
            }
        }

        Ok(())
    }
}

impl Validate for PathsConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (field, path) in [
            ("paths.seed_dir", &self.seed_dir),
            ("paths.discovered_ledger", &self.discovered_ledger),
            ("paths.database", &self.database),
            ("paths.report_dir", &self.report_dir),
        ] {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: field.into(),
                });
            }
        }

        collect(errors)
    }
}

impl Validate for ScheduleConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (field, expr) in [
            ("schedule.discovery_cron", &self.discovery_cron),
            ("schedule.cleanup_cron", &self.cleanup_cron),
        ] {
            if let Err(e) = cron::Schedule::from_str(expr) {
                errors.push(ValidationError::invalid(
                    field,
                    format!("invalid cron expression '{expr}': {e}"),
                ));
            }
        }

        if self.report_retention_days == Some(0) {
            errors.push(ValidationError::invalid(
                "schedule.report_retention_days",
                "must be at least 1 when set",
            ));
        }

        collect(errors)
    }
}
