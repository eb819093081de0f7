//! Ticker Common - Shared configuration and utilities for the ticker scraper.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Logging setup and structured logging helpers
//! - Utility functions used across the workspace

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    BrowserConfig, Config, Environment, ObservabilityConfig, PathsConfig, PoolConfig,
    ScheduleConfig, ScraperConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};
