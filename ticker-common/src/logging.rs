//! Logging setup for the ticker scraper.
//!
//! Structured JSON output for production runs, human-readable output otherwise.
//!
//! # Noise Filtering
//!
//! The CDP client and its websocket stack log every protocol frame at debug level.
//! Those modules are held at `warn` so scrape logs stay readable.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Library modules forced to `warn` unless `RUST_LOG` says otherwise.
pub const NOISY_MODULES: &[&str] = &[
    "chromiumoxide",
    "chromiumoxide::conn",
    "chromiumoxide::handler",
    "tungstenite",
    "async_tungstenite",
    "hyper",
    "rusqlite",
    "tokio_util",
];

/// Build the filter directive string for a base level and extra exclusions.
pub fn filter_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{target}=warn"));
    }

    directives
}

fn build_filter(log_level: &str, excluded_targets: &[String]) -> EnvFilter {
    // RUST_LOG wins when set
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(log_level, excluded_targets)))
}

/// Initialize logging.
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured output, anything else for pretty output
///
/// Calling this twice is harmless; the second subscriber is discarded.
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_exclusions(log_level, log_format, &[]);
}

/// Initialize logging with additional excluded targets.
pub fn init_logging_with_exclusions(log_level: &str, log_format: &str, excluded_targets: &[String]) {
    let filter = build_filter(log_level, excluded_targets);
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Initialize logging from the observability section of the config.
pub fn init_from_config(config: &ObservabilityConfig) {
    init_logging_with_exclusions(&config.log_level, &config.log_format, &config.excluded_targets);
}

/// Generate an identifier for a scrape run. Attached to every log line of the run.
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Open the tracing span that groups all logs of one batch run.
#[macro_export]
macro_rules! run_span {
    ($run_id:expr, $seeds:expr) => {
        tracing::info_span!("scrape_run", run_id = %$run_id, seeds = $seeds)
    };
}
