//! Logging infrastructure for Hitwarden.
//!
//! This module provides structured logging using the tracing ecosystem.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level.
    pub level: Level,
    /// Whether to use JSON format.
    pub json_format: bool,
    /// Whether to include span events.
    pub include_spans: bool,
    /// Whether to include file/line info.
    pub include_location: bool,
    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: true,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Creates a development configuration with more verbose output.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json_format: false,
            include_spans: true,
            include_location: true,
            include_target: true,
        }
    }

    /// Creates a production configuration with JSON output.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json_format: true,
            include_spans: false,
            include_location: false,
            include_target: true,
        }
    }

    /// Parses a level name (`trace`, `debug`, `info`, `warn`, `error`),
    /// falling back to `info` for anything else.
    pub fn with_level_name(mut self, level: &str) -> Self {
        self.level = level.parse().unwrap_or(Level::INFO);
        self
    }

    fn filter_directives(&self) -> String {
        [
            "hw_core",
            "hw_actions",
            "hw_correlation",
            "hw_observability",
            "hitwarden",
        ]
        .iter()
        .map(|target| format!("{}={}", target, self.level))
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// Initializes the logging system with default configuration.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Initializes the logging system with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging_with_config(config: LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let span_events = if config.include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }
}

/// Creates a span for work scoped to a single hit.
#[macro_export]
macro_rules! hit_span {
    ($hit_id:expr) => {
        tracing::info_span!("hit", hit_id = %$hit_id)
    };
    ($hit_id:expr, $($field:tt)*) => {
        tracing::info_span!("hit", hit_id = %$hit_id, $($field)*)
    };
}

/// Creates a span for a correlation rule run.
#[macro_export]
macro_rules! rule_span {
    ($analytic_id:expr, $analytic:expr) => {
        tracing::info_span!("rule", analytic_id = %$analytic_id, analytic = %$analytic)
    };
}
