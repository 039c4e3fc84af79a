//! # hw-observability
//!
//! Logging and metrics infrastructure for Hitwarden.
//!
//! This crate provides structured logging with tracing and the metric
//! descriptions recorded by the triage core, the automation dispatcher and
//! the correlation scheduler.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::MetricsCollector;
