//! Engine configuration.
//!
//! Every field has a default so partial YAML/JSON documents deserialize.

use serde::{Deserialize, Serialize};

/// Configuration for the triage engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bulk: BulkConfig,
    pub transitions: TransitionConfig,
    pub correlation: CorrelationConfig,
    pub automation: AutomationConfig,
}

/// Retry behaviour of the bulk update coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Upper bound on the sleep between retries (seconds).
    pub max_backoff_seconds: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_backoff_seconds: 10,
        }
    }
}

/// Limits for bulk transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Maximum number of hits one bulk transition touches.
    pub row_cap: usize,
    /// Emit a progress event every this many hits.
    pub progress_interval: usize,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            row_cap: 1000,
            progress_interval: 25,
        }
    }
}

/// Correlation scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Whether rules are scheduled at all.
    pub enabled: bool,
    /// Maximum number of hits a single rule run may bundle.
    pub max_matches: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_matches: 1000,
        }
    }
}

/// Automation dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Whether lifecycle triggers dispatch stored actions.
    pub enabled: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.bulk.max_backoff_seconds, 10);
        assert_eq!(config.transitions.row_cap, 1000);
        assert_eq!(config.transitions.progress_interval, 25);
        assert!(config.correlation.enabled);
        assert!(config.automation.enabled);
    }

    #[test]
    fn test_partial_document() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"transitions": {"row_cap": 50}}"#).unwrap();
        assert_eq!(config.transitions.row_cap, 50);
        assert_eq!(config.transitions.progress_interval, 25);
        assert_eq!(config.bulk.max_backoff_seconds, 10);
    }
}
