//! Configuration loading for the Hitwarden CLI.

use anyhow::{Context, Result};
use hw_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Triage engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// JSON seed file loaded into the in-memory store at startup.
    #[serde(default)]
    pub fixtures: Option<PathBuf>,

    /// Destination of the `send_to_external` operation. The operation is
    /// only offered when this is set.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl AppConfig {
    /// Loads configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Creates a copy with secrets redacted.
    pub fn redact_secrets(&self) -> Self {
        let mut config = self.clone();
        if let Some(webhook) = config.webhook.as_mut() {
            if webhook.bearer_token.is_some() {
                webhook.bearer_token = Some("***REDACTED***".to_string());
            }
        }
        config
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Webhook destination for hits sent outside the triage system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Destination name shown in reports.
    #[serde(default = "default_webhook_name")]
    pub name: String,

    pub url: String,

    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_webhook_name() -> String {
    "webhook".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.transitions.row_cap, 1000);
        assert!(config.engine.correlation.enabled);
        assert!(config.fixtures.is_none());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
engine:
  transitions:
    row_cap: 200
  correlation:
    enabled: false

logging:
  level: debug
  json: true

fixtures: seed/hits.json

webhook:
  url: https://soar.example.com/hooks/hits
  bearer_token: ${SOAR_TOKEN}
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.engine.transitions.row_cap, 200);
        assert_eq!(config.engine.transitions.progress_interval, 25);
        assert!(!config.engine.correlation.enabled);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.fixtures, Some(PathBuf::from("seed/hits.json")));

        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.name, "webhook");
        assert_eq!(webhook.url, "https://soar.example.com/hooks/hits");
    }

    #[test]
    fn test_redact_secrets() {
        let config = AppConfig {
            webhook: Some(WebhookConfig {
                name: "soar".to_string(),
                url: "https://soar.example.com".to_string(),
                bearer_token: Some("secret".to_string()),
            }),
            ..Default::default()
        };

        let redacted = config.redact_secrets();
        assert_eq!(
            redacted.webhook.unwrap().bearer_token.as_deref(),
            Some("***REDACTED***")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hitwarden.yaml");

        let mut config = AppConfig::default();
        config.engine.correlation.max_matches = 50;
        config.logging.level = "warn".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.engine, config.engine);
        assert_eq!(loaded.logging.level, "warn");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
