//! Configuration validation for Hitwarden.
//!
//! Checks engine limits, logging, the webhook destination and, when a
//! fixtures file is configured, every seeded correlation rule.

use colored::Colorize;
use hw_core::RuleType;
use hw_correlation::scheduler::parse_crontab;
use hw_correlation::Rule;
use tracing::Level;

use crate::config::AppConfig;
use crate::fixtures::Fixtures;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Problems that prevent startup.
    pub errors: Vec<String>,
    /// Problems worth a look that do not prevent startup.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Prints the validation result to the console.
    pub fn print(&self) {
        if !self.warnings.is_empty() {
            println!();
            println!("{}", "Configuration Warnings:".yellow().bold());
            for warning in &self.warnings {
                println!("  {} {}", "⚠".yellow(), warning);
            }
        }

        if !self.errors.is_empty() {
            println!();
            println!("{}", "Configuration Errors:".red().bold());
            for error in &self.errors {
                println!("  {} {}", "✗".red(), error);
            }
        }

        if self.errors.is_empty() && self.warnings.is_empty() {
            println!("  {} Configuration OK", "✓".green());
        }
    }
}

/// Validates application configuration before startup.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &AppConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        Self::validate_engine(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_webhook(config, &mut result);
        Self::validate_fixtures(config, &mut result);
        result
    }

    fn validate_engine(config: &AppConfig, result: &mut ValidationResult) {
        let engine = &config.engine;
        if engine.transitions.row_cap == 0 {
            result.add_error("engine.transitions.row_cap must be greater than 0");
        }
        if engine.transitions.progress_interval == 0 {
            result.add_error("engine.transitions.progress_interval must be greater than 0");
        }
        if engine.correlation.max_matches == 0 {
            result.add_error("engine.correlation.max_matches must be greater than 0");
        }
        if engine.bulk.max_backoff_seconds == 0 {
            result.add_warning(
                "engine.bulk.max_backoff_seconds is 0: transient store failures are retried without pause",
            );
        }
        if !engine.correlation.enabled {
            result.add_warning("Correlation is disabled: no rules will be scheduled");
        }
        if !engine.automation.enabled {
            result.add_warning("Automation is disabled: stored actions will never run");
        }
    }

    fn validate_logging(config: &AppConfig, result: &mut ValidationResult) {
        if config.logging.level.parse::<Level>().is_err() {
            result.add_warning(format!(
                "Unknown log level '{}', falling back to info",
                config.logging.level
            ));
        }
    }

    fn validate_webhook(config: &AppConfig, result: &mut ValidationResult) {
        let Some(webhook) = &config.webhook else {
            return;
        };
        if webhook.url.trim().is_empty() {
            result.add_error("webhook.url is empty");
        } else if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
            result.add_error(format!("webhook.url '{}' is not an http(s) URL", webhook.url));
        } else if webhook.url.starts_with("http://") {
            result.add_warning("webhook.url uses plain HTTP");
        }
        if webhook.bearer_token.is_none() {
            result.add_warning("webhook has no bearer_token; requests are unauthenticated");
        }
    }

    fn validate_fixtures(config: &AppConfig, result: &mut ValidationResult) {
        let Some(path) = &config.fixtures else {
            return;
        };
        let fixtures = match Fixtures::load(path) {
            Ok(fixtures) => fixtures,
            Err(e) => {
                result.add_error(format!("{:#}", e));
                return;
            }
        };

        for analytic in fixtures.analytics() {
            let Some(rule) = analytic.rule.as_deref().filter(|_| analytic.has_rule()) else {
                continue;
            };
            let rule_type = analytic.rule_type.unwrap_or(RuleType::Lucene);
            if let Err(e) = Rule::compile(rule_type, rule) {
                result.add_error(format!("Analytic '{}': {}", analytic.name, e));
            }
            if let Some(crontab) = analytic.rule_crontab.as_deref() {
                if let Err(e) = parse_crontab(crontab) {
                    result.add_error(format!("Analytic '{}': {}", analytic.name, e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;

    #[test]
    fn test_default_config_is_valid() {
        let result = ConfigValidator::validate(&AppConfig::default());
        assert!(!result.has_errors());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_engine_limits() {
        let mut config = AppConfig::default();
        config.engine.transitions.row_cap = 0;
        config.engine.correlation.enabled = false;

        let result = ConfigValidator::validate(&config);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("row_cap"));
        assert!(result.warnings.iter().any(|w| w.contains("Correlation is disabled")));
    }

    #[test]
    fn test_webhook() {
        let mut config = AppConfig::default();
        config.webhook = Some(WebhookConfig {
            name: "soar".to_string(),
            url: "ftp://soar.example.com".to_string(),
            bearer_token: Some("token".to_string()),
        });
        let result = ConfigValidator::validate(&config);
        assert!(result.errors[0].contains("not an http(s) URL"));
    }

    #[test]
    fn test_fixture_rules_are_compiled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"{"analytics": [
                {"name": "Good", "rule": "analytic:Good", "rule_type": "lucene", "rule_crontab": "*/5 * * * *"},
                {"name": "Bad Query", "rule": "analytic:(Bad", "rule_type": "lucene"},
                {"name": "Bad Cron", "rule": "analytic:Cron", "rule_crontab": "sometimes"}
            ]}"#,
        )
        .unwrap();

        let config = AppConfig {
            fixtures: Some(path),
            ..Default::default()
        };
        let result = ConfigValidator::validate(&config);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().any(|e| e.starts_with("Analytic 'Bad Query'")));
        assert!(result.errors.iter().any(|e| e.starts_with("Analytic 'Bad Cron'")));
    }

    #[test]
    fn test_missing_fixtures_file() {
        let config = AppConfig {
            fixtures: Some("/nonexistent/seed.json".into()),
            ..Default::default()
        };
        let result = ConfigValidator::validate(&config);
        assert!(result.errors[0].contains("Failed to read fixtures"));
    }
}
