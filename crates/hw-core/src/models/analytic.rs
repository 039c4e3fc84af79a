//! Analytics: the named source of hits and owner of an optional
//! correlation rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::InvalidDataError;

/// Supported correlation rule languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Native query language.
    Lucene,
    /// Sequence language.
    Eql,
    /// Declarative detection rules, translated to the native query language.
    Sigma,
}

impl RuleType {
    /// Returns the rule type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Lucene => "lucene",
            RuleType::Eql => "eql",
            RuleType::Sigma => "sigma",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = InvalidDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lucene" => Ok(RuleType::Lucene),
            "eql" => Ok(RuleType::Eql),
            "sigma" => Ok(RuleType::Sigma),
            other => Err(InvalidDataError::new(format!(
                "Unsupported rule type: {}",
                other
            ))),
        }
    }
}

/// The named source of hits sharing one detection logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<RuleType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_crontab: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Analytic {
    /// Creates an analytic without a rule.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            owner: None,
            rule: None,
            rule_type: None,
            rule_crontab: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches a correlation rule.
    pub fn with_rule(
        mut self,
        rule: impl Into<String>,
        rule_type: RuleType,
        crontab: impl Into<String>,
    ) -> Self {
        self.rule = Some(rule.into());
        self.rule_type = Some(rule_type);
        self.rule_crontab = Some(crontab.into());
        self
    }

    /// Sets the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Whether the analytic carries a non-empty rule.
    pub fn has_rule(&self) -> bool {
        self.rule
            .as_deref()
            .map(|rule| !rule.trim().is_empty())
            .unwrap_or(false)
    }
}
