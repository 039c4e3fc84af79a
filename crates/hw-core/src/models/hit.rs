//! Hit data model.
//!
//! A hit is a single triaged security alert. Bundles are hits with
//! `is_bundle` set that group other hits as evidence of one incident.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::InvalidDataError;

/// Assignment value of a hit nobody has claimed.
pub const UNASSIGNED: &str = "unassigned";

/// Lifecycle status of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HitStatus {
    /// Not yet worked on.
    #[default]
    Open,
    /// Claimed by an analyst.
    InProgress,
    /// Work paused.
    OnHold,
    /// Assessed and closed.
    Resolved,
}

impl HitStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [HitStatus; 4] = [
        HitStatus::Open,
        HitStatus::InProgress,
        HitStatus::OnHold,
        HitStatus::Resolved,
    ];

    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            HitStatus::Open => "open",
            HitStatus::InProgress => "in-progress",
            HitStatus::OnHold => "on-hold",
            HitStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for HitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HitStatus {
    type Err = InvalidDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HitStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| InvalidDataError::new(format!("Invalid hit status: {}", s)))
    }
}

/// Escalation tier of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Escalation {
    /// Assessed as not worth escalating.
    Miss,
    /// Raw detection.
    #[default]
    Hit,
    /// Promoted for analyst attention.
    Alert,
    /// Confirmed as evidence of an incident.
    Evidence,
}

impl Escalation {
    /// All escalation tiers, lowest first.
    pub const ALL: [Escalation; 4] = [
        Escalation::Miss,
        Escalation::Hit,
        Escalation::Alert,
        Escalation::Evidence,
    ];

    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Escalation::Miss => "miss",
            Escalation::Hit => "hit",
            Escalation::Alert => "alert",
            Escalation::Evidence => "evidence",
        }
    }

    /// Ordering used by promote and demote.
    pub fn rank(&self) -> u8 {
        match self {
            Escalation::Miss => 0,
            Escalation::Hit => 1,
            Escalation::Alert => 2,
            Escalation::Evidence => 3,
        }
    }

    /// Whether a hit at this tier must carry an assessment.
    pub fn requires_assessment(&self) -> bool {
        matches!(self, Escalation::Miss | Escalation::Evidence)
    }
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Escalation {
    type Err = InvalidDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Escalation::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| InvalidDataError::new(format!("Invalid escalation: {}", s)))
    }
}

/// Analyst assessment of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Assessment {
    Ambiguous,
    Security,
    Development,
    FalsePositive,
    Legitimate,
    Trivial,
    Recon,
    Attempt,
    Compromise,
    Mitigated,
}

impl Assessment {
    /// All assessments.
    pub const ALL: [Assessment; 10] = [
        Assessment::Ambiguous,
        Assessment::Security,
        Assessment::Development,
        Assessment::FalsePositive,
        Assessment::Legitimate,
        Assessment::Trivial,
        Assessment::Recon,
        Assessment::Attempt,
        Assessment::Compromise,
        Assessment::Mitigated,
    ];

    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Assessment::Ambiguous => "ambiguous",
            Assessment::Security => "security",
            Assessment::Development => "development",
            Assessment::FalsePositive => "false-positive",
            Assessment::Legitimate => "legitimate",
            Assessment::Trivial => "trivial",
            Assessment::Recon => "recon",
            Assessment::Attempt => "attempt",
            Assessment::Compromise => "compromise",
            Assessment::Mitigated => "mitigated",
        }
    }

    /// Escalation tier a hit takes when given this assessment.
    pub fn escalation(&self) -> Escalation {
        match self {
            Assessment::Ambiguous
            | Assessment::Security
            | Assessment::Development
            | Assessment::FalsePositive
            | Assessment::Legitimate
            | Assessment::Trivial => Escalation::Miss,
            Assessment::Recon
            | Assessment::Attempt
            | Assessment::Compromise
            | Assessment::Mitigated => Escalation::Evidence,
        }
    }
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Assessment {
    type Err = InvalidDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Assessment::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| InvalidDataError::new(format!("Invalid assessment: {}", s)))
    }
}

/// A vote cast on a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Benign,
    Obscure,
    Malicious,
}

impl Vote {
    pub const ALL: [Vote; 3] = [Vote::Benign, Vote::Obscure, Vote::Malicious];

    /// Returns the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Benign => "benign",
            Vote::Obscure => "obscure",
            Vote::Malicious => "malicious",
        }
    }

    /// Dotted field path of this vote's bucket.
    pub fn field(&self) -> String {
        format!("votes.{}", self.as_str())
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vote {
    type Err = InvalidDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vote::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| InvalidDataError::new(format!("Invalid vote: {}", s)))
    }
}

/// Voter identities, one bucket per vote.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Votes {
    #[serde(default)]
    pub benign: Vec<String>,
    #[serde(default)]
    pub obscure: Vec<String>,
    #[serde(default)]
    pub malicious: Vec<String>,
}

impl Votes {
    /// Returns the voters in a bucket.
    pub fn bucket(&self, vote: Vote) -> &[String] {
        match vote {
            Vote::Benign => &self.benign,
            Vote::Obscure => &self.obscure,
            Vote::Malicious => &self.malicious,
        }
    }

    /// Returns the vote a voter currently holds, if any.
    pub fn vote_of(&self, voter: &str) -> Option<Vote> {
        Vote::ALL
            .into_iter()
            .find(|vote| self.bucket(*vote).iter().any(|v| v == voter))
    }
}

/// One change record in a hit's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Dotted field path that changed.
    pub key: String,
    #[serde(default)]
    pub previous_value: serde_json::Value,
    #[serde(default)]
    pub new_value: serde_json::Value,
    /// Kind of update operation applied.
    #[serde(rename = "type")]
    pub kind: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// A mutable triage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    /// Name of the analytic that produced the hit.
    pub analytic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: HitStatus,
    #[serde(default)]
    pub escalation: Escalation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default = "default_assignment")]
    pub assignment: String,
    #[serde(default)]
    pub votes: Votes,
    /// Label category to labels.
    #[serde(default)]
    pub labels: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub is_bundle: bool,
    #[serde(default)]
    pub bundle_size: usize,
    /// Bundles this hit belongs to.
    #[serde(default)]
    pub bundles: Vec<String>,
    /// Child hit ids; only meaningful on bundles.
    #[serde(default)]
    pub hits: Vec<String>,
    /// Content fingerprint.
    #[serde(default)]
    pub hash: String,
    /// Free-form detection payload evaluated by rules.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

fn default_assignment() -> String {
    UNASSIGNED.to_string()
}

impl Hit {
    /// Creates an open, unassigned hit with a fresh id and a computed hash.
    pub fn new(analytic: impl Into<String>, detection: Option<String>, data: serde_json::Value) -> Self {
        let mut hit = Self {
            id: Uuid::new_v4().to_string(),
            analytic: analytic.into(),
            detection,
            timestamp: Utc::now(),
            status: HitStatus::Open,
            escalation: Escalation::Hit,
            assessment: None,
            rationale: None,
            assignment: default_assignment(),
            votes: Votes::default(),
            labels: BTreeMap::new(),
            score: None,
            is_bundle: false,
            bundle_size: 0,
            bundles: Vec::new(),
            hits: Vec::new(),
            hash: String::new(),
            data,
            log: Vec::new(),
        };
        hit.hash = hit.compute_hash();
        hit
    }

    /// Sets the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: HitStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the assignment.
    pub fn with_assignment(mut self, assignee: impl Into<String>) -> Self {
        self.assignment = assignee.into();
        self
    }

    /// Computes the content fingerprint over analytic, detection and data.
    ///
    /// `serde_json` orders object keys, so equal payloads hash equally
    /// regardless of insertion order.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.analytic.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.detection.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.data.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether someone has claimed the hit.
    pub fn is_assigned(&self) -> bool {
        self.assignment != UNASSIGNED
    }

    /// Checks the bundle and escalation invariants.
    pub fn validate(&self) -> Result<(), InvalidDataError> {
        if self.is_bundle && self.bundle_size != self.hits.len() {
            return Err(InvalidDataError::new(format!(
                "Bundle {} has bundle_size {} but {} child hits",
                self.id,
                self.bundle_size,
                self.hits.len()
            )));
        }
        if self.escalation.requires_assessment() && self.assessment.is_none() {
            return Err(InvalidDataError::new(format!(
                "Hit {} is escalated to {} without an assessment",
                self.id, self.escalation
            )));
        }
        if !self.escalation.requires_assessment() && self.assessment.is_some() {
            return Err(InvalidDataError::new(format!(
                "Hit {} is escalated to {} but carries an assessment",
                self.id, self.escalation
            )));
        }
        Ok(())
    }

    /// Serializes the hit into its stored document form.
    pub fn to_document(&self) -> Result<serde_json::Value, InvalidDataError> {
        serde_json::to_value(self)
            .map_err(|e| InvalidDataError::with_cause("Failed to serialize hit", e))
    }

    /// Parses a stored document back into a hit.
    pub fn from_document(document: serde_json::Value) -> Result<Self, InvalidDataError> {
        serde_json::from_value(document)
            .map_err(|e| InvalidDataError::with_cause("Stored document is not a valid hit", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HitStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!("on-hold".parse::<HitStatus>().unwrap(), HitStatus::OnHold);
        assert!("closed".parse::<HitStatus>().is_err());
    }

    #[test]
    fn test_assessment_escalation_mapping() {
        assert_eq!(Assessment::Ambiguous.escalation(), Escalation::Miss);
        assert_eq!(Assessment::FalsePositive.escalation(), Escalation::Miss);
        assert_eq!(Assessment::Compromise.escalation(), Escalation::Evidence);
        assert_eq!(
            "false-positive".parse::<Assessment>().unwrap(),
            Assessment::FalsePositive
        );
    }

    #[test]
    fn test_hash_ignores_key_order_and_identity() {
        let a = Hit::new("Beaconing", None, json!({"host": "ws-1", "port": 443}));
        let b = Hit::new("Beaconing", None, json!({"port": 443, "host": "ws-1"}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.hash, b.hash);

        let c = Hit::new("Beaconing", None, json!({"host": "ws-2", "port": 443}));
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_document_round_trip_defaults() {
        let doc = json!({
            "id": "h1",
            "analytic": "Beaconing",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let hit = Hit::from_document(doc).unwrap();
        assert_eq!(hit.status, HitStatus::Open);
        assert_eq!(hit.escalation, Escalation::Hit);
        assert_eq!(hit.assignment, UNASSIGNED);
        assert!(!hit.is_assigned());
    }

    #[test]
    fn test_validate_bundle_size() {
        let mut bundle = Hit::new("Rule", None, json!({}));
        bundle.is_bundle = true;
        bundle.hits = vec!["a".into(), "b".into()];
        bundle.bundle_size = 1;
        assert!(bundle.validate().is_err());
        bundle.bundle_size = 2;
        assert!(bundle.validate().is_ok());
    }

    #[test]
    fn test_validate_assessment_matches_escalation() {
        let mut hit = Hit::new("Rule", None, json!({}));
        hit.escalation = Escalation::Miss;
        assert!(hit.validate().is_err());
        hit.assessment = Some(Assessment::FalsePositive);
        assert!(hit.validate().is_ok());

        hit.escalation = Escalation::Evidence;
        hit.assessment = None;
        assert!(hit.validate().is_err());
        hit.assessment = Some(Assessment::Compromise);
        assert!(hit.validate().is_ok());

        hit.escalation = Escalation::Alert;
        assert!(hit.validate().is_err());
        hit.assessment = None;
        assert!(hit.validate().is_ok());
    }

    #[test]
    fn test_votes_lookup() {
        let votes = Votes {
            benign: vec!["alice".into()],
            obscure: vec![],
            malicious: vec!["bob".into()],
        };
        assert_eq!(votes.vote_of("alice"), Some(Vote::Benign));
        assert_eq!(votes.vote_of("bob"), Some(Vote::Malicious));
        assert_eq!(votes.vote_of("carol"), None);
    }
}
