//! Operation reports.
//!
//! A report is an ordered list of entries, each scoped by a query over the
//! hits it concerns. Sanitizing merges entries that would show an analyst the
//! same message once per hit.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::query::Query;

/// Outcome of one report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Skipped,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Skipped => "skipped",
            Outcome::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One report entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Hits the entry concerns.
    pub query: Query,
    pub outcome: Outcome,
    pub title: String,
    pub message: String,
}

impl ReportEntry {
    pub fn new(
        query: Query,
        outcome: Outcome,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            query,
            outcome,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn success(query: Query, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(query, Outcome::Success, title, message)
    }

    pub fn skipped(query: Query, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(query, Outcome::Skipped, title, message)
    }

    pub fn error(query: Query, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(query, Outcome::Error, title, message)
    }
}

/// An ordered list of report entries.
pub type Report = Vec<ReportEntry>;

/// Merges entries sharing `(title, message, outcome)` by OR-combining their
/// queries. Groups keep the position of their first entry, and id queries
/// within a group collapse into one id set.
pub fn sanitize(report: Report) -> Report {
    let mut groups: Vec<(ReportEntry, Vec<Query>)> = Vec::new();
    let mut index: HashMap<(String, String, Outcome), usize> = HashMap::new();
    for mut entry in report {
        let key = (entry.title.clone(), entry.message.clone(), entry.outcome);
        let query = std::mem::replace(&mut entry.query, Query::Nothing);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(query),
            None => {
                index.insert(key, groups.len());
                groups.push((entry, vec![query]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(mut entry, queries)| {
            entry.query = merge_queries(queries);
            entry
        })
        .collect()
}

fn merge_queries(queries: Vec<Query>) -> Query {
    if queries.len() == 1 {
        return queries.into_iter().next().unwrap_or(Query::Nothing);
    }
    let mut parts = Vec::with_capacity(queries.len());
    let mut ids_at: Option<usize> = None;
    let mut ids = Vec::new();
    let mut seen_ids = HashSet::new();
    for query in queries {
        match query {
            Query::Ids(list) => {
                if ids_at.is_none() {
                    ids_at = Some(parts.len());
                    parts.push(Query::Nothing);
                }
                for id in list {
                    if seen_ids.insert(id.clone()) {
                        ids.push(id);
                    }
                }
            }
            other => parts.push(other),
        }
    }
    if let Some(i) = ids_at {
        parts[i] = Query::ids(ids);
    }
    Query::or_all(parts)
}

/// Whether any entry in the report is an error.
pub fn has_errors(report: &[ReportEntry]) -> bool {
    report.iter().any(|e| e.outcome == Outcome::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_differing_only_in_query_merge() {
        let report: Report = (1..=4)
            .map(|i| {
                ReportEntry::success(
                    Query::term("id", i.to_string()),
                    "Label added",
                    "Added label apt29",
                )
            })
            .collect();

        let sanitized = sanitize(report);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(
            sanitized[0].query.to_string(),
            "(id:1 OR id:2 OR id:3 OR id:4)"
        );
    }

    #[test]
    fn test_distinct_entries_keep_order() {
        let report = vec![
            ReportEntry::skipped(Query::term("id", "1"), "Skipped", "Already labelled"),
            ReportEntry::success(Query::term("id", "2"), "Done", "Labelled"),
            ReportEntry::skipped(Query::term("id", "3"), "Skipped", "Already labelled"),
            ReportEntry::error(Query::term("id", "4"), "Done", "Labelled"),
        ];
        let sanitized = sanitize(report);
        assert_eq!(sanitized.len(), 3);
        assert_eq!(sanitized[0].outcome, Outcome::Skipped);
        assert_eq!(sanitized[0].query.to_string(), "(id:1 OR id:3)");
        assert_eq!(sanitized[1].outcome, Outcome::Success);
        assert_eq!(sanitized[2].outcome, Outcome::Error);
        assert!(has_errors(&sanitized));
    }

    #[test]
    fn test_per_hit_entries_collapse_into_one_id_set() {
        let report: Report = (0..1000)
            .map(|i| {
                ReportEntry::success(
                    Query::ids([format!("hit-{}", i)]),
                    "Transitioned",
                    "Hit moved to resolved",
                )
            })
            .chain((0..1000).map(|i| {
                ReportEntry::error(
                    Query::ids([format!("hit-{}", i % 10)]),
                    "Transition failed",
                    "Version conflict",
                )
            }))
            .collect();

        let sanitized = sanitize(report);
        assert_eq!(sanitized.len(), 2);
        match &sanitized[0].query {
            Query::Ids(ids) => {
                assert_eq!(ids.len(), 1000);
                assert_eq!(ids[0], "hit-0");
                assert_eq!(ids[999], "hit-999");
            }
            other => panic!("expected an id set, got {}", other),
        }
        match &sanitized[1].query {
            Query::Ids(ids) => assert_eq!(ids.len(), 10),
            other => panic!("expected an id set, got {}", other),
        }
    }

    #[test]
    fn test_mixed_queries_keep_first_position() {
        let report = vec![
            ReportEntry::skipped(Query::term("status", "resolved"), "Skipped", "Closed"),
            ReportEntry::skipped(Query::ids(["a"]), "Skipped", "Closed"),
            ReportEntry::skipped(Query::term("status", "resolved"), "Skipped", "Closed"),
            ReportEntry::skipped(Query::ids(["b", "a"]), "Skipped", "Closed"),
        ];
        let sanitized = sanitize(report);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].query.to_string(), "(status:resolved OR id:(a OR b))");
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = ReportEntry::error(Query::ids(["a"]), "Failed", "Boom");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "query": "id:(a)",
                "outcome": "error",
                "title": "Failed",
                "message": "Boom"
            })
        );
    }
}
