//! Correlation rule languages.
//!
//! Query-language and Sigma rules resolve to one query; every hit it
//! matches belongs to one bundle. Sequence rules are evaluated directly and
//! yield one bundle per matched sequence.

mod eql;
mod lucene;
mod sigma;

use chrono::{DateTime, SecondsFormat, Utc};
use hw_core::query::{CompiledQuery, QueryError};
use hw_core::{Hit, HitStore, Query, RuleType, StoreError};
use thiserror::Error;

pub use eql::SequenceRule;
pub use lucene::strip_comments;
pub use sigma::translate as translate_sigma;

/// Errors raised while compiling or evaluating a rule.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Invalid {language} rule: {message}")]
    Syntax { language: RuleType, message: String },

    #[error("Rule query is invalid: {0}")]
    Query(#[from] QueryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RuleError {
    pub(crate) fn syntax(language: RuleType, message: impl Into<String>) -> Self {
        RuleError::Syntax {
            language,
            message: message.into(),
        }
    }
}

/// A compiled correlation rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Query text in the store's query language. `now` is bound at each run.
    Query(String),
    Sequence(SequenceRule),
}

/// A group of hits found by one rule evaluation.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    /// The query the hits were found with, as hashed into the bundle id.
    pub query: String,
    pub hits: Vec<Hit>,
}

impl Rule {
    /// Compiles rule text of the given language.
    pub fn compile(rule_type: RuleType, text: &str) -> Result<Self, RuleError> {
        let rule = match rule_type {
            RuleType::Lucene => Rule::Query(strip_comments(text)?),
            RuleType::Sigma => Rule::Query(translate_sigma(text)?.to_string()),
            RuleType::Eql => Rule::Sequence(SequenceRule::parse(text)?),
        };
        // Surface syntax and date math errors at registration time rather
        // than at the first run.
        let now = Utc::now();
        match &rule {
            Rule::Query(text) => {
                CompiledQuery::compile_at(&Query::parse(&bind_now(text, now))?, now)?;
            }
            Rule::Sequence(sequence) => {
                for step in &sequence.steps {
                    CompiledQuery::compile_at(step, now)?;
                }
            }
        }
        Ok(rule)
    }

    /// Returns the query this rule resolves to, with `now` bound, or the
    /// sequence text for sequence rules.
    pub fn resolved_query(&self, now: DateTime<Utc>) -> String {
        match self {
            Rule::Query(text) => bind_now(text, now),
            Rule::Sequence(sequence) => sequence.to_string(),
        }
    }

    /// Evaluates the rule against the store at `now`.
    ///
    /// Bundles never match. At most `max_matches` hits are read per query.
    pub async fn evaluate(
        &self,
        store: &dyn HitStore,
        now: DateTime<Utc>,
        max_matches: usize,
    ) -> Result<Vec<RuleMatch>, RuleError> {
        match self {
            Rule::Query(text) => {
                let bound = bind_now(text, now);
                let query = Query::parse(&bound)?.and(not_bundle());
                let found = store.search(&query, max_matches).await?;
                if found.items.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![RuleMatch {
                    query: bound,
                    hits: found.items,
                }])
            }
            Rule::Sequence(sequence) => {
                let query = sequence.to_string();
                Ok(sequence
                    .evaluate(store, max_matches)
                    .await?
                    .into_iter()
                    .map(|hits| RuleMatch {
                        query: query.clone(),
                        hits,
                    })
                    .collect())
            }
        }
    }
}

pub(crate) fn not_bundle() -> Query {
    Query::term("is_bundle", "true").not()
}

/// Replaces every standalone `now` outside quoted phrases, together with
/// any date math following it, with a quoted absolute anchor at `now`
/// truncated to seconds: `now-1h` becomes `"2024-05-01T12:00:00Z||-1h"`.
pub fn bind_now(text: &str, now: DateTime<Utc>) -> String {
    let anchor = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut out = String::with_capacity(text.len());
    let mut in_quotes = false;
    let mut escaped = false;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while let Some(c) = text[i..].chars().next() {
        let rest = &text[i..];
        let standalone = !in_quotes
            && rest.starts_with("now")
            && !prev.is_some_and(is_word_char)
            && !rest[3..].chars().next().is_some_and(is_word_char);
        if standalone {
            let math = &rest[3..3 + date_math_len(&rest[3..])];
            out.push('"');
            out.push_str(&anchor);
            out.push_str("||");
            out.push_str(math);
            out.push('"');
            i += 3 + math.len();
            prev = Some('"');
            continue;
        }

        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        }
        out.push(c);
        prev = Some(c);
        i += c.len_utf8();
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Length of the `(+|-)N<unit>...[/unit]` suffix at the start of `text`.
fn date_math_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut end = 0;
    while end < bytes.len() && matches!(bytes[end], b'+' | b'-') {
        let mut j = end + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == end + 1 || j >= bytes.len() || !bytes[j].is_ascii_alphabetic() {
            break;
        }
        end = j + 1;
    }
    if bytes.get(end) == Some(&b'/')
        && bytes.get(end + 1).is_some_and(u8::is_ascii_alphabetic)
    {
        end += 2;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hw_core::store::MemoryHitStore;
    use serde_json::json;

    #[test]
    fn test_bind_now() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        assert_eq!(
            bind_now("timestamp:[now-1h TO now] AND host:nowhere", now),
            "timestamp:[\"2024-05-01T12:30:15Z||-1h\" TO \"2024-05-01T12:30:15Z||\"] AND host:nowhere"
        );
        assert_eq!(
            bind_now("timestamp:[now-1d/d TO *] AND message:\"now\"", now),
            "timestamp:[\"2024-05-01T12:30:15Z||-1d/d\" TO *] AND message:\"now\""
        );
    }

    #[test]
    fn test_compile_rejects_bad_query() {
        assert!(Rule::compile(RuleType::Lucene, "# only a comment").is_err());
        assert!(Rule::compile(RuleType::Lucene, "analytic:(Beaconing").is_err());
        assert!(Rule::compile(RuleType::Lucene, "analytic:Beaconing").is_ok());
    }

    #[test]
    fn test_compile_rejects_out_of_range_date_math() {
        assert!(matches!(
            Rule::compile(RuleType::Lucene, "timestamp:[now-999999999d TO now]"),
            Err(RuleError::Query(QueryError::InvalidDate(_)))
        ));
        assert!(Rule::compile(
            RuleType::Eql,
            "sequence [timestamp:[now-999999999d TO now]] [data.action:success]"
        )
        .is_err());
        assert!(Rule::compile(RuleType::Lucene, "timestamp:[now-1h TO now]").is_ok());
    }

    #[tokio::test]
    async fn test_query_rule_excludes_bundles() {
        let hit = Hit::new("Beaconing", None, json!({}));
        let mut bundle = Hit::new("Beaconing", None, json!({"bundle": true}));
        bundle.is_bundle = true;
        let store = MemoryHitStore::with_hits(vec![hit.clone(), bundle]).unwrap();

        let rule = Rule::compile(RuleType::Lucene, "analytic:Beaconing").unwrap();
        let matches = rule.evaluate(&store, Utc::now(), 100).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].hits.len(), 1);
        assert_eq!(matches[0].hits[0].id, hit.id);
    }

    #[tokio::test]
    async fn test_relative_time_window() {
        let now = Utc::now();
        let recent = Hit::new("Beaconing", None, json!({"n": 1}))
            .with_timestamp(now - chrono::Duration::minutes(10));
        let old = Hit::new("Beaconing", None, json!({"n": 2}))
            .with_timestamp(now - chrono::Duration::hours(3));
        let store = MemoryHitStore::with_hits(vec![recent.clone(), old]).unwrap();

        let rule = Rule::compile(RuleType::Lucene, "timestamp:[now-1h TO now]").unwrap();
        let matches = rule.evaluate(&store, now, 100).await.unwrap();
        assert_eq!(matches[0].hits.len(), 1);
        assert_eq!(matches[0].hits[0].id, recent.id);
    }
}
