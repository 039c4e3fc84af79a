//! Sequence rules.
//!
//! ```text
//! sequence [by <field>] [with maxspan=<n><s|m|h|d>] [<query>] [<query>]...
//! ```
//!
//! Each step is a query in the store's query language. A sequence matches
//! when hits sharing the join field value satisfy every step in timestamp
//! order, within `maxspan` of the first hit. Each hit completes at most one
//! sequence.

use chrono::Duration;
use hw_core::{Hit, HitStore, Query, RuleType};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use super::{not_bundle, RuleError};

fn invalid(message: impl Into<String>) -> RuleError {
    RuleError::syntax(RuleType::Eql, message)
}

/// A parsed sequence rule.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceRule {
    /// Join field; hits without it never take part.
    pub by: Option<String>,
    pub maxspan: Option<Duration>,
    pub steps: Vec<Query>,
}

impl SequenceRule {
    /// Parses sequence rule text.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let text = text.trim();
        let mut rest = text
            .get(..8)
            .filter(|head| head.eq_ignore_ascii_case("sequence"))
            .map(|_| &text[8..])
            .ok_or_else(|| invalid("rule must start with 'sequence'"))?;

        let mut by = None;
        let mut maxspan = None;
        loop {
            rest = rest.trim_start();
            if let Some(after) = strip_keyword(rest, "by") {
                let (field, after) = split_word(after);
                if field.is_empty() {
                    return Err(invalid("'by' needs a field name"));
                }
                by = Some(field.to_string());
                rest = after;
            } else if let Some(after) = strip_keyword(rest, "with") {
                let (setting, after) = split_word(after);
                maxspan = Some(parse_maxspan(setting)?);
                rest = after;
            } else {
                break;
            }
        }

        let mut steps = Vec::new();
        while !rest.trim_start().is_empty() {
            let (step, after) = bracketed(rest.trim_start())?;
            steps.push(Query::parse(step)?);
            rest = after;
        }
        if steps.len() < 2 {
            return Err(invalid("a sequence needs at least two steps"));
        }

        Ok(Self { by, maxspan, steps })
    }

    /// Finds every matching sequence, in completion order.
    pub async fn evaluate(
        &self,
        store: &dyn HitStore,
        max_matches: usize,
    ) -> Result<Vec<Vec<Hit>>, RuleError> {
        // Each hit with the steps it satisfies.
        let mut events: Vec<(Hit, Vec<usize>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (step, query) in self.steps.iter().enumerate() {
            let found = store
                .search(&query.clone().and(not_bundle()), max_matches)
                .await?;
            for hit in found.items {
                match index.get(&hit.id) {
                    Some(&i) => events[i].1.push(step),
                    None => {
                        index.insert(hit.id.clone(), events.len());
                        events.push((hit, vec![step]));
                    }
                }
            }
        }
        events.sort_by(|(a, _), (b, _)| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let length = self.steps.len();
        let mut partials: HashMap<String, Vec<Vec<Hit>>> = HashMap::new();
        let mut sequences = Vec::new();

        for (hit, steps) in events {
            let key = match &self.by {
                Some(field) => match join_key(&hit, field) {
                    Some(key) => key,
                    None => continue,
                },
                None => String::new(),
            };
            let group = partials.entry(key).or_default();
            if let Some(span) = self.maxspan {
                group.retain(|partial| hit.timestamp - partial[0].timestamp <= span);
            }

            // Prefer advancing the oldest partial sequence at the latest stage.
            let extend = steps.iter().rev().filter(|&&step| step > 0).find_map(|&step| {
                group.iter().position(|partial| partial.len() == step)
            });
            match extend {
                Some(i) => {
                    group[i].push(hit);
                    if group[i].len() == length {
                        sequences.push(group.remove(i));
                    }
                }
                None if steps.first() == Some(&0) => group.push(vec![hit]),
                None => {}
            }
        }
        Ok(sequences)
    }
}

impl fmt::Display for SequenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sequence")?;
        if let Some(by) = &self.by {
            write!(f, " by {}", by)?;
        }
        if let Some(span) = self.maxspan {
            write!(f, " with maxspan={}s", span.num_seconds())?;
        }
        for step in &self.steps {
            write!(f, " [{}]", step)?;
        }
        Ok(())
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = &text[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace)).then_some(rest)
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    (&text[..end], &text[end..])
}

fn parse_maxspan(setting: &str) -> Result<Duration, RuleError> {
    let value = setting
        .strip_prefix("maxspan=")
        .ok_or_else(|| invalid(format!("unsupported setting '{}'", setting)))?;
    let unit_at = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid(format!("maxspan '{}' has no unit", value)))?;
    let amount: i64 = value[..unit_at]
        .parse()
        .map_err(|_| invalid(format!("invalid maxspan '{}'", value)))?;
    let span = match &value[unit_at..] {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        unit => return Err(invalid(format!("unsupported maxspan unit '{}'", unit))),
    };
    span.ok_or_else(|| invalid(format!("maxspan '{}' out of range", value)))
}

/// Splits `[query] rest` into the query text and the rest. Brackets inside
/// the query (ranges) and inside quoted values are balanced.
fn bracketed(text: &str) -> Result<(&str, &str), RuleError> {
    if !text.starts_with('[') {
        return Err(invalid(format!("expected '[' at '{}'", text)));
    }
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => depth += 1,
            ']' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&text[1..i], &text[i + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(invalid("unbalanced '[' in sequence step"))
}

/// Reads a dotted field from a hit as a join key.
fn join_key(hit: &Hit, field: &str) -> Option<String> {
    let document = hit.to_document().ok()?;
    let mut current = &document;
    for segment in field.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hw_core::store::MemoryHitStore;
    use serde_json::json;

    const BRUTE_FORCE: &str =
        "sequence by data.host with maxspan=5m [data.action:login_failed] [data.action:login_success]";

    fn event(host: &str, action: &str, minute: u32) -> Hit {
        Hit::new("Auth", None, json!({"host": host, "action": action, "minute": minute}))
            .with_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap())
    }

    #[test]
    fn test_parse() {
        let rule = SequenceRule::parse(BRUTE_FORCE).unwrap();
        assert_eq!(rule.by.as_deref(), Some("data.host"));
        assert_eq!(rule.maxspan, Some(Duration::minutes(5)));
        assert_eq!(rule.steps.len(), 2);
        assert_eq!(
            rule.to_string(),
            "sequence by data.host with maxspan=300s [data.action:login_failed] [data.action:login_success]"
        );
    }

    #[test]
    fn test_parse_ranges_inside_steps() {
        let rule =
            SequenceRule::parse("sequence [data.port:[1 TO 1024]] [data.action:\"a]b\"]").unwrap();
        assert_eq!(rule.steps[1], Query::term("data.action", "a]b"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(SequenceRule::parse("data.action:login").is_err());
        assert!(SequenceRule::parse("sequence [data.action:login]").is_err());
        assert!(SequenceRule::parse("sequence with maxspan=5y [a:b] [c:d]").is_err());
        assert!(SequenceRule::parse("sequence [a:b] [c:d").is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_maxspan() {
        let err = SequenceRule::parse("sequence with maxspan=100000000000000d [a:b] [c:d]")
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(SequenceRule::parse("sequence with maxspan=9999999999999999999s [a:b] [c:d]").is_err());
    }

    #[tokio::test]
    async fn test_sequences_per_host_within_maxspan() {
        let hits = vec![
            event("web-1", "login_failed", 0),
            event("web-1", "login_success", 2),
            event("web-2", "login_success", 1),
            event("web-2", "login_failed", 3),
            event("db-1", "login_failed", 10),
            event("db-1", "login_success", 20),
        ];
        let store = MemoryHitStore::with_hits(hits.clone()).unwrap();

        let rule = SequenceRule::parse(BRUTE_FORCE).unwrap();
        let sequences = rule.evaluate(&store, 100).await.unwrap();

        assert_eq!(sequences.len(), 1);
        let ids: Vec<&str> = sequences[0].iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec![hits[0].id.as_str(), hits[1].id.as_str()]);
    }

    #[tokio::test]
    async fn test_each_hit_used_once() {
        let hits = vec![
            event("web-1", "login_failed", 0),
            event("web-1", "login_failed", 1),
            event("web-1", "login_success", 2),
        ];
        let store = MemoryHitStore::with_hits(hits.clone()).unwrap();

        let rule = SequenceRule::parse(BRUTE_FORCE).unwrap();
        let sequences = rule.evaluate(&store, 100).await.unwrap();
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0][0].id, hits[0].id);
    }
}
