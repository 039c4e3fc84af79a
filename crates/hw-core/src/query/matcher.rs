//! In-process evaluation of queries against JSON documents.

use chrono::{DateTime, Duration, DurationRound, Utc};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

use super::{Query, QueryError};

/// A query prepared for repeated evaluation.
///
/// Wildcards are compiled to regular expressions and range bounds containing
/// date math (`now-1h`, `2024-01-01T00:00:00Z||+1d`) are resolved against the
/// reference time given at compile time.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    All,
    Nothing,
    Term { field: String, value: String },
    Pattern { field: String, regex: Regex },
    Range {
        field: String,
        lower: Option<(Bound, bool)>,
        upper: Option<(Bound, bool)>,
    },
    Exists { field: String },
    Ids(HashSet<String>),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

#[derive(Debug, Clone)]
enum Bound {
    Number(f64),
    Time(DateTime<Utc>),
    Text(String),
}

impl CompiledQuery {
    /// Compiles a query, resolving `now` to the current time.
    pub fn compile(query: &Query) -> Result<Self, QueryError> {
        Self::compile_at(query, Utc::now())
    }

    /// Compiles a query, resolving `now` to `now`.
    pub fn compile_at(query: &Query, now: DateTime<Utc>) -> Result<Self, QueryError> {
        Ok(Self {
            root: compile_node(query, now)?,
        })
    }

    /// Evaluates the query against a document.
    pub fn matches(&self, document: &Value) -> bool {
        self.root.matches(document)
    }
}

fn compile_node(query: &Query, now: DateTime<Utc>) -> Result<Node, QueryError> {
    Ok(match query {
        Query::All => Node::All,
        Query::Nothing => Node::Nothing,
        Query::Term { field, value } => Node::Term {
            field: field.clone(),
            value: value.clone(),
        },
        Query::Wildcard { field, pattern } => Node::Pattern {
            field: field.clone(),
            regex: wildcard_regex(pattern)?,
        },
        Query::Range {
            field,
            lower,
            upper,
            include_lower,
            include_upper,
        } => Node::Range {
            field: field.clone(),
            lower: lower
                .as_deref()
                .map(|b| parse_bound(b, now).map(|b| (b, *include_lower)))
                .transpose()?,
            upper: upper
                .as_deref()
                .map(|b| parse_bound(b, now).map(|b| (b, *include_upper)))
                .transpose()?,
        },
        Query::Exists { field } => Node::Exists {
            field: field.clone(),
        },
        Query::Ids(ids) => Node::Ids(ids.iter().cloned().collect()),
        Query::And(parts) => Node::And(
            parts
                .iter()
                .map(|p| compile_node(p, now))
                .collect::<Result<_, _>>()?,
        ),
        Query::Or(parts) => Node::Or(
            parts
                .iter()
                .map(|p| compile_node(p, now))
                .collect::<Result<_, _>>()?,
        ),
        Query::Not(inner) => Node::Not(Box::new(compile_node(inner, now)?)),
        Query::Raw(text) => compile_node(&super::parse(text)?, now)?,
    })
}

impl Node {
    fn matches(&self, document: &Value) -> bool {
        match self {
            Node::All => true,
            Node::Nothing => false,
            Node::Term { field, value } => leaves(document, field)
                .into_iter()
                .any(|leaf| leaf_equals(leaf, value)),
            Node::Pattern { field, regex } => leaves(document, field)
                .into_iter()
                .filter_map(leaf_text)
                .any(|text| regex.is_match(&text)),
            Node::Range {
                field,
                lower,
                upper,
                ..
            } => leaves(document, field).into_iter().any(|leaf| {
                let above = lower.as_ref().map_or(true, |(bound, inclusive)| {
                    within(leaf, bound, *inclusive, Ordering::Greater)
                });
                let below = upper.as_ref().map_or(true, |(bound, inclusive)| {
                    within(leaf, bound, *inclusive, Ordering::Less)
                });
                above && below
            }),
            Node::Exists { field } => !leaves(document, field).is_empty(),
            Node::Ids(ids) => document
                .get("id")
                .and_then(Value::as_str)
                .map_or(false, |id| ids.contains(id)),
            Node::And(parts) => parts.iter().all(|p| p.matches(document)),
            Node::Or(parts) => parts.iter().any(|p| p.matches(document)),
            Node::Not(inner) => !inner.matches(document),
        }
    }
}

/// Collects the non-null values at a dotted path, flattening arrays.
fn leaves<'a>(document: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![document];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.get(segment) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    let mut out = Vec::new();
    for value in current {
        match value {
            Value::Array(items) => out.extend(items.iter().filter(|v| !v.is_null())),
            Value::Null => {}
            other => out.push(other),
        }
    }
    out
}

fn leaf_text(leaf: &Value) -> Option<String> {
    match leaf {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn leaf_equals(leaf: &Value, value: &str) -> bool {
    match leaf {
        Value::String(s) => s == value,
        Value::Number(n) => {
            n.to_string() == value
                || matches!((n.as_f64(), value.parse::<f64>()), (Some(a), Ok(b)) if a == b)
        }
        Value::Bool(b) => b.to_string() == value,
        _ => false,
    }
}

fn within(leaf: &Value, bound: &Bound, inclusive: bool, wanted: Ordering) -> bool {
    let ordering = match bound {
        Bound::Number(b) => {
            let value = match leaf {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            };
            value.and_then(|v| v.partial_cmp(b))
        }
        Bound::Time(b) => leaf
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc).cmp(b)),
        Bound::Text(b) => leaf_text(leaf).map(|t| t.as_str().cmp(b.as_str())),
    };
    match ordering {
        Some(Ordering::Equal) => inclusive,
        Some(o) => o == wanted,
        None => false,
    }
}

fn wildcard_regex(pattern: &str) -> Result<Regex, QueryError> {
    let mut expr = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| QueryError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn parse_bound(text: &str, now: DateTime<Utc>) -> Result<Bound, QueryError> {
    if let Ok(number) = text.parse::<f64>() {
        return Ok(Bound::Number(number));
    }
    if text.starts_with("now") || text.contains("||") {
        return resolve_date_math(text, now)
            .map(Bound::Time)
            .ok_or_else(|| QueryError::InvalidDate(text.to_string()));
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(Bound::Time(time.with_timezone(&Utc)));
    }
    Ok(Bound::Text(text.to_string()))
}

/// Resolves `now[+-N<unit>][/unit]` or `<rfc3339>||[+-N<unit>][/unit]`.
pub(crate) fn resolve_date_math(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (mut time, mut rest) = if let Some(rest) = text.strip_prefix("now") {
        (now, rest)
    } else {
        let (anchor, rest) = text.split_once("||")?;
        let anchor = DateTime::parse_from_rfc3339(anchor).ok()?;
        (anchor.with_timezone(&Utc), rest)
    };

    while !rest.is_empty() {
        let op = rest.chars().next()?;
        rest = &rest[op.len_utf8()..];
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let unit = rest[digits..].chars().next()?;
        let span = unit_duration(unit)?;
        match op {
            '+' | '-' => {
                let amount: i32 = rest[..digits].parse().ok()?;
                let delta = span.checked_mul(amount)?;
                time = if op == '+' {
                    time.checked_add_signed(delta)?
                } else {
                    time.checked_sub_signed(delta)?
                };
            }
            '/' if digits == 0 => time = time.duration_trunc(span).ok()?,
            _ => return None,
        }
        rest = &rest[digits + unit.len_utf8()..];
    }
    Some(time)
}

fn unit_duration(unit: char) -> Option<Duration> {
    match unit {
        's' => Some(Duration::seconds(1)),
        'm' => Some(Duration::minutes(1)),
        'h' | 'H' => Some(Duration::hours(1)),
        'd' => Some(Duration::days(1)),
        'w' => Some(Duration::weeks(1)),
        _ => None,
    }
}
