//! Typed scoping predicates over hit documents.
//!
//! A [`Query`] renders to Lucene-style text, which is what the backing store
//! and report entries carry. [`Query::parse`] reads that text back for the
//! in-memory store and for raw rule text; [`CompiledQuery`] evaluates a
//! predicate against JSON documents.

mod matcher;
mod parse;

pub use matcher::CompiledQuery;
pub use parse::parse;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Query parsing and compilation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Invalid query at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Invalid wildcard pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid date expression '{0}'")]
    InvalidDate(String),
}

/// A predicate over hit documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// Matches every document.
    All,
    /// Matches no document.
    Nothing,
    /// Exact value match on a field.
    Term { field: String, value: String },
    /// `*`/`?` pattern match on a field.
    Wildcard { field: String, pattern: String },
    /// Inclusive or exclusive range; `None` bounds are open.
    Range {
        field: String,
        lower: Option<String>,
        upper: Option<String>,
        include_lower: bool,
        include_upper: bool,
    },
    /// Field is present and non-null.
    Exists { field: String },
    /// Document id is one of the given ids.
    Ids(Vec<String>),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    /// Unparsed query text, evaluated by the store.
    Raw(String),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Query::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Query::Exists {
            field: field.into(),
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Query::Raw(text.into())
    }

    /// Matches documents whose id is one of `ids`. An empty set matches nothing.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            Query::Nothing
        } else {
            Query::Ids(ids)
        }
    }

    /// Matches documents where `field` equals any of `values`.
    pub fn any_of<I, S>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::or_all(values.into_iter().map(|v| Query::term(field, v)))
    }

    /// Conjunction, flattening nested conjunctions and folding constants.
    pub fn and(self, other: Query) -> Self {
        Query::and_all([self, other])
    }

    /// Disjunction, flattening nested disjunctions and folding constants.
    pub fn or(self, other: Query) -> Self {
        Query::or_all([self, other])
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Query::All => Query::Nothing,
            Query::Nothing => Query::All,
            Query::Not(inner) => *inner,
            other => Query::Not(Box::new(other)),
        }
    }

    pub fn and_all(queries: impl IntoIterator<Item = Query>) -> Self {
        let mut parts = Vec::new();
        for query in queries {
            match query {
                Query::All => {}
                Query::Nothing => return Query::Nothing,
                Query::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Query::All,
            1 => parts.remove(0),
            _ => Query::And(parts),
        }
    }

    /// Disjunction of every query, dropping duplicates.
    pub fn or_all(queries: impl IntoIterator<Item = Query>) -> Self {
        let mut parts: Vec<Query> = Vec::new();
        let mut seen: HashSet<Query> = HashSet::new();
        let mut push = |q: Query, parts: &mut Vec<Query>| {
            if seen.insert(q.clone()) {
                parts.push(q);
            }
        };
        for query in queries {
            match query {
                Query::Nothing => {}
                Query::All => return Query::All,
                Query::Or(inner) => {
                    for q in inner {
                        push(q, &mut parts);
                    }
                }
                other => push(other, &mut parts),
            }
        }
        match parts.len() {
            0 => Query::Nothing,
            1 => parts.remove(0),
            _ => Query::Or(parts),
        }
    }

    /// Parses Lucene-style query text.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        parse(text)
    }

    /// Replaces every [`Query::Raw`] node with its parsed form.
    pub fn resolve(&self) -> Result<Query, QueryError> {
        Ok(match self {
            Query::Raw(text) => parse(text)?,
            Query::And(parts) => {
                Query::and_all(parts.iter().map(Query::resolve).collect::<Result<Vec<_>, _>>()?)
            }
            Query::Or(parts) => {
                Query::or_all(parts.iter().map(Query::resolve).collect::<Result<Vec<_>, _>>()?)
            }
            Query::Not(inner) => inner.resolve()?.not(),
            other => other.clone(),
        })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::All => f.write_str("*:*"),
            Query::Nothing => f.write_str("-*:*"),
            Query::Term { field, value } => write!(f, "{}:{}", field, render_value(value)),
            Query::Wildcard { field, pattern } => {
                write!(f, "{}:{}", field, render_pattern(pattern))
            }
            Query::Range {
                field,
                lower,
                upper,
                include_lower,
                include_upper,
            } => write!(
                f,
                "{}:{}{} TO {}{}",
                field,
                if *include_lower { '[' } else { '{' },
                lower.as_deref().map(render_value).unwrap_or_else(|| "*".into()),
                upper.as_deref().map(render_value).unwrap_or_else(|| "*".into()),
                if *include_upper { ']' } else { '}' },
            ),
            Query::Exists { field } => write!(f, "_exists_:{}", field),
            Query::Ids(ids) => {
                let rendered: Vec<String> = ids.iter().map(|id| render_value(id)).collect();
                write!(f, "id:({})", rendered.join(" OR "))
            }
            Query::And(parts) => write_joined(f, parts, " AND "),
            Query::Or(parts) => write_joined(f, parts, " OR "),
            Query::Not(inner) => write!(f, "-{}", Parenthesized(inner)),
            Query::Raw(text) => write!(f, "({})", text),
        }
    }
}

struct Parenthesized<'a>(&'a Query);

impl fmt::Display for Parenthesized<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Query::Not(_) | Query::Nothing => write!(f, "({})", self.0),
            other => write!(f, "{}", other),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Query], separator: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{}", part)?;
    }
    f.write_str(")")
}

const RESERVED_WORDS: [&str; 4] = ["AND", "OR", "NOT", "TO"];

fn is_plain_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '-')
}

fn render_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value.starts_with('-')
        && value.chars().all(is_plain_char)
        && !RESERVED_WORDS.contains(&value);
    if plain {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

fn render_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for (i, c) in pattern.chars().enumerate() {
        let literal = is_plain_char(c) && !(i == 0 && c == '-');
        if literal || c == '*' || c == '?' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let query = Query::term("status", "open")
            .and(Query::term("analytic", "Bad Guy"))
            .and(Query::exists("assessment").not());
        assert_eq!(
            query.to_string(),
            "(status:open AND analytic:\"Bad Guy\" AND -_exists_:assessment)"
        );
        assert_eq!(Query::ids(["a", "b"]).to_string(), "id:(a OR b)");
        assert_eq!(Query::wildcard("host", "web-*").to_string(), "host:web-*");
        assert_eq!(Query::wildcard("path", "C:\\*").to_string(), "path:C\\:\\\\*");
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(Query::All.and(Query::term("a", "b")), Query::term("a", "b"));
        assert_eq!(Query::Nothing.and(Query::term("a", "b")), Query::Nothing);
        assert_eq!(Query::Nothing.or(Query::term("a", "b")), Query::term("a", "b"));
        assert_eq!(Query::All.or(Query::term("a", "b")), Query::All);
        assert_eq!(Query::ids(Vec::<String>::new()), Query::Nothing);
        assert_eq!(Query::term("a", "b").not().not(), Query::term("a", "b"));
    }

    #[test]
    fn test_or_deduplicates() {
        let q = Query::term("id", "1").or(Query::term("id", "2")).or(Query::term("id", "1"));
        assert_eq!(q.to_string(), "(id:1 OR id:2)");
    }

    #[test]
    fn test_display_parses_back() {
        let queries = vec![
            Query::term("status", "in-progress").and(Query::term("analytic", "A \"quoted\" name")),
            Query::ids(["x1", "x2"]).or(Query::Nothing),
            Query::wildcard("labels.threat", "apt?*").not(),
            Query::Range {
                field: "score".into(),
                lower: Some("10".into()),
                upper: None,
                include_lower: true,
                include_upper: false,
            },
            Query::All,
            Query::Nothing,
        ];
        for query in queries {
            let reparsed = Query::parse(&query.to_string()).unwrap();
            assert_eq!(reparsed.to_string(), query.to_string(), "{}", query);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let query = Query::term("status", "open");
        let json = serde_json::to_string(&query).unwrap();
        assert_eq!(json, "\"status:open\"");
        let back: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(back, query);
    }

    #[test]
    fn test_resolve_raw() {
        let query = Query::raw("status:open OR status:on-hold").and(Query::term("a", "b"));
        let resolved = query.resolve().unwrap();
        assert_eq!(
            resolved.to_string(),
            "((status:open OR status:on-hold) AND a:b)"
        );
    }
}
