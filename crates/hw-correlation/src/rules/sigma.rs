//! Sigma rule translation.
//!
//! Only the `detection` section is read. Selections become conjunctions of
//! field clauses, value lists become disjunctions (conjunctions with the
//! `all` modifier), and the condition combines selections by name.

use hw_core::{Query, RuleType};
use regex::Regex;
use serde_yaml::Value;

use super::RuleError;

fn invalid(message: impl Into<String>) -> RuleError {
    RuleError::syntax(RuleType::Sigma, message)
}

/// Translates a Sigma rule into a query.
pub fn translate(text: &str) -> Result<Query, RuleError> {
    let document: Value =
        serde_yaml::from_str(text).map_err(|e| invalid(format!("not valid YAML: {}", e)))?;
    let detection = document
        .get("detection")
        .and_then(Value::as_mapping)
        .ok_or_else(|| invalid("missing detection section"))?;

    let mut selections: Vec<(String, Query)> = Vec::new();
    let mut condition: Option<String> = None;
    for (key, value) in detection {
        let name = key
            .as_str()
            .ok_or_else(|| invalid("detection keys must be strings"))?;
        match name {
            "condition" => condition = Some(condition_text(value)?),
            "timeframe" => {}
            _ => selections.push((name.to_string(), selection(name, value)?)),
        }
    }

    let condition = condition.ok_or_else(|| invalid("detection has no condition"))?;
    ConditionParser::new(&condition, &selections)?.parse()
}

/// A list of conditions means any of them.
fn condition_text(value: &Value) -> Result<String, RuleError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Sequence(items) => {
            let parts = items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(|text| format!("({})", text))
                        .ok_or_else(|| invalid("conditions must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(parts.join(" or "))
        }
        _ => Err(invalid("condition must be a string or a list of strings")),
    }
}

fn selection(name: &str, value: &Value) -> Result<Query, RuleError> {
    match value {
        Value::Mapping(fields) => {
            let clauses = fields
                .iter()
                .map(|(key, value)| {
                    let key = key
                        .as_str()
                        .ok_or_else(|| invalid(format!("selection '{}' has a non-string field", name)))?;
                    field_clause(key, value)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Query::and_all(clauses))
        }
        Value::Sequence(items) if items.iter().all(Value::is_mapping) => {
            let alternatives = items
                .iter()
                .map(|item| selection(name, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Query::or_all(alternatives))
        }
        _ => Err(invalid(format!(
            "selection '{}' must be a map or a list of maps; keyword selections are not supported",
            name
        ))),
    }
}

#[derive(Clone, Copy)]
enum Match {
    Exact,
    Contains,
    StartsWith,
    EndsWith,
}

fn field_clause(key: &str, value: &Value) -> Result<Query, RuleError> {
    let mut parts = key.split('|');
    let field = parts.next().unwrap_or_default();
    if field.is_empty() {
        return Err(invalid(format!("empty field name in '{}'", key)));
    }

    let mut how = Match::Exact;
    let mut all = false;
    for modifier in parts {
        match modifier {
            "contains" => how = Match::Contains,
            "startswith" => how = Match::StartsWith,
            "endswith" => how = Match::EndsWith,
            "all" => all = true,
            other => return Err(invalid(format!("unsupported modifier '{}'", other))),
        }
    }

    let values: Vec<&Value> = match value {
        Value::Sequence(items) => items.iter().collect(),
        other => vec![other],
    };
    let clauses = values
        .into_iter()
        .map(|value| value_clause(field, value, how))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if all {
        Query::and_all(clauses)
    } else {
        Query::or_all(clauses)
    })
}

fn value_clause(field: &str, value: &Value, how: Match) -> Result<Query, RuleError> {
    let text = match value {
        Value::Null => return Ok(Query::exists(field).not()),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return Err(invalid(format!("unsupported value for '{}'", field))),
    };

    let pattern = match how {
        Match::Exact if !text.contains(['*', '?']) => return Ok(Query::term(field, text)),
        Match::Exact => text,
        Match::Contains => format!("*{}*", text),
        Match::StartsWith => format!("{}*", text),
        Match::EndsWith => format!("*{}", text),
    };
    Ok(Query::wildcard(field, pattern))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Word(String),
}

fn tokenize(condition: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in condition.chars() {
        if c == '(' || c == ')' || c.is_whitespace() {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
            match c {
                '(' => tokens.push(Token::LParen),
                ')' => tokens.push(Token::RParen),
                _ => {}
            }
        } else {
            word.push(c);
        }
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

/// Recursive-descent parser for Sigma conditions.
struct ConditionParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    selections: &'a [(String, Query)],
}

impl<'a> ConditionParser<'a> {
    fn new(condition: &str, selections: &'a [(String, Query)]) -> Result<Self, RuleError> {
        let tokens = tokenize(condition);
        if tokens.is_empty() {
            return Err(invalid("condition is empty"));
        }
        Ok(Self {
            tokens,
            pos: 0,
            selections,
        })
    }

    fn parse(mut self) -> Result<Query, RuleError> {
        let query = self.parse_or()?;
        if self.pos < self.tokens.len() {
            return Err(invalid(format!(
                "unexpected '{}' in condition",
                self.describe(self.pos)
            )));
        }
        Ok(query)
    }

    fn describe(&self, pos: usize) -> String {
        match &self.tokens[pos] {
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Word(w) => w.clone(),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn parse_or(&mut self) -> Result<Query, RuleError> {
        let mut parts = vec![self.parse_and()?];
        while self.peek_keyword("or") {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        Ok(Query::or_all(parts))
    }

    fn parse_and(&mut self) -> Result<Query, RuleError> {
        let mut parts = vec![self.parse_not()?];
        while self.peek_keyword("and") {
            self.pos += 1;
            parts.push(self.parse_not()?);
        }
        Ok(Query::and_all(parts))
    }

    fn parse_not(&mut self) -> Result<Query, RuleError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(self.parse_not()?.not());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Query, RuleError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| invalid("condition ends unexpectedly"))?;
        self.pos += 1;

        match token {
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(invalid("missing ')' in condition")),
                }
            }
            Token::RParen => Err(invalid("unexpected ')' in condition")),
            Token::Word(word) if (word == "1" || word.eq_ignore_ascii_case("all")) && self.peek_keyword("of") => {
                self.pos += 1;
                let target = match self.tokens.get(self.pos) {
                    Some(Token::Word(target)) => target.clone(),
                    _ => return Err(invalid(format!("'{} of' needs a selection pattern", word))),
                };
                self.pos += 1;
                let matched = self.matching(&target)?;
                Ok(if word == "1" {
                    Query::or_all(matched)
                } else {
                    Query::and_all(matched)
                })
            }
            Token::Word(name) => self
                .selections
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, query)| query.clone())
                .ok_or_else(|| invalid(format!("unknown selection '{}'", name))),
        }
    }

    /// Selections named by a glob pattern, or by `them`.
    fn matching(&self, target: &str) -> Result<Vec<Query>, RuleError> {
        let matched: Vec<Query> = if target.eq_ignore_ascii_case("them") {
            self.selections
                .iter()
                .filter(|(name, _)| !name.starts_with('_'))
                .map(|(_, query)| query.clone())
                .collect()
        } else {
            let glob = target
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let pattern = Regex::new(&format!("^{}$", glob))
                .map_err(|e| invalid(format!("invalid selection pattern '{}': {}", target, e)))?;
            self.selections
                .iter()
                .filter(|(name, _)| pattern.is_match(name))
                .map(|(_, query)| query.clone())
                .collect()
        };

        if matched.is_empty() {
            return Err(invalid(format!("'{}' matches no selection", target)));
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POWERSHELL: &str = r#"
title: Encoded PowerShell
logsource:
  product: windows
detection:
  selection:
    data.process.name|endswith: powershell.exe
    data.command_line|contains:
      - "-enc"
      - "-nop"
  filter:
    data.user: SYSTEM
  condition: selection and not filter
"#;

    #[test]
    fn test_selection_and_not_filter() {
        let query = translate(POWERSHELL).unwrap();
        assert_eq!(
            query,
            Query::and_all([
                Query::wildcard("data.process.name", "*powershell.exe"),
                Query::or_all([
                    Query::wildcard("data.command_line", "*-enc*"),
                    Query::wildcard("data.command_line", "*-nop*"),
                ]),
                Query::term("data.user", "SYSTEM").not(),
            ])
        );
        assert_eq!(Query::parse(&query.to_string()).unwrap(), query);
    }

    #[test]
    fn test_quantified_conditions() {
        let rule = r#"
detection:
  sel_a:
    data.host: web-1
  sel_b:
    data.host: web-2
  _helper:
    data.port: 22
  condition: 1 of sel_* and all of them
"#;
        let query = translate(rule).unwrap();
        let web1 = Query::term("data.host", "web-1");
        let web2 = Query::term("data.host", "web-2");
        assert_eq!(
            query,
            Query::and_all([
                Query::or_all([web1.clone(), web2.clone()]),
                Query::and_all([web1, web2]),
            ])
        );
    }

    #[test]
    fn test_list_of_maps_and_all_modifier() {
        let rule = r#"
detection:
  selection:
    - data.tags|all: [lateral, smb]
    - data.port: 445
  condition: selection
"#;
        let query = translate(rule).unwrap();
        assert_eq!(
            query,
            Query::or_all([
                Query::and_all([
                    Query::term("data.tags", "lateral"),
                    Query::term("data.tags", "smb"),
                ]),
                Query::term("data.port", "445"),
            ])
        );
    }

    #[test]
    fn test_invalid_rules() {
        assert!(translate("title: no detection").is_err());
        assert!(translate("detection:\n  selection:\n    a: 1\n").is_err());
        assert!(translate("detection:\n  selection:\n    a: 1\n  condition: other\n").is_err());
        assert!(translate("detection:\n  selection:\n    a|re: x\n  condition: selection\n").is_err());
        assert!(translate("detection:\n  keywords:\n    - evil\n  condition: keywords\n").is_err());
    }
}
