//! Minimal Lucene-style query text parser.
//!
//! Supported: `field:value`, `field:"quoted value"`, `field:(a OR b)`,
//! `field:[lo TO hi]` / `{lo TO hi}`, `_exists_:field`, `*:*`, `AND`/`&&`,
//! `OR`/`||`, `NOT`/`!`/`-`, implicit AND and parentheses. Bare terms without
//! a field are rejected.

use super::{Query, QueryError};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    And,
    Or,
    Not,
    To,
    Word { text: String, wildcard: bool },
    Quoted(String),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

fn is_word_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | ':' | '"')
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices().peekable(),
            len: text.len(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, QueryError> {
        let mut tokens = Vec::new();
        while let Some(&(pos, c)) = self.chars.peek() {
            let token = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                '{' => self.single(Token::LBrace),
                '}' => self.single(Token::RBrace),
                ':' => self.single(Token::Colon),
                '"' => self.quoted(pos)?,
                '-' | '!' if self.starts_term(&tokens) => self.single(Token::Not),
                '+' if self.starts_term(&tokens) => {
                    self.chars.next();
                    continue;
                }
                '&' | '|' => self.double(pos, c)?,
                _ => self.word(pos)?,
            };
            tokens.push((pos, token));
        }
        Ok(tokens)
    }

    /// A `-`/`!`/`+` is a prefix operator unless it follows a colon.
    fn starts_term(&self, tokens: &[(usize, Token)]) -> bool {
        !matches!(tokens.last(), Some((_, Token::Colon)))
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn double(&mut self, pos: usize, c: char) -> Result<Token, QueryError> {
        self.chars.next();
        match self.chars.next() {
            Some((_, next)) if next == c => Ok(if c == '&' { Token::And } else { Token::Or }),
            _ => Err(QueryError::Syntax {
                position: pos,
                message: format!("expected '{}{}'", c, c),
            }),
        }
    }

    fn quoted(&mut self, start: usize) -> Result<Token, QueryError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                Some((_, '"')) => return Ok(Token::Quoted(value)),
                Some((_, c)) => value.push(c),
                None => break,
            }
        }
        Err(QueryError::Syntax {
            position: start,
            message: "unterminated quoted value".into(),
        })
    }

    fn word(&mut self, start: usize) -> Result<Token, QueryError> {
        let mut text = String::new();
        let mut wildcard = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if is_word_boundary(c) {
                break;
            }
            self.chars.next();
            match c {
                '\\' => match self.chars.next() {
                    Some((_, escaped)) => text.push(escaped),
                    None => {
                        return Err(QueryError::Syntax {
                            position: self.len,
                            message: "dangling escape".into(),
                        })
                    }
                },
                '*' | '?' => {
                    wildcard = true;
                    text.push(c);
                }
                _ => text.push(c),
            }
        }
        if text.is_empty() {
            return Err(QueryError::Syntax {
                position: start,
                message: "unexpected character".into(),
            });
        }
        Ok(match (text.as_str(), wildcard) {
            ("AND", false) => Token::And,
            ("OR", false) => Token::Or,
            ("NOT", false) => Token::Not,
            ("TO", false) => Token::To,
            _ => Token::Word { text, wildcard },
        })
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, QueryError> {
        Err(QueryError::Syntax {
            position: self.position(),
            message: message.into(),
        })
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), QueryError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            self.error(format!("expected {}", what))
        }
    }

    /// `or := and (OR and)*`
    fn parse_or(&mut self, field: Option<&str>) -> Result<Query, QueryError> {
        let mut parts = vec![self.parse_and(field)?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.parse_and(field)?);
        }
        Ok(Query::or_all(parts))
    }

    /// `and := unary ((AND)? unary)*`
    fn parse_and(&mut self, field: Option<&str>) -> Result<Query, QueryError> {
        let mut parts = vec![self.parse_unary(field)?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    parts.push(self.parse_unary(field)?);
                }
                Some(Token::Or) | Some(Token::RParen) | None => break,
                Some(_) => parts.push(self.parse_unary(field)?),
            }
        }
        Ok(Query::and_all(parts))
    }

    fn parse_unary(&mut self, field: Option<&str>) -> Result<Query, QueryError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(self.parse_unary(field)?.not());
        }
        self.parse_primary(field)
    }

    fn parse_primary(&mut self, field: Option<&str>) -> Result<Query, QueryError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or(field)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Word { .. }) if self.peek_at(1) == Some(&Token::Colon) => {
                let Some(Token::Word { text, wildcard }) = self.next() else {
                    return self.error("expected field name");
                };
                self.pos += 1;
                self.parse_field(text, wildcard)
            }
            Some(Token::Word { .. }) | Some(Token::Quoted(_)) => match field {
                Some(field) => self.parse_value(field),
                None => self.error("term without a field"),
            },
            Some(Token::LBracket) | Some(Token::LBrace) => match field {
                Some(field) => self.parse_range(field),
                None => self.error("range without a field"),
            },
            Some(_) => self.error("unexpected token"),
            None => self.error("unexpected end of query"),
        }
    }

    fn parse_field(&mut self, field: String, field_wildcard: bool) -> Result<Query, QueryError> {
        if field_wildcard {
            return match self.next() {
                Some(Token::Word { text, .. }) if field == "*" && text == "*" => Ok(Query::All),
                _ => self.error("wildcard field names are only supported as '*:*'"),
            };
        }
        if field == "_exists_" {
            return match self.next() {
                Some(Token::Word {
                    text,
                    wildcard: false,
                }) => Ok(Query::exists(text)),
                _ => self.error("expected field name after '_exists_:'"),
            };
        }
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let group = self.parse_or(Some(field.as_str()))?;
                self.expect(Token::RParen, "')'")?;
                Ok(if field == "id" { as_ids(group) } else { group })
            }
            Some(Token::LBracket) | Some(Token::LBrace) => self.parse_range(&field),
            Some(Token::Not) => {
                self.pos += 1;
                Ok(self.parse_value(&field)?.not())
            }
            _ => self.parse_value(&field),
        }
    }

    fn parse_value(&mut self, field: &str) -> Result<Query, QueryError> {
        match self.next() {
            Some(Token::Word {
                text,
                wildcard: true,
            }) => Ok(if text == "*" {
                Query::exists(field)
            } else {
                Query::wildcard(field, text)
            }),
            Some(Token::Word {
                text,
                wildcard: false,
            })
            | Some(Token::Quoted(text)) => Ok(Query::term(field, text)),
            _ => {
                self.pos -= 1;
                self.error(format!("expected a value for '{}'", field))
            }
        }
    }

    fn parse_bound(&mut self) -> Result<Option<String>, QueryError> {
        match self.next() {
            Some(Token::Word { text, .. }) if text == "*" => Ok(None),
            Some(Token::Word { text, .. }) | Some(Token::Quoted(text)) => Ok(Some(text)),
            _ => {
                self.pos -= 1;
                self.error("expected a range bound")
            }
        }
    }

    fn parse_range(&mut self, field: &str) -> Result<Query, QueryError> {
        let include_lower = match self.next() {
            Some(Token::LBracket) => true,
            Some(Token::LBrace) => false,
            _ => return self.error("expected '[' or '{'"),
        };
        let lower = self.parse_bound()?;
        self.expect(Token::To, "'TO'")?;
        let upper = self.parse_bound()?;
        let include_upper = match self.next() {
            Some(Token::RBracket) => true,
            Some(Token::RBrace) => false,
            _ => {
                self.pos -= 1;
                return self.error("expected ']' or '}'");
            }
        };
        Ok(Query::Range {
            field: field.to_string(),
            lower,
            upper,
            include_lower,
            include_upper,
        })
    }
}

fn as_ids(group: Query) -> Query {
    let ids: Option<Vec<String>> = match &group {
        Query::Term { field, value } if field == "id" => Some(vec![value.clone()]),
        Query::Or(parts) => parts
            .iter()
            .map(|part| match part {
                Query::Term { field, value } if field == "id" => Some(value.clone()),
                _ => None,
            })
            .collect(),
        _ => None,
    };
    ids.map(Query::ids).unwrap_or(group)
}

/// Parses Lucene-style query text into a [`Query`].
pub fn parse(text: &str) -> Result<Query, QueryError> {
    let tokens = Lexer::new(text).tokenize()?;
    if tokens.is_empty() {
        return Err(QueryError::Syntax {
            position: 0,
            message: "empty query".into(),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };
    let query = parser.parse_or(None)?;
    if parser.peek().is_some() {
        return parser.error("unexpected trailing input");
    }
    Ok(query)
}
