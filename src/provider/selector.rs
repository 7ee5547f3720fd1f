//! # Message selectors.
//!
//! A small subset of the JMS selector grammar: a conjunction of property
//! equality tests.
//!
//! ```text
//! selector := term ( AND term )*
//! term     := property '=' literal
//! literal  := 'string' | integer | TRUE | FALSE
//! ```
//!
//! Quotes inside string literals are doubled (`'it''s'`). Integer literals
//! match any integral property value; a missing property never matches.

use std::fmt::Write as _;

use crate::error::ProviderError;

use super::message::{Message, Value};

#[derive(Clone, Debug, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
}

#[derive(Clone, Debug, PartialEq)]
struct Term {
    property: String,
    literal: Literal,
}

impl Term {
    fn matches(&self, msg: &Message) -> bool {
        let Some(value) = msg.property(&self.property) else {
            return false;
        };
        match &self.literal {
            Literal::Str(s) => value.as_str() == Some(s.as_str()),
            Literal::Int(n) => value.as_i64() == Some(*n),
            Literal::Bool(b) => matches!(value, Value::Boolean(v) if v == b),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Ident(String),
    Eq,
    Str(String),
    Int(i64),
}

/// A parsed message selector.
///
/// ## Example
/// ```rust
/// use mqbridge::{Body, Message, Selector};
///
/// let sel = Selector::parse("StreamsOperatorCkpName = 'sink' AND checkpointId = 7").unwrap();
/// let msg = Message::new(Body::Empty)
///     .with_property("StreamsOperatorCkpName", "sink")
///     .with_property("checkpointId", 7_i64);
/// assert!(sel.matches(&msg));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    terms: Vec<Term>,
}

impl Selector {
    /// Parses a selector expression.
    pub fn parse(src: &str) -> Result<Self, ProviderError> {
        let mut tokens = tokenize(src).map_err(invalid)?.into_iter();
        let mut terms = Vec::new();

        loop {
            let property = match tokens.next() {
                Some(Token::Ident(name)) if !is_keyword(&name) => name,
                _ => return Err(invalid("expected property name")),
            };
            if tokens.next() != Some(Token::Eq) {
                return Err(invalid(format!("expected `=` after `{property}`")));
            }
            let literal = match tokens.next() {
                Some(Token::Str(s)) => Literal::Str(s),
                Some(Token::Int(n)) => Literal::Int(n),
                Some(Token::Ident(w)) if w.eq_ignore_ascii_case("TRUE") => Literal::Bool(true),
                Some(Token::Ident(w)) if w.eq_ignore_ascii_case("FALSE") => Literal::Bool(false),
                _ => return Err(invalid(format!("expected literal for `{property}`"))),
            };
            terms.push(Term { property, literal });

            match tokens.next() {
                None => break,
                Some(Token::Ident(w)) if w.eq_ignore_ascii_case("AND") => {}
                Some(_) => return Err(invalid("expected `AND` or end of selector")),
            }
        }
        Ok(Self { terms })
    }

    /// True if every term holds for the message.
    pub fn matches(&self, msg: &Message) -> bool {
        self.terms.iter().all(|t| t.matches(msg))
    }

    /// Renders `property = 'value'` with the value quoted.
    pub fn equals_clause(property: &str, value: &str) -> String {
        let mut out = String::with_capacity(property.len() + value.len() + 6);
        let _ = write!(out, "{property} = '{}'", value.replace('\'', "''"));
        out
    }
}

fn invalid(reason: impl Into<String>) -> ProviderError {
    ProviderError::InvalidSelector {
        reason: reason.into(),
    }
}

fn is_keyword(word: &str) -> bool {
    ["AND", "TRUE", "FALSE"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut out = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '=' {
            chars.next();
            out.push(Token::Eq);
        } else if c == '\'' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        s.push('\'');
                    }
                    Some('\'') => break,
                    Some(ch) => s.push(ch),
                    None => return Err("unterminated string literal".to_string()),
                }
            }
            out.push(Token::Str(s));
        } else if c.is_ascii_digit() || c == '-' {
            let mut s = String::from(c);
            chars.next();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                s.push(d);
                chars.next();
            }
            let n = s
                .parse::<i64>()
                .map_err(|_| format!("invalid number `{s}`"))?;
            out.push(Token::Int(n));
        } else if is_ident_start(c) {
            let mut s = String::new();
            while let Some(&d) = chars.peek() {
                if !is_ident_part(d) {
                    break;
                }
                s.push(d);
                chars.next();
            }
            out.push(Token::Ident(s));
        } else {
            return Err(format!("unexpected character `{c}`"));
        }
    }
    Ok(out)
}
