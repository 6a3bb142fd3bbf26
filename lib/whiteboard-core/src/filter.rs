//! LDAP-style filter expressions over property bags
//!
//! ```text
//! filter     = "(" filtercomp ")"
//! filtercomp = "&" filter+ | "|" filter+ | "!" filter | item
//! item       = attr ( "=" | "~=" | ">=" | "<=" ) value
//! ```
//!
//! `(attr=*)` tests presence, any other unescaped `*` in an `=` value makes
//! it a substring match, and `\` escapes the next character. Keys are
//! case-sensitive. A filter is compiled once and evaluated without side
//! effects, so one instance can be shared by concurrent refreshes.

use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use whiteboard_api::PropertyBag;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter must be of type string")]
    NotAString,

    #[error("unexpected end of filter at position {0}")]
    UnexpectedEnd(usize),

    #[error("expected '{expected}' at position {position}")]
    Expected { expected: char, position: usize },

    #[error("missing attribute name at position {0}")]
    MissingAttribute(usize),

    #[error("invalid operator at position {0}")]
    InvalidOperator(usize),

    #[error("empty filter list at position {0}")]
    EmptyList(usize),

    #[error("trailing characters at position {0}")]
    TrailingInput(usize),

    #[error("filter nested deeper than {MAX_DEPTH} levels at position {0}")]
    TooDeep(usize),
}

/// Deepest nesting of `(...)` groups a filter may use
pub const MAX_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Comparison {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SubstringPattern {
    initial: Option<String>,
    any: Vec<String>,
    last: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(String),
    Compare {
        key: String,
        op: Comparison,
        value: String,
    },
    Substring {
        key: String,
        pattern: SubstringPattern,
    },
}

/// A compiled filter expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    source: String,
    root: Node,
}

impl Filter {
    /// Compile a filter expression
    pub fn compile(expression: &str) -> Result<Self, FilterError> {
        let mut parser = Parser::new(expression);
        parser.skip_whitespace();
        let root = parser.filter()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(FilterError::TrailingInput(parser.pos));
        }

        Ok(Self {
            source: expression.to_string(),
            root,
        })
    }

    /// Compile an optional expression; absent or blank means "match everything"
    pub fn compile_optional(expression: Option<&str>) -> Result<Option<Self>, FilterError> {
        match expression {
            Some(expr) if !expr.trim().is_empty() => Self::compile(expr).map(Some),
            _ => Ok(None),
        }
    }

    /// Evaluate the filter against a property bag
    pub fn matches(&self, properties: &PropertyBag) -> bool {
        self.root.matches(properties)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Evaluate an optional filter, where `None` matches everything
pub fn matches_optional(filter: Option<&Filter>, properties: &PropertyBag) -> bool {
    filter.map_or(true, |f| f.matches(properties))
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Node {
    fn matches(&self, properties: &PropertyBag) -> bool {
        match self {
            Node::And(nodes) => nodes.iter().all(|n| n.matches(properties)),
            Node::Or(nodes) => nodes.iter().any(|n| n.matches(properties)),
            Node::Not(node) => !node.matches(properties),
            Node::Present(key) => properties.contains_key(key),
            Node::Compare { key, op, value } => properties
                .get(key)
                .is_some_and(|actual| compare(actual, *op, value)),
            Node::Substring { key, pattern } => properties
                .get(key)
                .is_some_and(|actual| substring(actual, pattern)),
        }
    }
}

fn compare(actual: &Value, op: Comparison, expected: &str) -> bool {
    match actual {
        Value::String(s) => compare_str(s, op, expected),
        Value::Number(n) => compare_number(n, op, expected),
        Value::Bool(b) => {
            matches!(op, Comparison::Equal | Comparison::Approx)
                && expected
                    .trim()
                    .eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        Value::Array(items) => items.iter().any(|item| compare(item, op, expected)),
        Value::Null | Value::Object(_) => false,
    }
}

fn compare_str(actual: &str, op: Comparison, expected: &str) -> bool {
    match op {
        Comparison::Equal => actual == expected,
        Comparison::Approx => normalize(actual) == normalize(expected),
        Comparison::GreaterEq => actual >= expected,
        Comparison::LessEq => actual <= expected,
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn compare_number(actual: &Number, op: Comparison, expected: &str) -> bool {
    let expected = expected.trim();
    let ordering = match (actual.as_i64(), expected.parse::<i64>()) {
        (Some(a), Ok(e)) => a.cmp(&e),
        _ => match (actual.as_f64(), expected.parse::<f64>()) {
            (Some(a), Ok(e)) => match a.partial_cmp(&e) {
                Some(ordering) => ordering,
                None => return false,
            },
            _ => return false,
        },
    };

    match op {
        Comparison::Equal | Comparison::Approx => ordering == Ordering::Equal,
        Comparison::GreaterEq => ordering != Ordering::Less,
        Comparison::LessEq => ordering != Ordering::Greater,
    }
}

fn substring(actual: &Value, pattern: &SubstringPattern) -> bool {
    match actual {
        Value::String(s) => substring_str(s, pattern),
        Value::Array(items) => items.iter().any(|item| substring(item, pattern)),
        _ => false,
    }
}

fn substring_str(actual: &str, pattern: &SubstringPattern) -> bool {
    let mut rest = actual;
    if let Some(initial) = &pattern.initial {
        match rest.strip_prefix(initial.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    if let Some(last) = &pattern.last {
        match rest.strip_suffix(last.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in &pattern.any {
        match rest.find(part.as_str()) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    true
}

enum Token {
    Char(char),
    Star,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(expression: &str) -> Self {
        Self {
            chars: expression.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(FilterError::Expected {
                expected,
                position: self.pos,
            }),
            None => Err(FilterError::UnexpectedEnd(self.pos)),
        }
    }

    fn filter(&mut self) -> Result<Node, FilterError> {
        if self.depth >= MAX_DEPTH {
            return Err(FilterError::TooDeep(self.pos));
        }
        self.depth += 1;
        let node = self.group();
        self.depth -= 1;
        node
    }

    fn group(&mut self) -> Result<Node, FilterError> {
        self.expect('(')?;
        self.skip_whitespace();
        let node = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Node::And(self.list()?)
            }
            Some('|') => {
                self.pos += 1;
                Node::Or(self.list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_whitespace();
                Node::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(FilterError::UnexpectedEnd(self.pos)),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(node)
    }

    fn list(&mut self) -> Result<Vec<Node>, FilterError> {
        let start = self.pos;
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() != Some('(') {
                break;
            }
            nodes.push(self.filter()?);
        }
        if nodes.is_empty() {
            return Err(FilterError::EmptyList(start));
        }
        Ok(nodes)
    }

    fn item(&mut self) -> Result<Node, FilterError> {
        let start = self.pos;
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            key.push(c);
            self.pos += 1;
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(FilterError::MissingAttribute(start));
        }

        let op_pos = self.pos;
        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                Comparison::Equal
            }
            Some(c @ ('~' | '<' | '>')) => {
                self.pos += 1;
                if self.peek() != Some('=') {
                    return Err(FilterError::InvalidOperator(op_pos));
                }
                self.pos += 1;
                match c {
                    '~' => Comparison::Approx,
                    '<' => Comparison::LessEq,
                    _ => Comparison::GreaterEq,
                }
            }
            Some(_) => return Err(FilterError::InvalidOperator(op_pos)),
            None => return Err(FilterError::UnexpectedEnd(op_pos)),
        };

        let tokens = self.value()?;
        Ok(build_item(key, op, tokens))
    }

    fn value(&mut self) -> Result<Vec<Token>, FilterError> {
        let mut tokens = Vec::new();
        loop {
            match self.peek() {
                None => return Err(FilterError::UnexpectedEnd(self.pos)),
                Some(')') => return Ok(tokens),
                Some('(') => {
                    return Err(FilterError::Expected {
                        expected: ')',
                        position: self.pos,
                    })
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            tokens.push(Token::Char(c));
                            self.pos += 1;
                        }
                        None => return Err(FilterError::UnexpectedEnd(self.pos)),
                    }
                }
                Some('*') => {
                    tokens.push(Token::Star);
                    self.pos += 1;
                }
                Some(c) => {
                    tokens.push(Token::Char(c));
                    self.pos += 1;
                }
            }
        }
    }
}

fn build_item(key: String, op: Comparison, tokens: Vec<Token>) -> Node {
    let has_star = tokens.iter().any(|t| matches!(t, Token::Star));
    if op != Comparison::Equal || !has_star {
        let value = tokens
            .iter()
            .map(|t| match t {
                Token::Char(c) => *c,
                Token::Star => '*',
            })
            .collect();
        return Node::Compare { key, op, value };
    }

    let mut pieces = vec![String::new()];
    for token in tokens {
        match token {
            Token::Star => pieces.push(String::new()),
            Token::Char(c) => {
                if let Some(piece) = pieces.last_mut() {
                    piece.push(c);
                }
            }
        }
    }
    if pieces.iter().all(String::is_empty) {
        return Node::Present(key);
    }

    let last = pieces.pop().filter(|p| !p.is_empty());
    let mut rest = pieces.into_iter();
    let initial = rest.next().filter(|p| !p.is_empty());
    let any = rest.filter(|p| !p.is_empty()).collect();
    Node::Substring {
        key,
        pattern: SubstringPattern { initial, any, last },
    }
}
