//! Generic structured shape descriptors.
//!
//! A descriptor is a small term tree: numbers, lists and tagged compound terms.
//! Shapes are written as `point(X, Y)`, `box(point(..), point(..))` and
//! `polygon([Shell, Hole1, ...])` where every ring is a list of points. The
//! descriptor itself carries no geometric meaning; interpreting it is the job of
//! the index crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A structured shape description.
///
/// Serialized untagged, so JSON `3.5`, `[..]` and `{"tag": "point", "args": [1, 2]}`
/// map onto the three variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Descriptor {
    Number(f64),
    List(Vec<Descriptor>),
    Term {
        tag: String,
        #[serde(default)]
        args: Vec<Descriptor>,
    },
}

impl Descriptor {
    pub fn term(tag: impl Into<String>, args: Vec<Descriptor>) -> Self {
        Descriptor::Term {
            tag: tag.into(),
            args,
        }
    }

    /// `point(c1, ..., cn)`
    pub fn point(coords: &[f64]) -> Self {
        Self::term("point", coords.iter().map(|&c| Descriptor::Number(c)).collect())
    }

    /// `box(point(low..), point(high..))`
    pub fn bbox(low: &[f64], high: &[f64]) -> Self {
        Self::term("box", vec![Self::point(low), Self::point(high)])
    }

    /// `polygon([Shell, Holes...])` with every ring given as a list of coordinates.
    pub fn polygon(shell: &[&[f64]], holes: &[&[&[f64]]]) -> Self {
        let ring = |coords: &[&[f64]]| {
            Descriptor::List(coords.iter().map(|c| Descriptor::point(c)).collect())
        };
        let mut rings = vec![ring(shell)];
        rings.extend(holes.iter().map(|hole| ring(*hole)));
        Self::term("polygon", vec![Descriptor::List(rings)])
    }

    /// Tag of a compound term, `None` for numbers and lists.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Descriptor::Term { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Descriptor] {
        match self {
            Descriptor::Term { args, .. } => args,
            _ => &[],
        }
    }

    pub fn arity(&self) -> usize {
        self.args().len()
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Descriptor::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Descriptor]> {
        match self {
            Descriptor::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Descriptor]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match self {
            Descriptor::Number(n) => write!(f, "{}", n),
            Descriptor::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Descriptor::Term { tag, args } if args.is_empty() => f.write_str(tag),
            Descriptor::Term { tag, args } => {
                write!(f, "{}(", tag)?;
                join(f, args)?;
                f.write_str(")")
            }
        }
    }
}

/// Error produced when parsing the textual descriptor syntax.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid descriptor at byte {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl FromStr for Descriptor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser { input: s, pos: 0 };
        let descriptor = parser.term()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(descriptor)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn term(&mut self) -> Result<Descriptor, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('[') => {
                self.pos += 1;
                Ok(Descriptor::List(self.sequence(']')?))
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let tag = self.ident();
                let args = if self.eat('(') {
                    self.sequence(')')?
                } else {
                    Vec::new()
                };
                Ok(Descriptor::Term { tag, args })
            }
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Comma separated terms up to `close`; the opening bracket is already consumed.
    fn sequence(&mut self, close: char) -> Result<Vec<Descriptor>, ParseError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.term()?);
            if self.eat(close) {
                return Ok(items);
            }
            if !self.eat(',') {
                return Err(self.error(format!("expected ',' or '{}'", close)));
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_alphanumeric() || c == '_') {
                break;
            }
            self.pos += c.len_utf8();
        }
        self.input[start..self.pos].to_string()
    }

    fn number(&mut self) -> Result<Descriptor, ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let sign_after_exponent = (c == '-' || c == '+')
                && matches!(self.input[..self.pos].chars().last(), Some('e' | 'E'));
            let leading_sign = (c == '-' || c == '+') && self.pos == start;
            if !(c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E')
                && !leading_sign
                && !sign_after_exponent
            {
                break;
            }
            self.pos += 1;
        }
        self.input[start..self.pos]
            .parse::<f64>()
            .map(Descriptor::Number)
            .map_err(|e| ParseError {
                position: start,
                message: e.to_string(),
            })
    }
}
