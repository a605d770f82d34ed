//! Query patterns
//!
//! A query is `attribute=value` where the value selects the query class:
//!
//! | value             | class        |
//! |-------------------|--------------|
//! | `abc` / `"abc"`   | Exact        |
//! | `abc*`            | Prefix       |
//! | `*abc`            | Suffix       |
//! | `*abc*`           | Infix        |
//! | `12` / `-3.5`     | ExactNumeric |
//! | `1|~|9`, `1~9`    | RangeNumeric |
//! | `>1`, `<=9`       | RangeNumeric |
//!
//! In a range, a `|` next to `~` makes that bound inclusive. Wildcards may
//! sit inside or outside the quotes. A quoted value is never numeric.
//!
//! `\*`, `\"` and `\\` stand for a literal star, quote and backslash, so
//! `name="5\* hotel*"` is a prefix query for `5* hotel`. Any other backslash
//! is kept as written. An escaped value is never numeric.

use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Query class, selecting both the shard placement and the shard table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryClass {
    Exact,
    Prefix,
    Suffix,
    Infix,
    RangeNumeric,
    ExactNumeric,
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Infix => "infix",
            Self::RangeNumeric => "range",
            Self::ExactNumeric => "exact-numeric",
        };
        f.write_str(name)
    }
}

/// One end of a numeric range
///
/// The literal is kept so that shards can re-parse it in the attribute's
/// own type without going through `f64`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericBound {
    pub literal: String,
    pub value: f64,
    pub inclusive: bool,
}

impl NumericBound {
    fn parse(literal: &str, inclusive: bool) -> Option<Self> {
        let literal = literal.trim();
        parse_numeric_literal(literal).map(|value| Self {
            literal: literal.to_string(),
            value,
            inclusive,
        })
    }
}

/// Value predicate of a query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Infix(String),
    NumericExact { literal: String, value: f64 },
    NumericRange {
        lo: Option<NumericBound>,
        hi: Option<NumericBound>,
    },
}

impl Predicate {
    #[must_use]
    pub const fn class(&self) -> QueryClass {
        match self {
            Self::Exact(_) => QueryClass::Exact,
            Self::Prefix(_) => QueryClass::Prefix,
            Self::Suffix(_) => QueryClass::Suffix,
            Self::Infix(_) => QueryClass::Infix,
            Self::NumericExact { .. } => QueryClass::ExactNumeric,
            Self::NumericRange { .. } => QueryClass::RangeNumeric,
        }
    }

    /// Glob-style test of a string value against a string predicate
    #[must_use]
    pub fn matches_str(&self, value: &str) -> bool {
        match self {
            Self::Exact(v) => value == v,
            Self::Prefix(p) => value.starts_with(p.as_str()),
            Self::Suffix(s) => value.ends_with(s.as_str()),
            Self::Infix(i) => value.contains(i.as_str()),
            Self::NumericExact { .. } | Self::NumericRange { .. } => false,
        }
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::NumericExact { .. } | Self::NumericRange { .. })
    }
}

/// A parsed `attribute=value` query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryPattern {
    raw: String,
    attribute: String,
    predicate: Predicate,
}

impl QueryPattern {
    pub fn parse(raw: &str) -> IndexResult<Self> {
        let (attribute, value) = raw
            .split_once('=')
            .ok_or_else(|| IndexError::invalid_query(format!("missing '=' in {raw:?}")))?;
        let attribute = attribute.trim();
        if attribute.is_empty() {
            return Err(IndexError::invalid_query(format!(
                "missing attribute name in {raw:?}"
            )));
        }
        if attribute.contains('*') {
            return Err(IndexError::invalid_query(format!(
                "wildcards are only supported in values: {raw:?}"
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            attribute: attribute.to_string(),
            predicate: parse_predicate(value.trim())?,
        })
    }

    /// Build a pattern from an already-classified predicate
    pub fn new(attribute: impl Into<String>, predicate: Predicate) -> Self {
        let attribute = attribute.into();
        let raw = format!("{attribute}={}", render(&predicate));
        Self {
            raw,
            attribute,
            predicate,
        }
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    #[must_use]
    pub const fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    #[must_use]
    pub const fn class(&self) -> QueryClass {
        self.predicate.class()
    }
}

impl FromStr for QueryPattern {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for QueryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A value character and whether it was written escaped
type ValueChar = (char, bool);

const QUOTE: ValueChar = ('"', false);
const WILDCARD: ValueChar = ('*', false);

fn unescape(value: &str) -> Vec<ValueChar> {
    let mut out = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('\\', Some(&next @ ('*' | '"' | '\\'))) => {
                chars.next();
                out.push((next, true));
            }
            _ => out.push((c, false)),
        }
    }
    out
}

fn strip_wildcards<'a>(
    mut body: &'a [ValueChar],
    leading: &mut bool,
    trailing: &mut bool,
) -> &'a [ValueChar] {
    if let [first, rest @ ..] = body {
        if *first == WILDCARD {
            *leading = true;
            body = rest;
        }
    }
    if let [rest @ .., last] = body {
        if *last == WILDCARD {
            *trailing = true;
            body = rest;
        }
    }
    body
}

fn parse_predicate(value: &str) -> IndexResult<Predicate> {
    let chars = unescape(value);
    let mut leading = false;
    let mut trailing = false;
    let mut body = strip_wildcards(&chars, &mut leading, &mut trailing);

    let quoted = body.len() >= 2 && body[0] == QUOTE && body[body.len() - 1] == QUOTE;
    if quoted {
        body = strip_wildcards(&body[1..body.len() - 1], &mut leading, &mut trailing);
    }
    if body.contains(&QUOTE) {
        return Err(IndexError::invalid_query(format!(
            "unbalanced quote in value {value:?}"
        )));
    }

    let escaped = body.iter().any(|&(_, escaped)| escaped);
    let body: String = body.iter().map(|&(c, _)| c).collect();
    if !quoted && !escaped && !leading && !trailing {
        if let Some(numeric) = parse_numeric(&body) {
            return Ok(numeric);
        }
    }

    Ok(match (leading, trailing) {
        (false, false) => Predicate::Exact(body),
        (false, true) => Predicate::Prefix(body),
        (true, false) => Predicate::Suffix(body),
        (true, true) => Predicate::Infix(body),
    })
}

/// Half-open range operators: (operator, is lower bound, inclusive)
const COMPARISONS: [(&str, bool, bool); 4] = [
    (">=", true, true),
    ("<=", false, true),
    (">", true, false),
    ("<", false, false),
];

fn parse_numeric(body: &str) -> Option<Predicate> {
    for (op, lower, inclusive) in COMPARISONS {
        if let Some(rest) = body.strip_prefix(op) {
            let bound = NumericBound::parse(rest, inclusive)?;
            return Some(if lower {
                Predicate::NumericRange {
                    lo: Some(bound),
                    hi: None,
                }
            } else {
                Predicate::NumericRange {
                    lo: None,
                    hi: Some(bound),
                }
            });
        }
    }

    if let Some((left, right)) = body.split_once('~') {
        let (left, lo_inclusive) = match left.strip_suffix('|') {
            Some(rest) => (rest, true),
            None => (left, false),
        };
        let (right, hi_inclusive) = match right.strip_prefix('|') {
            Some(rest) => (rest, true),
            None => (right, false),
        };
        return Some(Predicate::NumericRange {
            lo: Some(NumericBound::parse(left, lo_inclusive)?),
            hi: Some(NumericBound::parse(right, hi_inclusive)?),
        });
    }

    parse_numeric_literal(body).map(|value| Predicate::NumericExact {
        literal: body.to_string(),
        value,
    })
}

/// Parse a plain decimal literal; words such as `inf` or `nan` stay strings
fn parse_numeric_literal(s: &str) -> Option<f64> {
    let plain = !s.is_empty()
        && s.bytes().any(|b| b.is_ascii_digit())
        && s.bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if plain { s.parse().ok() } else { None }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn render(predicate: &Predicate) -> String {
    match predicate {
        Predicate::Exact(v) => format!("\"{}\"", escape(v)),
        Predicate::Prefix(v) => format!("\"{}*\"", escape(v)),
        Predicate::Suffix(v) => format!("\"*{}\"", escape(v)),
        Predicate::Infix(v) => format!("\"*{}*\"", escape(v)),
        Predicate::NumericExact { literal, .. } => literal.clone(),
        Predicate::NumericRange { lo, hi } => match (lo, hi) {
            (Some(lo), Some(hi)) => format!(
                "{}{}~{}{}",
                lo.literal,
                if lo.inclusive { "|" } else { "" },
                if hi.inclusive { "|" } else { "" },
                hi.literal
            ),
            (Some(lo), None) => format!("{}{}", if lo.inclusive { ">=" } else { ">" }, lo.literal),
            (None, Some(hi)) => format!("{}{}", if hi.inclusive { "<=" } else { "<" }, hi.literal),
            (None, None) => String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_of(raw: &str) -> QueryClass {
        QueryPattern::parse(raw).unwrap().class()
    }

    #[test]
    fn test_classifier() {
        assert_eq!(class_of("name=str001str"), QueryClass::Exact);
        assert_eq!(class_of("name=str09*"), QueryClass::Prefix);
        assert_eq!(class_of("name=*09str"), QueryClass::Suffix);
        assert_eq!(class_of("name=*09*"), QueryClass::Infix);
        assert_eq!(class_of("name=\"str09*\""), QueryClass::Prefix);
        assert_eq!(class_of("temp=42"), QueryClass::ExactNumeric);
        assert_eq!(class_of("temp=-3.5"), QueryClass::ExactNumeric);
        assert_eq!(class_of("temp=1|~|9"), QueryClass::RangeNumeric);
        assert_eq!(class_of("temp=1~9"), QueryClass::RangeNumeric);
        assert_eq!(class_of("temp=>=10"), QueryClass::RangeNumeric);
        assert_eq!(class_of("temp=\"42\""), QueryClass::Exact);
        assert_eq!(class_of("temp=inf"), QueryClass::Exact);
    }

    #[test]
    fn test_range_inclusive_flags() {
        let pattern = QueryPattern::parse("temp=10|~20").unwrap();
        let Predicate::NumericRange {
            lo: Some(lo),
            hi: Some(hi),
        } = pattern.predicate()
        else {
            panic!("expected a bounded range");
        };
        assert!(lo.inclusive);
        assert!(!hi.inclusive);
        assert_eq!(lo.value, 10.0);
        assert_eq!(hi.literal, "20");

        let pattern = QueryPattern::parse("temp=<5").unwrap();
        assert!(matches!(
            pattern.predicate(),
            Predicate::NumericRange {
                lo: None,
                hi: Some(NumericBound {
                    inclusive: false,
                    ..
                })
            }
        ));
    }

    #[test]
    fn test_wildcard_bodies() {
        let pattern = QueryPattern::parse("name=*\"09\"*").unwrap();
        assert_eq!(pattern.predicate(), &Predicate::Infix("09".into()));
        assert_eq!(pattern.attribute(), "name");

        let pattern = QueryPattern::parse(" name = str09* ").unwrap();
        assert_eq!(pattern.predicate(), &Predicate::Prefix("str09".into()));
    }

    #[test]
    fn test_non_numeric_tilde_is_exact() {
        assert_eq!(
            QueryPattern::parse("path=a~b").unwrap().predicate(),
            &Predicate::Exact("a~b".into())
        );
    }

    #[test]
    fn test_matches_str() {
        assert!(Predicate::Prefix("str09".into()).matches_str("str091str"));
        assert!(!Predicate::Prefix("str09".into()).matches_str("str109str"));
        assert!(Predicate::Suffix("09str".into()).matches_str("str109str"));
        assert!(Predicate::Infix("09".into()).matches_str("str109str"));
        assert!(!Predicate::Infix("09".into()).matches_str("str190str"));
    }

    #[test]
    fn test_escaped_star_and_quote_are_literal() {
        let parse = |raw: &str| QueryPattern::parse(raw).unwrap().predicate().clone();

        assert_eq!(parse(r#"name="5\* hotel*""#), Predicate::Prefix("5* hotel".into()));
        assert_eq!(parse(r"name=\*abc"), Predicate::Exact("*abc".into()));
        assert_eq!(parse(r"name=abc\*"), Predicate::Exact("abc*".into()));
        assert_eq!(parse(r"name=*abc\**"), Predicate::Infix("abc*".into()));
        assert_eq!(parse(r#"quote=say \"hi\""#), Predicate::Exact(r#"say "hi""#.into()));
        assert_eq!(parse(r#"quote="\"""#), Predicate::Exact("\"".into()));
        assert_eq!(parse(r"path=a\\*"), Predicate::Prefix(r"a\".into()));
        assert_eq!(parse(r"path=C:\data"), Predicate::Exact(r"C:\data".into()));
        assert_eq!(parse(r"temp=4\*2"), Predicate::Exact("4*2".into()));
        assert_eq!(parse(r"temp=\\42"), Predicate::Exact(r"\42".into()));

        assert!(QueryPattern::parse(r#"quote=say "hi"#).is_err());
    }

    #[test]
    fn test_escaped_values_render_back() {
        for value in ["*lead", "trail*", r#"a"b"#, r"back\slash", "plain"] {
            for predicate in [
                Predicate::Exact(value.into()),
                Predicate::Prefix(value.into()),
                Predicate::Suffix(value.into()),
                Predicate::Infix(value.into()),
            ] {
                let pattern = QueryPattern::new("a", predicate.clone());
                assert_eq!(QueryPattern::parse(pattern.raw()).unwrap().predicate(), &predicate);
            }
        }
    }

    #[test]
    fn test_malformed() {
        assert!(QueryPattern::parse("novalue").is_err());
        assert!(QueryPattern::parse("=abc").is_err());
        assert!(QueryPattern::parse("name=\"abc").is_err());
        assert!(QueryPattern::parse("na*me=abc").is_err());
    }

    #[test]
    fn test_render_round_trips() {
        for raw in ["a=\"x*\"", "a=1|~9", "a=>=4", "a=\"*y*\""] {
            let parsed = QueryPattern::parse(raw).unwrap();
            let rebuilt = QueryPattern::new(parsed.attribute(), parsed.predicate().clone());
            assert_eq!(QueryPattern::parse(rebuilt.raw()).unwrap().predicate(), parsed.predicate());
        }
    }
}
