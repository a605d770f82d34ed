//! Boolean query expressions
//!
//! ```text
//! expr    := term ( "OR" term )*
//! term    := unary ( "AND" unary )*
//! unary   := "NOT" unary | primary
//! primary := "(" expr ")" | factor
//! ```
//!
//! Keywords are recognised only as whole whitespace-delimited tokens outside
//! double quotes, so `name="SALT AND PEPPER"` is a single factor. An escaped
//! quote (`\"`) neither opens nor closes a quoted run.

use crate::error::{IndexError, IndexResult};
use crate::query::QueryPattern;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Factor(QueryPattern),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn parse(input: &str) -> IndexResult<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(IndexError::invalid_query("empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(IndexError::invalid_query(format!(
                "unexpected token {token:?}"
            )));
        }
        Ok(expr)
    }

    /// Number of query factors in the tree
    #[must_use]
    pub fn factor_count(&self) -> usize {
        match self {
            Self::Factor(_) => 1,
            Self::And(l, r) | Self::Or(l, r) => l.factor_count() + r.factor_count(),
            Self::Not(inner) => inner.factor_count(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    And,
    Or,
    Not,
    Open,
    Close,
    Factor(String),
}

fn tokenize(input: &str) -> IndexResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if current.is_empty() {
            return;
        }
        let word = std::mem::take(current);
        tokens.push(match word.as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            _ => Token::Factor(word),
        });
    };

    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('"' | '*' | '\\')) => {
                current.push(c);
                current.extend(chars.next());
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if in_quotes => current.push(c),
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            '(' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Close);
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(IndexError::invalid_query("unterminated quote"));
    }
    flush(&mut current, &mut tokens);
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> IndexResult<Expr> {
        let mut left = self.term()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> IndexResult<Expr> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> IndexResult<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> IndexResult<Expr> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(IndexError::invalid_query("missing ')'")),
                }
            }
            Some(Token::Factor(raw)) => Ok(Expr::Factor(QueryPattern::parse(&raw)?)),
            Some(token) => Err(IndexError::invalid_query(format!(
                "unexpected token {token:?}"
            ))),
            None => Err(IndexError::invalid_query("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Predicate;

    fn factor(raw: &str) -> Box<Expr> {
        Box::new(Expr::Factor(QueryPattern::parse(raw).unwrap()))
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = Expr::parse("a=1 OR b=2 AND c=3").unwrap();
        assert_eq!(
            expr,
            Expr::Or(factor("a=1"), Box::new(Expr::And(factor("b=2"), factor("c=3"))))
        );
    }

    #[test]
    fn test_parentheses_and_not() {
        let expr = Expr::parse("(a=x* OR b=y*) AND NOT c=z").unwrap();
        assert_eq!(
            expr,
            Expr::And(
                Box::new(Expr::Or(factor("a=x*"), factor("b=y*"))),
                Box::new(Expr::Not(factor("c=z"))),
            )
        );
        assert_eq!(expr.factor_count(), 3);
    }

    #[test]
    fn test_keywords_inside_quotes_are_literal() {
        let expr = Expr::parse("dish=\"SALT AND PEPPER\"").unwrap();
        let Expr::Factor(pattern) = expr else {
            panic!("expected a single factor");
        };
        assert_eq!(pattern.predicate(), &Predicate::Exact("SALT AND PEPPER".into()));
    }

    #[test]
    fn test_escaped_quote_does_not_toggle_quoting() {
        let expr = Expr::parse(r#"title="the \"AND\" gate" OR title=x"#).unwrap();
        let Expr::Or(left, _) = expr else {
            panic!("expected a disjunction");
        };
        let Expr::Factor(pattern) = *left else {
            panic!("expected a factor on the left");
        };
        assert_eq!(pattern.predicate(), &Predicate::Exact(r#"the "AND" gate"#.into()));

        let expr = Expr::parse(r"name=\*x AND name=*y").unwrap();
        assert_eq!(expr.factor_count(), 2);
    }

    #[test]
    fn test_keyword_substrings_are_not_operators() {
        let expr = Expr::parse("BRAND=ORACLE").unwrap();
        assert!(matches!(expr, Expr::Factor(_)));
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("a=1 AND").is_err());
        assert!(Expr::parse("(a=1 OR b=2").is_err());
        assert!(Expr::parse("a=1 b=2").is_err());
        assert!(Expr::parse("a=\"open").is_err());
    }
}
