//! Media query grammar for demand block selectors.
//!
//! A selector is a boolean expression over host facts such as `windows`,
//! `linux`, `osx`, `freebsd`, `x64`, `x86`, `arm` and `arm64`:
//!
//! ```text
//! windows and x64
//! linux, osx           # comma separates alternatives (logical OR)
//! not windows
//! (linux or osx) and arm64
//! ```
//!
//! Parsing and evaluation are separate so that a selector can be validated
//! without knowing the host, and evaluated repeatedly against different fact
//! sets.

use thiserror::Error;

/// Failure to parse a selector as a media query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct QueryError {
    /// What went wrong.
    pub message: String,
    /// Byte offset into the selector text where the problem was noticed.
    pub offset: usize,
}

/// A parsed media query: a disjunction of conjunctions over fact atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    alternatives: Vec<Conjunction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Conjunction {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    negated: bool,
    atom: Atom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Atom {
    Fact(String),
    Group(Query),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    And,
    Or,
    Not,
    Comma,
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, QueryError> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            c if c.is_whitespace() => i += 1,
            ',' => {
                tokens.push((Token::Comma, i));
                i += 1;
            }
            '(' => {
                tokens.push((Token::Open, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::Close, i));
                i += 1;
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word = &text[start..i];
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((token, start));
            }
            other => {
                return Err(QueryError {
                    message: format!("unexpected character '{other}'"),
                    offset: i,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, o)| *o)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        t
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    // list := query (',' query)*
    fn parse_list(&mut self) -> Result<Query, QueryError> {
        let mut alternatives = vec![self.parse_query()?];
        while matches!(self.peek(), Some(Token::Comma | Token::Or)) {
            self.bump();
            alternatives.push(self.parse_query()?);
        }
        Ok(Query { alternatives })
    }

    // query := clause ('and' clause)*
    fn parse_query(&mut self) -> Result<Conjunction, QueryError> {
        let mut clauses = vec![self.parse_clause()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.bump();
            clauses.push(self.parse_clause()?);
        }
        Ok(Conjunction { clauses })
    }

    // clause := ['not'] atom
    fn parse_clause(&mut self) -> Result<Clause, QueryError> {
        let negated = if matches!(self.peek(), Some(Token::Not)) {
            self.bump();
            true
        } else {
            false
        };
        let atom = match self.bump() {
            Some(Token::Ident(name)) => Atom::Fact(name),
            Some(Token::Open) => {
                let inner = self.parse_list()?;
                match self.bump() {
                    Some(Token::Close) => Atom::Group(inner),
                    _ => return Err(self.error("expected ')'")),
                }
            }
            _ => return Err(self.error("expected a host fact")),
        };
        Ok(Clause { negated, atom })
    }
}

impl Query {
    /// Parse a selector string into a query.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] with the offset of the first token that does
    /// not fit the grammar.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(QueryError {
                message: "empty query".to_string(),
                offset: 0,
            });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: text.len(),
        };
        let query = parser.parse_list()?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(query)
    }

    /// Evaluate the query against a fact predicate.
    ///
    /// `has` is asked once per fact atom; fact names are passed through
    /// unchanged, so callers decide case sensitivity.
    pub fn evaluate<F>(&self, has: &F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        self.alternatives.iter().any(|conj| {
            conj.clauses.iter().all(|clause| {
                let value = match &clause.atom {
                    Atom::Fact(name) => has(name),
                    Atom::Group(inner) => inner.evaluate(has),
                };
                value != clause.negated
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn facts(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn eval(query: &str, active: &[&str]) -> bool {
        let set = facts(active);
        Query::parse(query)
            .expect("query should parse")
            .evaluate(&|f| set.contains(f))
    }

    #[test]
    fn single_fact() {
        assert!(eval("windows", &["windows", "x64"]));
        assert!(!eval("windows", &["linux", "x64"]));
    }

    #[test]
    fn conjunction() {
        assert!(eval("windows and x64", &["windows", "x64"]));
        assert!(!eval("windows and arm64", &["windows", "x64"]));
    }

    #[test]
    fn comma_is_or() {
        assert!(eval("linux, osx", &["osx", "arm64"]));
        assert!(!eval("linux, osx", &["windows"]));
    }

    #[test]
    fn negation_and_groups() {
        assert!(eval("not windows", &["linux"]));
        assert!(!eval("not windows", &["windows"]));
        assert!(eval("(linux or osx) and arm64", &["osx", "arm64"]));
        assert!(!eval("(linux or osx) and arm64", &["osx", "x64"]));
    }

    #[test]
    fn parse_errors_carry_offsets() {
        let err = Query::parse("windows and").unwrap_err();
        assert_eq!(err.offset, 11);
        assert!(Query::parse("").is_err());
        assert!(Query::parse("a & b").is_err());
        assert!(Query::parse("(linux").is_err());
        assert!(Query::parse("linux)").is_err());
    }
}
