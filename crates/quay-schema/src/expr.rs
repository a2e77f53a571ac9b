//! Restricted comparison expressions for probe conditions.
//!
//! An `is` condition decides whether a probed tool is acceptable, e.g.
//!
//! ```text
//! $1 >= 10.2
//! $2 == release && $1 != 0
//! ```
//!
//! Operands are `$0`–`$9` variable references (resolved against a
//! [`Bindings`] bag captured by the probe), quoted strings, or bare
//! words/numbers. This is deliberately not a scripting language: only
//! comparisons joined by `&&`/`||` are expressible, and the grammar is
//! checked at manifest validation time whether or not the probe ever runs.

use thiserror::Error;

/// Failure to parse an `is` condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ExpressionError(pub String);

/// Variables captured by a probe, addressed as `$0`–`$9`.
///
/// `$0` starts as the discovered candidate path; a `select` regex may
/// repopulate `$0`–`$9` from its capture groups. The bag is immutable once
/// the probe resolves and is threaded to every field read that performs
/// substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    slots: [Option<String>; 10],
}

impl Bindings {
    /// An empty bag: every `$N` token is left literal by substitution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set slot `index` (0–9); out-of-range indexes are ignored.
    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(value.into());
        }
    }

    /// Get slot `index` if it has been captured.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index).and_then(|s| s.as_deref())
    }

    /// Replace `$0`–`$9` tokens in `text` with captured values.
    ///
    /// A doubled `$$` is an escape for a literal `$` and is consumed before
    /// any variable lookup, so substitution cannot recurse into the escape.
    /// A `$N` token with no captured value stays literal.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some('$') => {
                    chars.next();
                    out.push('$');
                }
                Some(digit @ '0'..='9') => {
                    chars.next();
                    let index = digit as usize - '0' as usize;
                    match self.get(index) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('$');
                            out.push(digit);
                        }
                    }
                }
                _ => out.push('$'),
            }
        }
        out
    }
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Variable(usize),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparison {
    left: Operand,
    op: Op,
    right: Operand,
}

/// A parsed `is` condition: comparisons joined by `&&` and `||`
/// (`&&` binds tighter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    // disjunction of conjunctions
    alternatives: Vec<Vec<Comparison>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Operand(Operand),
    Op(Op),
    AndAnd,
    OrOr,
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            c if c.is_whitespace() => i += 1,
            '&' | '|' => {
                if i + 1 < bytes.len() && bytes[i + 1] == bytes[i] {
                    tokens.push(if c == '&' { Token::AndAnd } else { Token::OrOr });
                    i += 2;
                } else {
                    return Err(ExpressionError(format!("single '{c}' is not an operator")));
                }
            }
            '=' | '!' | '<' | '>' => {
                let double = i + 1 < bytes.len() && bytes[i + 1] == b'=';
                let op = match (c, double) {
                    ('=', true) => Op::Eq,
                    ('!', true) => Op::Ne,
                    ('<', true) => Op::Le,
                    ('>', true) => Op::Ge,
                    ('<', false) => Op::Lt,
                    ('>', false) => Op::Gt,
                    _ => return Err(ExpressionError(format!("bad operator '{c}'"))),
                };
                tokens.push(Token::Op(op));
                i += if double { 2 } else { 1 };
            }
            '$' => {
                let digit = bytes.get(i + 1).map(|b| *b as char);
                match digit {
                    Some(d @ '0'..='9') => {
                        tokens.push(Token::Operand(Operand::Variable(d as usize - '0' as usize)));
                        i += 2;
                    }
                    _ => return Err(ExpressionError("'$' must name a variable $0-$9".to_string())),
                }
            }
            quote @ ('\'' | '"') => {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] as char != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(ExpressionError("unterminated string literal".to_string()));
                }
                tokens.push(Token::Operand(Operand::Literal(text[start..j].to_string())));
                i = j + 1;
            }
            _ => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_whitespace() || matches!(c, '&' | '|' | '=' | '!' | '<' | '>' | '$') {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token::Operand(Operand::Literal(text[start..i].to_string())));
            }
        }
    }
    Ok(tokens)
}

impl Expression {
    /// Parse an `is` condition.
    ///
    /// # Errors
    ///
    /// Returns an [`ExpressionError`] when the text does not fit the
    /// comparison grammar. Validation calls this even when the owning probe
    /// never executes.
    pub fn parse(text: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(text)?;
        let mut alternatives = Vec::new();
        let mut current = Vec::new();
        let mut iter = tokens.into_iter().peekable();
        loop {
            let left = match iter.next() {
                Some(Token::Operand(op)) => op,
                _ => return Err(ExpressionError("expected an operand".to_string())),
            };
            let op = match iter.next() {
                Some(Token::Op(op)) => op,
                _ => return Err(ExpressionError("expected a comparison operator".to_string())),
            };
            let right = match iter.next() {
                Some(Token::Operand(op)) => op,
                _ => return Err(ExpressionError("expected an operand".to_string())),
            };
            current.push(Comparison { left, op, right });
            match iter.next() {
                None => break,
                Some(Token::AndAnd) => {}
                Some(Token::OrOr) => {
                    alternatives.push(std::mem::take(&mut current));
                }
                Some(_) => {
                    return Err(ExpressionError("expected '&&' or '||'".to_string()));
                }
            }
        }
        alternatives.push(current);
        Ok(Self { alternatives })
    }

    /// Evaluate the condition against a set of probe bindings.
    ///
    /// An unresolved `$N` operand evaluates as the empty string. Ordering
    /// operators compare numerically when both sides parse as numbers, and
    /// lexicographically otherwise.
    pub fn evaluate(&self, bindings: &Bindings) -> bool {
        self.alternatives
            .iter()
            .any(|conj| conj.iter().all(|cmp| cmp.evaluate(bindings)))
    }
}

impl Comparison {
    fn evaluate(&self, bindings: &Bindings) -> bool {
        let left = resolve(&self.left, bindings);
        let right = resolve(&self.right, bindings);
        let ordering = match (left.parse::<f64>(), right.parse::<f64>()) {
            (Ok(l), Ok(r)) => l.partial_cmp(&r),
            _ => Some(left.cmp(&right)),
        };
        let Some(ordering) = ordering else {
            return false;
        };
        match self.op {
            Op::Eq => ordering.is_eq(),
            Op::Ne => !ordering.is_eq(),
            Op::Lt => ordering.is_lt(),
            Op::Le => ordering.is_le(),
            Op::Gt => ordering.is_gt(),
            Op::Ge => ordering.is_ge(),
        }
    }
}

fn resolve<'a>(operand: &'a Operand, bindings: &'a Bindings) -> &'a str {
    match operand {
        Operand::Variable(index) => bindings.get(*index).unwrap_or(""),
        Operand::Literal(text) => text.as_str(),
    }
}
