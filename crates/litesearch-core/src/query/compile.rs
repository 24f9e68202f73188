//! Compilation of parsed queries into evaluable predicates.
//!
//! A rule only ever looks at the first value recorded under its field. For a
//! repeated field such as `tags` flattened from a list, `tags = "b"` tests
//! the first tag and nothing else.

use crate::errors::{Result, StoreError};
use crate::model::{DocumentFields, Primitive};
use crate::query::ast::{CompOp, Expr, Rule};
use crate::query::parser::QueryParser;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches every document; compiled from an empty query.
    Always,
    Rule(CompiledRule),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    field: String,
    op: CompOp,
    value: Primitive,
    // compiled pattern for `~=` and `like`
    pattern: Option<Regex>,
}

/// Parses and compiles a query. Empty or blank input matches everything.
pub fn compile(query: &str) -> Result<Predicate> {
    if query.trim().is_empty() {
        return Ok(Predicate::Always);
    }
    let expr = QueryParser::parse(query)?;
    let predicate = Predicate::from_expr(&expr)?;
    tracing::debug!(query, normalized = %expr, "compiled query");
    Ok(predicate)
}

impl Predicate {
    pub fn from_expr(expr: &Expr) -> Result<Self> {
        Ok(match expr {
            Expr::Rule(rule) => Self::Rule(CompiledRule::new(rule)?),
            Expr::And(lhs, rhs) => Self::from_expr(lhs)?.and(Self::from_expr(rhs)?),
            Expr::Or(lhs, rhs) => Self::from_expr(lhs)?.or(Self::from_expr(rhs)?),
        })
    }

    pub fn and(self, other: Predicate) -> Predicate {
        Self::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Self::Or(Box::new(self), Box::new(other))
    }

    pub fn evaluate(&self, fields: &DocumentFields) -> bool {
        match self {
            Self::Always => true,
            Self::Rule(rule) => rule.evaluate(fields),
            Self::And(lhs, rhs) => lhs.evaluate(fields) && rhs.evaluate(fields),
            Self::Or(lhs, rhs) => lhs.evaluate(fields) || rhs.evaluate(fields),
        }
    }
}

impl CompiledRule {
    fn new(rule: &Rule) -> Result<Self> {
        let reject = |message: String| {
            StoreError::query_syntax(rule.to_string(), rule.position, message)
        };

        let pattern = match rule.op {
            CompOp::Regex | CompOp::Like => {
                let Primitive::String(text) = &rule.value else {
                    return Err(reject(format!(
                        "`{}` needs a string pattern, got {}",
                        rule.op,
                        rule.value.type_name()
                    )));
                };
                let source = if rule.op == CompOp::Like {
                    like_to_regex(text)
                } else {
                    text.clone()
                };
                let re = RegexBuilder::new(&source)
                    .case_insensitive(rule.op == CompOp::Like)
                    .dot_matches_new_line(rule.op == CompOp::Like)
                    .build()
                    .map_err(|e| reject(format!("invalid pattern: {e}")))?;
                Some(re)
            }
            op if op.is_ordering() && rule.value.is_null() => {
                return Err(reject(format!("`{op}` cannot compare against null")));
            }
            _ => None,
        };

        Ok(Self {
            field: rule.field.clone(),
            op: rule.op,
            value: rule.value.clone(),
            pattern,
        })
    }

    fn evaluate(&self, fields: &DocumentFields) -> bool {
        let first = fields.get(&self.field).and_then(|values| values.first());
        let ordering = || first.and_then(|v| v.compare(&self.value));

        match self.op {
            // against null, `=` and `!=` are `is` and `is_not`
            CompOp::Eq | CompOp::Ne if self.value.is_null() => {
                let is_null = first.map_or(true, Primitive::is_null);
                is_null == (self.op == CompOp::Eq)
            }
            CompOp::Eq => first.is_some_and(|v| v.same_value(&self.value)),
            CompOp::Ne => first.is_some_and(|v| !v.same_value(&self.value)),
            // values of different types never order; the rule is false rather than an error
            CompOp::Gt => ordering() == Some(Ordering::Greater),
            CompOp::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            CompOp::Lt => ordering() == Some(Ordering::Less),
            CompOp::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            CompOp::Regex | CompOp::Like => match (&self.pattern, first.and_then(Primitive::as_str)) {
                (Some(re), Some(text)) => re.is_match(text),
                _ => false,
            },
            // a missing field counts as null
            CompOp::Is => first.unwrap_or(&Primitive::Null).same_value(&self.value),
            CompOp::IsNot => !first.unwrap_or(&Primitive::Null).same_value(&self.value),
        }
    }
}

/// `%` is any run of characters, `_` exactly one; the whole value must match.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '%' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}
