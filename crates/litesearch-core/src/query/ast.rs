use crate::model::Primitive;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Regex,
    Like,
    Is,
    IsNot,
}

impl CompOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Regex => "~=",
            Self::Like => "like",
            Self::Is => "is",
            Self::IsNot => "is_not",
        }
    }

    /// Word operators; the symbolic ones are recognised by the lexer.
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "like" => Some(Self::Like),
            "is" => Some(Self::Is),
            "is_not" => Some(Self::IsNot),
            _ => None,
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

impl fmt::Display for CompOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub field: String,
    pub op: CompOp,
    pub value: Primitive,
    /// Byte offset of the rule in the query text.
    pub position: usize,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Rule(Rule),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(rule) => write!(f, "{rule}"),
            Self::And(lhs, rhs) => write!(f, "({lhs} && {rhs})"),
            Self::Or(lhs, rhs) => write!(f, "({lhs} || {rhs})"),
        }
    }
}
