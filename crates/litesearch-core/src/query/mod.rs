//! Filter query language.
//!
//! ```text
//! expression := "(" expression ")" | expression "&&" expression
//!             | expression "||" expression | rule
//! rule       := field op value
//! op         := "=" | "!=" | ">" | ">=" | "<" | "<=" | "~=" | "like" | "is" | "is_not"
//! value      := "null" | "true" | "false" | number | "quoted string"
//! ```
//!
//! Queries are tokenized by [`lexer`], parsed into an [`Expr`] by
//! [`QueryParser`] and compiled into a [`Predicate`] that is evaluated against
//! a document's flattened fields.

pub mod ast;
pub mod compile;
pub mod lexer;
pub mod parser;

pub use ast::{CompOp, Expr, Rule};
pub use compile::{compile, CompiledRule, Predicate};
pub use parser::QueryParser;
