//! Recursive-descent parser for filter queries.
//!
//! `&&` and `||` chain left to right. The grammar gives them no relative
//! precedence, so a chain that mixes them at one grouping level is rejected
//! and must be parenthesized.

use crate::errors::{Result, StoreError};
use crate::model::Primitive;
use crate::query::ast::{CompOp, Expr, Rule};
use crate::query::lexer::{tokenize, Token, TokenKind};

pub struct QueryParser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    index: usize,
}

#[derive(Clone, Copy, PartialEq)]
enum Combinator {
    And,
    Or,
}

impl<'a> QueryParser<'a> {
    pub fn parse(input: &'a str) -> Result<Expr> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(StoreError::query_syntax(input, 0, "empty query"));
        }
        let mut parser = Self {
            input,
            tokens,
            index: 0,
        };
        let expr = parser.parse_expression()?;
        if let Some(token) = parser.peek() {
            let message = match token.kind {
                TokenKind::RParen => "unbalanced ')'",
                _ => "unexpected token after expression",
            };
            return Err(parser.error_at(token, message));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: &str) -> StoreError {
        StoreError::query_syntax(token.text.clone(), token.position, message)
    }

    fn error_at_end(&self, message: &str) -> StoreError {
        let tail = self
            .tokens
            .last()
            .map_or(self.input, |t| &self.input[t.position..]);
        StoreError::query_syntax(tail, self.input.len(), message)
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_operand()?;
        let mut chain: Option<Combinator> = None;

        loop {
            let combinator = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::And) => Combinator::And,
                Some(TokenKind::Or) => Combinator::Or,
                _ => break,
            };
            let Some(token) = self.next() else { break };
            if chain.is_some_and(|c| c != combinator) {
                return Err(self.error_at(
                    &token,
                    "mixing && and || requires parentheses",
                ));
            }
            chain = Some(combinator);

            let rhs = self.parse_operand()?;
            lhs = match combinator {
                Combinator::And => Expr::And(Box::new(lhs), Box::new(rhs)),
                Combinator::Or => Expr::Or(Box::new(lhs), Box::new(rhs)),
            };
        }

        Ok(lhs)
    }

    fn parse_operand(&mut self) -> Result<Expr> {
        let token = self
            .next()
            .ok_or_else(|| self.error_at_end("expected rule or '(' but reached end of query"))?;

        match &token.kind {
            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                match self.next() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(self.error_at(&other, "expected ')'")),
                    None => Err(self.error_at(&token, "unbalanced '('")),
                }
            }
            TokenKind::Word(field) => self.parse_rule(field.clone(), token.position),
            _ => Err(self.error_at(&token, "expected field name or '('")),
        }
    }

    fn parse_rule(&mut self, field: String, position: usize) -> Result<Expr> {
        let token = self
            .next()
            .ok_or_else(|| self.error_at_end("expected comparison operator"))?;
        let op = match &token.kind {
            TokenKind::Symbol(op) => *op,
            TokenKind::Word(word) => CompOp::from_word(word)
                .ok_or_else(|| self.error_at(&token, "unknown comparison operator"))?,
            _ => return Err(self.error_at(&token, "expected comparison operator")),
        };

        let token = self
            .next()
            .ok_or_else(|| self.error_at_end("expected value"))?;
        let value = match token.kind {
            TokenKind::Str(ref s) => Primitive::String(s.clone()),
            TokenKind::Word(ref word) => {
                parse_word_value(word).ok_or_else(|| self.error_at(&token, "invalid value"))?
            }
            _ => return Err(self.error_at(&token, "expected value")),
        };

        Ok(Expr::Rule(Rule {
            field,
            op,
            value,
            position,
        }))
    }
}

fn parse_word_value(word: &str) -> Option<Primitive> {
    match word {
        "null" => Some(Primitive::Null),
        "true" => Some(Primitive::Bool(true)),
        "false" => Some(Primitive::Bool(false)),
        number => parse_number(number).map(Primitive::Number),
    }
}

/// `-? (digits | digits . digits? | . digits) ([eE] [+-]? digits)?`;
/// integers stay integers.
fn parse_number(word: &str) -> Option<serde_json::Number> {
    let body = word.strip_prefix('-').unwrap_or(word);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (mantissa, None),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let all_digits = |s: &str| !s.is_empty() && digits(s);
    let valid = match frac_part {
        None => all_digits(int_part),
        Some(frac) => digits(int_part) && digits(frac) && !(int_part.is_empty() && frac.is_empty()),
    };
    if !valid {
        return None;
    }
    if let Some(exp) = exponent {
        let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
        if !all_digits(exp) {
            return None;
        }
    }
    if frac_part.is_none() && exponent.is_none() {
        if let Ok(n) = word.parse::<i64>() {
            return Some(n.into());
        }
    }
    let f: f64 = word.parse().ok()?;
    serde_json::Number::from_f64(f)
}
