//! Query tokenizer.

use crate::errors::{Result, StoreError};
use crate::query::ast::CompOp;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    And,
    Or,
    /// Symbolic comparison operator (`=`, `!=`, `>`, `>=`, `<`, `<=`, `~=`).
    Symbol(CompOp),
    /// Bare run of characters: field paths, numbers, keywords, word operators.
    Word(String),
    /// Double-quoted string literal, already unescaped.
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the query.
    pub position: usize,
    /// The token as written.
    pub text: String,
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '=' | '!' | '<' | '>' | '~' | '&' | '|')
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !is_operator_char(c) && !matches!(c, '(' | ')' | '"')
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            '"' => {
                chars.next();
                // only `\"` and `\\` are escapes; other backslashes reach regexes as written
                let mut value = String::new();
                let mut escaped = false;
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if escaped {
                        if ch != '"' && ch != '\\' {
                            value.push('\\');
                        }
                        value.push(ch);
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == '"' {
                        closed = true;
                        break;
                    } else {
                        value.push(ch);
                    }
                }
                if !closed {
                    return Err(StoreError::query_syntax(
                        &input[start..],
                        start,
                        "unterminated string literal",
                    ));
                }
                TokenKind::Str(value)
            }
            c if is_operator_char(c) => {
                chars.next();
                let next = chars.peek().map(|&(_, n)| n);
                let (kind, two) = match (c, next) {
                    ('&', Some('&')) => (TokenKind::And, true),
                    ('|', Some('|')) => (TokenKind::Or, true),
                    ('!', Some('=')) => (TokenKind::Symbol(CompOp::Ne), true),
                    ('>', Some('=')) => (TokenKind::Symbol(CompOp::Gte), true),
                    ('<', Some('=')) => (TokenKind::Symbol(CompOp::Lte), true),
                    ('~', Some('=')) => (TokenKind::Symbol(CompOp::Regex), true),
                    ('=', _) => (TokenKind::Symbol(CompOp::Eq), false),
                    ('>', _) => (TokenKind::Symbol(CompOp::Gt), false),
                    ('<', _) => (TokenKind::Symbol(CompOp::Lt), false),
                    _ => {
                        let end = start + c.len_utf8() + next.map_or(0, char::len_utf8);
                        let fragment = input.get(start..end).unwrap_or(&input[start..]);
                        return Err(StoreError::query_syntax(fragment, start, "unknown operator"));
                    }
                };
                if two {
                    chars.next();
                }
                kind
            }
            _ => {
                let mut end = input.len();
                while let Some(&(i, ch)) = chars.peek() {
                    if !is_word_char(ch) {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                TokenKind::Word(input[start..end].to_string())
            }
        };

        let end = chars.peek().map_or(input.len(), |&(i, _)| i);
        tokens.push(Token {
            kind,
            position: start,
            text: input[start..end].to_string(),
        });
    }

    Ok(tokens)
}
