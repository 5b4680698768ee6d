//! Tokenizer for shell commands and relaxed literal syntax.

use crate::{Error, Result};

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `;`
    Semicolon,
    /// A single- or double-quoted string, escapes decoded.
    Str(String),
    /// Numeric literal text.
    Number(String),
    /// Identifier; may contain `$` so operators can appear unquoted.
    Ident(String),
}

/// A token and its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token kind.
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub offset: usize,
}

/// Splits `input` into tokens.
///
/// # Errors
///
/// Returns [`Error::Syntax`] on an unterminated string or a character that
/// cannot start a token.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            },
            '{' => single(&mut chars, TokenKind::LBrace),
            '}' => single(&mut chars, TokenKind::RBrace),
            '[' => single(&mut chars, TokenKind::LBracket),
            ']' => single(&mut chars, TokenKind::RBracket),
            '(' => single(&mut chars, TokenKind::LParen),
            ')' => single(&mut chars, TokenKind::RParen),
            ':' => single(&mut chars, TokenKind::Colon),
            ',' => single(&mut chars, TokenKind::Comma),
            ';' => single(&mut chars, TokenKind::Semicolon),
            '"' | '\'' => TokenKind::Str(lex_string(input, &mut chars, offset)?),
            '.' if !next_is_digit(input, offset + 1) => single(&mut chars, TokenKind::Dot),
            c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                TokenKind::Number(lex_number(input, &mut chars, offset)?)
            },
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                TokenKind::Ident(ident)
            },
            other => {
                return Err(Error::syntax(
                    format!("unexpected character '{other}'"),
                    fragment_at(input, offset),
                ));
            },
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

type CharStream<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn single(chars: &mut CharStream<'_>, kind: TokenKind) -> TokenKind {
    chars.next();
    kind
}

fn next_is_digit(input: &str, offset: usize) -> bool {
    input[offset..].chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn lex_string(input: &str, chars: &mut CharStream<'_>, start: usize) -> Result<String> {
    let Some((_, quote)) = chars.next() else {
        return Err(Error::syntax("expected string", fragment_at(input, start)));
    };
    let mut value = String::new();

    while let Some((_, c)) = chars.next() {
        match c {
            c if c == quote => return Ok(value),
            '\\' => {
                let Some((pos, escaped)) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'b' => value.push('\u{0008}'),
                    'f' => value.push('\u{000C}'),
                    'u' => value.push(lex_unicode_escape(input, chars, pos)?),
                    other => value.push(other),
                }
            },
            c => value.push(c),
        }
    }

    Err(Error::syntax("unterminated string", fragment_at(input, start)))
}

fn lex_unicode_escape(input: &str, chars: &mut CharStream<'_>, pos: usize) -> Result<char> {
    let mut code = 0u32;
    for _ in 0..4 {
        let digit = chars
            .next()
            .and_then(|(_, c)| c.to_digit(16))
            .ok_or_else(|| Error::syntax("invalid unicode escape", fragment_at(input, pos)))?;
        code = code * 16 + digit;
    }
    char::from_u32(code)
        .ok_or_else(|| Error::syntax("invalid unicode escape", fragment_at(input, pos)))
}

fn lex_number(input: &str, chars: &mut CharStream<'_>, start: usize) -> Result<String> {
    let mut text = String::new();
    let mut prev = '\0';
    while let Some(&(_, c)) = chars.peek() {
        let accept = c.is_ascii_digit()
            || c == '.'
            || matches!(c, 'e' | 'E')
            || (matches!(c, '-' | '+') && (text.is_empty() || matches!(prev, 'e' | 'E')));
        if !accept {
            break;
        }
        text.push(c);
        prev = c;
        chars.next();
    }

    let digits = text.trim_start_matches(['-', '+']);
    if digits.is_empty() || !digits.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::syntax("malformed number", fragment_at(input, start)));
    }
    Ok(text)
}

/// Returns a short excerpt of `input` starting at `offset`.
pub(crate) fn fragment_at(input: &str, offset: usize) -> String {
    input
        .get(offset..)
        .unwrap_or_default()
        .chars()
        .take(24)
        .collect()
}
