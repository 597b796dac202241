//! Tokenizer for construction and expectation source text

use crate::common::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    Eof,
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Split source text into tokens, ending with [`TokenKind::Eof`]
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let kind = match c {
            b'0'..=b'9' => {
                let (number, end) = lex_number(source, pos)?;
                pos = end;
                TokenKind::Number(number)
            }
            b'"' | b'\'' => {
                let (text, end) = lex_string(source, pos)?;
                pos = end;
                TokenKind::Str(text)
            }
            c if c == b'_' || c == b'$' || c.is_ascii_alphabetic() => {
                while pos < bytes.len()
                    && (bytes[pos] == b'_' || bytes[pos] == b'$' || bytes[pos].is_ascii_alphanumeric())
                {
                    pos += 1;
                }
                match &source[start..pos] {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    ident => TokenKind::Ident(ident.to_string()),
                }
            }
            _ => {
                let next = bytes.get(pos + 1).copied();
                let (kind, width) = match (c, next) {
                    (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
                    (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
                    (b'<', Some(b'=')) => (TokenKind::Le, 2),
                    (b'>', Some(b'=')) => (TokenKind::Ge, 2),
                    (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
                    (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
                    (b'(', _) => (TokenKind::LParen, 1),
                    (b')', _) => (TokenKind::RParen, 1),
                    (b'[', _) => (TokenKind::LBracket, 1),
                    (b']', _) => (TokenKind::RBracket, 1),
                    (b'{', _) => (TokenKind::LBrace, 1),
                    (b'}', _) => (TokenKind::RBrace, 1),
                    (b',', _) => (TokenKind::Comma, 1),
                    (b':', _) => (TokenKind::Colon, 1),
                    (b'.', _) => (TokenKind::Dot, 1),
                    (b'+', _) => (TokenKind::Plus, 1),
                    (b'-', _) => (TokenKind::Minus, 1),
                    (b'*', _) => (TokenKind::Star, 1),
                    (b'/', _) => (TokenKind::Slash, 1),
                    (b'%', _) => (TokenKind::Percent, 1),
                    (b'<', _) => (TokenKind::Lt, 1),
                    (b'>', _) => (TokenKind::Gt, 1),
                    (b'!', _) => (TokenKind::Bang, 1),
                    (b'=', _) => (TokenKind::Assign, 1),
                    _ => {
                        let ch = source[pos..].chars().next().unwrap_or('?');
                        return Err(Error::parse(pos, format!("Unexpected character '{}'", ch)));
                    }
                };
                pos += width;
                kind
            }
        };

        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn lex_number(source: &str, start: usize) -> Result<(f64, usize)> {
    let bytes = source.as_bytes();
    let mut pos = start;
    let digits = |pos: &mut usize| {
        while *pos < bytes.len() && bytes[*pos].is_ascii_digit() {
            *pos += 1;
        }
    };

    digits(&mut pos);
    // A dot only belongs to the number when a digit follows: `1.foo()` is a method call
    if pos + 1 < bytes.len() && bytes[pos] == b'.' && bytes[pos + 1].is_ascii_digit() {
        pos += 1;
        digits(&mut pos);
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            digits(&mut pos);
        }
    }

    let text = &source[start..pos];
    text.parse::<f64>()
        .map(|n| (n, pos))
        .map_err(|_| Error::parse(start, format!("Invalid number '{}'", text)))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize)> {
    let quote = source.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = source[start + 1..].char_indices();

    while let Some((i, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + 1 + i + 1)),
            '\\' => {
                let (j, escaped) = chars
                    .next()
                    .ok_or_else(|| Error::parse(start, "Unterminated string"))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'u' => {
                        let hex_start = start + 1 + j + 1;
                        let hex = source
                            .get(hex_start..hex_start + 4)
                            .ok_or_else(|| Error::parse(hex_start, "Truncated \\u escape"))?;
                        let code = u32::from_str_radix(hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| Error::parse(hex_start, "Invalid \\u escape"))?;
                        out.push(code);
                        for _ in 0..4 {
                            chars.next();
                        }
                    }
                    other => out.push(other),
                }
            }
            c => out.push(c),
        }
    }

    Err(Error::parse(start, "Unterminated string"))
}
