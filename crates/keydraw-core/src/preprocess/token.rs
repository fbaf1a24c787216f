// Keydraw Preprocessor - Tokens
// Preprocessing tokens with the hide sets used while rescanning macro expansions

use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
    Space,
    Newline,
}

/// A preprocessing token
///
/// `hide` lists the macros that must not expand this token again.
#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub hide: Vec<Rc<str>>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            hide: Vec::new(),
        }
    }

    pub fn is_space(&self) -> bool {
        matches!(self.kind, TokenKind::Space | TokenKind::Newline)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_hidden(&self, name: &str) -> bool {
        self.hide.iter().any(|h| &**h == name)
    }
}

const MULTI_CHAR_PUNCTS: [&str; 10] = ["...", "##", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||"];

/// Split text into preprocessing tokens
///
/// Comments must already be removed.
pub(crate) fn tokenize(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let kind = if c == b'\n' {
            i += 1;
            TokenKind::Newline
        } else if c == b' ' || c == b'\t' || c == b'\r' || c == b'\x0c' {
            while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\x0c') {
                i += 1;
            }
            TokenKind::Space
        } else if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            TokenKind::Ident
        } else if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i += 1;
            while i < bytes.len() {
                let b = bytes[i];
                if matches!(b, b'+' | b'-') && matches!(bytes[i - 1], b'e' | b'E' | b'p' | b'P') {
                    i += 1;
                } else if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' {
                    i += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else if c == b'"' {
            i = scan_quoted(bytes, i, b'"').unwrap_or(i + 1);
            if i == start + 1 {
                TokenKind::Punct
            } else {
                TokenKind::Str
            }
        } else if c == b'\'' {
            match scan_quoted(bytes, i, b'\'') {
                Some(end) => {
                    i = end;
                    TokenKind::Str
                }
                None => {
                    i += 1;
                    TokenKind::Punct
                }
            }
        } else {
            let rest = &text[i..];
            let len = MULTI_CHAR_PUNCTS
                .iter()
                .find(|p| rest.starts_with(**p))
                .map_or_else(|| rest.chars().next().map_or(1, char::len_utf8), |p| p.len());
            i += len;
            TokenKind::Punct
        };
        tokens.push(Token::new(kind, &text[start..i]));
    }
    tokens
}

/// Scan a quoted literal on a single line, returning the index past its closing quote
fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Concatenate token texts
pub(crate) fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Remove comments and line continuations, keeping string literals intact
///
/// Block comments become a single space, or their newlines when they span lines,
/// so that directive lines stay where they are.
pub(crate) fn strip_comments(text: &str) -> String {
    let joined = text.replace("\\\r\n", "").replace("\\\n", "");
    let mut out = String::with_capacity(joined.len());
    let mut chars = joined.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                out.push(c);
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                    out.push(next);
                    if next == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if next == c {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut newlines = 0;
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    if next == '\n' {
                        newlines += 1;
                    }
                    prev = next;
                }
                if newlines == 0 {
                    out.push(' ');
                } else {
                    out.extend(std::iter::repeat('\n').take(newlines));
                }
            }
            _ => out.push(c),
        }
    }
    out
}
