// Keydraw Preprocessor - Conditional Expressions
// Integer evaluation of `#if` and `#elif` expressions

use super::token::{Token, TokenKind};

/// Evaluate an already macro-expanded conditional expression
///
/// Identifiers left after expansion count as 0.
pub(crate) fn evaluate(tokens: &[Token]) -> Result<i64, String> {
    let tokens: Vec<&Token> = tokens.iter().filter(|t| !t.is_space()).collect();
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let value = parser.conditional()?;
    match parser.peek() {
        None => Ok(value),
        Some(token) => Err(format!("unexpected token \"{}\"", token.text)),
    }
}

struct ExprParser<'a> {
    tokens: Vec<&'a Token>,
    pos: usize,
}

/// Binary operators by precedence level, loosest first
const BINARY_LEVELS: &[&[&str]] = &[
    &["||"],
    &["&&"],
    &["|"],
    &["^"],
    &["&"],
    &["==", "!="],
    &["<", ">", "<=", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

impl<'a> ExprParser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).copied()
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn conditional(&mut self) -> Result<i64, String> {
        let cond = self.binary(0)?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.conditional()?;
        if !self.eat(":") {
            return Err("expected \":\" in conditional expression".to_string());
        }
        let otherwise = self.conditional()?;
        Ok(if cond != 0 { then } else { otherwise })
    }

    fn binary(&mut self, level: usize) -> Result<i64, String> {
        if level == BINARY_LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        loop {
            let Some(op) = self
                .peek()
                .filter(|t| t.kind == TokenKind::Punct)
                .and_then(|t| BINARY_LEVELS[level].iter().find(|op| **op == t.text))
            else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = apply(op, lhs, rhs)?;
        }
    }

    fn unary(&mut self) -> Result<i64, String> {
        if self.eat("!") {
            return Ok((self.unary()? == 0) as i64);
        }
        if self.eat("~") {
            return Ok(!self.unary()?);
        }
        if self.eat("-") {
            return Ok(self.unary()?.wrapping_neg());
        }
        if self.eat("+") {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, String> {
        let token = self
            .peek()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token.kind {
            TokenKind::Number => parse_number(&token.text),
            TokenKind::Ident => Ok(0),
            TokenKind::Str if token.text.starts_with('\'') => parse_char(&token.text),
            TokenKind::Punct if token.text == "(" => {
                let value = self.conditional()?;
                if self.eat(")") {
                    Ok(value)
                } else {
                    Err("missing \")\"".to_string())
                }
            }
            _ => Err(format!("unexpected token \"{}\"", token.text)),
        }
    }
}

fn apply(op: &str, lhs: i64, rhs: i64) -> Result<i64, String> {
    let truth = |b: bool| b as i64;
    Ok(match op {
        "||" => truth(lhs != 0 || rhs != 0),
        "&&" => truth(lhs != 0 && rhs != 0),
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => truth(lhs == rhs),
        "!=" => truth(lhs != rhs),
        "<" => truth(lhs < rhs),
        ">" => truth(lhs > rhs),
        "<=" => truth(lhs <= rhs),
        ">=" => truth(lhs >= rhs),
        "<<" => lhs.wrapping_shl(rhs as u32),
        ">>" => lhs.wrapping_shr(rhs as u32),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" | "%" if rhs == 0 => return Err("division by zero".to_string()),
        "/" => lhs.wrapping_div(rhs),
        "%" => lhs.wrapping_rem(rhs),
        _ => return Err(format!("unknown operator \"{}\"", op)),
    })
}

/// Parse an integer literal with optional base prefix and `u`/`l` suffixes
pub(crate) fn parse_number(text: &str) -> Result<i64, String> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let (body, radix) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (hex, 16)
    } else if let Some(bin) = digits
        .strip_prefix("0b")
        .or_else(|| digits.strip_prefix("0B"))
    {
        (bin, 2)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (&digits[1..], 8)
    } else {
        (digits, 10)
    };
    u64::from_str_radix(body, radix)
        .map(|v| v as i64)
        .map_err(|_| format!("invalid integer \"{}\"", text))
}

fn parse_char(text: &str) -> Result<i64, String> {
    let inner = &text[1..text.len().saturating_sub(1).max(1)];
    let mut chars = inner.chars();
    let value = match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => '\n' as i64,
            Some('t') => '\t' as i64,
            Some('r') => '\r' as i64,
            Some('0') => 0,
            Some(c) => c as i64,
            None => return Err(format!("invalid character literal {}", text)),
        },
        Some(c) => c as i64,
        None => return Err(format!("invalid character literal {}", text)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::super::token::tokenize;
    use super::*;

    fn eval(text: &str) -> Result<i64, String> {
        evaluate(&tokenize(text))
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Ok(7));
        assert_eq!(eval("(1 + 2) * 3"), Ok(9));
        assert_eq!(eval("10 - 4 - 3"), Ok(3));
    }

    #[test]
    fn test_logic_and_comparison() {
        assert_eq!(eval("1 && 0 || 2 > 1"), Ok(1));
        assert_eq!(eval("!0 && 3 == 3"), Ok(1));
        assert_eq!(eval("UNKNOWN_IDENT"), Ok(0));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval("0 ? 5 : 1 ? 6 : 7"), Ok(6));
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("0x10 + 010 + 1UL"), Ok(25));
        assert_eq!(eval("'A'"), Ok(65));
        assert_eq!(eval("~0"), Ok(-1));
        assert_eq!(eval("1 << 4 | 1"), Ok(17));
    }

    #[test]
    fn test_errors() {
        assert!(eval("1 / 0").is_err());
        assert!(eval("(1 + 2").is_err());
        assert!(eval("").is_err());
        assert!(eval("1 2").is_err());
    }
}
