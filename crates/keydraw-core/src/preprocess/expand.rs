// Keydraw Preprocessor - Macro Expansion
// Object-like and function-like macros with hide-set rescanning

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use super::token::{tokenize, Token, TokenKind};

/// A `#define`d macro
#[derive(Debug, Clone)]
pub(crate) struct Macro {
    /// Parameter names for function-like macros, `None` for object-like ones
    pub params: Option<Vec<String>>,
    /// Name bound to the variadic arguments (`__VA_ARGS__` or a GNU named variadic)
    pub variadic: Option<String>,
    pub body: Vec<Token>,
}

/// Failure while expanding macros in a run of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ExpandError {
    UnterminatedInvocation { name: String },
    Arity { name: String, expected: usize, found: usize },
}

pub(crate) type MacroTable = HashMap<String, Macro>;

/// Fully expand a token sequence against the macro table
pub(crate) fn expand(tokens: Vec<Token>, macros: &MacroTable) -> Result<Vec<Token>, ExpandError> {
    let mut input: VecDeque<Token> = tokens.into();
    let mut output = Vec::with_capacity(input.len());

    while let Some(token) = input.pop_front() {
        if token.kind != TokenKind::Ident || token.is_hidden(&token.text) {
            output.push(token);
            continue;
        }
        let Some(definition) = macros.get(&token.text) else {
            output.push(token);
            continue;
        };

        let mut hide = token.hide.clone();
        hide.push(Rc::from(token.text.as_str()));

        let replacement = match &definition.params {
            None => substitute(definition, &[], macros)?,
            Some(params) => {
                let Some(open) = input.iter().position(|t| !t.is_space()) else {
                    output.push(token);
                    continue;
                };
                if !input[open].is_punct("(") {
                    output.push(token);
                    continue;
                }
                input.drain(..=open);
                let args = collect_args(&mut input, &token.text)?;
                let args = bind_args(&token.text, params, definition.variadic.is_some(), args)?;
                substitute(definition, &args, macros)?
            }
        };

        for mut produced in replacement.into_iter().rev() {
            for name in &hide {
                if !produced.is_hidden(name) {
                    produced.hide.push(name.clone());
                }
            }
            input.push_front(produced);
        }
    }
    Ok(output)
}

/// Collect raw arguments up to the matching `)`, splitting on top-level commas
fn collect_args(input: &mut VecDeque<Token>, name: &str) -> Result<Vec<Vec<Token>>, ExpandError> {
    let mut args = vec![Vec::new()];
    let mut depth = 1usize;
    while let Some(token) = input.pop_front() {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return Ok(args);
            }
        } else if token.is_punct(",") && depth == 1 {
            args.push(Vec::new());
            continue;
        }
        if let Some(current) = args.last_mut() {
            current.push(token);
        }
    }
    Err(ExpandError::UnterminatedInvocation {
        name: name.to_string(),
    })
}

/// Match raw arguments to parameters; variadic extras are re-joined with commas
fn bind_args(
    name: &str,
    params: &[String],
    variadic: bool,
    mut args: Vec<Vec<Token>>,
) -> Result<Vec<Vec<Token>>, ExpandError> {
    let arity_error = |found| ExpandError::Arity {
        name: name.to_string(),
        expected: params.len(),
        found,
    };

    // FOO() on a macro without parameters passes one empty argument
    if params.is_empty() && !variadic && args.len() == 1 && args[0].iter().all(Token::is_space) {
        return Ok(Vec::new());
    }

    if variadic {
        if args.len() < params.len() {
            return Err(arity_error(args.len()));
        }
        let extras = args.split_off(params.len());
        let mut joined = Vec::new();
        for (i, extra) in extras.into_iter().enumerate() {
            if i > 0 {
                joined.push(Token::new(TokenKind::Punct, ","));
            }
            joined.extend(extra);
        }
        args.push(joined);
    } else if args.len() != params.len() {
        return Err(arity_error(args.len()));
    }
    Ok(args.into_iter().map(trim).collect())
}

/// Drop leading and trailing whitespace from an argument
fn trim(mut arg: Vec<Token>) -> Vec<Token> {
    while arg.last().is_some_and(Token::is_space) {
        arg.pop();
    }
    let leading = arg.iter().take_while(|t| t.is_space()).count();
    arg.drain(..leading);
    arg
}

/// Replace parameters in the macro body, applying `#` and `##`
fn substitute(
    definition: &Macro,
    args: &[Vec<Token>],
    macros: &MacroTable,
) -> Result<Vec<Token>, ExpandError> {
    let mut names: Vec<&str> = definition
        .params
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect();
    if let Some(variadic) = &definition.variadic {
        names.push(variadic);
    }
    let param_index = |token: &Token| -> Option<usize> {
        if token.kind == TokenKind::Ident {
            names.iter().position(|n| *n == token.text)
        } else {
            None
        }
    };

    let body = &definition.body;
    let mut result: Vec<Token> = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        let token = &body[i];

        // stringizing: # param
        if token.is_punct("#") && definition.params.is_some() {
            let next = next_non_space(body, i + 1);
            if let Some(index) = next.and_then(|n| param_index(&body[n])) {
                result.push(stringize(&args[index]));
                i = next.map_or(i + 1, |n| n + 1);
                continue;
            }
        }

        if let Some(index) = param_index(token) {
            let pasted = previous_non_space(&result).is_some_and(|t| t.is_punct("##"))
                || next_non_space(body, i + 1).is_some_and(|n| body[n].is_punct("##"));
            if pasted {
                result.extend(args[index].iter().cloned());
            } else {
                result.extend(expand(args[index].clone(), macros)?);
            }
        } else {
            result.push(token.clone());
        }
        i += 1;
    }

    Ok(paste(result))
}

/// Apply `##` token pasting to a substituted body
fn paste(tokens: Vec<Token>) -> Vec<Token> {
    if !tokens.iter().any(|t| t.is_punct("##")) {
        return tokens;
    }
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if !token.is_punct("##") {
            out.push(token);
            continue;
        }
        while out.last().is_some_and(Token::is_space) {
            out.pop();
        }
        while iter.peek().is_some_and(Token::is_space) {
            iter.next();
        }
        let left = out.pop().map(|t| t.text).unwrap_or_default();
        let right = iter.next().map(|t| t.text).unwrap_or_default();
        out.extend(tokenize(&format!("{}{}", left, right)));
    }
    out
}

fn stringize(arg: &[Token]) -> Token {
    let mut text = String::from("\"");
    let mut pending_space = false;
    for token in arg {
        if token.is_space() {
            pending_space = text.len() > 1;
            continue;
        }
        if pending_space {
            text.push(' ');
            pending_space = false;
        }
        if token.kind == TokenKind::Str {
            text.push_str(&token.text.replace('\\', "\\\\").replace('"', "\\\""));
        } else {
            text.push_str(&token.text);
        }
    }
    text.push('"');
    Token::new(TokenKind::Str, text)
}

fn next_non_space(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].is_space())
}

fn previous_non_space(tokens: &[Token]) -> Option<&Token> {
    tokens.iter().rev().find(|t| !t.is_space())
}

/// Parse the text after `#define` into a macro name and definition
pub(crate) fn parse_define(text: &str) -> Option<(String, Macro)> {
    let tokens = tokenize(text.trim());
    let mut iter = tokens.into_iter().peekable();
    let name = iter.next().filter(|t| t.kind == TokenKind::Ident)?.text;

    let mut params = None;
    let mut variadic = None;
    if iter.peek().is_some_and(|t| t.is_punct("(")) {
        iter.next();
        let mut names = Vec::new();
        loop {
            let token = iter.next()?;
            match token.kind {
                TokenKind::Space | TokenKind::Newline => continue,
                TokenKind::Ident => {
                    if iter.peek().is_some_and(|t| t.is_punct("...")) {
                        iter.next();
                        variadic = Some(token.text);
                    } else {
                        names.push(token.text);
                    }
                }
                TokenKind::Punct if token.text == "..." => {
                    variadic = Some("__VA_ARGS__".to_string());
                }
                TokenKind::Punct if token.text == "," => {}
                TokenKind::Punct if token.text == ")" => break,
                _ => return None,
            }
        }
        params = Some(names);
    }

    let mut body: Vec<Token> = iter.collect();
    while body.first().is_some_and(Token::is_space) {
        body.remove(0);
    }
    while body.last().is_some_and(Token::is_space) {
        body.pop();
    }
    Some((
        name,
        Macro {
            params,
            variadic,
            body,
        },
    ))
}
