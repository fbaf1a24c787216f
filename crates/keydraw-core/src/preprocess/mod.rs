// Keydraw Preprocessor
// Best-effort C preprocessing of device-tree keymaps

mod expand;
mod expr;
mod token;

use std::fs;
use std::path::{Path, PathBuf};

use expand::{expand, parse_define, ExpandError, MacroTable};
use token::{render, strip_comments, tokenize, Token, TokenKind};

/// Nesting limit for `#include`
const MAX_INCLUDE_DEPTH: usize = 40;

/// Name used in error messages for text without a source file
const ANONYMOUS_SOURCE: &str = "<input>";

/// Preprocessing errors
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("marker \"{marker}\" not found after preprocessing, make sure no macro rewrites it")]
    MarkerNotFound { marker: String },

    #[error("{source_name}:{line}: unterminated conditional block")]
    UnterminatedConditional { source_name: String, line: usize },

    #[error("{source_name}:{line}: unexpected #{directive}")]
    UnexpectedDirective {
        directive: String,
        source_name: String,
        line: usize,
    },

    #[error("{source_name}:{line}: invalid conditional expression: {message}")]
    InvalidExpression {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("{source_name}:{line}: invalid #define")]
    InvalidDefine { source_name: String, line: usize },

    #[error("{source_name}: unterminated invocation of macro \"{name}\"")]
    UnterminatedInvocation { name: String, source_name: String },

    #[error("{source_name}: macro \"{name}\" expects {expected} arguments, got {found}")]
    MacroArity {
        name: String,
        expected: usize,
        found: usize,
        source_name: String,
    },

    #[error("#include nested too deeply at {path}")]
    IncludeDepth { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("injected text has {expected} lines but preprocessing produced {found}")]
    InjectedLineCount { expected: usize, found: usize },
}

/// C preprocessor pass over keymap sources
///
/// Each call starts from an empty macro table.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    include_paths: Vec<PathBuf>,
}

impl Preprocessor {
    /// Create a preprocessor searching `include_paths` after the source directory
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths }
    }

    /// Preprocess `text`, resolving quoted includes relative to `source_name`
    ///
    /// Includes that cannot be found are passed through unexpanded. Every line
    /// still starting with `#` afterwards is blanked out.
    pub fn preprocess(&self, text: &str, source_name: Option<&Path>) -> Result<String, PreprocessError> {
        let mut run = Run {
            include_paths: &self.include_paths,
            macros: MacroTable::new(),
            output: String::with_capacity(text.len()),
        };
        run.process(text, source_name, 0)?;

        let mut stripped = String::with_capacity(run.output.len());
        for line in run.output.split_inclusive('\n') {
            if line.trim_start().starts_with('#') {
                if line.ends_with('\n') {
                    stripped.push('\n');
                }
            } else {
                stripped.push_str(line);
            }
        }
        log::debug!(
            "Preprocessed {} bytes into {} bytes",
            text.len(),
            stripped.len()
        );
        Ok(stripped)
    }

    /// Preprocess `injected` in the macro context of `text`
    ///
    /// Runs the pipeline on `text`, a `marker` line and `injected`, then returns
    /// what follows the last marker line.
    pub fn preprocess_with_injected_marker(
        &self,
        text: &str,
        source_name: Option<&Path>,
        marker: &str,
        injected: &str,
    ) -> Result<String, PreprocessError> {
        self.preprocess_split(text, source_name, marker, injected)
            .map(|(_, injected)| injected)
    }

    /// Preprocess `text` and `injected` in one pass, returning both outputs
    pub fn preprocess_split(
        &self,
        text: &str,
        source_name: Option<&Path>,
        marker: &str,
        injected: &str,
    ) -> Result<(String, String), PreprocessError> {
        let combined = format!("{}\n{}\n{}", text, marker, injected);
        let mut output = self.preprocess(&combined, source_name)?;
        let needle = format!("\n{}\n", marker);
        let pos = output.rfind(&needle).ok_or_else(|| PreprocessError::MarkerNotFound {
            marker: marker.to_string(),
        })?;
        let injected = output.split_off(pos + needle.len());
        output.truncate(pos + 1);
        Ok((output, injected))
    }
}

/// One frame of the `#if` stack
struct Conditional {
    /// Whether the enclosing region is active
    parent_active: bool,
    /// Whether some branch of this block was taken already
    taken: bool,
    active: bool,
    seen_else: bool,
    line: usize,
}

/// State of one preprocessing call, shared across included files
struct Run<'a> {
    include_paths: &'a [PathBuf],
    macros: MacroTable,
    output: String,
}

impl Run<'_> {
    fn process(&mut self, text: &str, source: Option<&Path>, depth: usize) -> Result<(), PreprocessError> {
        let source_name = source.map_or_else(|| ANONYMOUS_SOURCE.to_string(), |p| p.display().to_string());
        let text = strip_comments(text);
        let mut stack: Vec<Conditional> = Vec::new();
        let mut pending = String::new();

        for (index, line) in text.split_inclusive('\n').enumerate() {
            let line_no = index + 1;
            let active = stack.last().map_or(true, |c| c.active);
            let Some((directive, rest)) = split_directive(line) else {
                if active {
                    pending.push_str(line);
                } else if line.ends_with('\n') {
                    pending.push('\n');
                }
                continue;
            };

            let newline = if line.ends_with('\n') { "\n" } else { "" };
            match directive {
                "if" | "ifdef" | "ifndef" => {
                    let taken = active && self.condition(directive, rest, &source_name, line_no)?;
                    stack.push(Conditional {
                        parent_active: active,
                        taken,
                        active: taken,
                        seen_else: false,
                        line: line_no,
                    });
                }
                "elif" | "else" => {
                    let unexpected = || PreprocessError::UnexpectedDirective {
                        directive: directive.to_string(),
                        source_name: source_name.clone(),
                        line: line_no,
                    };
                    let Some(frame) = stack.last() else {
                        return Err(unexpected());
                    };
                    if frame.seen_else {
                        return Err(unexpected());
                    }
                    let enter = frame.parent_active
                        && !frame.taken
                        && (directive == "else" || self.condition("if", rest, &source_name, line_no)?);
                    if let Some(frame) = stack.last_mut() {
                        frame.active = enter;
                        frame.taken |= enter;
                        frame.seen_else = directive == "else";
                    }
                }
                "endif" => {
                    if stack.pop().is_none() {
                        return Err(PreprocessError::UnexpectedDirective {
                            directive: directive.to_string(),
                            source_name: source_name.clone(),
                            line: line_no,
                        });
                    }
                }
                _ if !active => {}
                "define" => {
                    self.flush(&mut pending, &source_name)?;
                    let (name, definition) = parse_define(rest).ok_or_else(|| PreprocessError::InvalidDefine {
                        source_name: source_name.clone(),
                        line: line_no,
                    })?;
                    self.macros.insert(name, definition);
                }
                "undef" => {
                    self.flush(&mut pending, &source_name)?;
                    self.macros.remove(rest.trim());
                }
                "include" => {
                    self.flush(&mut pending, &source_name)?;
                    if self.include(rest, source, depth)? {
                        pending.push_str(newline);
                    } else {
                        log::warn!("{}:{}: include {} not found, passing it through", source_name, line_no, rest.trim());
                        self.output.push_str(line);
                    }
                    continue;
                }
                "error" | "warning" => {
                    log::warn!("{}:{}: #{} {}", source_name, line_no, directive, rest.trim());
                }
                "pragma" | "line" | "" => {}
                _ => {
                    // not a preprocessor directive, e.g. `#binding-cells`
                    pending.push_str(line);
                    continue;
                }
            }
            pending.push_str(newline);
        }

        if let Some(open) = stack.last() {
            return Err(PreprocessError::UnterminatedConditional {
                source_name,
                line: open.line,
            });
        }
        self.flush(&mut pending, &source_name)
    }

    /// Expand the text collected since the last directive into the output
    fn flush(&mut self, pending: &mut String, source_name: &str) -> Result<(), PreprocessError> {
        if pending.is_empty() {
            return Ok(());
        }
        let tokens = tokenize(pending);
        let expanded = expand(tokens, &self.macros).map_err(|err| located(err, source_name))?;
        self.output.push_str(&render(&expanded));
        pending.clear();
        Ok(())
    }

    fn condition(&self, directive: &str, rest: &str, source_name: &str, line: usize) -> Result<bool, PreprocessError> {
        match directive {
            "ifdef" => Ok(self.macros.contains_key(first_word(rest))),
            "ifndef" => Ok(!self.macros.contains_key(first_word(rest))),
            _ => {
                let tokens = replace_defined(tokenize(rest), &self.macros);
                let expanded = expand(tokens, &self.macros).map_err(|err| located(err, source_name))?;
                expr::evaluate(&expanded)
                    .map(|value| value != 0)
                    .map_err(|message| PreprocessError::InvalidExpression {
                        source_name: source_name.to_string(),
                        line,
                        message,
                    })
            }
        }
    }

    /// Process an included file, returning `false` if it cannot be found
    fn include(&mut self, rest: &str, source: Option<&Path>, depth: usize) -> Result<bool, PreprocessError> {
        let rest = rest.trim();
        let (name, quoted) = if let Some(inner) = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            (inner, true)
        } else if let Some(inner) = rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
            (inner, false)
        } else {
            return Ok(false);
        };

        let local_dir = source.filter(|_| quoted).and_then(Path::parent);
        let Some(path) = local_dir
            .into_iter()
            .chain(self.include_paths.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
        else {
            return Ok(false);
        };

        if depth >= MAX_INCLUDE_DEPTH {
            return Err(PreprocessError::IncludeDepth { path });
        }
        let content = fs::read_to_string(&path).map_err(|source| PreprocessError::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("Including {}", path.display());
        self.process(&content, Some(&path), depth + 1)?;
        if !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        Ok(true)
    }
}

/// Split a directive line into its name and the rest of the line
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let body = line.trim_start().strip_prefix('#')?.trim_start();
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    let (name, rest) = body.split_at(end);
    // `#binding-cells` and friends are properties, not directives
    if rest.starts_with('-') || rest.starts_with(',') {
        return None;
    }
    Some((name, rest.trim_end_matches(['\n', '\r'])))
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or_default()
}

/// Replace `defined X` and `defined(X)` with 1 or 0
fn replace_defined(tokens: Vec<Token>, macros: &MacroTable) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().filter(|t| !t.is_space()).peekable();
    while let Some(token) = iter.next() {
        if token.kind != TokenKind::Ident || token.text != "defined" {
            out.push(token);
            continue;
        }
        let parenthesized = iter.next_if(|t| t.is_punct("(")).is_some();
        let name = iter.next().map(|t| t.text).unwrap_or_default();
        if parenthesized {
            iter.next_if(|t| t.is_punct(")"));
        }
        let value = if macros.contains_key(&name) { "1" } else { "0" };
        out.push(Token::new(TokenKind::Number, value));
    }
    out
}

fn located(err: ExpandError, source_name: &str) -> PreprocessError {
    match err {
        ExpandError::UnterminatedInvocation { name } => PreprocessError::UnterminatedInvocation {
            name,
            source_name: source_name.to_string(),
        },
        ExpandError::Arity { name, expected, found } => PreprocessError::MacroArity {
            name,
            expected,
            found,
            source_name: source_name.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> String {
        Preprocessor::default().preprocess(text, None).unwrap()
    }

    fn lines(text: &str) -> Vec<String> {
        run(text)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_object_macro_and_strip() {
        let out = lines("#define NAV 2\nbindings = <&mo NAV>;\n");
        assert_eq!(out, vec!["bindings = <&mo 2>;"]);
    }

    #[test]
    fn test_conditionals() {
        let text = "\
#define KEYMAP_DRAWER
#ifdef KEYMAP_DRAWER
a
#else
b
#endif
#if defined(NOPE) || 2 > 3
c
#elif 1
d
#else
e
#endif
";
        assert_eq!(lines(text), vec!["a", "d"]);
    }

    #[test]
    fn test_nested_inactive_conditionals() {
        let text = "#if 0\n#if 1\nx\n#else\ny\n#endif\n#else\nz\n#endif\n";
        assert_eq!(lines(text), vec!["z"]);
    }

    #[test]
    fn test_defines_in_inactive_blocks_are_ignored() {
        let text = "#ifdef MISSING\n#define X 1\n#endif\nX\n";
        assert_eq!(lines(text), vec!["X"]);
    }

    #[test]
    fn test_undef() {
        let text = "#define X 1\nX\n#undef X\nX\n";
        assert_eq!(lines(text), vec!["1", "X"]);
    }

    #[test]
    fn test_binding_cells_kept_until_strip() {
        let text = "#define N 2\nht: ht {\n    #binding-cells = <N>;\n    flavor = \"x\";\n};\n";
        assert_eq!(lines(text), vec!["ht: ht {", "flavor = \"x\";", "};"]);
    }

    #[test]
    fn test_missing_include_is_passed_through_then_stripped() {
        let text = "#include <behaviors.dtsi>\n#include \"dt-bindings/zmk/keys.h\"\nkeep\n";
        assert_eq!(lines(text), vec!["keep"]);
    }

    #[test]
    fn test_line_count_is_preserved() {
        let text = "#define A 1\n#if A\nx\n#endif\ny\n";
        assert_eq!(run(text), "\n\nx\n\ny\n");
    }

    #[test]
    fn test_multiline_invocation() {
        let text = "#define COMBO(n, k) n { bindings = <k>; };\nCOMBO(esc,\n  &kp ESC)\n";
        assert_eq!(lines(text), vec!["esc { bindings = <&kp ESC>; };"]);
    }

    #[test]
    fn test_unterminated_conditional() {
        let result = Preprocessor::default().preprocess("#ifdef X\na\n", None);
        assert!(matches!(
            result,
            Err(PreprocessError::UnterminatedConditional { line: 1, .. })
        ));
    }

    #[test]
    fn test_stray_endif() {
        let result = Preprocessor::default().preprocess("a\n#endif\n", None);
        assert!(matches!(
            result,
            Err(PreprocessError::UnexpectedDirective { line: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_expression() {
        let result = Preprocessor::default().preprocess("#if 1 +\n#endif\n", None);
        assert!(matches!(result, Err(PreprocessError::InvalidExpression { .. })));
    }

    #[test]
    fn test_injected_marker() {
        let pp = Preprocessor::default();
        let out = pp
            .preprocess_with_injected_marker("#define BOOT &bootloader\n", None, "__MARKER__", "BOOT\n&kp A")
            .unwrap();
        assert_eq!(out, "&bootloader\n&kp A");
    }

    #[test]
    fn test_injected_marker_rewritten_by_macro() {
        let pp = Preprocessor::default();
        let result = pp.preprocess_with_injected_marker("#define __MARKER__ x\n", None, "__MARKER__", "A");
        assert!(matches!(result, Err(PreprocessError::MarkerNotFound { .. })));
    }

    #[test]
    fn test_split_returns_document_and_injected() {
        let pp = Preprocessor::default();
        let (document, injected) = pp
            .preprocess_split("#define X 1\nkey = <X>;\n", None, "__MARKER__", "X")
            .unwrap();
        assert_eq!(document.trim(), "key = <1>;");
        assert_eq!(injected, "1");
    }
}
