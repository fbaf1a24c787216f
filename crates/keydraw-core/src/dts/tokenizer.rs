// Keydraw Device Tree - Tokenizer
// Splits device-tree text into words and nested brace groups

use super::StructuralParseError;

/// One element of a brace group
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Item {
    Word { text: String, offset: usize },
    Group { items: Vec<Item>, offset: usize },
}

/// Tokenize `text` into the items of an implicit top-level group
///
/// Comments are skipped, quoted strings stay inside their word and a
/// group is closed by `}` with an optional `;`.
pub(crate) fn tokenize(text: &str) -> Result<Vec<Item>, StructuralParseError> {
    let bytes = text.as_bytes();
    let mut stack: Vec<(Vec<Item>, usize)> = vec![(Vec::new(), 0)];
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b if b.is_ascii_whitespace() => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = text[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 2);
            }
            b'{' => {
                stack.push((Vec::new(), i));
                i += 1;
            }
            b'}' => {
                if stack.len() == 1 {
                    return Err(StructuralParseError::UnexpectedClose { offset: i });
                }
                let (items, offset) = stack.pop().unwrap_or_default();
                if let Some((parent, _)) = stack.last_mut() {
                    parent.push(Item::Group { items, offset });
                }
                i += 1;
                while i < bytes.len() && matches!(bytes[i], b' ' | b'\t') {
                    i += 1;
                }
                if bytes.get(i) == Some(&b';') {
                    i += 1;
                }
            }
            _ => {
                let start = i;
                while i < bytes.len() {
                    match bytes[i] {
                        b'"' => i = skip_quoted(bytes, i),
                        b'{' | b'}' => break,
                        b'/' if matches!(bytes.get(i + 1), Some(b'/' | b'*')) => break,
                        b if b.is_ascii_whitespace() => break,
                        _ => i += 1,
                    }
                }
                if let Some((items, _)) = stack.last_mut() {
                    items.push(Item::Word {
                        text: text[start..i].to_string(),
                        offset: start,
                    });
                }
            }
        }
    }

    match stack.pop() {
        Some((items, _)) if stack.is_empty() => Ok(items),
        Some((_, offset)) => Err(StructuralParseError::UnclosedNode { offset }),
        None => Ok(Vec::new()),
    }
}

/// Index just past the closing quote, or the end of input
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[Item]) -> Vec<&str> {
        items
            .iter()
            .filter_map(|item| match item {
                Item::Word { text, .. } => Some(text.as_str()),
                Item::Group { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_nested_groups() {
        let items = tokenize("/ { keymap { a = <1>; }; };").unwrap();
        assert_eq!(words(&items), vec!["/"]);
        let Item::Group { items: inner, .. } = &items[1] else {
            panic!("expected group");
        };
        assert_eq!(words(inner), vec!["keymap"]);
        let Item::Group { items: keymap, .. } = &inner[1] else {
            panic!("expected group");
        };
        assert_eq!(words(keymap), vec!["a", "=", "<1>;"]);
    }

    #[test]
    fn test_comments_and_strings() {
        let items = tokenize("a = \"x // { y\"; // comment {\n/* } */ b;").unwrap();
        assert_eq!(words(&items), vec!["a", "=", "\"x // { y\";", "b;"]);
    }

    #[test]
    fn test_unclosed_group_reports_offset() {
        assert_eq!(
            tokenize("a { b { };"),
            Err(StructuralParseError::UnclosedNode { offset: 2 })
        );
    }

    #[test]
    fn test_unexpected_close() {
        assert_eq!(
            tokenize("a { }; };"),
            Err(StructuralParseError::UnexpectedClose { offset: 7 })
        );
    }
}
