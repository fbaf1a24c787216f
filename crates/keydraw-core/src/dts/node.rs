// Keydraw Device Tree - Nodes
// Device-tree nodes and typed property accessors

use regex::Regex;

/// Index of a node in a [`super::DeviceTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// A device-tree node
///
/// `content` holds the node's own text with child nodes removed, so property
/// lookups never see a descendant's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtNode {
    pub name: String,
    pub label: Option<String>,
    pub content: String,
    /// Byte offset of the node's opening brace
    pub offset: usize,
    pub(crate) children: Vec<NodeId>,
}

/// A `name = value` statement of a node's content
struct Property<'a> {
    name: &'a str,
    value: &'a str,
}

impl DtNode {
    pub(crate) fn new(raw_name: &str, content: String, offset: usize) -> Self {
        let (label, name) = match raw_name.split_once(':') {
            Some((label, name)) if !raw_name.starts_with('&') => (Some(label.to_string()), name.to_string()),
            _ => (None, raw_name.to_string()),
        };
        Self {
            name,
            label,
            content,
            offset,
            children: Vec::new(),
        }
    }

    /// Label referenced by an override node (`&label`), if this is one
    pub fn override_target(&self) -> Option<&str> {
        self.name.strip_prefix('&')
    }

    /// Last value of a string property whose whole name matches `name`
    pub fn get_string(&self, name: &Regex) -> Option<String> {
        self.properties(name).filter_map(|p| first_quoted(p.value)).last()
    }

    /// Last value of an array property, the cells of all `<...>` groups concatenated
    pub fn get_array(&self, name: &Regex) -> Option<Vec<String>> {
        self.properties(name).map(|p| cells(p.value)).last()
    }

    /// Last value of a phandle-array property, split into `&ref param...` bindings
    pub fn get_phandle_array(&self, name: &Regex) -> Option<Vec<String>> {
        let cells = self.get_array(name)?;
        Some(
            cells
                .join(" ")
                .split('&')
                .map(str::trim)
                .filter(|binding| !binding.is_empty())
                .map(|binding| format!("&{}", binding))
                .collect(),
        )
    }

    /// Last value of a path property given as a `&label` reference
    pub fn get_path(&self, name: &Regex) -> Option<String> {
        self.properties(name)
            .filter_map(|p| p.value.trim().strip_prefix('&').map(|label| label.trim().to_string()))
            .last()
    }

    /// Iterate `name = value` statements with a name fully matching `name`
    fn properties<'a>(&'a self, name: &'a Regex) -> impl Iterator<Item = Property<'a>> + 'a {
        statements(&self.content)
            .filter_map(split_property)
            .filter(move |p| full_match(name, p.name))
    }
}

fn full_match(re: &Regex, text: &str) -> bool {
    re.find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

/// Split content at `;` outside quotes and `<...>` cells
fn statements(content: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    let mut in_quotes = false;
    let mut cell = CellScanner::default();
    let mut bounds = Vec::new();
    for (i, c) in content.char_indices() {
        match c {
            '"' if !cell.is_open() => in_quotes = !in_quotes,
            _ if in_quotes => {}
            ';' if !cell.is_open() => {
                bounds.push((start, i));
                start = i + 1;
            }
            _ => {
                cell.step(c);
            }
        }
    }
    bounds.push((start, content.len()));
    bounds.into_iter().map(move |(s, e)| content[s..e].trim())
}

/// Tracks `<...>` cells; `<` and `>` inside parentheses are shift or comparison operators
#[derive(Default)]
struct CellScanner {
    open: bool,
    parens: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum CellEvent {
    Open,
    Close,
    Inner,
    Outside,
}

impl CellScanner {
    fn is_open(&self) -> bool {
        self.open
    }

    fn step(&mut self, c: char) -> CellEvent {
        if !self.open {
            if c == '<' {
                self.open = true;
                self.parens = 0;
                return CellEvent::Open;
            }
            return CellEvent::Outside;
        }
        match c {
            '(' => self.parens += 1,
            ')' => self.parens = self.parens.saturating_sub(1),
            '>' if self.parens == 0 => {
                self.open = false;
                return CellEvent::Close;
            }
            _ => {}
        }
        CellEvent::Inner
    }
}

fn split_property(statement: &str) -> Option<Property<'_>> {
    let eq = statement.find('=')?;
    let name = statement[..eq].split_whitespace().last()?;
    Some(Property {
        name,
        value: statement[eq + 1..].trim(),
    })
}

fn first_quoted(value: &str) -> Option<String> {
    let start = value.find('"')? + 1;
    let end = value[start..].find('"')? + start;
    Some(value[start..end].to_string())
}

/// Cells of every `<...>` group in order; a parenthesized expression stays one cell
fn cells(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut scanner = CellScanner::default();
    let mut current = String::new();
    for c in value.chars() {
        match scanner.step(c) {
            CellEvent::Inner if c.is_whitespace() && scanner.parens == 0 => flush_cell(&mut current, &mut out),
            CellEvent::Inner => current.push(c),
            CellEvent::Close => flush_cell(&mut current, &mut out),
            CellEvent::Open | CellEvent::Outside => {}
        }
    }
    out
}

fn flush_cell(current: &mut String, out: &mut Vec<String>) {
    if !current.is_empty() {
        out.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(content: &str) -> DtNode {
        DtNode::new("test", content.to_string(), 0)
    }

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[test]
    fn test_label_split() {
        let n = DtNode::new("hm:homerow_mods", String::new(), 0);
        assert_eq!(n.label.as_deref(), Some("hm"));
        assert_eq!(n.name, "homerow_mods");
        assert_eq!(DtNode::new("&kp", String::new(), 0).override_target(), Some("kp"));
    }

    #[test]
    fn test_get_string_last_wins() {
        let n = node("label = \"A\"; display-name = \"Base; layer\"; label = \"B\";");
        assert_eq!(n.get_string(&re("label")), Some("B".to_string()));
        assert_eq!(n.get_string(&re("display-name")), Some("Base; layer".to_string()));
        assert_eq!(n.get_string(&re("missing")), None);
    }

    #[test]
    fn test_get_array_concatenates_groups() {
        let n = node("key-positions = <0 1>, <2>; layers = < 3 >;");
        assert_eq!(n.get_array(&re("key-positions")).unwrap(), vec!["0", "1", "2"]);
        assert_eq!(n.get_array(&re("layers")).unwrap(), vec!["3"]);
    }

    #[test]
    fn test_phandle_array_excludes_sensor_bindings() {
        let n = node("sensor-bindings = <&inc_dec_kp C_VOL_UP C_VOL_DN>; bindings = <&kp A &mt LSHIFT B>, <&trans>;");
        assert_eq!(
            n.get_phandle_array(&re("bindings")).unwrap(),
            vec!["&kp A", "&mt LSHIFT B", "&trans"]
        );
    }

    #[test]
    fn test_get_path() {
        let n = node("zmk,matrix-transform = &default_transform; zmk,kscan = &kscan0;");
        assert_eq!(
            n.get_path(&re(r"zmk,matrix[-_]transform")),
            Some("default_transform".to_string())
        );
    }

    #[test]
    fn test_content_without_properties() {
        let n = node("#binding-cells = <0>");
        assert!(n.get_array(&re("bindings")).is_none());
        assert_eq!(n.get_array(&re("#binding-cells")).unwrap(), vec!["0"]);
    }

    #[test]
    fn test_statements_survive_shift_operators() {
        let content = "mods = <(1 << 1)>; bindings = <&kp A>, <&kp B>;";
        let parts: Vec<&str> = statements(content).collect();
        assert_eq!(parts, vec!["mods = <(1 << 1)>", "bindings = <&kp A>, <&kp B>", ""]);
    }

    #[test]
    fn test_array_keeps_parenthesized_cells() {
        let n = node("mask = <(0x0F >> 2) 3 ((1 << 4) | (a > b))>; layers = <1>;");
        assert_eq!(
            n.get_array(&re("mask")).unwrap(),
            vec!["(0x0F >> 2)", "3", "((1 << 4) | (a > b))"]
        );
        assert_eq!(n.get_array(&re("layers")).unwrap(), vec!["1"]);
    }

    #[test]
    fn test_phandle_array_after_shift_property() {
        let n = node("mods = <((1 << 1)|(1 << 5))>; bindings = <&kp A>, <&kp B>;");
        assert_eq!(n.get_phandle_array(&re("bindings")).unwrap(), vec!["&kp A", "&kp B"]);
        assert_eq!(n.get_array(&re("mods")).unwrap(), vec!["((1 << 1)|(1 << 5))"]);
    }
}

