// Keydraw Device Tree
// Arena-backed device-tree parsing with label overrides and a compatible-value index

mod node;
mod tokenizer;

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

pub use node::{DtNode, NodeId};
use tokenizer::Item;

/// Glues `label : name {` into `label:name {`
static NODE_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w,.@+-]+)\s*:\s*([\w,.@+-]+)\s*\{").unwrap());

static COMPATIBLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"compatible = "(.*?)""#).unwrap());

/// Structural errors, located by byte offset in the normalized text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralParseError {
    #[error("unclosed node opened at offset {offset}")]
    UnclosedNode { offset: usize },

    #[error("unexpected closing brace at offset {offset}")]
    UnexpectedClose { offset: usize },

    #[error("reference to undeclared label \"{label}\" at offset {offset}")]
    UndeclaredLabel { label: String, offset: usize },

    #[error("label \"{label}\" declared again at offset {offset}")]
    DuplicateLabel { label: String, offset: usize },
}

/// A parsed device tree
///
/// Nodes live in one arena and refer to their children by [`NodeId`].
/// Top-level `&label { ... }` overrides are merged into their targets while
/// parsing and do not appear in the tree.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    nodes: Vec<DtNode>,
    labels: HashMap<String, NodeId>,
    compatibles: HashMap<String, Vec<NodeId>>,
    chosen: DtNode,
}

impl DeviceTree {
    const ROOT: NodeId = NodeId(0);

    /// Parse device-tree text, failing on any override of an undeclared label
    pub fn parse(text: &str) -> Result<Self, StructuralParseError> {
        Self::parse_with_external_labels(text, &HashSet::new())
    }

    /// Parse device-tree text
    ///
    /// Overrides of labels in `external_labels` that are not declared in the
    /// text are dropped instead of failing. These are labels declared in
    /// firmware headers that were not available.
    pub fn parse_with_external_labels(
        text: &str,
        external_labels: &HashSet<&str>,
    ) -> Result<Self, StructuralParseError> {
        let normalized = NODE_LABEL_RE.replace_all(text, "$1:$2 {");
        let items = tokenizer::tokenize(&normalized)?;

        let mut tree = Self {
            nodes: Vec::new(),
            labels: HashMap::new(),
            compatibles: HashMap::new(),
            chosen: DtNode::new("__chosen__", String::new(), 0),
        };
        tree.build("ROOT", &items, 0);
        tree.index_labels()?;
        tree.merge_overrides(external_labels)?;
        tree.index_compatibles(Self::ROOT);
        tree.collect_chosen();

        log::debug!(
            "Parsed device tree with {} nodes and {} labels",
            tree.nodes.len(),
            tree.labels.len()
        );
        Ok(tree)
    }

    /// Add a node built from `items` to the arena, returning its id
    fn build(&mut self, raw_name: &str, items: &[Item], offset: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DtNode::new(raw_name, String::new(), offset));

        let mut words: Vec<&str> = Vec::new();
        let mut children = Vec::new();
        let mut index = 0;
        while index < items.len() {
            match (&items[index], items.get(index + 1)) {
                (Item::Word { text, .. }, Some(Item::Group { items: inner, offset })) => {
                    children.push(self.build(text, inner, *offset));
                    index += 2;
                }
                (Item::Word { text, .. }, _) => {
                    words.push(text);
                    index += 1;
                }
                (Item::Group { items: inner, offset }, _) => {
                    children.push(self.build("", inner, *offset));
                    index += 1;
                }
            }
        }

        let node = &mut self.nodes[id.0];
        node.content = words.join(" ");
        node.children = children;
        id
    }

    fn index_labels(&mut self) -> Result<(), StructuralParseError> {
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(label) = &node.label {
                if self.labels.insert(label.clone(), NodeId(index)).is_some() {
                    return Err(StructuralParseError::DuplicateLabel {
                        label: label.clone(),
                        offset: node.offset,
                    });
                }
            }
        }
        Ok(())
    }

    /// Merge top-level `&label` nodes into their targets and drop them from the root
    fn merge_overrides(&mut self, external_labels: &HashSet<&str>) -> Result<(), StructuralParseError> {
        let top_level = std::mem::take(&mut self.nodes[Self::ROOT.0].children);
        let mut kept = Vec::with_capacity(top_level.len());

        for id in top_level {
            let Some(label) = self.nodes[id.0].override_target().map(str::to_string) else {
                kept.push(id);
                continue;
            };
            let Some(&target) = self.labels.get(&label) else {
                if external_labels.contains(label.as_str()) {
                    log::debug!("Dropping override of external label &{}", label);
                    continue;
                }
                return Err(StructuralParseError::UndeclaredLabel {
                    label,
                    offset: self.nodes[id.0].offset,
                });
            };

            let source = std::mem::replace(&mut self.nodes[id.0], DtNode::new("", String::new(), 0));
            let node = &mut self.nodes[target.0];
            if source.content.is_empty() {
                // nothing to append
            } else if node.content.is_empty() {
                node.content = source.content;
            } else {
                node.content = format!("{} {}", node.content, source.content);
            }
            node.children.extend(source.children);
        }

        self.nodes[Self::ROOT.0].children = kept;
        Ok(())
    }

    fn index_compatibles(&mut self, id: NodeId) {
        if let Some(captures) = COMPATIBLE_RE.captures(&self.nodes[id.0].content) {
            self.compatibles
                .entry(captures[1].to_string())
                .or_default()
                .push(id);
        }
        for index in 0..self.nodes[id.0].children.len() {
            let child = self.nodes[id.0].children[index];
            self.index_compatibles(child);
        }
    }

    /// Concatenate the content of every `chosen` node one level below the root nodes
    fn collect_chosen(&mut self) {
        let mut content = Vec::new();
        for &top in &self.node(Self::ROOT).children {
            for &child in &self.node(top).children {
                let node = self.node(child);
                if node.name == "chosen" {
                    content.push(node.content.clone());
                }
            }
        }
        self.chosen.content = content.join(" ");
    }

    /// The implicit root containing all top-level nodes
    pub fn root(&self) -> &DtNode {
        self.node(Self::ROOT)
    }

    pub fn node(&self, id: NodeId) -> &DtNode {
        &self.nodes[id.0]
    }

    /// Children of `node` in source order, merged override children last
    pub fn children<'a>(&'a self, node: &'a DtNode) -> impl Iterator<Item = &'a DtNode> + 'a {
        node.children.iter().map(move |&id| self.node(id))
    }

    /// Node declared with `label`
    pub fn find_label(&self, label: &str) -> Option<&DtNode> {
        self.labels.get(label).map(|&id| self.node(id))
    }

    /// Nodes whose first `compatible` property equals `value`, in source order
    pub fn get_compatible_nodes(&self, value: &str) -> Vec<&DtNode> {
        self.compatibles
            .get(value)
            .map(|ids| ids.iter().map(|&id| self.node(id)).collect())
            .unwrap_or_default()
    }

    /// Path property of the `chosen` node, e.g. the active matrix transform
    pub fn get_chosen_property(&self, name: &Regex) -> Option<String> {
        self.chosen.get_path(name)
    }
}
