// Keydraw Behavior Registry
// Built-in and source-declared behaviors that expand into other bindings

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

use crate::dts::DeviceTree;

static BINDINGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("bindings").unwrap());

/// Behavior declaration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BehaviorError {
    #[error("behavior node \"{node}\" at offset {offset} has no label")]
    MissingLabel { node: String, offset: usize },

    #[error("cannot parse bindings for behavior \"{node}\"")]
    MissingBindings { node: String },

    #[error("behavior \"{node}\" needs {expected} bindings, found {found}")]
    IncompleteBindings {
        node: String,
        expected: usize,
        found: usize,
    },
}

/// Behavior kinds that expand into other bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
pub enum BehaviorClass {
    /// Hold action and tap action
    #[strum(serialize = "zmk,behavior-hold-tap")]
    HoldTap,
    /// Primary binding and shifted alternative
    #[strum(serialize = "zmk,behavior-mod-morph")]
    ModMorph,
    /// One wrapped binding
    #[strum(serialize = "zmk,behavior-sticky-key")]
    StickyKey,
}

impl BehaviorClass {
    /// Compatible value of nodes declaring this behavior kind
    pub fn compatible(self) -> &'static str {
        self.into()
    }

    /// Number of bindings taken from the declaration
    pub fn binding_count(&self) -> usize {
        match self {
            BehaviorClass::HoldTap | BehaviorClass::ModMorph => 2,
            BehaviorClass::StickyKey => 1,
        }
    }
}

/// A behavior and the bindings it expands into
///
/// For hold-taps and sticky keys the expansion holds binding prefixes that
/// receive the key's parameters, e.g. `["&mo", "&kp"]` for `&lt`. Mod-morph
/// expansions are complete bindings, e.g. `["&kp ESC", "&kp GRAVE"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Behavior {
    pub name: String,
    pub class: BehaviorClass,
    pub expansion: Vec<String>,
}

impl Behavior {
    fn new(name: &str, class: BehaviorClass, expansion: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            class,
            expansion: expansion.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Behavior table for one parse
#[derive(Debug, Clone, Default)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Behavior>,
}

impl BehaviorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the firmware's built-in behaviors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_defaults();
        registry
    }

    /// Seed the built-in behaviors
    pub fn register_defaults(&mut self) {
        let defaults = [
            Behavior::new("&mt", BehaviorClass::HoldTap, &["&kp", "&kp"]),
            Behavior::new("&lt", BehaviorClass::HoldTap, &["&mo", "&kp"]),
            Behavior::new("&gresc", BehaviorClass::ModMorph, &["&kp ESC", "&kp GRAVE"]),
            Behavior::new("&sk", BehaviorClass::StickyKey, &["&kp"]),
            Behavior::new("&sl", BehaviorClass::StickyKey, &["&mo"]),
        ];
        for behavior in defaults {
            self.insert(behavior);
        }
    }

    /// Add or replace a behavior
    pub fn insert(&mut self, behavior: Behavior) {
        self.behaviors.insert(behavior.name.clone(), behavior);
    }

    /// Merge behaviors declared in the tree, replacing built-ins of the same name
    pub fn merge_from_tree(&mut self, tree: &DeviceTree) -> Result<(), BehaviorError> {
        let mut declared = Vec::new();
        for class in BehaviorClass::iter() {
            for node in tree.get_compatible_nodes(class.compatible()) {
                let Some(label) = &node.label else {
                    return Err(BehaviorError::MissingLabel {
                        node: node.name.clone(),
                        offset: node.offset,
                    });
                };
                let bindings = node
                    .get_phandle_array(&BINDINGS_RE)
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| BehaviorError::MissingBindings {
                        node: node.name.clone(),
                    })?;
                if bindings.len() < class.binding_count() {
                    return Err(BehaviorError::IncompleteBindings {
                        node: node.name.clone(),
                        expected: class.binding_count(),
                        found: bindings.len(),
                    });
                }
                declared.push(Behavior {
                    name: format!("&{}", label),
                    class,
                    expansion: bindings.into_iter().take(class.binding_count()).collect(),
                });
            }
        }

        log::debug!("Registered {} behaviors from the device tree", declared.len());
        for behavior in declared {
            self.insert(behavior);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Behavior> {
        self.behaviors.get(name)
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_expansions() {
        let registry = BehaviorRegistry::with_defaults();
        let expansion = |name: &str| registry.get(name).unwrap().expansion.clone();
        assert_eq!(expansion("&mt"), vec!["&kp", "&kp"]);
        assert_eq!(expansion("&lt"), vec!["&mo", "&kp"]);
        assert_eq!(expansion("&gresc"), vec!["&kp ESC", "&kp GRAVE"]);
        assert_eq!(expansion("&sk"), vec!["&kp"]);
        assert_eq!(expansion("&sl"), vec!["&mo"]);
        assert_eq!(registry.get("&gresc").unwrap().class, BehaviorClass::ModMorph);
    }

    #[test]
    fn test_builtins_survive_merge_without_declarations() {
        let tree = DeviceTree::parse("/ { keymap { compatible = \"zmk,keymap\"; }; };").unwrap();
        let mut registry = BehaviorRegistry::with_defaults();
        registry.merge_from_tree(&tree).unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.get("&mt").unwrap().expansion, vec!["&kp", "&kp"]);
    }

    #[test]
    fn test_declared_behaviors_override_builtins() {
        let text = r#"/ { behaviors {
            mt: hold_tap { compatible = "zmk,behavior-hold-tap"; #binding-cells = <2>; bindings = <&kp>, <&kp>; };
            hm: homerow { compatible = "zmk,behavior-hold-tap"; bindings = <&kp>, <&kp>; };
            cp: copy_paste { compatible = "zmk,behavior-mod-morph"; bindings = <&kp LC(C)>, <&kp LC(V)>; };
            skl: sticky_lay { compatible = "zmk,behavior-sticky-key"; bindings = <&mo>; };
        }; };"#;
        let tree = DeviceTree::parse(text).unwrap();
        let mut registry = BehaviorRegistry::with_defaults();
        registry.merge_from_tree(&tree).unwrap();
        assert_eq!(registry.get("&hm").unwrap().class, BehaviorClass::HoldTap);
        assert_eq!(
            registry.get("&cp").unwrap().expansion,
            vec!["&kp LC(C)", "&kp LC(V)"]
        );
        assert_eq!(registry.get("&skl").unwrap().expansion, vec!["&mo"]);
        assert_eq!(registry.len(), 8);
    }

    #[test]
    fn test_unlabeled_behavior_fails() {
        let text = r#"/ { behaviors { nolabel { compatible = "zmk,behavior-sticky-key"; bindings = <&kp>; }; }; };"#;
        let tree = DeviceTree::parse(text).unwrap();
        let err = BehaviorRegistry::with_defaults().merge_from_tree(&tree).unwrap_err();
        assert!(matches!(err, BehaviorError::MissingLabel { .. }));
    }

    #[test]
    fn test_behavior_without_bindings_fails() {
        let text = r#"/ { behaviors { x: x { compatible = "zmk,behavior-mod-morph"; mods = <1>; }; }; };"#;
        let tree = DeviceTree::parse(text).unwrap();
        let err = BehaviorRegistry::with_defaults().merge_from_tree(&tree).unwrap_err();
        assert_eq!(err, BehaviorError::MissingBindings { node: "x".to_string() });
    }

    #[test]
    fn test_behavior_with_too_few_bindings_fails() {
        let text = r#"/ { behaviors { x: x { compatible = "zmk,behavior-hold-tap"; bindings = <&kp>; }; }; };"#;
        let tree = DeviceTree::parse(text).unwrap();
        let err = BehaviorRegistry::with_defaults().merge_from_tree(&tree).unwrap_err();
        assert!(matches!(err, BehaviorError::IncompleteBindings { expected: 2, found: 1, .. }));
    }

    #[test]
    fn test_compatible_values() {
        let compatibles: Vec<&str> = BehaviorClass::iter().map(|c| c.compatible()).collect();
        assert_eq!(
            compatibles,
            vec![
                "zmk,behavior-hold-tap",
                "zmk,behavior-mod-morph",
                "zmk,behavior-sticky-key"
            ]
        );
    }
}
