// Keydraw Front-Ends - Device Tree
// Parses device-tree (ZMK) keymaps into the normalized keymap model

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Value};

use super::{choose_layer_names, KeymapAssembler, KeymapParser, ParseError};
use crate::activation::ConditionalLayer;
use crate::behavior::{Behavior, BehaviorClass, BehaviorRegistry};
use crate::binding::{BindingRef, BindingResolver, BindingSyntax, KeycodeDialect, KeycodeMapper, LayerBehavior};
use crate::config::ParseConfig;
use crate::dts::{DeviceTree, DtNode};
use crate::keymap::{KeymapData, LayoutKey};
use crate::preprocess::{PreprocessError, Preprocessor};

const KEYMAP_COMPATIBLE: &str = "zmk,keymap";
const COMBOS_COMPATIBLE: &str = "zmk,combos";
const CONDITIONAL_LAYERS_COMPATIBLE: &str = "zmk,conditional-layers";

/// Separates the keymap from the raw binding map keys during preprocessing
const RAW_BINDING_MARKER: &str = "__keymap_drawer_data__";

/// Labels of behaviors declared in firmware headers
///
/// Overrides of these are dropped when the headers were not included.
pub const ZMK_BUILTIN_LABELS: &[&str] = &[
    "bt",
    "caps_word",
    "ext_power",
    "gresc",
    "key_repeat",
    "kp",
    "kt",
    "lt",
    "mkp",
    "mmv",
    "mo",
    "msc",
    "mt",
    "none",
    "out",
    "rgb_ug",
    "sk",
    "sl",
    "sys_reset",
    "bootloader",
    "soft_off",
    "studio_unlock",
    "to",
    "tog",
    "trans",
];

static BINDINGS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("bindings").unwrap());
static LAYER_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("(?:label|display-name)").unwrap());
static KEY_POSITIONS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("key-positions").unwrap());
static LAYERS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("layers").unwrap());
static THEN_LAYER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("then-layer").unwrap());
static IF_LAYERS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("if-layers").unwrap());
static MATRIX_TRANSFORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("zmk,matrix[-_]transform").unwrap());

/// Binding syntax of device-tree keymaps: `&ref param...`
pub struct ZmkSyntax<'a> {
    registry: &'a BehaviorRegistry,
    mapper: &'a KeycodeMapper,
    layer_count: usize,
}

impl<'a> ZmkSyntax<'a> {
    pub fn new(registry: &'a BehaviorRegistry, mapper: &'a KeycodeMapper, layer_count: usize) -> Self {
        Self {
            registry,
            mapper,
            layer_count,
        }
    }

    fn behavior(&self, reference: &str, class: BehaviorClass) -> Option<&'a Behavior> {
        self.registry.get(reference).filter(|b| b.class == class)
    }

    /// Hold binding of a hold-tap; numeric holds on key templates become layers
    fn hold_binding(&self, template: &str, param: &str) -> String {
        let is_layer_template = matches!(template, "&mo" | "&to" | "&tog" | "&sl");
        match param.parse::<usize>() {
            Ok(layer) if !is_layer_template && layer < self.layer_count => format!("&mo {}", layer),
            _ => format!("{} {}", template, param),
        }
    }
}

fn with_params(template: &str, params: &[&str]) -> String {
    if params.is_empty() {
        template.to_string()
    } else {
        format!("{} {}", template, params.join(" "))
    }
}

impl BindingSyntax for ZmkSyntax<'_> {
    fn classify(&self, binding: &str) -> BindingRef {
        let parts: Vec<&str> = binding.split_whitespace().collect();
        let Some((&reference, params)) = parts.split_first() else {
            return BindingRef::Literal(binding.to_string());
        };

        if reference == "&none" {
            return BindingRef::None;
        }
        if reference == "&trans" && params.is_empty() {
            return BindingRef::Trans;
        }
        if let Some(behavior) = self.behavior(reference, BehaviorClass::ModMorph) {
            if let [primary, shifted, ..] = behavior.expansion.as_slice() {
                return BindingRef::ModMorph {
                    primary: primary.clone(),
                    shifted: shifted.clone(),
                };
            }
        }
        match reference {
            "&kp" => return BindingRef::Keycode(params.join(" ")),
            "&kt" => return BindingRef::KeyToggle(params.join(" ")),
            _ => {}
        }
        if let Some(behavior) = self.behavior(reference, BehaviorClass::StickyKey) {
            if let Some(template) = behavior.expansion.first() {
                return BindingRef::Sticky(with_params(template, params));
            }
        }

        match (reference, params) {
            ("&bt", [action, rest @ ..]) => {
                return BindingRef::Bluetooth {
                    action: action.to_string(),
                    param: rest.first().map(|p| p.to_string()),
                };
            }
            ("&out" | "&ext_power" | "&rgb_ug", _) => return BindingRef::Params(params.join(" ")),
            ("&mo", [layer]) => {
                return BindingRef::Layer {
                    behavior: LayerBehavior::Momentary,
                    layer: layer.to_string(),
                };
            }
            ("&to", [layer]) => {
                return BindingRef::Layer {
                    behavior: LayerBehavior::To,
                    layer: layer.to_string(),
                };
            }
            ("&tog", [layer]) => {
                return BindingRef::Layer {
                    behavior: LayerBehavior::Toggle,
                    layer: layer.to_string(),
                };
            }
            _ => {}
        }

        if let [hold_param, tap_param] = params {
            if let Some(behavior) = self.behavior(reference, BehaviorClass::HoldTap) {
                if let [hold, tap, ..] = behavior.expansion.as_slice() {
                    return BindingRef::HoldTap {
                        hold: self.hold_binding(hold, hold_param),
                        tap: format!("{} {}", tap, tap_param),
                    };
                }
            }
        }

        match params {
            [] | ["0"] => BindingRef::Literal(reference.to_string()),
            _ => BindingRef::Literal(binding.to_string()),
        }
    }

    fn map_keycode(&self, keycode: &str) -> LayoutKey {
        self.mapper.map(keycode)
    }
}

/// Parser for device-tree keymaps
#[derive(Debug, Clone)]
pub struct ZmkKeymapParser {
    config: ParseConfig,
    mapper: KeycodeMapper,
    layer_names: Option<Vec<String>>,
    base_keymap: Option<KeymapData>,
}

impl ZmkKeymapParser {
    /// Create a parser, validating the keycode and modifier settings
    pub fn new(config: ParseConfig) -> Result<Self, ParseError> {
        let mapper = KeycodeMapper::new(&config, KeycodeDialect::Zmk)?;
        Ok(Self {
            config,
            mapper,
            layer_names: None,
            base_keymap: None,
        })
    }

    /// Use these layer names instead of the ones in the keymap
    pub fn with_layer_names(mut self, layer_names: Vec<String>) -> Self {
        self.layer_names = Some(layer_names);
        self
    }

    /// Rebase every parsed keymap on `base`, see [`KeymapData::rebase`]
    pub fn with_base_keymap(mut self, base: KeymapData) -> Self {
        self.base_keymap = Some(base);
        self
    }

    /// Preprocess the keymap, and the raw binding map keys in the same macro context
    fn preprocess(
        &self,
        text: &str,
        file_name: Option<&Path>,
    ) -> Result<(String, IndexMap<String, LayoutKey>), ParseError> {
        if !self.config.preprocess {
            let raw_binding_map = self
                .config
                .raw_binding_map
                .iter()
                .map(|(key, value)| (normalize_binding(key), value.clone()))
                .collect();
            return Ok((text.to_string(), raw_binding_map));
        }

        let source = if self.config.preamble.is_empty() {
            text.to_string()
        } else {
            format!("{}\n{}", self.config.preamble, text)
        };
        let preprocessor = Preprocessor::new(self.config.include_paths.clone());
        if self.config.raw_binding_map.is_empty() {
            let document = preprocessor.preprocess(&source, file_name)?;
            return Ok((document, IndexMap::new()));
        }

        let raw_keys: Vec<&str> = self.config.raw_binding_map.keys().map(String::as_str).collect();
        let (document, injected) =
            preprocessor.preprocess_split(&source, file_name, RAW_BINDING_MARKER, &raw_keys.join("\n"))?;
        let prepped_keys: Vec<&str> = injected.lines().collect();
        if prepped_keys.len() != raw_keys.len() {
            return Err(PreprocessError::InjectedLineCount {
                expected: raw_keys.len(),
                found: prepped_keys.len(),
            }
            .into());
        }

        let raw_binding_map = prepped_keys
            .iter()
            .zip(self.config.raw_binding_map.values())
            .map(|(key, value)| (normalize_binding(key), value.clone()))
            .collect();
        Ok((document, raw_binding_map))
    }
}

/// Collapse whitespace runs so keys compare equal to parsed bindings
fn normalize_binding(binding: &str) -> String {
    binding.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_index(node: &DtNode, property: &str, value: &str) -> Result<usize, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidInteger {
        node: node.name.clone(),
        property: property.to_string(),
        value: value.to_string(),
    })
}

/// Required, non-empty array property parsed as indices
fn index_array(node: &DtNode, name: &Regex, property: &str) -> Result<Vec<usize>, ParseError> {
    let values = node
        .get_array(name)
        .filter(|values| !values.is_empty())
        .ok_or_else(|| ParseError::MissingProperty {
            node: node.name.clone(),
            property: property.to_string(),
        })?;
    values.iter().map(|value| parse_index(node, property, value)).collect()
}

fn bindings(node: &DtNode) -> Result<Vec<String>, ParseError> {
    node.get_phandle_array(&BINDINGS_RE)
        .filter(|bindings| !bindings.is_empty())
        .ok_or_else(|| ParseError::MissingProperty {
            node: node.name.clone(),
            property: "bindings".to_string(),
        })
}

fn layer_name(node: &DtNode) -> String {
    if let Some(name) = node.get_string(&LAYER_NAME_RE).filter(|name| !name.is_empty()) {
        return name;
    }
    let name = node.name.strip_prefix("layer_").unwrap_or(&node.name);
    name.strip_suffix("_layer").unwrap_or(name).to_string()
}

fn children_of<'t>(tree: &'t DeviceTree, compatible: &str) -> Vec<&'t DtNode> {
    tree.get_compatible_nodes(compatible)
        .into_iter()
        .flat_map(|parent| tree.children(parent))
        .collect()
}

fn conditional_layers(tree: &DeviceTree) -> Result<Vec<ConditionalLayer>, ParseError> {
    children_of(tree, CONDITIONAL_LAYERS_COMPATIBLE)
        .into_iter()
        .map(|node| {
            let then_layer = index_array(node, &THEN_LAYER_RE, "then-layer")?[0];
            let if_layers = index_array(node, &IF_LAYERS_RE, "if-layers")?;
            Ok(ConditionalLayer {
                then_layer,
                if_layers,
            })
        })
        .collect()
}

fn layout_hint(tree: &DeviceTree, file_name: Option<&Path>) -> Option<Value> {
    let mut hint = Map::new();
    if let Some(stem) = file_name.and_then(Path::file_stem) {
        hint.insert("zmk_keyboard".to_string(), Value::String(stem.to_string_lossy().into_owned()));
    }
    if let Some(transform) = tree.get_chosen_property(&MATRIX_TRANSFORM_RE) {
        hint.insert("zmk_matrix_transform".to_string(), Value::String(transform));
    }
    (!hint.is_empty()).then_some(Value::Object(hint))
}

impl KeymapParser for ZmkKeymapParser {
    fn parse_str(&self, text: &str, file_name: Option<&Path>) -> Result<KeymapData, ParseError> {
        let (document, raw_binding_map) = self.preprocess(text, file_name)?;
        let external_labels: HashSet<&str> = ZMK_BUILTIN_LABELS.iter().copied().collect();
        let tree = DeviceTree::parse_with_external_labels(&document, &external_labels)?;

        let mut registry = BehaviorRegistry::with_defaults();
        registry.merge_from_tree(&tree)?;

        if tree.get_compatible_nodes(KEYMAP_COMPATIBLE).is_empty() {
            return Err(ParseError::MissingKeymap);
        }
        let layer_nodes = children_of(&tree, KEYMAP_COMPATIBLE);
        let parsed_names = layer_nodes.iter().map(|node| layer_name(node)).collect();
        let layer_names = choose_layer_names(self.layer_names.as_deref(), parsed_names)?;

        let syntax = ZmkSyntax::new(&registry, &self.mapper, layer_names.len());
        let resolver = BindingResolver::new(&syntax, &self.config, &raw_binding_map, &layer_names);
        let mut assembler = KeymapAssembler::new(resolver, &layer_names);

        for conditional in conditional_layers(&tree)? {
            assembler.add_conditional_layer(conditional);
        }
        for (index, node) in layer_nodes.iter().enumerate() {
            assembler.add_layer(index, bindings(node)?.as_slice())?;
        }

        for node in children_of(&tree, COMBOS_COMPATIBLE) {
            let binding = bindings(node)?.swap_remove(0);
            let key_positions = index_array(node, &KEY_POSITIONS_RE, "key-positions")?;
            let layers = match node.get_array(&LAYERS_RE) {
                Some(values) => values
                    .iter()
                    .map(|value| {
                        let index = parse_index(node, "layers", value)?;
                        layer_names
                            .get(index)
                            .cloned()
                            .ok_or_else(|| ParseError::ComboLayerOutOfRange {
                                node: node.name.clone(),
                                index,
                                count: layer_names.len(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            let extra = self.config.zmk_combos.get(&node.name).cloned().unwrap_or_default();
            assembler.add_combo(&node.name, &binding, key_positions, layers, extra)?;
        }

        assembler.finish(
            self.config.mark_alternate_layer_activators,
            &self.config.trans_legend,
            layout_hint(&tree, file_name),
            self.base_keymap.as_ref(),
        )
    }
}
