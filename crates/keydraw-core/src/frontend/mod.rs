// Keydraw Front-Ends
// Shared contract and keymap assembly for the firmware keymap dialects

pub mod qmk;
pub mod zmk;

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::activation::{ConditionalLayer, LayerActivationTracker};
use crate::behavior::BehaviorError;
use crate::binding::{BindingResolutionError, BindingResolver, LayerActivation};
use crate::config::ConfigError;
use crate::dts::StructuralParseError;
use crate::keymap::{ComboSpec, KeymapData, LayoutKey, ModelError};
use crate::preprocess::PreprocessError;

pub use qmk::QmkJsonParser;
pub use zmk::ZmkKeymapParser;

/// Keymap parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("invalid device tree: {0}")]
    Structure(#[from] StructuralParseError),

    #[error("invalid behavior: {0}")]
    Behavior(#[from] BehaviorError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid keymap: {0}")]
    Model(#[from] ModelError),

    #[error("invalid JSON keymap: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse binding \"{binding}\" in {location}: {source}")]
    Binding {
        binding: String,
        location: String,
        source: BindingResolutionError,
    },

    #[error("could not parse `{property}` for node \"{node}\"")]
    MissingProperty { node: String, property: String },

    #[error("could not find any keymap nodes with \"zmk,keymap\" compatible property")]
    MissingKeymap,

    #[error("length of provided layer name list ({provided}) does not match the number of parsed layers ({parsed})")]
    LayerNameCount { provided: usize, parsed: usize },

    #[error("layer name \"{name}\" is used by more than one layer")]
    DuplicateLayerName { name: String },

    #[error("invalid integer \"{value}\" in `{property}` of node \"{node}\"")]
    InvalidInteger {
        node: String,
        property: String,
        value: String,
    },

    #[error("combo \"{node}\" references layer {index} but the keymap has {count} layers")]
    ComboLayerOutOfRange { node: String, index: usize, count: usize },
}

/// A parser turning one firmware keymap format into [`KeymapData`]
///
/// Parsers hold configuration only; all parse state lives inside one call.
pub trait KeymapParser {
    /// Parse keymap text; `file_name` resolves includes and names the keyboard
    fn parse_str(&self, text: &str, file_name: Option<&Path>) -> Result<KeymapData, ParseError>;

    /// Read and parse a keymap file
    fn parse_path(&self, path: &Path) -> Result<KeymapData, ParseError> {
        let text = fs::read_to_string(path)?;
        self.parse_str(&text, Some(path))
    }
}

/// Pick layer names: the caller's list when given, otherwise the parsed ones
pub(crate) fn choose_layer_names(
    provided: Option<&[String]>,
    parsed: Vec<String>,
) -> Result<Vec<String>, ParseError> {
    let names = match provided {
        Some(provided) if provided.len() != parsed.len() => {
            return Err(ParseError::LayerNameCount {
                provided: provided.len(),
                parsed: parsed.len(),
            });
        }
        Some(provided) => provided.to_vec(),
        None => parsed,
    };
    for (index, name) in names.iter().enumerate() {
        if names[..index].contains(name) {
            return Err(ParseError::DuplicateLayerName { name: name.clone() });
        }
    }
    Ok(names)
}

/// Collects resolved layers and combos of one parse, then applies held markers
pub(crate) struct KeymapAssembler<'a> {
    resolver: BindingResolver<'a>,
    layer_names: &'a [String],
    layers: IndexMap<String, Vec<LayoutKey>>,
    combos: Vec<ComboSpec>,
    activations: Vec<LayerActivation>,
    conditional_layers: Vec<ConditionalLayer>,
}

impl<'a> KeymapAssembler<'a> {
    pub fn new(resolver: BindingResolver<'a>, layer_names: &'a [String]) -> Self {
        Self {
            resolver,
            layer_names,
            layers: IndexMap::new(),
            combos: Vec::new(),
            activations: Vec::new(),
            conditional_layers: Vec::new(),
        }
    }

    /// Resolve every binding of the layer at `layer_index`
    pub fn add_layer<S: AsRef<str>>(&mut self, layer_index: usize, bindings: &[S]) -> Result<(), ParseError> {
        let name = self.layer_names.get(layer_index).cloned().unwrap_or_default();
        let mut keys = Vec::with_capacity(bindings.len());
        for (position, binding) in bindings.iter().enumerate() {
            let binding = binding.as_ref();
            let event = self
                .resolver
                .resolve(binding, Some(layer_index), &[position])
                .map_err(|source| ParseError::Binding {
                    binding: binding.to_string(),
                    location: format!("layer \"{}\" key {}", name, position),
                    source,
                })?;
            keys.push(event.key);
            self.activations.extend(event.activations);
        }
        log::debug!("Parsed layer \"{}\" with {} keys", name, keys.len());
        self.layers.insert(name, keys);
        Ok(())
    }

    /// Resolve a combo binding and add the combo
    pub fn add_combo(
        &mut self,
        node: &str,
        binding: &str,
        key_positions: Vec<usize>,
        layers: Vec<String>,
        extra: Map<String, Value>,
    ) -> Result<(), ParseError> {
        let event = self
            .resolver
            .resolve_combo(binding, &key_positions)
            .map_err(|source| ParseError::Binding {
                binding: binding.to_string(),
                location: format!("combo \"{}\"", node),
                source,
            })?;
        self.activations.extend(event.activations);
        let mut combo = ComboSpec::new(key_positions, event.key);
        combo.layers = layers;
        combo.extra = extra;
        self.combos.push(combo);
        Ok(())
    }

    pub fn add_conditional_layer(&mut self, conditional: ConditionalLayer) {
        self.conditional_layers.push(conditional);
    }

    /// Run held-key inference and build the validated keymap, rebased on `base` if given
    pub fn finish(
        self,
        mark_alternate: bool,
        trans_key: &LayoutKey,
        layout_hint: Option<Value>,
        base: Option<&KeymapData>,
    ) -> Result<KeymapData, ParseError> {
        let Self {
            mut layers,
            combos,
            mut activations,
            conditional_layers,
            ..
        } = self;

        let mut tracker = LayerActivationTracker::new(mark_alternate);
        activations.retain(|a| a.kind.is_held());
        activations.sort_by_key(|a| a.to_layer);
        for activation in &activations {
            tracker.record_activation(&activation.from_layers, activation.to_layer, &activation.key_positions);
        }
        tracker.record_conditional_layers(&conditional_layers);
        log::debug!(
            "Recorded {} layer activations and {} conditional layers",
            activations.len(),
            conditional_layers.len()
        );
        tracker.apply_held_markers(&mut layers, trans_key);

        let mut keymap = KeymapData::new(layers, combos, layout_hint)?;
        if let Some(base) = base {
            keymap.rebase(base)?;
        }
        Ok(keymap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parsed_names_used_by_default() {
        let chosen = choose_layer_names(None, names(&["base", "nav"])).unwrap();
        assert_eq!(chosen, names(&["base", "nav"]));
    }

    #[test]
    fn test_provided_names_must_match_count() {
        let provided = names(&["one"]);
        let err = choose_layer_names(Some(&provided), names(&["base", "nav"])).unwrap_err();
        assert!(matches!(err, ParseError::LayerNameCount { provided: 1, parsed: 2 }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = choose_layer_names(None, names(&["base", "base"])).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateLayerName { .. }));
    }
}
