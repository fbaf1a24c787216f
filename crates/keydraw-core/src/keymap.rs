// Keydraw Keymap Model
// Normalized layers, keys and combos produced by every front-end

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Key type marking a key that is held to reach the layer it is drawn on
pub const HELD_TYPE: &str = "held";

/// Key type for a key that is one of several alternative ways into a layer
pub const ALTERNATE_HELD_TYPE: &str = "held alternate";

/// Errors raised when a keymap model violates its invariants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("layer \"{layer}\" has {found} keys but layer \"{first}\" has {expected}")]
    LayerSizeMismatch {
        first: String,
        expected: usize,
        layer: String,
        found: usize,
    },

    #[error("combo {positions:?} needs at least two key positions")]
    TooFewComboPositions { positions: Vec<usize> },

    #[error("combo {positions:?} uses position {position} but layers only have {key_count} keys")]
    ComboPositionOutOfRange {
        positions: Vec<usize>,
        position: usize,
        key_count: usize,
    },

    #[error("combo {positions:?} references unknown layer \"{layer}\"")]
    UnknownComboLayer { positions: Vec<usize>, layer: String },

    #[error("cannot rebase layer \"{layer}\": it has {found} keys but the base layer has {expected}")]
    RebaseLayerLength {
        layer: String,
        expected: usize,
        found: usize,
    },
}

/// Legend of a single key: tap, hold and shifted text plus a free-form type
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "KeySpec")]
pub struct LayoutKey {
    pub tap: String,
    pub hold: String,
    pub shifted: String,
    pub key_type: String,
}

impl LayoutKey {
    /// Key with only a tap legend
    pub fn tap(tap: impl Into<String>) -> Self {
        Self {
            tap: tap.into(),
            ..Self::default()
        }
    }

    /// Key with tap and hold legends
    pub fn tap_hold(tap: impl Into<String>, hold: impl Into<String>) -> Self {
        Self {
            tap: tap.into(),
            hold: hold.into(),
            ..Self::default()
        }
    }

    /// Key with no legend, only a type
    pub fn typed(key_type: impl Into<String>) -> Self {
        Self {
            key_type: key_type.into(),
            ..Self::default()
        }
    }

    /// True when only the tap legend is set
    pub fn is_tap_only(&self) -> bool {
        self.hold.is_empty() && self.shifted.is_empty() && self.key_type.is_empty()
    }

    /// Copy of `base` with every non-empty field of `self` written over it
    pub fn overlay(&self, base: &LayoutKey) -> LayoutKey {
        let pick = |own: &String, base: &String| if own.is_empty() { base.clone() } else { own.clone() };
        LayoutKey {
            tap: pick(&self.tap, &base.tap),
            hold: pick(&self.hold, &base.hold),
            shifted: pick(&self.shifted, &base.shifted),
            key_type: pick(&self.key_type, &base.key_type),
        }
    }
}

impl Serialize for LayoutKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_tap_only() {
            return serializer.serialize_str(&self.tap);
        }
        let fields = [
            ("tap", &self.tap),
            ("hold", &self.hold),
            ("shifted", &self.shifted),
            ("type", &self.key_type),
        ];
        let present = fields.iter().filter(|(_, v)| !v.is_empty()).count();
        let mut map = serializer.serialize_map(Some(present))?;
        for (name, value) in fields {
            if !value.is_empty() {
                map.serialize_entry(name, value)?;
            }
        }
        map.end()
    }
}

/// Key specification as written in configuration: a plain tap string, a table or null
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeySpec {
    Empty(()),
    Tap(String),
    Full {
        #[serde(default, alias = "t")]
        tap: String,
        #[serde(default, alias = "h")]
        hold: String,
        #[serde(default, alias = "s")]
        shifted: String,
        #[serde(default, rename = "type")]
        key_type: String,
    },
}

impl From<KeySpec> for LayoutKey {
    fn from(spec: KeySpec) -> Self {
        match spec {
            KeySpec::Empty(()) => LayoutKey::default(),
            KeySpec::Tap(tap) => LayoutKey::tap(tap),
            KeySpec::Full {
                tap,
                hold,
                shifted,
                key_type,
            } => LayoutKey {
                tap,
                hold,
                shifted,
                key_type,
            },
        }
    }
}

impl From<&str> for LayoutKey {
    fn from(tap: &str) -> Self {
        LayoutKey::tap(tap)
    }
}

/// A binding triggered by pressing several key positions together
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawCombo")]
pub struct ComboSpec {
    pub key_positions: Vec<usize>,
    pub key: LayoutKey,
    /// Layer names the combo is active on; empty means every layer
    pub layers: Vec<String>,
    /// Opaque drawing hints carried through to the output
    pub extra: Map<String, Value>,
}

impl ComboSpec {
    pub fn new(key_positions: Vec<usize>, key: LayoutKey) -> Self {
        Self {
            key_positions,
            key,
            layers: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Check whether the combo is active on the given layer
    pub fn is_active_on(&self, layer: &str) -> bool {
        self.layers.is_empty() || self.layers.iter().any(|l| l == layer)
    }

    fn sorted_positions(&self) -> Vec<usize> {
        let mut positions = self.key_positions.clone();
        positions.sort_unstable();
        positions
    }

    fn layer_overlap(&self, other: &ComboSpec) -> usize {
        self.layers.iter().filter(|layer| other.layers.contains(layer)).count()
    }
}

/// Combo as written in a keymap file, with short aliases
#[derive(Deserialize)]
struct RawCombo {
    #[serde(alias = "p", alias = "key_positions")]
    positions: Vec<usize>,
    #[serde(alias = "k")]
    key: LayoutKey,
    #[serde(default, alias = "l")]
    layers: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawCombo> for ComboSpec {
    fn from(raw: RawCombo) -> Self {
        Self {
            key_positions: raw.positions,
            key: raw.key,
            layers: raw.layers,
            extra: raw.extra,
        }
    }
}

impl Serialize for ComboSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("positions", &self.key_positions)?;
        map.serialize_entry("key", &self.key)?;
        if !self.layers.is_empty() {
            map.serialize_entry("layers", &self.layers)?;
        }
        for (name, value) in &self.extra {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// The normalized keymap: named layers of keys, combos and an optional layout hint
///
/// Deserializes from the JSON this type writes, with layers either flat or
/// split into rows.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawKeymap")]
pub struct KeymapData {
    layers: IndexMap<String, Vec<LayoutKey>>,
    combos: Vec<ComboSpec>,
    layout_hint: Option<Value>,
}

impl KeymapData {
    /// Build a keymap, validating that layers agree on key count and combos fit
    pub fn new(
        layers: IndexMap<String, Vec<LayoutKey>>,
        combos: Vec<ComboSpec>,
        layout_hint: Option<Value>,
    ) -> Result<Self, ModelError> {
        let keymap = Self {
            layers,
            combos,
            layout_hint,
        };
        keymap.validate()?;
        Ok(keymap)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let mut sizes = self.layers.iter().map(|(name, keys)| (name, keys.len()));
        let key_count = match sizes.next() {
            Some((first, expected)) => {
                for (layer, found) in sizes {
                    if found != expected {
                        return Err(ModelError::LayerSizeMismatch {
                            first: first.clone(),
                            expected,
                            layer: layer.clone(),
                            found,
                        });
                    }
                }
                Some(expected)
            }
            None => None,
        };

        for combo in &self.combos {
            if combo.key_positions.len() < 2 {
                return Err(ModelError::TooFewComboPositions {
                    positions: combo.key_positions.clone(),
                });
            }
            if let Some(key_count) = key_count {
                if let Some(&position) = combo.key_positions.iter().find(|&&p| p >= key_count) {
                    return Err(ModelError::ComboPositionOutOfRange {
                        positions: combo.key_positions.clone(),
                        position,
                        key_count,
                    });
                }
            }
            if let Some(layer) = combo.layers.iter().find(|l| !self.layers.contains_key(*l)) {
                return Err(ModelError::UnknownComboLayer {
                    positions: combo.key_positions.clone(),
                    layer: layer.clone(),
                });
            }
        }
        Ok(())
    }

    /// Rebase this keymap on an earlier one, keeping what only the earlier one sets
    ///
    /// Keys of a layer that exists in `base` are written over the base key at
    /// the same position. A combo is written over the base combo with the same
    /// key positions that shares the most layers; its key is taken as is. The
    /// keymap is left untouched when the result is invalid.
    pub fn rebase(&mut self, base: &KeymapData) -> Result<(), ModelError> {
        let mut layers = IndexMap::with_capacity(self.layers.len());
        for (name, keys) in &self.layers {
            let keys = match base.layers.get(name) {
                Some(base_keys) if base_keys.len() != keys.len() => {
                    return Err(ModelError::RebaseLayerLength {
                        layer: name.clone(),
                        expected: base_keys.len(),
                        found: keys.len(),
                    });
                }
                Some(base_keys) => keys.iter().zip(base_keys).map(|(key, base_key)| key.overlay(base_key)).collect(),
                None => keys.clone(),
            };
            layers.insert(name.clone(), keys);
        }

        let mut base_combos: HashMap<Vec<usize>, Vec<&ComboSpec>> = HashMap::new();
        for combo in &base.combos {
            base_combos.entry(combo.sorted_positions()).or_default().push(combo);
        }
        let combos = self
            .combos
            .iter()
            .map(|combo| {
                let best = base_combos.get(&combo.sorted_positions()).and_then(|matches| {
                    matches.iter().copied().fold(None, |best: Option<&ComboSpec>, candidate| match best {
                        Some(best) if best.layer_overlap(combo) >= candidate.layer_overlap(combo) => Some(best),
                        _ => Some(candidate),
                    })
                });
                let Some(best) = best else {
                    return combo.clone();
                };
                let mut merged = best.clone();
                merged.key_positions = combo.key_positions.clone();
                merged.key = combo.key.clone();
                if !combo.layers.is_empty() {
                    merged.layers = combo.layers.clone();
                }
                merged.extra.extend(combo.extra.clone());
                merged
            })
            .collect();

        let rebased = KeymapData {
            layers,
            combos,
            layout_hint: self.layout_hint.clone().or_else(|| base.layout_hint.clone()),
        };
        rebased.validate()?;
        *self = rebased;
        Ok(())
    }

    pub fn layers(&self) -> &IndexMap<String, Vec<LayoutKey>> {
        &self.layers
    }

    /// Get the keys of a layer by name
    pub fn layer(&self, name: &str) -> Option<&[LayoutKey]> {
        self.layers.get(name).map(Vec::as_slice)
    }

    pub fn combos(&self) -> &[ComboSpec] {
        &self.combos
    }

    pub fn layout_hint(&self) -> Option<&Value> {
        self.layout_hint.as_ref()
    }

    /// Number of keys per layer (zero for an empty keymap)
    pub fn key_count(&self) -> usize {
        self.layers.values().next().map_or(0, Vec::len)
    }

    /// Serialize to JSON, optionally splitting every layer into rows of `columns` keys
    pub fn to_json(&self, columns: Option<usize>) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let Some(columns) = columns.filter(|&c| c > 0) else {
            return Ok(value);
        };
        if let Some(Value::Object(layers)) = value.get_mut("layers") {
            for keys in layers.values_mut() {
                if let Value::Array(flat) = keys {
                    let rows = flat
                        .chunks(columns)
                        .map(|row| Value::Array(row.to_vec()))
                        .collect();
                    *keys = Value::Array(rows);
                }
            }
        }
        Ok(value)
    }
}

/// Keymap as written in a JSON file; a layer entry may be a key or a row of keys
#[derive(Deserialize)]
struct RawKeymap {
    layers: IndexMap<String, Vec<LayerEntry>>,
    #[serde(default)]
    combos: Vec<ComboSpec>,
    #[serde(default)]
    layout_hint: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LayerEntry {
    Row(Vec<LayoutKey>),
    Key(LayoutKey),
}

impl TryFrom<RawKeymap> for KeymapData {
    type Error = ModelError;

    fn try_from(raw: RawKeymap) -> Result<Self, Self::Error> {
        let layers = raw
            .layers
            .into_iter()
            .map(|(name, entries)| {
                let keys = entries
                    .into_iter()
                    .flat_map(|entry| match entry {
                        LayerEntry::Row(row) => row,
                        LayerEntry::Key(key) => vec![key],
                    })
                    .collect();
                (name, keys)
            })
            .collect();
        KeymapData::new(layers, raw.combos, raw.layout_hint)
    }
}

impl Serialize for KeymapData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let field_count = 1 + usize::from(!self.combos.is_empty()) + usize::from(self.layout_hint.is_some());
        let mut state = serializer.serialize_struct("KeymapData", field_count)?;
        state.serialize_field("layers", &self.layers)?;
        if !self.combos.is_empty() {
            state.serialize_field("combos", &self.combos)?;
        } else {
            state.skip_field("combos")?;
        }
        if let Some(hint) = &self.layout_hint {
            state.serialize_field("layout_hint", hint)?;
        } else {
            state.skip_field("layout_hint")?;
        }
        state.end()
    }
}
