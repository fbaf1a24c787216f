// Keydraw Front-Ends - JSON
// Parses JSON keymap exports (QMK Configurator, `qmk c2json`)

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{choose_layer_names, KeymapAssembler, KeymapParser, ParseError};
use crate::binding::{BindingRef, BindingResolver, BindingSyntax, KeycodeDialect, KeycodeMapper, LayerBehavior};
use crate::config::ParseConfig;
use crate::keymap::{KeymapData, LayoutKey};

static TRANS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:KC_TRANSPARENT|KC_TRNS|_______)$").unwrap());
static MO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^MO\((\d+)\)$").unwrap());
static TOGGLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(TG|TO|DF)\((\d+)\)$").unwrap());
static TAP_TOGGLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^TT\((\d+)\)$").unwrap());
static MOD_TAP_SHORT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([A-Z_]+)_T\((\S+)\)$").unwrap());
static MOD_TAP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^MT\((\S+), *(\S+)\)$").unwrap());
static LAYER_TAP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^LT\((\d+), *(\S+)\)$").unwrap());
static ONE_SHOT_MOD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^OSM\(MOD_(\S+)\)$").unwrap());
static ONE_SHOT_LAYER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^OSL\((\d+)\)$").unwrap());

/// Keycode syntax of JSON keymaps
///
/// `MO`, `LT`, `OSL` and `TT` count as held layer keys for held-key
/// inference: `TT(n)` acts as `MO(n)` while held and only toggles on
/// repeated taps. `TG`, `TO` and `DF` switch layers without a held key.
pub struct QmkSyntax<'a> {
    mapper: &'a KeycodeMapper,
}

impl<'a> QmkSyntax<'a> {
    pub fn new(mapper: &'a KeycodeMapper) -> Self {
        Self { mapper }
    }
}

fn layer(behavior: LayerBehavior, index: &str) -> BindingRef {
    BindingRef::Layer {
        behavior,
        layer: index.to_string(),
    }
}

impl BindingSyntax for QmkSyntax<'_> {
    fn classify(&self, keycode: &str) -> BindingRef {
        let keycode = keycode.trim();
        if TRANS_RE.is_match(keycode) {
            return BindingRef::Trans;
        }
        if let Some(c) = MO_RE.captures(keycode) {
            return layer(LayerBehavior::Momentary, &c[1]);
        }
        if let Some(c) = TOGGLE_RE.captures(keycode) {
            let behavior = if &c[1] == "TG" {
                LayerBehavior::Toggle
            } else {
                LayerBehavior::To
            };
            return layer(behavior, &c[2]);
        }
        if let Some(c) = TAP_TOGGLE_RE.captures(keycode) {
            return layer(LayerBehavior::TapToggle, &c[1]);
        }
        if let Some(c) = MOD_TAP_SHORT_RE.captures(keycode) {
            return BindingRef::HoldTap {
                hold: c[1].to_string(),
                tap: c[2].to_string(),
            };
        }
        if let Some(c) = MOD_TAP_RE.captures(keycode) {
            return BindingRef::HoldTap {
                hold: c[1].trim_start_matches("MOD_").to_string(),
                tap: c[2].to_string(),
            };
        }
        if let Some(c) = LAYER_TAP_RE.captures(keycode) {
            return BindingRef::HoldTap {
                hold: format!("MO({})", &c[1]),
                tap: c[2].to_string(),
            };
        }
        if let Some(c) = ONE_SHOT_MOD_RE.captures(keycode) {
            return BindingRef::Sticky(c[1].to_string());
        }
        if let Some(c) = ONE_SHOT_LAYER_RE.captures(keycode) {
            return layer(LayerBehavior::OneShot, &c[1]);
        }
        BindingRef::Keycode(keycode.to_string())
    }

    fn map_keycode(&self, keycode: &str) -> LayoutKey {
        self.mapper.map(keycode)
    }
}

/// Layout of a JSON keymap export; unknown fields are ignored
#[derive(Debug, Deserialize)]
struct QmkKeymap {
    #[serde(default)]
    keyboard: Option<String>,
    #[serde(default)]
    layout: Option<String>,
    layers: Vec<Vec<String>>,
}

impl QmkKeymap {
    fn layout_hint(&self) -> Option<Value> {
        let mut hint = Map::new();
        if let Some(keyboard) = &self.keyboard {
            hint.insert("qmk_keyboard".to_string(), Value::String(keyboard.clone()));
        }
        if let Some(layout) = &self.layout {
            hint.insert("qmk_layout".to_string(), Value::String(layout.clone()));
        }
        (!hint.is_empty()).then_some(Value::Object(hint))
    }
}

/// Parser for JSON keymap exports
#[derive(Debug, Clone)]
pub struct QmkJsonParser {
    config: ParseConfig,
    mapper: KeycodeMapper,
    layer_names: Option<Vec<String>>,
    base_keymap: Option<KeymapData>,
}

impl QmkJsonParser {
    pub fn new(config: ParseConfig) -> Result<Self, ParseError> {
        let mapper = KeycodeMapper::new(&config, KeycodeDialect::Qmk)?;
        Ok(Self {
            config,
            mapper,
            layer_names: None,
            base_keymap: None,
        })
    }

    /// Use these layer names instead of `L0..Ln`
    pub fn with_layer_names(mut self, layer_names: Vec<String>) -> Self {
        self.layer_names = Some(layer_names);
        self
    }

    /// Rebase every parsed keymap on `base`, see [`KeymapData::rebase`]
    pub fn with_base_keymap(mut self, base: KeymapData) -> Self {
        self.base_keymap = Some(base);
        self
    }
}

impl KeymapParser for QmkJsonParser {
    fn parse_str(&self, text: &str, _file_name: Option<&Path>) -> Result<KeymapData, ParseError> {
        let keymap: QmkKeymap = serde_json::from_str(text)?;
        let default_names = (0..keymap.layers.len()).map(|i| format!("L{}", i)).collect();
        let layer_names = choose_layer_names(self.layer_names.as_deref(), default_names)?;

        let syntax = QmkSyntax::new(&self.mapper);
        let resolver = BindingResolver::new(&syntax, &self.config, &self.config.raw_binding_map, &layer_names);
        let mut assembler = KeymapAssembler::new(resolver, &layer_names);
        for (index, keycodes) in keymap.layers.iter().enumerate() {
            assembler.add_layer(index, keycodes.as_slice())?;
        }

        assembler.finish(
            self.config.mark_alternate_layer_activators,
            &self.config.trans_legend,
            keymap.layout_hint(),
            self.base_keymap.as_ref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(keycode: &str) -> BindingRef {
        let mapper = KeycodeMapper::new(&ParseConfig::default(), KeycodeDialect::Qmk).unwrap();
        QmkSyntax::new(&mapper).classify(keycode)
    }

    #[test]
    fn test_classify_layers() {
        assert_eq!(classify("_______"), BindingRef::Trans);
        assert_eq!(classify("MO(1)"), layer(LayerBehavior::Momentary, "1"));
        assert_eq!(classify("TG(2)"), layer(LayerBehavior::Toggle, "2"));
        assert_eq!(classify("DF(0)"), layer(LayerBehavior::To, "0"));
        // held like MO(3), so it takes part in held-key inference
        assert_eq!(classify("TT(3)"), layer(LayerBehavior::TapToggle, "3"));
        assert!(LayerBehavior::TapToggle.is_held());
        assert!(!LayerBehavior::Toggle.is_held());
        assert_eq!(classify("OSL(1)"), layer(LayerBehavior::OneShot, "1"));
    }

    #[test]
    fn test_classify_mod_taps() {
        assert_eq!(
            classify("LSFT_T(KC_A)"),
            BindingRef::HoldTap {
                hold: "LSFT".to_string(),
                tap: "KC_A".to_string()
            }
        );
        assert_eq!(
            classify("MT(MOD_LCTL, KC_ESC)"),
            BindingRef::HoldTap {
                hold: "LCTL".to_string(),
                tap: "KC_ESC".to_string()
            }
        );
        assert_eq!(
            classify("LT(2, KC_SPC)"),
            BindingRef::HoldTap {
                hold: "MO(2)".to_string(),
                tap: "KC_SPC".to_string()
            }
        );
        assert_eq!(classify("OSM(MOD_LSFT)"), BindingRef::Sticky("LSFT".to_string()));
        assert_eq!(classify("LCTL(KC_C)"), BindingRef::Keycode("LCTL(KC_C)".to_string()));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let parser = QmkJsonParser::new(ParseConfig::default()).unwrap();
        let err = parser.parse_str("{\"layers\": 3}", None).unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }
}
