// Keydraw Bindings
// Resolves raw firmware bindings into key legends and layer activations

pub mod keycode;

use indexmap::IndexMap;
use smallvec::{smallvec, SmallVec};

use crate::config::ParseConfig;
use crate::keymap::LayoutKey;

pub use keycode::{KeycodeDialect, KeycodeMapper};

/// Maximum nesting of behaviors expanding into other behaviors
pub const MAX_BINDING_DEPTH: usize = 32;

/// Binding resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingResolutionError {
    #[error("binding \"{binding}\" nests behaviors deeper than {depth} levels")]
    RecursionLimit { binding: String, depth: usize },

    #[error("\"{value}\" is not a layer index")]
    InvalidLayer { value: String },

    #[error("layer index {index} is out of range, the keymap has {count} layers")]
    LayerOutOfRange { index: usize, count: usize },
}

/// How a layer behavior reaches its target layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerBehavior {
    /// Active while held (`&mo`, `MO(n)`, layer-taps)
    Momentary,
    /// Switches to the layer (`&to`, `TO(n)`, `DF(n)`)
    To,
    /// Toggles the layer (`&tog`, `TG(n)`)
    Toggle,
    /// Active for the next key press (`&sl`)
    Sticky,
    /// Momentary when held, toggled when tapped (`TT(n)`)
    TapToggle,
    /// One-shot layer (`OSL(n)`)
    OneShot,
}

impl LayerBehavior {
    /// Whether the activating key is held down while the layer is in use
    pub fn is_held(self) -> bool {
        !matches!(self, LayerBehavior::To | LayerBehavior::Toggle)
    }
}

/// A layer reached from a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerActivation {
    pub kind: LayerBehavior,
    /// Layers the key lives on; empty for combos
    pub from_layers: SmallVec<[usize; 2]>,
    pub to_layer: usize,
    pub key_positions: SmallVec<[usize; 2]>,
}

/// Result of resolving one binding
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindingEvent {
    pub key: LayoutKey,
    pub activations: SmallVec<[LayerActivation; 1]>,
}

impl BindingEvent {
    fn from_key(key: LayoutKey) -> Self {
        Self {
            key,
            activations: SmallVec::new(),
        }
    }
}

/// A classified binding
///
/// Behaviors that expand into other bindings carry the expanded bindings,
/// which are classified again by the same syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingRef {
    /// No legend (`&none`)
    None,
    /// Transparent key (`&trans`)
    Trans,
    /// Key press of a keycode
    Keycode(String),
    /// Key toggle of a keycode (`&kt`)
    KeyToggle(String),
    /// Primary binding and the binding used when shifted
    ModMorph { primary: String, shifted: String },
    /// Hold action and tap action
    HoldTap { hold: String, tap: String },
    /// Sticky version of the wrapped binding
    Sticky(String),
    /// Layer behavior with the unparsed layer index
    Layer { behavior: LayerBehavior, layer: String },
    /// Bluetooth action with an optional parameter shown as hold legend
    Bluetooth { action: String, param: Option<String> },
    /// Parameters shown as text with underscores as spaces (`&out`, `&rgb_ug`)
    Params(String),
    /// Text shown as-is
    Literal(String),
}

/// Firmware-specific binding classification
pub trait BindingSyntax {
    /// Classify one raw binding
    fn classify(&self, binding: &str) -> BindingRef;

    /// Legend of a keycode
    fn map_keycode(&self, keycode: &str) -> LayoutKey;
}

/// Position of the key being resolved
#[derive(Debug, Clone, Copy)]
struct Site<'a> {
    current_layer: Option<usize>,
    key_positions: &'a [usize],
}

/// Resolves bindings for one parse
///
/// Holds only borrowed, read-only state, so one resolver can be used for every
/// key of a keymap.
pub struct BindingResolver<'a> {
    syntax: &'a dyn BindingSyntax,
    config: &'a ParseConfig,
    raw_binding_map: &'a IndexMap<String, LayoutKey>,
    layer_names: &'a [String],
}

impl<'a> BindingResolver<'a> {
    pub fn new(
        syntax: &'a dyn BindingSyntax,
        config: &'a ParseConfig,
        raw_binding_map: &'a IndexMap<String, LayoutKey>,
        layer_names: &'a [String],
    ) -> Self {
        Self {
            syntax,
            config,
            raw_binding_map,
            layer_names,
        }
    }

    /// Resolve a binding on `current_layer` at `key_positions`
    pub fn resolve(
        &self,
        binding: &str,
        current_layer: Option<usize>,
        key_positions: &[usize],
    ) -> Result<BindingEvent, BindingResolutionError> {
        let site = Site {
            current_layer,
            key_positions,
        };
        self.resolve_at(binding, site, 0)
    }

    /// Resolve a combo binding; combos belong to no layer and show no shifted legend
    pub fn resolve_combo(
        &self,
        binding: &str,
        key_positions: &[usize],
    ) -> Result<BindingEvent, BindingResolutionError> {
        let mut event = self.resolve(binding, None, key_positions)?;
        event.key.shifted.clear();
        Ok(event)
    }

    fn resolve_at(&self, binding: &str, site: Site<'_>, depth: usize) -> Result<BindingEvent, BindingResolutionError> {
        if depth > MAX_BINDING_DEPTH {
            return Err(BindingResolutionError::RecursionLimit {
                binding: binding.to_string(),
                depth: MAX_BINDING_DEPTH,
            });
        }
        if let Some(key) = self.raw_binding_map.get(binding) {
            return Ok(BindingEvent::from_key(key.clone()));
        }
        if self.config.skip_binding_parsing {
            return Ok(BindingEvent::from_key(LayoutKey::tap(binding)));
        }

        let event = match self.syntax.classify(binding) {
            BindingRef::None => BindingEvent::default(),
            BindingRef::Trans => BindingEvent::from_key(self.config.trans_legend.clone()),
            BindingRef::Keycode(code) => BindingEvent::from_key(self.syntax.map_keycode(&code)),
            BindingRef::KeyToggle(code) => {
                let key = self.syntax.map_keycode(&code);
                BindingEvent::from_key(LayoutKey {
                    hold: self.config.toggle_label.clone(),
                    key_type: String::new(),
                    ..key
                })
            }
            BindingRef::ModMorph { primary, shifted } => {
                let mut primary = self.resolve_at(&primary, site, depth + 1)?;
                let shifted = self.resolve_at(&shifted, site, depth + 1)?;
                primary.key = LayoutKey {
                    tap: primary.key.tap,
                    hold: primary.key.hold,
                    shifted: shifted.key.tap,
                    key_type: String::new(),
                };
                primary.activations.extend(shifted.activations);
                primary
            }
            BindingRef::HoldTap { hold, tap } => {
                let hold = self.resolve_at(&hold, site, depth + 1)?;
                let mut tap = self.resolve_at(&tap, site, depth + 1)?;
                tap.key = LayoutKey {
                    tap: tap.key.tap,
                    hold: hold.key.tap,
                    shifted: tap.key.shifted,
                    key_type: String::new(),
                };
                tap.activations.extend(hold.activations);
                tap
            }
            BindingRef::Sticky(inner) => {
                let mut event = self.resolve_at(&inner, site, depth + 1)?;
                for activation in &mut event.activations {
                    if activation.kind == LayerBehavior::Momentary {
                        activation.kind = LayerBehavior::Sticky;
                    }
                }
                event.key = LayoutKey {
                    tap: event.key.tap,
                    hold: self.config.sticky_label.clone(),
                    shifted: event.key.shifted,
                    key_type: String::new(),
                };
                event
            }
            BindingRef::Layer { behavior, layer } => self.layer(behavior, &layer, site)?,
            BindingRef::Bluetooth { action, param } => {
                let key = self.syntax.map_keycode(&action);
                match param {
                    Some(param) => BindingEvent::from_key(LayoutKey {
                        hold: param,
                        ..key
                    }),
                    None => BindingEvent::from_key(key),
                }
            }
            BindingRef::Params(params) => BindingEvent::from_key(LayoutKey::tap(params.replace('_', " "))),
            BindingRef::Literal(text) => {
                log::debug!("Showing unrecognized binding \"{}\" as text", text);
                BindingEvent::from_key(LayoutKey::tap(text))
            }
        };
        Ok(event)
    }

    fn layer(&self, behavior: LayerBehavior, layer: &str, site: Site<'_>) -> Result<BindingEvent, BindingResolutionError> {
        let index: usize = layer
            .trim()
            .parse()
            .map_err(|_| BindingResolutionError::InvalidLayer {
                value: layer.to_string(),
            })?;
        let name = self
            .layer_names
            .get(index)
            .ok_or(BindingResolutionError::LayerOutOfRange {
                index,
                count: self.layer_names.len(),
            })?;

        let hold: &str = match behavior {
            LayerBehavior::Momentary => "",
            LayerBehavior::To | LayerBehavior::Toggle => &self.config.toggle_label,
            LayerBehavior::Sticky | LayerBehavior::OneShot => &self.config.sticky_label,
            LayerBehavior::TapToggle => &self.config.tap_toggle_label,
        };
        Ok(BindingEvent {
            key: LayoutKey::tap_hold(name.clone(), hold),
            activations: smallvec![LayerActivation {
                kind: behavior,
                from_layers: site.current_layer.into_iter().collect(),
                to_layer: index,
                key_positions: site.key_positions.iter().copied().collect(),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal space-separated syntax: `kp X`, `mo N`, `ht H T`, `mm A B`, `loop`
    struct TestSyntax;

    impl BindingSyntax for TestSyntax {
        fn classify(&self, binding: &str) -> BindingRef {
            let parts: Vec<&str> = binding.split_whitespace().collect();
            match parts.as_slice() {
                ["none"] => BindingRef::None,
                ["trans"] => BindingRef::Trans,
                ["kp", code] => BindingRef::Keycode(code.to_string()),
                ["kt", code] => BindingRef::KeyToggle(code.to_string()),
                ["mo", n] => BindingRef::Layer {
                    behavior: LayerBehavior::Momentary,
                    layer: n.to_string(),
                },
                ["tog", n] => BindingRef::Layer {
                    behavior: LayerBehavior::Toggle,
                    layer: n.to_string(),
                },
                ["ht", hold, tap] => BindingRef::HoldTap {
                    hold: hold.replace('.', " "),
                    tap: tap.replace('.', " "),
                },
                ["mm", a, b] => BindingRef::ModMorph {
                    primary: a.replace('.', " "),
                    shifted: b.replace('.', " "),
                },
                ["sk", inner] => BindingRef::Sticky(inner.replace('.', " ")),
                ["loop"] => BindingRef::ModMorph {
                    primary: "loop".to_string(),
                    shifted: "kp A".to_string(),
                },
                ["bt", action, param] => BindingRef::Bluetooth {
                    action: action.to_string(),
                    param: Some(param.to_string()),
                },
                ["out", rest @ ..] => BindingRef::Params(rest.join(" ")),
                _ => BindingRef::Literal(binding.to_string()),
            }
        }

        fn map_keycode(&self, keycode: &str) -> LayoutKey {
            match keycode {
                "GRAVE" => LayoutKey::tap("`"),
                other => LayoutKey::tap(other),
            }
        }
    }

    fn names() -> Vec<String> {
        vec!["Base".to_string(), "Nav".to_string(), "Sym".to_string()]
    }

    fn resolve(config: &ParseConfig, binding: &str) -> Result<BindingEvent, BindingResolutionError> {
        let raw = IndexMap::new();
        let layer_names = names();
        let resolver = BindingResolver::new(&TestSyntax, config, &raw, &layer_names);
        resolver.resolve(binding, Some(0), &[4])
    }

    #[test]
    fn test_literal_kinds() {
        let config = ParseConfig::default();
        assert_eq!(resolve(&config, "none").unwrap().key, LayoutKey::default());
        assert_eq!(resolve(&config, "trans").unwrap().key, config.trans_legend);
        assert_eq!(resolve(&config, "custom 1 2").unwrap().key, LayoutKey::tap("custom 1 2"));
        assert_eq!(resolve(&config, "out OUT_USB").unwrap().key, LayoutKey::tap("OUT USB"));
    }

    #[test]
    fn test_hold_tap_and_mod_morph() {
        let config = ParseConfig::default();
        let key = resolve(&config, "ht kp.LSHIFT kp.A").unwrap().key;
        assert_eq!(key, LayoutKey::tap_hold("A", "LSHIFT"));

        let key = resolve(&config, "mm kp.ESC kp.GRAVE").unwrap().key;
        assert_eq!(key.tap, "ESC");
        assert_eq!(key.shifted, "`");
    }

    #[test]
    fn test_sticky_and_toggle_labels() {
        let config = ParseConfig::default();
        assert_eq!(resolve(&config, "sk kp.LSHIFT").unwrap().key, LayoutKey::tap_hold("LSHIFT", "sticky"));
        assert_eq!(resolve(&config, "kt CAPS").unwrap().key, LayoutKey::tap_hold("CAPS", "toggle"));
        assert_eq!(resolve(&config, "bt BT_SEL 1").unwrap().key, LayoutKey::tap_hold("BT_SEL", "1"));
    }

    #[test]
    fn test_layer_activation_events() {
        let config = ParseConfig::default();
        let event = resolve(&config, "mo 2").unwrap();
        assert_eq!(event.key, LayoutKey::tap("Sym"));
        assert_eq!(event.activations.len(), 1);
        let activation = &event.activations[0];
        assert_eq!(activation.kind, LayerBehavior::Momentary);
        assert_eq!(activation.from_layers.as_slice(), &[0]);
        assert_eq!(activation.to_layer, 2);
        assert_eq!(activation.key_positions.as_slice(), &[4]);

        let event = resolve(&config, "tog 1").unwrap();
        assert_eq!(event.key, LayoutKey::tap_hold("Nav", "toggle"));
        assert!(!event.activations[0].kind.is_held());
    }

    #[test]
    fn test_layer_tap_carries_activation() {
        let config = ParseConfig::default();
        let event = resolve(&config, "ht mo.1 kp.SPACE").unwrap();
        assert_eq!(event.key, LayoutKey::tap_hold("SPACE", "Nav"));
        assert_eq!(event.activations[0].to_layer, 1);
    }

    #[test]
    fn test_layer_errors() {
        let config = ParseConfig::default();
        assert_eq!(
            resolve(&config, "mo 7"),
            Err(BindingResolutionError::LayerOutOfRange { index: 7, count: 3 })
        );
        assert_eq!(
            resolve(&config, "mo NAV"),
            Err(BindingResolutionError::InvalidLayer {
                value: "NAV".to_string()
            })
        );
    }

    #[test]
    fn test_recursion_limit() {
        let config = ParseConfig::default();
        assert!(matches!(
            resolve(&config, "loop"),
            Err(BindingResolutionError::RecursionLimit { depth: MAX_BINDING_DEPTH, .. })
        ));
    }

    #[test]
    fn test_raw_binding_map_and_skip() {
        let mut raw = IndexMap::new();
        raw.insert("kp A".to_string(), LayoutKey::tap("alpha"));
        let config = ParseConfig {
            skip_binding_parsing: true,
            ..ParseConfig::default()
        };
        let layer_names = names();
        let resolver = BindingResolver::new(&TestSyntax, &config, &raw, &layer_names);
        assert_eq!(resolver.resolve("kp A", Some(0), &[0]).unwrap().key.tap, "alpha");
        assert_eq!(resolver.resolve("mo 1", Some(0), &[0]).unwrap().key.tap, "mo 1");
    }

    #[test]
    fn test_combo_drops_shifted() {
        let config = ParseConfig::default();
        let raw = IndexMap::new();
        let layer_names = names();
        let resolver = BindingResolver::new(&TestSyntax, &config, &raw, &layer_names);
        let event = resolver.resolve_combo("mm kp.ESC kp.GRAVE", &[0, 1]).unwrap();
        assert_eq!(event.key, LayoutKey::tap("ESC"));
    }
}
