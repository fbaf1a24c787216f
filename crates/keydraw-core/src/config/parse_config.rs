// Keydraw Config - Parse Settings
// TOML-backed settings that steer preprocessing and binding resolution

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::modifier_fn::{CombinationConfigError, ModifierFnMap};
use crate::keymap::LayoutKey;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("invalid modifier combinations: {0}")]
    Combination(#[from] CombinationConfigError),

    #[error("invalid keycode prefix list: {0}")]
    InvalidPrefix(#[from] regex::Error),
}

/// Root configuration structure (root TOML table)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Settings for parsing firmware keymaps
    pub parse_config: ParseConfig,
}

impl Config {
    /// Parse a TOML configuration file
    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
        config.parse_config.modifier_fn_map.validate()?;
        Ok(config)
    }

    /// Get the default config path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("keydraw").join("config.toml"))
    }

    /// Load the default config file if it exists, otherwise use defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Loading config from {}", path.display());
                Self::from_toml_path(path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// Settings related to parsing firmware keymaps
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParseConfig {
    /// Run the C preprocessor on device-tree keymaps
    pub preprocess: bool,

    /// Text prepended to device-tree keymaps before preprocessing
    pub preamble: String,

    /// Extra directories searched for `#include` files
    pub include_paths: Vec<PathBuf>,

    /// Skip all keycode/binding parsing except `raw_binding_map`
    pub skip_binding_parsing: bool,

    /// Raw binding strings mapped straight to legends, e.g. {"&bootloader" = "BOOT"}
    pub raw_binding_map: IndexMap<String, LayoutKey>,

    /// Hold legend for sticky/one-shot keys
    pub sticky_label: String,

    /// Hold legend for toggled keys
    pub toggle_label: String,

    /// Hold legend for tap-toggle layer keys
    pub tap_toggle_label: String,

    /// Legend for transparent keys
    pub trans_legend: LayoutKey,

    /// Mark every key sequence reaching a layer, not just the first one
    pub mark_alternate_layer_activators: bool,

    /// Prefixes removed from device-tree keycodes, e.g. locale prefixes like "DE_"
    pub zmk_remove_keycode_prefix: Vec<String>,

    /// Device-tree keycode display overrides
    pub zmk_keycode_map: HashMap<String, LayoutKey>,

    /// Prefixes removed from JSON-dialect keycodes
    pub qmk_remove_keycode_prefix: Vec<String>,

    /// JSON-dialect keycode display overrides
    pub qmk_keycode_map: HashMap<String, LayoutKey>,

    /// Display of modifier functions wrapping keycodes
    pub modifier_fn_map: ModifierFnMap,

    /// Extra fields merged into the combo with the same node name
    pub zmk_combos: HashMap<String, Map<String, Value>>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            preprocess: true,
            preamble: "#define KEYMAP_DRAWER".to_string(),
            include_paths: Vec::new(),
            skip_binding_parsing: false,
            raw_binding_map: IndexMap::new(),
            sticky_label: "sticky".to_string(),
            toggle_label: "toggle".to_string(),
            tap_toggle_label: "tap-toggle".to_string(),
            trans_legend: LayoutKey {
                tap: "▽".to_string(),
                key_type: "trans".to_string(),
                ..LayoutKey::default()
            },
            mark_alternate_layer_activators: false,
            zmk_remove_keycode_prefix: Vec::new(),
            zmk_keycode_map: to_key_map(ZMK_KEYCODES),
            qmk_remove_keycode_prefix: vec!["KC_".to_string()],
            qmk_keycode_map: to_key_map(QMK_KEYCODES),
            modifier_fn_map: ModifierFnMap::default(),
            zmk_combos: HashMap::new(),
        }
    }
}

fn to_key_map(entries: &[(&str, &str)]) -> HashMap<String, LayoutKey> {
    entries
        .iter()
        .map(|(code, legend)| (code.to_string(), LayoutKey::tap(*legend)))
        .collect()
}

const ZMK_KEYCODES: &[(&str, &str)] = &[
    ("EXCLAMATION", "!"),
    ("EXCL", "!"),
    ("AT_SIGN", "@"),
    ("AT", "@"),
    ("HASH", "#"),
    ("POUND", "#"),
    ("DOLLAR", "$"),
    ("DLLR", "$"),
    ("PERCENT", "%"),
    ("PRCNT", "%"),
    ("CARET", "^"),
    ("AMPERSAND", "&"),
    ("AMPS", "&"),
    ("ASTERISK", "*"),
    ("ASTRK", "*"),
    ("STAR", "*"),
    ("LEFT_PARENTHESIS", "("),
    ("LPAR", "("),
    ("RIGHT_PARENTHESIS", ")"),
    ("RPAR", ")"),
    ("EQUAL", "="),
    ("PLUS", "+"),
    ("MINUS", "-"),
    ("UNDERSCORE", "_"),
    ("UNDER", "_"),
    ("SLASH", "/"),
    ("FSLH", "/"),
    ("QUESTION", "?"),
    ("QMARK", "?"),
    ("BACKSLASH", "\\"),
    ("BSLH", "\\"),
    ("PIPE", "|"),
    ("NON_US_BACKSLASH", "\\"),
    ("PIPE2", "|"),
    ("NON_US_BSLH", "|"),
    ("SEMICOLON", ";"),
    ("SEMI", ";"),
    ("COLON", ":"),
    ("SINGLE_QUOTE", "'"),
    ("SQT", "'"),
    ("APOSTROPHE", "'"),
    ("APOS", "'"),
    ("DOUBLE_QUOTES", "\""),
    ("DQT", "\""),
    ("COMMA", ","),
    ("LESS_THAN", "<"),
    ("LT", "<"),
    ("PERIOD", "."),
    ("DOT", "."),
    ("GREATER_THAN", ">"),
    ("GT", ">"),
    ("LEFT_BRACKET", "["),
    ("LBKT", "["),
    ("LEFT_BRACE", "{"),
    ("LBRC", "{"),
    ("RIGHT_BRACKET", "]"),
    ("RBKT", "]"),
    ("RIGHT_BRACE", "}"),
    ("RBRC", "}"),
    ("GRAVE", "`"),
    ("TILDE", "~"),
    ("NON_US_HASH", "#"),
    ("NUHS", "#"),
    ("TILDE2", "~"),
];

const QMK_KEYCODES: &[(&str, &str)] = &[
    ("XXXXXXX", ""),
    ("NO", ""),
    ("MINUS", "-"),
    ("MINS", "-"),
    ("EQUAL", "="),
    ("EQL", "="),
    ("LEFT_BRACKET", "["),
    ("LBRC", "["),
    ("RIGHT_BRACKET", "]"),
    ("RBRC", "]"),
    ("BACKSLASH", "\\"),
    ("BSLS", "\\"),
    ("NONUS_HASH", "#"),
    ("NUHS", "#"),
    ("SEMICOLON", ";"),
    ("SCLN", ";"),
    ("QUOTE", "'"),
    ("QUOT", "'"),
    ("GRAVE", "`"),
    ("GRV", "`"),
    ("COMMA", ","),
    ("COMM", ","),
    ("DOT", "."),
    ("SLASH", "/"),
    ("SLSH", "/"),
    ("TILDE", "~"),
    ("TILD", "~"),
    ("EXCLAIM", "!"),
    ("EXLM", "!"),
    ("AT", "@"),
    ("HASH", "#"),
    ("DOLLAR", "$"),
    ("DLR", "$"),
    ("PERCENT", "%"),
    ("PERC", "%"),
    ("CIRCUMFLEX", "^"),
    ("CIRC", "^"),
    ("AMPERSAND", "&"),
    ("AMPR", "&"),
    ("ASTERISK", "*"),
    ("ASTR", "*"),
    ("LEFT_PAREN", "("),
    ("LPRN", "("),
    ("RIGHT_PAREN", ")"),
    ("RPRN", ")"),
    ("UNDERSCORE", "_"),
    ("UNDS", "_"),
    ("PLUS", "+"),
    ("LEFT_CURLY_BRACE", "{"),
    ("LCBR", "{"),
    ("RIGHT_CURLY_BRACE", "}"),
    ("RCBR", "}"),
    ("PIPE", "|"),
    ("COLON", ":"),
    ("COLN", ":"),
    ("DOUBLE_QUOTE", "\""),
    ("DQUO", "\""),
    ("DQT", "\""),
    ("LEFT_ANGLE_BRACKET", "<"),
    ("LABK", "<"),
    ("LT", "<"),
    ("RIGHT_ANGLE_BRACKET", ">"),
    ("RABK", ">"),
    ("GT", ">"),
    ("QUESTION", "?"),
    ("QUES", "?"),
];
