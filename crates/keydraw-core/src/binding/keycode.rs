// Keydraw Bindings - Keycode Display
// Maps firmware keycodes, including modifier function wrappers, to key legends

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{ConfigError, ModifierFormatter, ParseConfig};
use crate::keymap::LayoutKey;
use crate::Modifier;

/// `N1`, `NUM_1` and `NUMBER_1` style number keycodes
static NUMBERS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"N(UM(BER)?_)?(\d)").unwrap());

/// A modifier function applied to a keycode, e.g. `LC(A)` or `LSFT(KC_A)`
static MODIFIER_FN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Z]+)\s*\(\s*(.+?)\s*\)\s*$").unwrap());

/// Keycode vocabulary of a firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeycodeDialect {
    /// Device-tree keymaps (`&kp LC(A)`)
    Zmk,
    /// JSON keymap exports (`LCTL(KC_A)`)
    Qmk,
}

impl KeycodeDialect {
    fn modifier(self, name: &str) -> Option<Modifier> {
        match self {
            KeycodeDialect::Zmk => Modifier::from_zmk_fn(name),
            KeycodeDialect::Qmk => Modifier::from_qmk_fn(name),
        }
    }
}

/// Turns keycodes into legends for one dialect
#[derive(Debug, Clone)]
pub struct KeycodeMapper {
    dialect: KeycodeDialect,
    prefix_re: Option<Regex>,
    keycode_map: HashMap<String, LayoutKey>,
    formatter: ModifierFormatter,
}

impl KeycodeMapper {
    pub fn new(config: &ParseConfig, dialect: KeycodeDialect) -> Result<Self, ConfigError> {
        let (prefixes, keycode_map) = match dialect {
            KeycodeDialect::Zmk => (&config.zmk_remove_keycode_prefix, &config.zmk_keycode_map),
            KeycodeDialect::Qmk => (&config.qmk_remove_keycode_prefix, &config.qmk_keycode_map),
        };
        let prefix_re = if prefixes.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = prefixes.iter().map(|p| regex::escape(p)).collect();
            Some(Regex::new(&format!(r"\b({})", alternatives.join("|")))?)
        };
        Ok(Self {
            dialect,
            prefix_re,
            keycode_map: keycode_map.clone(),
            formatter: ModifierFormatter::new(&config.modifier_fn_map)?,
        })
    }

    /// Legend for a keycode
    pub fn map(&self, keycode: &str) -> LayoutKey {
        let keycode = match &self.prefix_re {
            Some(re) => re.replace_all(keycode, ""),
            None => keycode.into(),
        };

        let mut mods = Vec::new();
        let mut inner: &str = &keycode;
        while let Some(captures) = MODIFIER_FN_RE.captures(inner) {
            let Some(modifier) = self.dialect.modifier(&captures[1]) else {
                break;
            };
            mods.push(modifier);
            inner = captures.get(2).map_or("", |m| m.as_str());
        }

        let key = self.lookup(inner);
        if mods.is_empty() {
            return key;
        }
        LayoutKey {
            tap: self.formatter.format(&mods, &key.tap),
            hold: key.hold,
            shifted: String::new(),
            key_type: key.key_type,
        }
    }

    fn lookup(&self, keycode: &str) -> LayoutKey {
        if let Some(key) = self.keycode_map.get(keycode) {
            return key.clone();
        }
        match self.dialect {
            KeycodeDialect::Zmk => {
                let numbers = NUMBERS_RE.replace_all(keycode, "${3}");
                let text = numbers
                    .strip_prefix("C_")
                    .or_else(|| numbers.strip_prefix("K_"))
                    .unwrap_or(numbers.as_ref())
                    .replace("BT_SEL", "BT")
                    .replace('_', " ");
                LayoutKey::tap(text)
            }
            KeycodeDialect::Qmk => LayoutKey::tap(keycode.replace('_', " ")),
        }
    }
}
