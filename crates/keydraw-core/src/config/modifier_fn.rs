// Keydraw Config - Modifier Function Display
// Turns modifier wrappers like LC(LS(A)) into display text such as "Ctl+Sft+A"

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::Modifier;

/// Errors in the modifier combination table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CombinationConfigError {
    #[error("special combination \"{combination}\" references unknown modifier \"{modifier}\"")]
    UnknownModifier {
        combination: String,
        modifier: String,
    },

    #[error("special combination \"{combination}\" is empty")]
    EmptyCombination { combination: String },

    #[error("special combinations \"{first}\" and \"{second}\" name the same modifier set")]
    DuplicateCombination { first: String, second: String },
}

/// Display configuration for modifier functions
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModifierFnMap {
    pub left_ctrl: String,
    pub right_ctrl: String,
    pub left_shift: String,
    pub right_shift: String,
    pub left_alt: String,
    pub right_alt: String,
    pub left_gui: String,
    pub right_gui: String,
    /// Format joining the modifier text and the key, uses `{mods}` and `{key}`
    pub keycode_combiner: String,
    /// Format joining two modifier texts, uses `{mod_1}` and `{mod_2}`
    pub mod_combiner: String,
    /// Named display strings for whole modifier sets, e.g. "left_ctrl+left_alt+left_shift"
    pub special_combinations: IndexMap<String, String>,
}

impl Default for ModifierFnMap {
    fn default() -> Self {
        Self {
            left_ctrl: "Ctl".to_string(),
            right_ctrl: "Ctl".to_string(),
            left_shift: "Sft".to_string(),
            right_shift: "Sft".to_string(),
            left_alt: "Alt".to_string(),
            right_alt: "AltGr".to_string(),
            left_gui: "Gui".to_string(),
            right_gui: "Gui".to_string(),
            keycode_combiner: "{mods}+{key}".to_string(),
            mod_combiner: "{mod_1}+{mod_2}".to_string(),
            special_combinations: IndexMap::from([
                (
                    "left_ctrl+left_alt+left_gui+left_shift".to_string(),
                    "Hyper".to_string(),
                ),
                (
                    "left_ctrl+left_alt+left_shift".to_string(),
                    "Meh".to_string(),
                ),
            ]),
        }
    }
}

impl ModifierFnMap {
    /// Display text for one modifier
    pub fn display(&self, modifier: Modifier) -> &str {
        match modifier {
            Modifier::LeftCtrl => &self.left_ctrl,
            Modifier::RightCtrl => &self.right_ctrl,
            Modifier::LeftShift => &self.left_shift,
            Modifier::RightShift => &self.right_shift,
            Modifier::LeftAlt => &self.left_alt,
            Modifier::RightAlt => &self.right_alt,
            Modifier::LeftGui => &self.left_gui,
            Modifier::RightGui => &self.right_gui,
        }
    }

    /// Check that every special combination only names known modifiers
    pub fn validate(&self) -> Result<(), CombinationConfigError> {
        ModifierFormatter::new(self).map(|_| ())
    }
}

/// Compiled form of [`ModifierFnMap`] with order-insensitive combination lookup
#[derive(Debug, Clone)]
pub struct ModifierFormatter {
    map: ModifierFnMap,
    combinations: HashMap<BTreeSet<Modifier>, String>,
}

impl ModifierFormatter {
    pub fn new(map: &ModifierFnMap) -> Result<Self, CombinationConfigError> {
        let mut combinations = HashMap::new();
        let mut sources: HashMap<BTreeSet<Modifier>, &str> = HashMap::new();
        for (combination, display) in &map.special_combinations {
            let set = parse_combination(combination)?;
            if let Some(first) = sources.insert(set.clone(), combination) {
                return Err(CombinationConfigError::DuplicateCombination {
                    first: first.to_string(),
                    second: combination.clone(),
                });
            }
            combinations.insert(set, display.clone());
        }
        Ok(Self {
            map: map.clone(),
            combinations,
        })
    }

    /// Format `key` wrapped in `mods`
    ///
    /// A named combination for the whole modifier set wins over joining the
    /// individual modifier texts.
    pub fn format(&self, mods: &[Modifier], key: &str) -> String {
        if mods.is_empty() {
            return key.to_string();
        }
        let mods_text = self.mods_text(mods);
        self.map
            .keycode_combiner
            .replace("{mods}", &mods_text)
            .replace("{key}", key)
    }

    fn mods_text(&self, mods: &[Modifier]) -> String {
        let set: BTreeSet<Modifier> = mods.iter().copied().collect();
        if let Some(named) = self.combinations.get(&set) {
            return named.clone();
        }

        let mut seen = BTreeSet::new();
        let mut text: Option<String> = None;
        for &modifier in mods {
            if !seen.insert(modifier) {
                continue;
            }
            let display = self.map.display(modifier);
            text = Some(match text {
                None => display.to_string(),
                Some(acc) => self
                    .map
                    .mod_combiner
                    .replace("{mod_1}", &acc)
                    .replace("{mod_2}", display),
            });
        }
        text.unwrap_or_default()
    }
}

fn parse_combination(combination: &str) -> Result<BTreeSet<Modifier>, CombinationConfigError> {
    let mut set = BTreeSet::new();
    for part in combination.split('+').map(str::trim).filter(|p| !p.is_empty()) {
        let modifier =
            Modifier::from_str(part).map_err(|_| CombinationConfigError::UnknownModifier {
                combination: combination.to_string(),
                modifier: part.to_string(),
            })?;
        set.insert(modifier);
    }
    if set.is_empty() {
        return Err(CombinationConfigError::EmptyCombination {
            combination: combination.to_string(),
        });
    }
    Ok(set)
}
