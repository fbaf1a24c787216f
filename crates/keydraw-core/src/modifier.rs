// Keydraw Modifier Vocabulary
// Modifier keys that firmware wrapper functions (LC(..), LCTL(..)) apply to a keycode

use std::fmt;

use strum_macros::{AsRefStr, EnumIter, EnumString};

/// A single physical modifier, sided
///
/// The declaration order is the canonical order used when a set of modifiers
/// is turned into a lookup key or a display string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AsRefStr, EnumIter, EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Modifier {
    LeftCtrl,
    LeftShift,
    LeftAlt,
    LeftGui,
    RightCtrl,
    RightShift,
    RightAlt,
    RightGui,
}

impl Modifier {
    /// Configuration name of this modifier, e.g. `left_ctrl`
    pub fn name(self) -> &'static str {
        match self {
            Modifier::LeftCtrl => "left_ctrl",
            Modifier::LeftShift => "left_shift",
            Modifier::LeftAlt => "left_alt",
            Modifier::LeftGui => "left_gui",
            Modifier::RightCtrl => "right_ctrl",
            Modifier::RightShift => "right_shift",
            Modifier::RightAlt => "right_alt",
            Modifier::RightGui => "right_gui",
        }
    }

    /// Map a device-tree (ZMK) modifier function name to its modifier
    ///
    /// Accepts both the short `LC`/`RS` forms and the long `LCTRL`/`RSHFT` forms.
    pub fn from_zmk_fn(name: &str) -> Option<Modifier> {
        let modifier = match name {
            "LC" | "LCTRL" | "LCTL" => Modifier::LeftCtrl,
            "LS" | "LSHIFT" | "LSHFT" | "LSFT" => Modifier::LeftShift,
            "LA" | "LALT" => Modifier::LeftAlt,
            "LG" | "LGUI" | "LWIN" | "LCMD" | "LMETA" => Modifier::LeftGui,
            "RC" | "RCTRL" | "RCTL" => Modifier::RightCtrl,
            "RS" | "RSHIFT" | "RSHFT" | "RSFT" => Modifier::RightShift,
            "RA" | "RALT" => Modifier::RightAlt,
            "RG" | "RGUI" | "RWIN" | "RCMD" | "RMETA" => Modifier::RightGui,
            _ => return None,
        };
        Some(modifier)
    }

    /// Map a JSON-dialect (QMK) modifier wrapper or `MOD_` suffix to its modifier
    pub fn from_qmk_fn(name: &str) -> Option<Modifier> {
        let modifier = match name {
            "C" | "LCTL" | "LCTRL" => Modifier::LeftCtrl,
            "S" | "LSFT" | "LSHIFT" => Modifier::LeftShift,
            "A" | "LALT" | "LOPT" => Modifier::LeftAlt,
            "G" | "LGUI" | "LCMD" | "LWIN" => Modifier::LeftGui,
            "RCTL" | "RCTRL" => Modifier::RightCtrl,
            "RSFT" | "RSHIFT" => Modifier::RightShift,
            "RALT" | "ROPT" | "ALGR" => Modifier::RightAlt,
            "RGUI" | "RCMD" | "RWIN" => Modifier::RightGui,
            _ => return None,
        };
        Some(modifier)
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for modifier in Modifier::iter() {
            assert_eq!(Modifier::from_str(modifier.name()), Ok(modifier));
            assert_eq!(modifier.as_ref(), modifier.name());
        }
    }

    #[test]
    fn test_zmk_short_and_long_forms() {
        assert_eq!(Modifier::from_zmk_fn("LC"), Some(Modifier::LeftCtrl));
        assert_eq!(Modifier::from_zmk_fn("LCTRL"), Some(Modifier::LeftCtrl));
        assert_eq!(Modifier::from_zmk_fn("RG"), Some(Modifier::RightGui));
        assert_eq!(Modifier::from_zmk_fn("LX"), None);
    }

    #[test]
    fn test_qmk_forms() {
        assert_eq!(Modifier::from_qmk_fn("C"), Some(Modifier::LeftCtrl));
        assert_eq!(Modifier::from_qmk_fn("LSFT"), Some(Modifier::LeftShift));
        assert_eq!(Modifier::from_qmk_fn("ALGR"), Some(Modifier::RightAlt));
        assert_eq!(Modifier::from_qmk_fn("KC_A"), None);
    }

    #[test]
    fn test_canonical_order() {
        let mut mods = vec![Modifier::LeftGui, Modifier::LeftCtrl, Modifier::LeftShift];
        mods.sort();
        assert_eq!(
            mods,
            vec![Modifier::LeftCtrl, Modifier::LeftShift, Modifier::LeftGui]
        );
    }
}
