// Keydraw JSON Keymap Tests
//
// End-to-end parses of JSON keymap exports through the public API.

use keydraw_core::{KeymapData, KeymapParser, LayoutKey, ModelError, ParseConfig, ParseError, QmkJsonParser, HELD_TYPE};
use serde_json::json;

const CRKBD_KEYMAP: &str = r#"{
    "version": 1,
    "keyboard": "crkbd/rev1",
    "keymap": "default",
    "layout": "LAYOUT_split_3x6_3",
    "layers": [
        ["KC_A", "LT(1, KC_SPC)", "LSFT_T(KC_B)", "OSM(MOD_LSFT)", "TT(1)"],
        ["KC_TRNS", "_______", "LCTL(KC_C)", "TG(0)", "KC_SCLN"]
    ]
}"#;

fn parser() -> QmkJsonParser {
    QmkJsonParser::new(ParseConfig::default()).unwrap()
}

#[test]
fn test_layers_and_legends() {
    let keymap = parser().parse_str(CRKBD_KEYMAP, None).unwrap();

    let base = keymap.layer("L0").unwrap();
    assert_eq!(base[0], LayoutKey::tap("A"));
    assert_eq!(base[1], LayoutKey::tap_hold("SPC", "L1"));
    assert_eq!(base[2], LayoutKey::tap_hold("B", "LSFT"));
    assert_eq!(base[3], LayoutKey::tap_hold("LSFT", "sticky"));
    assert_eq!(base[4], LayoutKey::tap_hold("L1", "tap-toggle"));

    let upper = keymap.layer("L1").unwrap();
    assert_eq!(upper[0], ParseConfig::default().trans_legend);
    assert_eq!(upper[2], LayoutKey::tap("Ctl+C"));
    assert_eq!(upper[3], LayoutKey::tap_hold("L0", "toggle"));
    assert_eq!(upper[4], LayoutKey::tap(";"));
}

#[test]
fn test_first_layer_tap_marks_held_key() {
    let keymap = parser().parse_str(CRKBD_KEYMAP, None).unwrap();
    let upper = keymap.layer("L1").unwrap();
    assert_eq!(upper[1], LayoutKey::typed(HELD_TYPE));
    assert_eq!(upper[4], LayoutKey::tap(";"));
}

#[test]
fn test_tap_toggle_marked_as_alternate() {
    let mut config = ParseConfig::default();
    config.mark_alternate_layer_activators = true;
    let keymap = QmkJsonParser::new(config).unwrap().parse_str(CRKBD_KEYMAP, None).unwrap();
    let upper = keymap.layer("L1").unwrap();
    assert_eq!(upper[1], LayoutKey::typed(HELD_TYPE));
    assert_eq!(upper[4].tap, ";");
    assert_eq!(upper[4].key_type, "held alternate");
}

#[test]
fn test_layout_hint_and_names() {
    let keymap = parser()
        .with_layer_names(vec!["Base".to_string(), "Num".to_string()])
        .parse_str(CRKBD_KEYMAP, None)
        .unwrap();
    let value = keymap.to_json(None).unwrap();
    assert_eq!(
        value["layout_hint"],
        json!({"qmk_keyboard": "crkbd/rev1", "qmk_layout": "LAYOUT_split_3x6_3"})
    );
    assert_eq!(value["layers"]["Base"][1], json!({"tap": "SPC", "hold": "Num"}));
}

#[test]
fn test_uneven_layers_fail() {
    let err = parser()
        .parse_str(r#"{"layers": [["KC_A", "KC_B"], ["KC_C"]]}"#, None)
        .unwrap_err();
    assert!(matches!(err, ParseError::Model(_)));
}

#[test]
fn test_unknown_layer_index_fails() {
    let err = parser().parse_str(r#"{"layers": [["MO(3)"]]}"#, None).unwrap_err();
    assert!(matches!(err, ParseError::Binding { .. }));
}

#[test]
fn test_base_keymap_keeps_manual_edits() {
    let base: KeymapData = serde_json::from_value(json!({
        "layers": {
            "L0": ["A", {"t": "SPC", "h": "L1"}, "B", "old", {"t": "L1", "type": "ghost"}],
            "L1": [["x", "y", "z"], ["w", "v"]]
        },
        "combos": [{"p": [1, 0], "k": "ESC", "align": "top"}]
    }))
    .unwrap();
    let mut keymap = parser()
        .with_base_keymap(base)
        .parse_str(CRKBD_KEYMAP, None)
        .unwrap();
    let base_layer = keymap.layer("L0").unwrap();
    assert_eq!(base_layer[3], LayoutKey::tap_hold("LSFT", "sticky"));
    assert_eq!(base_layer[4].key_type, "ghost");
    assert_eq!(base_layer[4].hold, "tap-toggle");

    let short_base: KeymapData = serde_json::from_value(json!({"layers": {"L0": ["A"]}})).unwrap();
    let err = parser()
        .with_base_keymap(short_base.clone())
        .parse_str(CRKBD_KEYMAP, None)
        .unwrap_err();
    assert!(matches!(err, ParseError::Model(ModelError::RebaseLayerLength { .. })));
    assert!(keymap.rebase(&short_base).is_err());
}
