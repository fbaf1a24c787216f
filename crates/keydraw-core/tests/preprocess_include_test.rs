// Keydraw Include Resolution Tests
//
// #include handling against real files, alone and through the device-tree parser.

use std::fs;

use keydraw_core::{KeymapParser, LayoutKey, ParseConfig, PreprocessError, Preprocessor, ZmkKeymapParser, HELD_TYPE};
use tempfile::TempDir;

const KEYMAP: &str = r#"
#include "layers.h"
#include <dt-bindings/zmk/keys.h>

/ { keymap { compatible = "zmk,keymap";
    base { bindings = <&mo NAV &kp A>; };
    nav { bindings = <&trans &kp B>; };
}; };
"#;

#[test]
fn test_quoted_include_resolves_next_to_source() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("layers.h"), "#define NAV 1\n").unwrap();
    let source = dir.path().join("corne.keymap");
    fs::write(&source, KEYMAP).unwrap();

    let parser = ZmkKeymapParser::new(ParseConfig::default()).unwrap();
    let keymap = parser.parse_path(&source).unwrap();
    assert_eq!(keymap.layer("base").unwrap()[0], LayoutKey::tap("nav"));
    assert_eq!(keymap.layer("nav").unwrap()[0], LayoutKey::typed(HELD_TYPE));
    assert_eq!(keymap.layout_hint().unwrap()["zmk_keyboard"], "corne");
}

#[test]
fn test_include_paths_are_searched() {
    let headers = TempDir::new().unwrap();
    fs::create_dir_all(headers.path().join("nested")).unwrap();
    fs::write(headers.path().join("layers.h"), "#include \"nested/ids.h\"\n").unwrap();
    fs::write(headers.path().join("nested/ids.h"), "#define NAV 1\n").unwrap();

    let config = ParseConfig {
        include_paths: vec![headers.path().to_path_buf()],
        ..ParseConfig::default()
    };
    let keymap = ZmkKeymapParser::new(config).unwrap().parse_str(KEYMAP, None).unwrap();
    assert_eq!(keymap.layer("base").unwrap()[0], LayoutKey::tap("nav"));
}

#[test]
fn test_missing_include_passes_through() {
    let output = Preprocessor::default()
        .preprocess("#include <missing.h>\n#define X 2\nvalue = <X>;\n", None)
        .unwrap();
    assert!(!output.contains("#include"));
    assert_eq!(output.trim(), "value = <2>;");
}

#[test]
fn test_recursive_include_is_capped() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("self.h"), "#include \"self.h\"\n").unwrap();
    let source = dir.path().join("main.keymap");
    let result = Preprocessor::default().preprocess("#include \"self.h\"\n", Some(&source));
    assert!(matches!(result, Err(PreprocessError::IncludeDepth { .. })));
}
