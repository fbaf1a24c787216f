// Keydraw Core Library
// Firmware keymap parsing and semantic resolution

pub mod activation;
pub mod behavior;
pub mod binding;
pub mod config;
pub mod dts;
pub mod frontend;
pub mod keymap;
pub mod modifier;
pub mod preprocess;

pub use activation::{ConditionalLayer, LayerActivationTracker};
pub use behavior::{Behavior, BehaviorClass, BehaviorError, BehaviorRegistry};
pub use binding::{
    BindingEvent, BindingRef, BindingResolutionError, BindingResolver, BindingSyntax, KeycodeDialect,
    KeycodeMapper, LayerActivation, LayerBehavior, MAX_BINDING_DEPTH,
};
pub use config::{CombinationConfigError, Config, ConfigError, ModifierFnMap, ModifierFormatter, ParseConfig};
pub use dts::{DeviceTree, DtNode, NodeId, StructuralParseError};
pub use frontend::{KeymapParser, ParseError, QmkJsonParser, ZmkKeymapParser};
pub use keymap::{ComboSpec, KeymapData, LayoutKey, ModelError, ALTERNATE_HELD_TYPE, HELD_TYPE};
pub use modifier::Modifier;
pub use preprocess::{PreprocessError, Preprocessor};
