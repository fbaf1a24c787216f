// Keydraw Config API
// Parse settings, keycode tables and modifier display configuration

pub mod modifier_fn;
pub mod parse_config;

pub use modifier_fn::{CombinationConfigError, ModifierFnMap, ModifierFormatter};
pub use parse_config::{Config, ConfigError, ParseConfig};
