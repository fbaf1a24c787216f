// Keydraw CLI
// Parses a firmware keymap and writes the normalized keymap as JSON

use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use clap::{ArgGroup, Parser, Subcommand};

#[cfg(feature = "cli")]
use keydraw_core::{Config, KeymapData, KeymapParser, QmkJsonParser, ZmkKeymapParser};

/// Keyboard firmware keymap parser
#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "keydraw")]
#[command(version)]
#[command(about = "Parse firmware keymaps into a normalized JSON keymap", long_about = None)]
struct Args {
    /// TOML configuration file (defaults to ~/.config/keydraw/config.toml if present)
    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[cfg(feature = "cli")]
#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a keymap file
    #[command(group(ArgGroup::new("dialect").required(true).args(["zmk", "qmk"])))]
    Parse {
        /// Device-tree keymap (.keymap)
        #[arg(short = 'z', long)]
        zmk: bool,

        /// JSON keymap export
        #[arg(short = 'q', long)]
        qmk: bool,

        /// Keymap file to parse
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Names replacing the parsed layer names, one per layer
        #[arg(short = 'l', long, num_args = 1..)]
        layer_names: Option<Vec<String>>,

        /// Earlier keymap JSON whose manual edits are kept over the parse
        #[arg(short = 'b', long, value_name = "BASE")]
        base_keymap: Option<PathBuf>,

        /// Split every layer into rows of this many keys
        #[arg(long, value_name = "N")]
        columns: Option<usize>,

        /// Write the JSON here instead of stdout
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
}

#[cfg(feature = "cli")]
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_toml_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Config::load_default().context("failed to load default config"),
    }
}

#[cfg(feature = "cli")]
fn load_base_keymap(path: &PathBuf) -> anyhow::Result<KeymapData> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read base keymap {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to load base keymap {}", path.display()))
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Parse {
            zmk,
            qmk: _,
            file,
            layer_names,
            base_keymap,
            columns,
            output,
        } => {
            let base = base_keymap.as_ref().map(load_base_keymap).transpose()?;
            let parser: Box<dyn KeymapParser> = if zmk {
                let mut parser = ZmkKeymapParser::new(config.parse_config)?;
                if let Some(names) = layer_names {
                    parser = parser.with_layer_names(names);
                }
                if let Some(base) = base {
                    parser = parser.with_base_keymap(base);
                }
                Box::new(parser)
            } else {
                let mut parser = QmkJsonParser::new(config.parse_config)?;
                if let Some(names) = layer_names {
                    parser = parser.with_layer_names(names);
                }
                if let Some(base) = base {
                    parser = parser.with_base_keymap(base);
                }
                Box::new(parser)
            };

            let keymap = parser
                .parse_path(&file)
                .with_context(|| format!("failed to parse {}", file.display()))?;
            log::debug!(
                "Parsed {} layers of {} keys and {} combos",
                keymap.layers().len(),
                keymap.key_count(),
                keymap.combos().len()
            );

            let json = serde_json::to_string_pretty(&keymap.to_json(columns)?)?;
            match output {
                Some(path) => fs::write(&path, json + "\n")
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => writeln!(std::io::stdout().lock(), "{}", json)?,
            }
        }
    }
    Ok(())
}

// Stub for when the cli feature is not enabled
#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("Error: keydraw binary requires the 'cli' feature to be enabled.");
    std::process::exit(1);
}
