use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use easm_rs::config::{constants_from_json, parse_number};
use easm_rs::{assemble_source, Constants, Defines, Grammar};

#[derive(Parser, Debug)]
#[command(author, version, about = "Assemble an event script into raw event bytes")]
struct Opts {
    /// Absolute address the unit is assembled at
    #[arg(short, long, default_value = "0x08000000", value_parser = parse_addr)]
    base: u32,
    /// Preprocessor define, `NAME` or `NAME=VALUE`
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    define: Vec<String>,
    /// JSON object of seed constants
    #[arg(long, value_name = "JSON")]
    constants: Option<PathBuf>,
    /// Print an address/bytes/mnemonic listing to stdout
    #[arg(long)]
    listing: bool,
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(value_name = "SOURCE")]
    input: PathBuf,
}

fn parse_addr(s: &str) -> Result<u32, String> {
    parse_number(s).ok_or_else(|| format!("`{s}` is not a 32-bit address"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let source = std::fs::read_to_string(&opts.input)
        .with_context(|| format!("reading {}", opts.input.display()))?;

    let mut defines = Defines::new();
    for d in &opts.define {
        let (name, value) = d.split_once('=').unwrap_or((d.as_str(), ""));
        if name.is_empty() {
            bail!("empty define name in `-D {d}`");
        }
        defines.insert(name.to_string(), value.to_string());
    }

    let seed = match &opts.constants {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            constants_from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Constants::new(),
    };

    let grammar = Grammar::builtin()?;
    let unit = assemble_source(&grammar, &source, opts.base, &mut defines, &seed)
        .with_context(|| format!("assembling {}", opts.input.display()))?;
    info!(size = unit.len(), records = unit.records.len(), "done");

    if opts.listing {
        for r in &unit.records {
            let hex: Vec<String> = r.bytes.iter().map(|b| format!("{b:02x}")).collect();
            println!("{:#010x}  {:<36} {}", r.addr, hex.join(" "), r.mnemonic);
        }
    }
    let output = opts.output.unwrap_or_else(|| opts.input.with_extension("bin"));
    std::fs::write(&output, unit.bytes()).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
