use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use easm_patch::{build, Manifest};
use easm_rs::config::{parse_number, Number};
use easm_rs::disasm::Disassembler;
use easm_rs::ips::IpsFile;
use easm_rs::{Grammar, Layout, PatchProducer, PatchSet, Rom};

#[derive(Parser, Debug)]
#[command(author, version, about = "Event relocation and ROM patching", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the image a manifest describes and print a JSON summary
    Build {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
        /// Pretty-print the summary
        #[arg(long)]
        pretty: bool,
    },
    /// Apply IPS files to an image
    Apply {
        rom: PathBuf,
        #[arg(required = true, num_args = 1..)]
        ips: Vec<PathBuf>,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Disassemble the event at an image offset
    Dis {
        rom: PathBuf,
        /// Image offset of the event (hex or dec)
        #[arg(long, value_parser = parse_u32)]
        offset: u32,
        /// Address of image offset 0
        #[arg(long, default_value = "0x08000000", value_parser = parse_u32)]
        load_base: u32,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    parse_number(s).ok_or_else(|| format!("`{s}` is not a 32-bit number"))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Build { manifest, pretty } => {
            let manifest = Manifest::load(&manifest)?;
            let report = build(&manifest)?;
            let json = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{json}");
        }
        Command::Apply { rom, ips, output } => {
            let base = Rom::new(read(&rom)?);
            let mut patches = PatchSet::new();
            let mut seen = BTreeSet::new();
            for path in ips {
                if !seen.insert(path.clone()) {
                    continue;
                }
                let file = IpsFile::parse(&path.display().to_string(), &read(&path)?)?;
                file.emit(&mut patches)?;
            }
            let patched = base.apply_patches(&patches)?;
            std::fs::write(&output, patched.as_bytes())
                .with_context(|| format!("writing {}", output.display()))?;
            println!("{} patches, {} bytes -> {}", patches.len(), patches.total_bytes(), output.display());
        }
        Command::Dis { rom, offset, load_base } => {
            let rom = Rom::new(read(&rom)?);
            let layout = Layout {
                load_base: Number(load_base),
                ..Layout::default()
            };
            let size = rom.event_size(offset)?;
            let addr = layout.offset_to_pointer(offset)?;
            let bytes = &rom.as_bytes()[offset as usize..offset as usize + size];
            let grammar = Grammar::builtin()?;
            print!("{}", Disassembler::new(&grammar).disassemble(bytes, addr)?);
        }
    }
    Ok(())
}
