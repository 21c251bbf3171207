pub mod alloc;
pub mod asm;
pub mod config;
pub mod disasm;
pub mod error;
pub mod grammar;
pub mod ips;
pub mod patch;
pub mod pp;
pub mod rom;
pub mod stream;
pub mod table;
pub mod token;

pub use alloc::{FreeSpace, Placement, Relocator};
pub use asm::{Assembled, Assembler, Constants};
pub use config::Layout;
pub use error::Error;
pub use grammar::Grammar;
pub use patch::{PatchProducer, PatchSet};
pub use pp::{preprocess, Defines};
pub use rom::Rom;
pub use table::EventTable;

/// Preprocess and assemble one source unit at `base`.
///
/// `defines` starts from the caller's values and collects any `#define`s
/// the source adds.
pub fn assemble_source(
    grammar: &Grammar,
    source: &str,
    base: u32,
    defines: &mut Defines,
    seed: &Constants,
) -> Result<Assembled, Error> {
    let text = preprocess(source, defines)?;
    Ok(Assembler::new(grammar).assemble(&text, base, seed)?)
}
