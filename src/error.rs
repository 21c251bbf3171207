use crate::alloc::AllocError;
use crate::asm::AsmError;
use crate::disasm::DisasmError;
use crate::grammar::EncodeError;
use crate::ips::IpsError;
use crate::pp::PpError;
use crate::rom::{PatchError, RomError};
use crate::stream::StreamError;
use crate::table::TableError;
use crate::token::LexError;

/// Any failure of a build run.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Preprocess(#[from] PpError),
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Asm(#[from] AsmError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Rom(#[from] RomError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Ips(#[from] IpsError),
    #[error(transparent)]
    Disasm(#[from] DisasmError),
    #[error("unit `{unit}`: {source}")]
    Unit {
        unit: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the name of the unit being built.
    pub fn in_unit(self, unit: &str) -> Self {
        Error::Unit {
            unit: unit.to_string(),
            source: Box::new(self),
        }
    }
}
