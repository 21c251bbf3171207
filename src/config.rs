use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::asm::Constants;
use crate::rom::RomError;

/// Where the image lives in the address space and where free space is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub load_base: Number, // address of image offset 0
    pub free_base: Number, // first free byte, as an address
    pub free_size: Number,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            load_base: Number(0x0800_0000),
            free_base: Number(0x0822_3f4c),
            free_size: Number(0x1860),
        }
    }
}

impl Layout {
    /// Image offset for an absolute address. Addresses below the load base
    /// are not pointers into the image.
    pub fn pointer_to_offset(&self, ptr: u32) -> Result<u32, RomError> {
        ptr.checked_sub(self.load_base.0).ok_or(RomError::NotAPointer(ptr))
    }

    pub fn offset_to_pointer(&self, offset: u32) -> Result<u32, RomError> {
        self.load_base.0.checked_add(offset).ok_or(RomError::NotAnOffset(offset))
    }
}

/// A `u32` that deserializes from a JSON number or a `"0x…"` / decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "NumberRepr", into = "u32")]
pub struct Number(pub u32);

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberRepr {
    Int(u32),
    Text(String),
}

#[derive(Debug)]
pub struct BadNumber(String);

impl fmt::Display for BadNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a valid 32-bit number", self.0)
    }
}

impl TryFrom<NumberRepr> for Number {
    type Error = BadNumber;

    fn try_from(repr: NumberRepr) -> Result<Self, Self::Error> {
        match repr {
            NumberRepr::Int(v) => Ok(Number(v)),
            NumberRepr::Text(s) => parse_number(&s).map(Number).ok_or(BadNumber(s)),
        }
    }
}

impl From<Number> for u32 {
    fn from(n: Number) -> u32 {
        n.0
    }
}

/// `0x`-prefixed hex or plain decimal.
pub fn parse_number(text: &str) -> Option<u32> {
    let t = text.trim();
    match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => t.parse().ok(),
    }
}

/// Seed constants from a JSON object of `name: number` pairs.
pub fn constants_from_json(text: &str) -> Result<Constants, serde_json::Error> {
    let raw: BTreeMap<String, Number> = serde_json::from_str(text)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
}
