//! Mnemonic table and byte templates.
//!
//! Every instruction is described by its operand shape and a textual byte
//! template: hex literal bytes interleaved with slots such as `$0` or
//! `$(u:1)`. Templates are parsed into [`Field`]s once, when they enter a
//! [`Grammar`], so encoding never sees an unknown width tag.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::stream::{OutputStream, StreamError};

/// Written into every label slot until the second pass resolves it.
pub const LABEL_SENTINEL: u32 = 0xffff_ffff;

#[derive(Debug, PartialEq, Eq)]
pub struct CondSet {
    pub name: &'static str,
    pub choices: &'static [(&'static str, u8)],
}

impl CondSet {
    pub fn value_of(&self, word: &str) -> Option<u8> {
        self.choices.iter().find(|(w, _)| *w == word).map(|(_, v)| *v)
    }

    pub fn word_for(&self, value: u8) -> Option<&'static str> {
        self.choices.iter().find(|(_, v)| *v == value).map(|(w, _)| *w)
    }
}

pub const JUMP_COND: CondSet = CondSet {
    name: "condition",
    choices: &[("jz", 0x2), ("jnz", 0x3)],
};

/// Accepted for `check_item`, which always branches on a missing item; the
/// keyword is not encoded.
pub const ITEM_COND: CondSet = CondSet {
    name: "condition",
    choices: &[("jz", 0x2)],
};

pub const TEXT_WINDOW: CondSet = CondSet {
    name: "window",
    choices: &[("top", 0x0), ("bot", 0x1)],
};

pub const DIALOG_CLOSE: CondSet = CondSet {
    name: "close mode",
    choices: &[("auto", 0x0), ("wait", 0x1)],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Symbol or number.
    Value,
    /// One keyword of a fixed set.
    Cond(&'static CondSet),
    Label,
}

impl FromStr for OperandKind {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "value" => Ok(OperandKind::Value),
            "label" => Ok(OperandKind::Label),
            "cond" => Ok(OperandKind::Cond(&JUMP_COND)),
            "window" => Ok(OperandKind::Cond(&TEXT_WINDOW)),
            "close" => Ok(OperandKind::Cond(&DIALOG_CLOSE)),
            other => Err(EncodeError::UnknownOperandKind(other.to_string())),
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandKind::Value => f.write_str("symbol or number"),
            OperandKind::Cond(set) => {
                let words: Vec<&str> = set.choices.iter().map(|(w, _)| *w).collect();
                write!(f, "{} ({})", set.name, words.join("|"))
            }
            OperandKind::Label => f.write_str("label"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstrDesc {
    pub mnemonic: &'static str,
    /// `None` for fixed-byte instructions.
    pub operands: Option<&'static [OperandKind]>,
    pub template: &'static str,
}

const V: OperandKind = OperandKind::Value;
const L: OperandKind = OperandKind::Label;

pub const TABLE: &[InstrDesc] = &[
    InstrDesc {
        mnemonic: "end_event",
        operands: None,
        template: "00 04 ff ff",
    },
    InstrDesc {
        mnemonic: "nop",
        operands: None,
        template: "01 04 ff ff",
    },
    InstrDesc {
        mnemonic: "load_text",
        operands: Some(&[OperandKind::Cond(&TEXT_WINDOW), V]),
        template: "05 08 $(u:1) $0 ff ff ff",
    },
    InstrDesc {
        mnemonic: "close_dialog",
        operands: Some(&[OperandKind::Cond(&DIALOG_CLOSE)]),
        template: "06 04 $0 ff",
    },
    InstrDesc {
        mnemonic: "delay",
        operands: Some(&[V]),
        template: "09 04 $(u:0)",
    },
    InstrDesc {
        mnemonic: "jump",
        operands: Some(&[L]),
        template: "0c 08 ff ff $(U:0)",
    },
    InstrDesc {
        mnemonic: "jump_chest_empty",
        operands: Some(&[L]),
        template: "0d 0c 00 ff $(U:0) 00 00 00 00",
    },
    InstrDesc {
        mnemonic: "music",
        operands: Some(&[V, V]),
        template: "11 08 $0 ff $(u:1) ff ff",
    },
    InstrDesc {
        mnemonic: "set_repeat",
        operands: Some(&[V]),
        template: "19 04 00 $0",
    },
    InstrDesc {
        mnemonic: "repeat",
        operands: Some(&[V, L]),
        template: "19 08 $0 ff $(U:1)",
    },
    InstrDesc {
        mnemonic: "set_npc_pose",
        operands: Some(&[V, V]),
        template: "21 04 $0 $1",
    },
    InstrDesc {
        mnemonic: "show_dialog",
        operands: None,
        template: "27 04 00 ff",
    },
    InstrDesc {
        mnemonic: "set_flag",
        operands: Some(&[V]),
        template: "2d 04 $0 00",
    },
    InstrDesc {
        mnemonic: "check_flag",
        operands: Some(&[V, OperandKind::Cond(&JUMP_COND), L]),
        template: "2d 08 $0 $1 $(U:2)",
    },
    InstrDesc {
        mnemonic: "remove_trigger",
        operands: Some(&[V]),
        template: "2e 04 $(u:0)",
    },
    InstrDesc {
        mnemonic: "npc_update",
        operands: Some(&[V, V]),
        template: "30 04 $0 $1",
    },
    InstrDesc {
        mnemonic: "set_npc_event",
        operands: Some(&[V, V]),
        template: "30 08 01 $0 $(u:1) ff ff",
    },
    InstrDesc {
        mnemonic: "remove_all",
        operands: Some(&[V]),
        template: "36 04 $(u:0)",
    },
    InstrDesc {
        mnemonic: "give_item",
        operands: Some(&[V]),
        template: "37 04 00 $0",
    },
    InstrDesc {
        mnemonic: "take_item",
        operands: Some(&[V]),
        template: "37 04 01 $0",
    },
    InstrDesc {
        mnemonic: "check_item",
        operands: Some(&[V, OperandKind::Cond(&ITEM_COND), L]),
        template: "37 08 02 $0 $(U:2)",
    },
    InstrDesc {
        mnemonic: "jump_by_dir",
        operands: Some(&[L, L, L]),
        template: "42 10 ff ff $(U:0) $(U:1) $(U:2)",
    },
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unrecognized width tag `{0}` (expected x, u or U)")]
    BadWidthTag(char),
    #[error("malformed template item `{0}`")]
    BadTemplateItem(String),
    #[error("template slot refers to operand {index}, but only {count} operands are declared")]
    NoSuchOperand { index: usize, count: usize },
    #[error("label operand {index} needs a 4-byte slot")]
    LabelWidth { index: usize },
    #[error("label operand {index} is not placed in any template slot")]
    UnplacedLabel { index: usize },
    #[error("record is {len} bytes but its length byte says {declared:?}")]
    Framing { len: usize, declared: Option<u8> },
    #[error("value {value:#x} does not fit in {width} byte(s)")]
    FieldOverflow { value: u32, width: u8 },
    #[error("unknown operand kind `{0}`")]
    UnknownOperandKind(String),
    #[error("mnemonic `{0}` is already defined")]
    DuplicateMnemonic(String),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl Width {
    pub fn from_tag(tag: char) -> Result<Self, EncodeError> {
        match tag {
            'x' => Ok(Width::Byte),
            'u' => Ok(Width::Half),
            'U' => Ok(Width::Word),
            other => Err(EncodeError::BadWidthTag(other)),
        }
    }

    pub fn bytes(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Lit(u8),
    Slot { operand: usize, width: Width },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    fields: Vec<Field>,
}

impl Template {
    /// Parse template text for an instruction with the given operand shape.
    ///
    /// A bare `$N` slot is one byte wide for values and four for labels.
    pub fn parse(text: &str, operands: &[OperandKind]) -> Result<Self, EncodeError> {
        let mut fields = Vec::new();
        for item in text.split_whitespace() {
            let field = match item.strip_prefix('$') {
                None => {
                    let hex = item.trim_start_matches("0x");
                    let byte = u8::from_str_radix(hex, 16)
                        .map_err(|_| EncodeError::BadTemplateItem(item.to_string()))?;
                    Field::Lit(byte)
                }
                Some(slot) => {
                    let (tag, index) = match slot.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
                        Some(inner) => {
                            let (tag, index) = inner
                                .split_once(':')
                                .ok_or_else(|| EncodeError::BadTemplateItem(item.to_string()))?;
                            let mut tag_chars = tag.chars();
                            let (Some(tag), None) = (tag_chars.next(), tag_chars.next()) else {
                                return Err(EncodeError::BadTemplateItem(item.to_string()));
                            };
                            (Some(Width::from_tag(tag)?), index)
                        }
                        None => (None, slot),
                    };
                    let operand: usize = index
                        .parse()
                        .map_err(|_| EncodeError::BadTemplateItem(item.to_string()))?;
                    let kind = operands.get(operand).ok_or(EncodeError::NoSuchOperand {
                        index: operand,
                        count: operands.len(),
                    })?;
                    let width = match (kind, tag) {
                        (OperandKind::Label, None | Some(Width::Word)) => Width::Word,
                        (OperandKind::Label, Some(_)) => {
                            return Err(EncodeError::LabelWidth { index: operand })
                        }
                        (_, Some(w)) => w,
                        (_, None) => Width::Byte,
                    };
                    Field::Slot { operand, width }
                }
            };
            fields.push(field);
        }

        for (index, kind) in operands.iter().enumerate() {
            let placed = fields
                .iter()
                .any(|f| matches!(f, Field::Slot { operand, .. } if *operand == index));
            if *kind == OperandKind::Label && !placed {
                return Err(EncodeError::UnplacedLabel { index });
            }
        }

        let template = Template { fields };
        let declared = match template.fields.get(1) {
            Some(Field::Lit(b)) => Some(*b),
            _ => None,
        };
        if declared.map(usize::from) != Some(template.len()) {
            return Err(EncodeError::Framing {
                len: template.len(),
                declared,
            });
        }
        Ok(template)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Encoded size; independent of operand values.
    pub fn len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| match f {
                Field::Lit(_) => 1,
                Field::Slot { width, .. } => width.bytes(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Resolved operand value handed to the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Value(u32),
    Label(String),
}

/// A label slot waiting for the second pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixup {
    /// Byte offset of the slot from the start of the output stream.
    pub offset: usize,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct InstrDef {
    pub mnemonic: String,
    pub operands: Option<Vec<OperandKind>>,
    pub template: Template,
}

impl InstrDef {
    pub fn new(
        mnemonic: &str,
        operands: Option<Vec<OperandKind>>,
        template: &str,
    ) -> Result<Self, EncodeError> {
        let template = Template::parse(template, operands.as_deref().unwrap_or(&[]))?;
        Ok(Self {
            mnemonic: mnemonic.to_string(),
            operands,
            template,
        })
    }

    /// Append this instruction to `out`; label slots get the sentinel and a fixup.
    pub fn encode(&self, args: &[Arg], out: &mut OutputStream) -> Result<Vec<Fixup>, EncodeError> {
        let mut fixups = Vec::new();
        for field in self.template.fields() {
            let (operand, width) = match field {
                Field::Lit(b) => {
                    out.put_u8(*b);
                    continue;
                }
                Field::Slot { operand, width } => (*operand, *width),
            };
            let arg = args.get(operand).ok_or(EncodeError::NoSuchOperand {
                index: operand,
                count: args.len(),
            })?;
            match (arg, width) {
                (Arg::Label(label), _) => {
                    fixups.push(Fixup {
                        offset: out.len(),
                        label: label.clone(),
                    });
                    out.put_u32(LABEL_SENTINEL)?;
                }
                (Arg::Value(v), Width::Byte) => {
                    let b = u8::try_from(*v).map_err(|_| EncodeError::FieldOverflow { value: *v, width: 1 })?;
                    out.put_u8(b);
                }
                (Arg::Value(v), Width::Half) => {
                    let h = u16::try_from(*v).map_err(|_| EncodeError::FieldOverflow { value: *v, width: 2 })?;
                    out.put_u16(h)?;
                }
                (Arg::Value(v), Width::Word) => out.put_u32(*v)?,
            }
        }
        Ok(fixups)
    }
}

/// Mnemonic lookup for one assembler configuration.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    defs: HashMap<String, InstrDef>,
}

impl Grammar {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in event instruction set.
    pub fn builtin() -> Result<Self, EncodeError> {
        let mut g = Self::empty();
        for desc in TABLE {
            g.define(desc.mnemonic, desc.operands.map(<[OperandKind]>::to_vec), desc.template)?;
        }
        Ok(g)
    }

    pub fn define(
        &mut self,
        mnemonic: &str,
        operands: Option<Vec<OperandKind>>,
        template: &str,
    ) -> Result<(), EncodeError> {
        if self.defs.contains_key(mnemonic) || mnemonic == "db" {
            return Err(EncodeError::DuplicateMnemonic(mnemonic.to_string()));
        }
        let def = InstrDef::new(mnemonic, operands, template)?;
        self.defs.insert(mnemonic.to_string(), def);
        Ok(())
    }

    pub fn get(&self, mnemonic: &str) -> Option<&InstrDef> {
        self.defs.get(mnemonic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstrDef> {
        self.defs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_well_framed() {
        let g = Grammar::builtin().unwrap();
        for desc in TABLE {
            let def = g.get(desc.mnemonic).unwrap();
            assert_eq!(def.template.len() % 4, 0, "{} keeps word alignment", desc.mnemonic);
        }
    }

    #[test]
    fn explicit_widths_emit_little_endian() {
        let def = InstrDef::new("music", Some(vec![V, V]), "11 08 $0 ff $(u:1) ff ff").unwrap();
        let mut out = OutputStream::new(0);
        def.encode(&[Arg::Value(0), Arg::Value(0x1234)], &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0x11, 0x08, 0x00, 0xff, 0x34, 0x12, 0xff, 0xff]);

        let def = InstrDef::new("wide", Some(vec![V, V]), "11 08 $0 ff $(U:1)").unwrap();
        let mut out = OutputStream::new(0);
        def.encode(&[Arg::Value(0), Arg::Value(0x1234_5678)], &mut out).unwrap();
        assert_eq!(out.as_bytes(), &[0x11, 0x08, 0x00, 0xff, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn unknown_width_tag_is_rejected() {
        let err = InstrDef::new("bad", Some(vec![V]), "11 04 $(q:0) ff").unwrap_err();
        assert_eq!(err, EncodeError::BadWidthTag('q'));
    }

    #[test]
    fn label_in_short_slot_is_rejected() {
        let err = InstrDef::new("bad", Some(vec![L]), "0c 08 ff ff $(u:0) ff ff").unwrap_err();
        assert_eq!(err, EncodeError::LabelWidth { index: 0 });
    }

    #[test]
    fn every_label_needs_a_slot() {
        let err = InstrDef::new("mark", Some(vec![L]), "7e 04 ff ff").unwrap_err();
        assert_eq!(err, EncodeError::UnplacedLabel { index: 0 });
        // unencoded value and keyword operands are fine
        assert!(InstrDef::new("skip", Some(vec![V, L]), "7e 08 ff ff $1").is_ok());
    }

    #[test]
    fn length_byte_must_match_template() {
        let err = InstrDef::new("bad", None, "01 08 ff ff").unwrap_err();
        assert_eq!(err, EncodeError::Framing { len: 4, declared: Some(8) });
    }

    #[test]
    fn byte_slot_overflow() {
        let def = InstrDef::new("set_flag", Some(vec![V]), "2d 04 $0 00").unwrap();
        let mut out = OutputStream::new(0);
        let err = def.encode(&[Arg::Value(0x100)], &mut out).unwrap_err();
        assert_eq!(err, EncodeError::FieldOverflow { value: 0x100, width: 1 });
    }
}
