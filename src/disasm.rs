//! Event disassembler.
//!
//! Records are matched against the grammar's templates. Records no
//! template explains, or whose slots would be misaligned when assembled
//! again, are printed as `db`. The listing re-assembles to the same bytes
//! at the same base.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::grammar::{Field, Grammar, InstrDef, OperandKind, Width};
use crate::stream::InputStream;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DisasmError {
    #[error("record at {addr:#010x} has length byte {len} with {remaining} bytes left")]
    BadRecord { addr: u32, len: u8, remaining: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Value(u32),
    Word(&'static str),
    Target(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub addr: u32,
    pub mnemonic: String,
    operands: Vec<Operand>,
}

pub fn label_name(addr: u32) -> String {
    format!("L{addr:08X}")
}

impl Line {
    pub fn targets(&self) -> impl Iterator<Item = u32> + '_ {
        self.operands.iter().filter_map(|op| match op {
            Operand::Target(addr) => Some(*addr),
            _ => None,
        })
    }

    pub fn text(&self) -> String {
        let mut s = self.mnemonic.clone();
        for op in &self.operands {
            s.push(' ');
            match op {
                Operand::Value(v) => {
                    let _ = write!(s, "{v:#x}");
                }
                Operand::Word(w) => s.push_str(w),
                Operand::Target(addr) => {
                    let _ = write!(s, ".{}", label_name(*addr));
                }
            }
        }
        s
    }
}

pub struct Disassembler<'g> {
    // Most specific template first, then by name.
    defs: Vec<&'g InstrDef>,
}

impl<'g> Disassembler<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        let mut defs: Vec<&InstrDef> = grammar.iter().collect();
        let literals = |d: &InstrDef| {
            d.template
                .fields()
                .iter()
                .filter(|f| matches!(f, Field::Lit(_)))
                .count()
        };
        defs.sort_by(|a, b| literals(b).cmp(&literals(a)).then_with(|| a.mnemonic.cmp(&b.mnemonic)));
        Self { defs }
    }

    /// Decode one record placed at `addr`.
    pub fn decode(&self, record: &[u8], addr: u32) -> Line {
        self.defs
            .iter()
            .find_map(|def| matches_def(def, record, addr))
            .unwrap_or_else(|| Line {
                addr,
                mnemonic: "db".to_string(),
                operands: record.iter().map(|b| Operand::Value(u32::from(*b))).collect(),
            })
    }

    /// Split `bytes` into records and decode each one.
    pub fn lines(&self, bytes: &[u8], base: u32) -> Result<Vec<Line>, DisasmError> {
        let mut s = InputStream::unaligned(bytes);
        let mut lines = Vec::new();
        while !s.is_eos() {
            let at = s.position();
            let addr = base.wrapping_add(at as u32);
            let remaining = bytes.len() - at;
            let len = bytes.get(at + 1).copied().unwrap_or(0);
            let record = match s.get_bytes(usize::from(len)) {
                Ok(r) if len >= 2 => r,
                _ => return Err(DisasmError::BadRecord { addr, len, remaining }),
            };
            lines.push(self.decode(record, addr));
        }
        Ok(lines)
    }

    /// Source text for the unit at `base`.
    pub fn disassemble(&self, bytes: &[u8], base: u32) -> Result<String, DisasmError> {
        let lines = self.lines(bytes, base)?;
        let end = base.wrapping_add(bytes.len() as u32);
        let starts: BTreeSet<u32> = lines.iter().map(|l| l.addr).chain([end]).collect();
        let targets: BTreeSet<u32> = lines.iter().flat_map(Line::targets).collect();

        let mut out = String::new();
        for t in targets.iter().filter(|t| !starts.contains(t)) {
            let _ = writeln!(out, ".{} {t:#x}", label_name(*t));
        }
        for line in &lines {
            if targets.contains(&line.addr) {
                let _ = writeln!(out, ".{}:", label_name(line.addr));
            }
            let _ = writeln!(out, "    {}", line.text());
        }
        if targets.contains(&end) {
            let _ = writeln!(out, ".{}:", label_name(end));
        }
        Ok(out)
    }
}

fn matches_def(def: &InstrDef, record: &[u8], addr: u32) -> Option<Line> {
    if def.template.len() != record.len() {
        return None;
    }
    let kinds = def.operands.as_deref().unwrap_or(&[]);
    let mut values: Vec<Option<u32>> = vec![None; kinds.len()];
    let mut s = InputStream::unaligned(record);
    for field in def.template.fields() {
        match *field {
            Field::Lit(b) => {
                if s.get_u8().ok()? != b {
                    return None;
                }
            }
            Field::Slot { operand, width } => {
                let slot_addr = addr.wrapping_add(s.position() as u32);
                if slot_addr % width.bytes() as u32 != 0 {
                    return None;
                }
                let v = match width {
                    Width::Byte => u32::from(s.get_u8().ok()?),
                    Width::Half => u32::from(s.get_u16().ok()?),
                    Width::Word => s.get_u32().ok()?,
                };
                match values.get_mut(operand)? {
                    Some(prev) if *prev != v => return None,
                    slot => *slot = Some(v),
                }
            }
        }
    }

    let mut operands = Vec::with_capacity(kinds.len());
    // Operands without a slot do not affect the bytes; any spelling works.
    for (kind, v) in kinds.iter().zip(values) {
        operands.push(match (kind, v) {
            (OperandKind::Value, v) => Operand::Value(v.unwrap_or(0)),
            (OperandKind::Cond(set), Some(v)) => Operand::Word(set.word_for(u8::try_from(v).ok()?)?),
            (OperandKind::Cond(set), None) => Operand::Word(set.choices.first()?.0),
            (OperandKind::Label, v) => Operand::Target(v?),
        });
    }
    Some(Line {
        addr,
        mnemonic: def.mnemonic.clone(),
        operands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_record_falls_back_to_db() {
        let g = Grammar::builtin().unwrap();
        let dis = Disassembler::new(&g);
        let line = dis.decode(&[0x7f, 0x04, 0x01, 0x02], 0x0800_0000);
        assert_eq!(line.text(), "db 0x7f 0x4 0x1 0x2");
    }

    #[test]
    fn cond_values_outside_set_fall_back() {
        let g = Grammar::builtin().unwrap();
        let dis = Disassembler::new(&g);
        let rec = [0x2d, 0x08, 0x09, 0x02, 0x14, 0x00, 0x00, 0x08];
        assert_eq!(dis.decode(&rec, 0x0800_0000).text(), "check_flag 0x9 jz .L08000014");
        let rec = [0x2d, 0x08, 0x09, 0x07, 0x14, 0x00, 0x00, 0x08];
        assert_eq!(dis.decode(&rec, 0x0800_0000).mnemonic, "db");
    }

    #[test]
    fn unencoded_keyword_is_still_printed() {
        let g = Grammar::builtin().unwrap();
        let dis = Disassembler::new(&g);
        let rec = [0x37, 0x08, 0x02, 0x05, 0x10, 0x00, 0x00, 0x08];
        assert_eq!(dis.decode(&rec, 0x0800_0000).text(), "check_item 0x5 jz .L08000010");
    }

    #[test]
    fn zero_length_record_is_an_error() {
        let g = Grammar::builtin().unwrap();
        let dis = Disassembler::new(&g);
        assert_eq!(
            dis.lines(&[0x01, 0x04, 0xff, 0xff, 0x05, 0x00], 0x100),
            Err(DisasmError::BadRecord { addr: 0x104, len: 0, remaining: 2 })
        );
    }
}
