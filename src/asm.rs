//! Two-pass event assembler.
//!
//! Pass 1 walks the source once, recording labels and constants and encoding
//! every instruction with its label slots reserved. Template sizes never
//! depend on label values, so every address is final once pass 1 ends.
//! Pass 2 fills the reserved slots.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::grammar::{Arg, EncodeError, Fixup, Grammar, OperandKind};
use crate::stream::OutputStream;
use crate::token::{tokenize, LexError, Token, TokenClass};

/// Named integer constants, as seeded by the caller.
pub type Constants = BTreeMap<String, u32>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("line {line_no}: unexpected {token}, expected {expected}: {line}")]
    Syntax {
        token: String,
        expected: String,
        line: String,
        line_no: usize,
    },
    #[error("line {line_no}: `{name}` is already defined: {line}")]
    DuplicateSymbol {
        name: String,
        line: String,
        line_no: usize,
    },
    #[error("line {line_no}: undefined symbol `%{name}`: {line}")]
    UndefinedSymbol {
        name: String,
        line: String,
        line_no: usize,
    },
    #[error("undefined label `.{label}` (referenced on line {line_no})")]
    UndefinedLabel { label: String, line_no: usize },
    #[error("line {line_no}: {source}: {line}")]
    Encode {
        line: String,
        line_no: usize,
        #[source]
        source: EncodeError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symbol {
    /// Absolute address.
    Label(u32),
    Constant(u32),
}

/// Write-once name table for one assembly run.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn seeded(constants: &Constants) -> Self {
        let entries = constants
            .iter()
            .map(|(k, v)| (k.clone(), Symbol::Constant(*v)))
            .collect();
        Self { entries }
    }

    /// Returns `false` if the name was already taken.
    pub fn define(&mut self, name: &str, sym: Symbol) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(name.to_string(), sym);
        true
    }

    pub fn constant(&self, name: &str) -> Option<u32> {
        match self.entries.get(name) {
            Some(Symbol::Constant(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn label(&self, name: &str) -> Option<u32> {
        match self.entries.get(name) {
            Some(Symbol::Label(addr)) => Some(*addr),
            _ => None,
        }
    }

    pub fn labels(&self) -> BTreeMap<String, u32> {
        self.entries
            .iter()
            .filter_map(|(name, sym)| match sym {
                Symbol::Label(addr) => Some((name.clone(), *addr)),
                Symbol::Constant(_) => None,
            })
            .collect()
    }
}

/// One encoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub addr: u32,
    pub line_no: usize,
    pub mnemonic: String,
    pub bytes: Vec<u8>,
}

/// A contiguous assembled unit anchored at `base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assembled {
    pub base: u32,
    pub records: Vec<Record>,
    pub labels: BTreeMap<String, u32>,
}

impl Assembled {
    pub fn bytes(&self) -> Vec<u8> {
        self.records.iter().flat_map(|r| r.bytes.iter().copied()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.iter().map(|r| r.bytes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct Pending<'s> {
    line: &'s str,
    line_no: usize,
    fixup: Fixup,
}

pub struct Assembler<'g> {
    grammar: &'g Grammar,
}

impl<'g> Assembler<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self { grammar }
    }

    /// Assemble preprocessed `source` as one unit starting at `base`.
    pub fn assemble(&self, source: &str, base: u32, seed: &Constants) -> Result<Assembled, AsmError> {
        let mut symbols = SymbolTable::seeded(seed);
        let mut out = OutputStream::new(base);
        let mut spans: Vec<(usize, usize, usize, String)> = Vec::new();
        let mut pending: Vec<Pending> = Vec::new();

        // Pass 1
        for (idx, line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let tokens = tokenize(line, line_no)?;
            let code = match tokens.split_last() {
                Some((Token::Comment(_), rest)) => rest,
                _ => &tokens[..],
            };
            let cx = LineCx { line, line_no };

            match code {
                [] => {}
                [Token::Label(name), rest @ ..] => {
                    let addr = match rest {
                        [Token::Colon] => out.current_addr(),
                        [value] => cx.value(value, &symbols, definition_class())?,
                        [] => return Err(cx.syntax("end of line", definition_class())),
                        [_, extra, ..] => return Err(cx.syntax(extra, "end of line")),
                    };
                    trace!(label = %name, addr = format_args!("{addr:#010x}"), "label");
                    cx.define(&mut symbols, name, Symbol::Label(addr))?;
                }
                [Token::Symbol(name), rest @ ..] => {
                    let value = match rest {
                        [value] => cx.value(value, &symbols, OperandKind::Value)?,
                        [] => return Err(cx.syntax("end of line", OperandKind::Value)),
                        [_, extra, ..] => return Err(cx.syntax(extra, "end of line")),
                    };
                    cx.define(&mut symbols, name, Symbol::Constant(value))?;
                }
                [Token::Keyword(mnemonic), operands @ ..] => {
                    let start = out.len();
                    if mnemonic == "db" {
                        cx.raw_bytes(operands, &symbols, &mut out)?;
                    } else {
                        let def = self
                            .grammar
                            .get(mnemonic)
                            .ok_or_else(|| cx.syntax(&format!("`{mnemonic}`"), "a known mnemonic"))?;
                        let kinds = def.operands.as_deref().unwrap_or(&[]);
                        let mut args = Vec::with_capacity(kinds.len());
                        for (i, kind) in kinds.iter().enumerate() {
                            let tok = operands.get(i).ok_or_else(|| cx.syntax("end of line", kind))?;
                            args.push(cx.arg(*kind, tok, &symbols)?);
                        }
                        if let Some(extra) = operands.get(kinds.len()) {
                            return Err(cx.syntax(extra, "end of line"));
                        }
                        let fixups = def.encode(&args, &mut out).map_err(|e| cx.encode(e))?;
                        pending.extend(fixups.into_iter().map(|fixup| Pending { line, line_no, fixup }));
                    }
                    spans.push((start, out.len(), line_no, mnemonic.clone()));
                }
                [other, ..] => {
                    return Err(cx.syntax(other, line_start_class()));
                }
            }
        }

        // Pass 2
        for Pending { line, line_no, fixup } in pending {
            let addr = symbols.label(&fixup.label).ok_or_else(|| AsmError::UndefinedLabel {
                label: fixup.label.clone(),
                line_no,
            })?;
            let cx = LineCx { line, line_no };
            out.patch_u32(fixup.offset, addr).map_err(|e| cx.encode(e.into()))?;
        }

        let bytes = out.as_bytes();
        let records = spans
            .into_iter()
            .map(|(start, end, line_no, mnemonic)| Record {
                addr: base.wrapping_add(start as u32),
                line_no,
                mnemonic,
                bytes: bytes[start..end].to_vec(),
            })
            .collect::<Vec<_>>();
        debug!(
            base = format_args!("{base:#010x}"),
            size = out.len(),
            records = records.len(),
            "assembled unit"
        );
        Ok(Assembled {
            base,
            records,
            labels: symbols.labels(),
        })
    }
}

fn definition_class() -> TokenClass {
    TokenClass::COLON | TokenClass::NUMBER | TokenClass::SYMBOL
}

/// Tokens that may open a line.
fn line_start_class() -> TokenClass {
    TokenClass::KEYWORD | TokenClass::LABEL | TokenClass::SYMBOL
}

/// Error-building context for the line being assembled.
struct LineCx<'a> {
    line: &'a str,
    line_no: usize,
}

impl LineCx<'_> {
    fn syntax(&self, token: impl std::fmt::Display, expected: impl std::fmt::Display) -> AsmError {
        AsmError::Syntax {
            token: token.to_string(),
            expected: expected.to_string(),
            line: self.line.trim().to_string(),
            line_no: self.line_no,
        }
    }

    fn encode(&self, source: EncodeError) -> AsmError {
        AsmError::Encode {
            line: self.line.trim().to_string(),
            line_no: self.line_no,
            source,
        }
    }

    fn define(&self, symbols: &mut SymbolTable, name: &str, sym: Symbol) -> Result<(), AsmError> {
        if !symbols.define(name, sym) {
            return Err(AsmError::DuplicateSymbol {
                name: name.to_string(),
                line: self.line.trim().to_string(),
                line_no: self.line_no,
            });
        }
        Ok(())
    }

    /// Number or previously defined constant.
    fn value(
        &self,
        tok: &Token,
        symbols: &SymbolTable,
        expected: impl std::fmt::Display,
    ) -> Result<u32, AsmError> {
        match tok {
            Token::Number(n) => Ok(*n),
            Token::Symbol(name) => symbols.constant(name).ok_or_else(|| AsmError::UndefinedSymbol {
                name: name.clone(),
                line: self.line.trim().to_string(),
                line_no: self.line_no,
            }),
            other => Err(self.syntax(other, expected)),
        }
    }

    fn arg(&self, kind: OperandKind, tok: &Token, symbols: &SymbolTable) -> Result<Arg, AsmError> {
        match (kind, tok) {
            (OperandKind::Value, _) => Ok(Arg::Value(self.value(tok, symbols, kind)?)),
            (OperandKind::Cond(set), Token::Keyword(word)) => set
                .value_of(word)
                .map(|v| Arg::Value(v.into()))
                .ok_or_else(|| self.syntax(tok, kind)),
            (OperandKind::Label, Token::Label(name)) => Ok(Arg::Label(name.clone())),
            _ => Err(self.syntax(tok, kind)),
        }
    }

    /// `db` payload: at least opcode and length, with a truthful length byte.
    fn raw_bytes(
        &self,
        operands: &[Token],
        symbols: &SymbolTable,
        out: &mut OutputStream,
    ) -> Result<(), AsmError> {
        let mut bytes = Vec::with_capacity(operands.len());
        for tok in operands {
            let v = self.value(tok, symbols, "a byte value")?;
            let b = u8::try_from(v).map_err(|_| self.encode(EncodeError::FieldOverflow { value: v, width: 1 }))?;
            bytes.push(b);
        }
        let declared = bytes.get(1).copied();
        if declared.map(usize::from) != Some(bytes.len()) {
            return Err(self.encode(EncodeError::Framing {
                len: bytes.len(),
                declared,
            }));
        }
        out.put_bytes(&bytes);
        Ok(())
    }
}
