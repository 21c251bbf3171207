//! Event source preprocessor.
//!
//! Flat `#define` substitution plus `#ifdef`/`#ifndef`/`#else`/`#endif`
//! blocks with strict nesting. Directive lines and lines inside disabled
//! blocks come out blank, so line N of the output is line N of the input
//! (multi-line macro values aside).

use std::collections::BTreeMap;

use tracing::{debug, warn};

/// Macro table: name to verbatim replacement text.
pub type Defines = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PpError {
    #[error("line {line}: `{directive}` without an open #ifdef/#ifndef")]
    Unbalanced { directive: &'static str, line: usize },
    #[error("line {line}: second #else in the block opened on line {opened}")]
    DuplicateElse { line: usize, opened: usize },
    #[error("end of input inside the block opened on line {opened}: {text}")]
    Unterminated { opened: usize, text: String },
    #[error("line {line}: malformed directive: {text}")]
    Malformed { line: usize, text: String },
    #[error("line {line}: unknown directive `{directive}`")]
    UnknownDirective { line: usize, directive: String },
}

struct Frame {
    opened: usize,
    text: String,
    /// Whether the enclosing context was emitting when this block opened.
    outer: bool,
    cond: bool,
    seen_else: bool,
}

impl Frame {
    fn emitting(&self) -> bool {
        self.outer && (self.cond != self.seen_else)
    }
}

/// Run the preprocessor over `source`. Definitions found in enabled regions
/// are added to `defines`, which the caller owns and may reuse.
pub fn preprocess(source: &str, defines: &mut Defines) -> Result<String, PpError> {
    let lines: Vec<&str> = source.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut stack: Vec<Frame> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line_no = i + 1;
        let line = lines[i].trim();
        let emitting = stack.last().map_or(true, Frame::emitting);
        i += 1;

        if !line.starts_with('#') {
            out.push(if emitting { substitute(line, defines) } else { String::new() });
            continue;
        }

        let mut words = line.split_whitespace();
        let directive = words.next().unwrap_or("#");
        match directive {
            "#ifdef" | "#ifndef" => {
                let name = words.next().ok_or_else(|| PpError::Malformed {
                    line: line_no,
                    text: line.to_string(),
                })?;
                let defined = defines.contains_key(name);
                stack.push(Frame {
                    opened: line_no,
                    text: line.to_string(),
                    outer: emitting,
                    cond: if directive == "#ifdef" { defined } else { !defined },
                    seen_else: false,
                });
            }
            "#else" => {
                let frame = stack.last_mut().ok_or(PpError::Unbalanced {
                    directive: "#else",
                    line: line_no,
                })?;
                if frame.seen_else {
                    return Err(PpError::DuplicateElse {
                        line: line_no,
                        opened: frame.opened,
                    });
                }
                frame.seen_else = true;
            }
            "#endif" => {
                stack.pop().ok_or(PpError::Unbalanced {
                    directive: "#endif",
                    line: line_no,
                })?;
            }
            "#define" => {
                let name = words.next().ok_or_else(|| PpError::Malformed {
                    line: line_no,
                    text: line.to_string(),
                })?;
                let mut value = define_value(line, name).to_string();
                while let Some(head) = value.strip_suffix('\\') {
                    let Some(next) = lines.get(i) else {
                        value = head.to_string();
                        break;
                    };
                    value = format!("{head}\n{}", next.trim());
                    out.push(String::new());
                    i += 1;
                }
                if emitting {
                    debug!(name, value = %value, "define");
                    if defines.insert(name.to_string(), value).is_some() {
                        warn!(name, line = line_no, "macro redefined");
                    }
                }
            }
            other => {
                return Err(PpError::UnknownDirective {
                    line: line_no,
                    directive: other.to_string(),
                })
            }
        }
        out.push(String::new());
    }

    if let Some(frame) = stack.pop() {
        return Err(PpError::Unterminated {
            opened: frame.opened,
            text: frame.text,
        });
    }
    Ok(out.join("\n"))
}

/// Everything after the macro name, verbatim apart from the one separating space.
fn define_value<'a>(line: &'a str, name: &str) -> &'a str {
    let after_directive = line["#define".len()..].trim_start();
    let rest = &after_directive[name.len()..];
    rest.strip_prefix(|c: char| c.is_whitespace()).unwrap_or(rest)
}

fn substitute(line: &str, defines: &Defines) -> String {
    line.split_whitespace()
        .map(|word| defines.get(word).map(String::as_str).unwrap_or(word))
        .collect::<Vec<_>>()
        .join(" ")
}
