use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Token {
    /// `.name`
    Label(String),
    /// `%name`
    Symbol(String),
    Keyword(String),
    Number(u32),
    Colon,
    /// Text after the `;`.
    Comment(String),
    Raw(char),
}

bitflags! {
/// Lexical classes, used to describe what an operand slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClass: u8 {
const LABEL = 1 << 0;
const SYMBOL = 1 << 1;
const KEYWORD = 1 << 2;
const NUMBER = 1 << 3;
const COLON = 1 << 4;
}
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Label(name) => write!(f, ".{name}"),
            Token::Symbol(name) => write!(f, "%{name}"),
            Token::Keyword(word) => f.write_str(word),
            Token::Number(n) => write!(f, "{n:#x}"),
            Token::Colon => f.write_str(":"),
            Token::Comment(text) => write!(f, ";{text}"),
            Token::Raw(c) => write!(f, "{c}"),
        }
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| match name {
                "LABEL" => "label",
                "SYMBOL" => "symbol",
                "KEYWORD" => "keyword",
                "NUMBER" => "number",
                "COLON" => "`:`",
                other => other,
            })
            .collect();
        f.write_str(&names.join(" or "))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("line {line}, column {column}: `{sigil}` must be followed by a letter")]
    BadName { line: usize, column: usize, sigil: char },
    #[error("line {line}, column {column}: malformed number `{text}`")]
    BadNumber { line: usize, column: usize, text: String },
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split one source line into tokens. `line_no` is only used for errors.
pub fn tokenize(line: &str, line_no: usize) -> Result<Vec<Token>, LexError> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let run = |from: usize, pred: &dyn Fn(char) -> bool| -> usize {
        let mut end = from;
        while end < chars.len() && pred(chars[end]) {
            end += 1;
        }
        end
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' | '%' => {
                let starts_name = chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic());
                if !starts_name {
                    return Err(LexError::BadName {
                        line: line_no,
                        column: i + 1,
                        sigil: c,
                    });
                }
                let end = run(i + 1, &is_name_char);
                let name: String = chars[i + 1..end].iter().collect();
                tokens.push(if c == '.' { Token::Label(name) } else { Token::Symbol(name) });
                i = end;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Comment(chars[i + 1..].iter().collect()));
                i = chars.len();
            }
            c if c.is_ascii_alphabetic() => {
                let end = run(i, &is_name_char);
                tokens.push(Token::Keyword(chars[i..end].iter().collect()));
                i = end;
            }
            c if c.is_ascii_digit() => {
                let (value, end) = number(&chars, i, line_no)?;
                tokens.push(Token::Number(value));
                i = end;
            }
            other => {
                tokens.push(Token::Raw(other));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

fn number(chars: &[char], start: usize, line_no: usize) -> Result<(u32, usize), LexError> {
    let hex = chars.get(start + 1).is_some_and(|c| *c == 'x' || *c == 'X');
    let (digits_from, radix) = if hex { (start + 2, 16) } else { (start, 10) };
    let mut end = digits_from;
    while end < chars.len() && chars[end].is_digit(radix) {
        end += 1;
    }
    let text: String = chars[start..end].iter().collect();
    let bad = || LexError::BadNumber {
        line: line_no,
        column: start + 1,
        text: text.clone(),
    };
    if hex && chars[start] != '0' {
        return Err(bad());
    }
    let digits: String = chars[digits_from..end].iter().collect();
    let value = u32::from_str_radix(&digits, radix).map_err(|_| bad())?;
    Ok((value, end))
}
