use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use easm_rs::config::{Layout, Number};
use easm_rs::grammar::{Grammar, OperandKind};
use easm_rs::Constants;

/// A build description, read from JSON. Relative paths are resolved
/// against the manifest's directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub rom: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub layout: Layout,
    /// Prepended to every event source, in order.
    #[serde(default)]
    pub headers: Vec<PathBuf>,
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    #[serde(default)]
    pub constants: BTreeMap<String, Number>,
    pub tables: Vec<TableSpec>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    #[serde(default)]
    pub ips: Vec<PathBuf>,
    #[serde(default)]
    pub mnemonics: Vec<MnemonicSpec>,
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub name: String,
    pub offset: Number,
    pub count: Number,
    #[serde(default)]
    pub base_id: Number,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSpec {
    pub table: String,
    pub id: Number,
    pub source: PathBuf,
    /// Bytes available in place; measured from the image when absent.
    #[serde(default)]
    pub capacity: Option<Number>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MnemonicSpec {
    pub name: String,
    #[serde(default)]
    pub operands: Option<Vec<String>>,
    pub template: String,
}

impl Manifest {
    pub fn from_json(text: &str, root: &Path) -> Result<Self> {
        let mut m: Manifest = serde_json::from_str(text)?;
        m.root = root.to_path_buf();
        Ok(m)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        Self::from_json(&text, &root).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn resolve(&self, p: &Path) -> PathBuf {
        self.root.join(p)
    }

    pub fn constants(&self) -> Constants {
        self.constants.iter().map(|(k, v)| (k.clone(), v.0)).collect()
    }

    /// Built-in mnemonics plus the manifest's own.
    pub fn grammar(&self) -> Result<Grammar> {
        let mut g = Grammar::builtin()?;
        for m in &self.mnemonics {
            let operands = m
                .operands
                .as_ref()
                .map(|ops| ops.iter().map(|o| o.parse::<OperandKind>()).collect::<Result<Vec<_>, _>>())
                .transpose()
                .with_context(|| format!("mnemonic `{}`", m.name))?;
            g.define(&m.name, operands, &m.template)
                .with_context(|| format!("mnemonic `{}`", m.name))?;
        }
        Ok(g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"{
        "rom": "base.gba",
        "output": "out/patched.gba",
        "layout": { "free_base": "0x08230000" },
        "tables": [ { "name": "events", "offset": "0x7788", "count": 16, "base_id": "0x1388" } ],
        "events": [ { "table": "events", "id": "0x1389", "source": "ev/1389.evt" } ],
        "mnemonics": [ { "name": "wait_frames", "operands": ["value"], "template": "09 04 $(u:0)" } ]
    }"#;

    #[test]
    fn parses_hex_strings_and_defaults() {
        let m = Manifest::from_json(MANIFEST, Path::new("/work")).unwrap();
        assert_eq!(m.layout.free_base, Number(0x0823_0000));
        assert_eq!(m.layout.load_base, Number(0x0800_0000));
        assert_eq!(
            m.tables,
            vec![TableSpec {
                name: "events".into(),
                offset: Number(0x7788),
                count: Number(16),
                base_id: Number(0x1388),
            }]
        );
        assert_eq!(m.events[0].capacity, None);
        assert_eq!(m.resolve(&m.events[0].source), PathBuf::from("/work/ev/1389.evt"));
    }

    #[test]
    fn extra_mnemonics_join_the_grammar() {
        let m = Manifest::from_json(MANIFEST, Path::new(".")).unwrap();
        let g = m.grammar().unwrap();
        assert!(g.get("wait_frames").is_some());
        assert!(g.get("jump").is_some());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Manifest::from_json(r#"{ "rom": "a", "output": "b", "tables": [], "bogus": 1 }"#, Path::new("."));
        assert!(err.is_err());
    }
}
