use serde::Serialize;

use crate::error::Error;

/// One edit: `bytes` written at absolute image `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patch {
    pub offset: u32,
    pub bytes: Vec<u8>,
    /// Who asked for it; only used in diagnostics.
    pub producer: String,
}

impl Patch {
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + self.bytes.len() as u64
    }
}

/// Edits collected from every producer of one run.
///
/// Overlap is not checked on insert; it is a global property judged once,
/// when the set is composed over the base image.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    patches: Vec<Patch>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, producer: &str, offset: u32, bytes: Vec<u8>) {
        self.patches.push(Patch {
            offset,
            bytes,
            producer: producer.to_string(),
        });
    }

    pub fn extend(&mut self, other: PatchSet) {
        self.patches.extend(other.patches);
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.iter()
    }

    /// Patches in ascending offset order; equal offsets keep insertion order.
    pub fn sorted(&self) -> Vec<&Patch> {
        let mut v: Vec<&Patch> = self.patches.iter().collect();
        v.sort_by_key(|p| p.offset);
        v
    }

    pub fn total_bytes(&self) -> usize {
        self.patches.iter().map(|p| p.bytes.len()).sum()
    }
}

/// Anything that contributes edits to the final image.
pub trait PatchProducer {
    fn name(&self) -> &str;
    fn emit(&self, out: &mut PatchSet) -> Result<(), Error>;
}
