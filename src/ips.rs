//! IPS patch files, read as one more patch producer.
//!
//! Format: `PATCH`, then records of a 3-byte big-endian offset and a 2-byte
//! big-endian length followed by that many bytes, terminated by `EOF`. A
//! zero length marks a run: 2-byte count, then the byte to repeat.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Error;
use crate::patch::{PatchProducer, PatchSet};
use crate::stream::InputStream;

pub const IPS_MAGIC: &[u8; 5] = b"PATCH";
pub const IPS_EOF: u32 = 0x45_4f46;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IpsError {
    #[error("{name}: missing PATCH header")]
    BadHeader { name: String },
    #[error("{name}: truncated at byte {at}")]
    Truncated { name: String, at: usize },
    #[error("{name}: two records at offset {offset:#x}")]
    DuplicateOffset { name: String, offset: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpsFile {
    name: String,
    records: BTreeMap<u32, Vec<u8>>,
}

impl IpsFile {
    pub fn parse(name: &str, data: &[u8]) -> Result<Self, IpsError> {
        let mut s = InputStream::unaligned(data);
        let truncated = |s: &InputStream| IpsError::Truncated {
            name: name.to_string(),
            at: s.position(),
        };
        let be = |b: &[u8]| b.iter().fold(0u32, |acc, x| (acc << 8) | u32::from(*x));

        if s.get_bytes(IPS_MAGIC.len()).ok() != Some(&IPS_MAGIC[..]) {
            return Err(IpsError::BadHeader { name: name.to_string() });
        }

        let mut records = BTreeMap::new();
        loop {
            let offset = be(s.get_bytes(3).map_err(|_| truncated(&s))?);
            if offset == IPS_EOF {
                break;
            }
            let len = be(s.get_bytes(2).map_err(|_| truncated(&s))?) as usize;
            let bytes = if len == 0 {
                let run = be(s.get_bytes(2).map_err(|_| truncated(&s))?) as usize;
                let fill = s.get_u8().map_err(|_| truncated(&s))?;
                vec![fill; run]
            } else {
                s.get_bytes(len).map_err(|_| truncated(&s))?.to_vec()
            };
            if records.insert(offset, bytes).is_some() {
                return Err(IpsError::DuplicateOffset {
                    name: name.to_string(),
                    offset,
                });
            }
        }
        debug!(name, records = records.len(), "parsed ips");
        Ok(Self {
            name: name.to_string(),
            records,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.records.iter().map(|(o, b)| (*o, b.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PatchProducer for IpsFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, out: &mut PatchSet) -> Result<(), Error> {
        for (offset, bytes) in &self.records {
            out.insert(&self.name, *offset, bytes.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_run_records() {
        let mut data = b"PATCH".to_vec();
        data.extend([0x00, 0x00, 0x10, 0x00, 0x02, 0xaa, 0xbb]);
        data.extend([0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x03, 0xff]);
        data.extend(b"EOF");
        let ips = IpsFile::parse("fix.ips", &data).unwrap();
        let recs: Vec<_> = ips.records().collect();
        assert_eq!(recs, vec![(0x10, &[0xaa, 0xbb][..]), (0x100, &[0xff, 0xff, 0xff][..])]);
    }

    #[test]
    fn rejects_bad_header_and_truncation() {
        assert!(matches!(IpsFile::parse("x", b"PATCX"), Err(IpsError::BadHeader { .. })));
        assert!(matches!(
            IpsFile::parse("x", b"PATCH\x00\x00\x10\x00\x04\xaa"),
            Err(IpsError::Truncated { .. })
        ));
    }

    #[test]
    fn duplicate_offset_in_one_file() {
        let mut data = b"PATCH".to_vec();
        data.extend([0x00, 0x00, 0x10, 0x00, 0x01, 0xaa]);
        data.extend([0x00, 0x00, 0x10, 0x00, 0x01, 0xbb]);
        data.extend(b"EOF");
        assert_eq!(
            IpsFile::parse("x", &data),
            Err(IpsError::DuplicateOffset {
                name: "x".into(),
                offset: 0x10
            })
        );
    }
}
