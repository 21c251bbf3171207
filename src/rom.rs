//! The base image and the patch composer.

use tracing::{debug, info};

use crate::patch::PatchSet;
use crate::stream::{InputStream, StreamError};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RomError {
    #[error("offset {offset:#x} is outside the {len:#x}-byte image")]
    OutOfBounds { offset: u32, len: usize },
    #[error("{0:#010x} is not a pointer into the image")]
    NotAPointer(u32),
    #[error("offset {0:#x} cannot be expressed as a pointer")]
    NotAnOffset(u32),
    #[error("bad event record at {offset:#x}: length byte {len}")]
    BadRecord { offset: u32, len: u8 },
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error(
        "patch at {offset:#x} from `{producer}` overlaps the patch from `{previous}`, \
         which already covers up to {cursor:#x}"
    )]
    Overlap {
        offset: u32,
        cursor: u64,
        producer: String,
        previous: String,
    },
    #[error(
        "patch at {offset:#x} ({len} bytes) from `{producer}` lies outside the \
         {image_len:#x}-byte image; is it an unconverted pointer?"
    )]
    OutOfBounds {
        offset: u32,
        len: usize,
        image_len: usize,
        producer: String,
    },
}

/// Opcode that terminates an event.
pub const END_EVENT: u8 = 0x00;

/// Immutable image. Patching produces a new `Rom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stream over `size` bytes at `offset` (to the end if `None`).
    pub fn open_stream(&self, offset: u32, size: Option<usize>) -> Result<InputStream<'_>, RomError> {
        let start = offset as usize;
        let oob = RomError::OutOfBounds {
            offset,
            len: self.data.len(),
        };
        if start >= self.data.len() {
            return Err(oob);
        }
        let end = match size {
            Some(n) => start.checked_add(n).filter(|e| *e <= self.data.len()).ok_or(oob)?,
            None => self.data.len(),
        };
        Ok(InputStream::new(&self.data[start..end]))
    }

    /// Read `count` little-endian pointers from a word-aligned table.
    pub fn get_lut(&self, offset: u32, count: usize) -> Result<Vec<u32>, RomError> {
        if offset % 4 != 0 {
            return Err(StreamError::Misaligned { addr: offset, width: 4 }.into());
        }
        let mut s = self.open_stream(offset, Some(count * 4))?;
        (0..count).map(|_| s.get_u32().map_err(RomError::from)).collect()
    }

    /// Size of the event at `offset`, walking length-prefixed records up to
    /// and including the first `end_event`. Jumps are not followed.
    pub fn event_size(&self, offset: u32) -> Result<usize, RomError> {
        let mut s = self.open_stream(offset, None)?;
        loop {
            let at = offset + s.position() as u32;
            let opcode = s.get_u8()?;
            let len = s.get_u8()?;
            if len < 2 {
                return Err(RomError::BadRecord { offset: at, len });
            }
            s.get_bytes(usize::from(len) - 2)?;
            if opcode == END_EVENT {
                return Ok(s.position());
            }
        }
    }

    /// Merge every patch into a copy of this image.
    pub fn apply_patches(&self, patches: &PatchSet) -> Result<Rom, PatchError> {
        let data = compose(&self.data, patches)?;
        Ok(Rom { data })
    }
}

/// Build a new image from `base` with every patch applied.
///
/// Patches are walked in offset order. The gap before each patch is copied
/// from `base`; a patch starting before the write cursor overlaps an earlier
/// one. A zero gap is fine.
pub fn compose(base: &[u8], patches: &PatchSet) -> Result<Vec<u8>, PatchError> {
    let mut out = Vec::with_capacity(base.len());
    let mut cursor: u64 = 0;
    let mut previous = "";

    for patch in patches.sorted() {
        let offset = u64::from(patch.offset);
        if offset >= base.len() as u64 || patch.end() > base.len() as u64 {
            return Err(PatchError::OutOfBounds {
                offset: patch.offset,
                len: patch.bytes.len(),
                image_len: base.len(),
                producer: patch.producer.clone(),
            });
        }
        if offset < cursor {
            return Err(PatchError::Overlap {
                offset: patch.offset,
                cursor,
                producer: patch.producer.clone(),
                previous: previous.to_string(),
            });
        }
        out.extend_from_slice(&base[cursor as usize..offset as usize]);
        out.extend_from_slice(&patch.bytes);
        debug!(
            offset = format_args!("{:#x}", patch.offset),
            len = patch.bytes.len(),
            producer = %patch.producer,
            "patch"
        );
        cursor = patch.end();
        previous = &patch.producer;
    }
    out.extend_from_slice(&base[cursor as usize..]);

    info!(
        patches = patches.len(),
        bytes = patches.total_bytes(),
        image_len = out.len(),
        "composed image"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom() -> Rom {
        Rom::new(vec![
            0x82, 0x66, 0x82, 0x8f, 0x82, 0x82, 0x82, 0x8c, 0x82, 0x89, 0x82, 0x8e, 0x00, 0x00, 0x00, 0x00,
            0x34, 0x12, 0x00, 0x08, 0x78, 0x56, 0x00, 0x08, 0xbc, 0x9a, 0x00, 0x08, 0xf0, 0xde, 0x00, 0x08,
        ])
    }

    #[test]
    fn open_stream_out_of_bounds() {
        let rom = rom();
        assert!(matches!(rom.open_stream(0x100, Some(4)), Err(RomError::OutOfBounds { .. })));
        assert!(matches!(rom.open_stream(0x1c, Some(8)), Err(RomError::OutOfBounds { .. })));
        assert_eq!(rom.open_stream(0x1c, Some(4)).map(|s| s.size()), Ok(4));
    }

    #[test]
    fn lut_reads_pointers() {
        let lut = rom().get_lut(0x10, 4).unwrap();
        assert_eq!(lut, vec![0x0800_1234, 0x0800_5678, 0x0800_9abc, 0x0800_def0]);
    }

    #[test]
    fn lut_must_be_word_aligned() {
        assert!(matches!(
            rom().get_lut(0x12, 2),
            Err(RomError::Stream(StreamError::Misaligned { addr: 0x12, width: 4 }))
        ));
    }

    #[test]
    fn event_size_stops_after_end_event() {
        let rom = Rom::new(vec![
            0x2d, 0x04, 0x09, 0x00, 0x0c, 0x08, 0xff, 0xff, 0x00, 0x00, 0x00, 0x08, 0x00, 0x04, 0xff, 0xff,
            0x01, 0x04, 0xff, 0xff,
        ]);
        assert_eq!(rom.event_size(0).unwrap(), 16);
        assert_eq!(rom.event_size(4).unwrap(), 12);
    }

    #[test]
    fn event_size_rejects_zero_length_record() {
        let rom = Rom::new(vec![0x05, 0x00, 0x00, 0x00]);
        assert_eq!(rom.event_size(0), Err(RomError::BadRecord { offset: 0, len: 0 }));
    }
}
