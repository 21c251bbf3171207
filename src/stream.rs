//! Little-endian byte cursors over image data.
//!
//! Both cursors enforce natural alignment for 2- and 4-byte fields, the way
//! the target binary lays out every table and event record. Single bytes
//! are never constrained.

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Read past end of stream at {offset:#x} ({len} bytes available)")]
    EndOfStream { offset: usize, len: usize },
    #[error("{width}-byte access at {addr:#010x} is not aligned")]
    Misaligned { addr: u32, width: u32 },
    #[error("Write at {offset:#x} is outside the {len}-byte buffer")]
    OutOfRange { offset: usize, len: usize },
}

fn check_aligned(addr: u32, width: u32) -> Result<(), StreamError> {
    if addr % width != 0 {
        return Err(StreamError::Misaligned { addr, width });
    }
    Ok(())
}

/// Read cursor over a borrowed byte slice.
pub struct InputStream<'a> {
    data: &'a [u8],
    index: usize,
    check_alignment: bool,
}

impl<'a> InputStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            index: 0,
            check_alignment: true,
        }
    }

    /// Cursor that allows unaligned multi-byte reads.
    pub fn unaligned(data: &'a [u8]) -> Self {
        Self {
            data,
            index: 0,
            check_alignment: false,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.index
    }

    pub fn is_eos(&self) -> bool {
        self.index >= self.data.len()
    }

    fn aligned(&self, width: u32) -> Result<(), StreamError> {
        if self.check_alignment {
            check_aligned(self.index as u32, width)?;
        }
        Ok(())
    }

    fn take(&mut self, width: usize) -> Result<&'a [u8], StreamError> {
        let end = self.index + width;
        if end > self.data.len() {
            return Err(StreamError::EndOfStream {
                offset: self.index,
                len: self.data.len(),
            });
        }
        let bytes = &self.data[self.index..end];
        self.index = end;
        Ok(bytes)
    }

    pub fn get_u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, StreamError> {
        self.aligned(2)?;
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, StreamError> {
        self.aligned(4)?;
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Raw bytes are never alignment-checked.
    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        self.take(len)
    }
}

/// Write cursor anchored at an absolute address.
///
/// Alignment is judged against `base + position`, so a stream anchored at a
/// misaligned base rejects every word it is asked to write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputStream {
    base: u32,
    buf: Vec<u8>,
}

impl OutputStream {
    pub fn new(base: u32) -> Self {
        Self { base, buf: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn current_addr(&self) -> u32 {
        self.base.wrapping_add(self.buf.len() as u32)
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), StreamError> {
        check_aligned(self.current_addr(), 2)?;
        self.buf.extend_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), StreamError> {
        check_aligned(self.current_addr(), 4)?;
        self.buf.extend_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Overwrite four already-written bytes at `offset` (relative to base).
    pub fn patch_u32(&mut self, offset: usize, v: u32) -> Result<(), StreamError> {
        check_aligned(self.base.wrapping_add(offset as u32), 4)?;
        let len = self.buf.len();
        let slot = self
            .buf
            .get_mut(offset..offset + 4)
            .ok_or(StreamError::OutOfRange { offset, len })?;
        slot.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halfword_read_rejects_odd_offset() {
        let data = [0x82u8, 0x66, 0x82, 0x8f];
        let mut s = InputStream::new(&data);
        assert_eq!(s.get_u8().unwrap(), 0x82);
        assert!(matches!(s.get_u16(), Err(StreamError::Misaligned { width: 2, .. })));
    }

    #[test]
    fn unaligned_stream_skips_checks() {
        let data = [0x00u8, 0x34, 0x12, 0xff];
        let mut s = InputStream::unaligned(&data);
        s.get_u8().unwrap();
        assert_eq!(s.get_u16().unwrap(), 0x1234);
    }

    #[test]
    fn word_write_checks_absolute_address() {
        let mut out = OutputStream::new(0x0800_0002);
        assert!(out.put_u16(0xffff).is_ok());
        assert!(out.put_u32(0x1234_5678).is_ok());
        out.put_u8(0);
        assert_eq!(
            out.put_u32(0),
            Err(StreamError::Misaligned { addr: 0x0800_0009, width: 4 })
        );
    }

    #[test]
    fn patch_u32_overwrites_reserved_word() {
        let mut out = OutputStream::new(0x0800_0000);
        out.put_bytes(&[0x0c, 0x08, 0xff, 0xff]);
        out.put_u32(0xffff_ffff).unwrap();
        out.patch_u32(4, 0x0800_0010).unwrap();
        assert_eq!(out.as_bytes(), &[0x0c, 0x08, 0xff, 0xff, 0x10, 0x00, 0x00, 0x08]);
        assert!(out.patch_u32(8, 0).is_err());
    }
}
