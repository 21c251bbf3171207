//! Event lookup tables: arrays of event pointers indexed by id.

use tracing::debug;

use crate::error::Error;
use crate::patch::{PatchProducer, PatchSet};
use crate::rom::{Rom, RomError};
use crate::stream::OutputStream;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("id {id:#x} is not in table `{table}` (ids {first:#x}..{end:#x})")]
    UnknownId {
        table: String,
        id: u32,
        first: u32,
        end: u32,
    },
    #[error("no table named `{0}`")]
    UnknownTable(String),
    #[error("table `{table}`: {source}")]
    Rom {
        table: String,
        #[source]
        source: RomError,
    },
}

/// In-memory copy of one lookup table. Once any entry changes the whole
/// table is written back as a single patch; an untouched table emits nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTable {
    name: String,
    offset: u32,  // image offset of entry 0
    base_id: u32, // id of entry 0
    entries: Vec<u32>,
    dirty: bool,
}

impl EventTable {
    pub fn new(name: &str, offset: u32, base_id: u32, entries: Vec<u32>) -> Self {
        Self {
            name: name.to_string(),
            offset,
            base_id,
            entries,
            dirty: false,
        }
    }

    pub fn load(rom: &Rom, name: &str, offset: u32, count: usize, base_id: u32) -> Result<Self, TableError> {
        let entries = rom.get_lut(offset, count).map_err(|source| TableError::Rom {
            table: name.to_string(),
            source,
        })?;
        debug!(table = name, offset = format_args!("{offset:#x}"), count, "loaded table");
        Ok(Self::new(name, offset, base_id, entries))
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn index(&self, id: u32) -> Result<usize, TableError> {
        id.checked_sub(self.base_id)
            .map(|i| i as usize)
            .filter(|i| *i < self.entries.len())
            .ok_or_else(|| TableError::UnknownId {
                table: self.name.clone(),
                id,
                first: self.base_id,
                end: self.base_id.saturating_add(self.entries.len() as u32),
            })
    }

    pub fn get_addr(&self, id: u32) -> Result<u32, TableError> {
        Ok(self.entries[self.index(id)?])
    }

    pub fn set_addr(&mut self, id: u32, addr: u32) -> Result<(), TableError> {
        let i = self.index(id)?;
        if self.entries[i] != addr {
            self.entries[i] = addr;
            self.dirty = true;
        }
        Ok(())
    }
}

impl PatchProducer for EventTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, out: &mut PatchSet) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }
        let mut s = OutputStream::new(self.offset);
        for addr in &self.entries {
            s.put_u32(*addr)?;
        }
        out.insert(&self.name, self.offset, s.into_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::compose;

    #[test]
    fn ids_are_relative_to_base() {
        let mut t = EventTable::new("events", 0x7788, 0x1388, vec![0x0800_0100, 0x0800_0200]);
        assert_eq!(t.get_addr(0x1389), Ok(0x0800_0200));
        t.set_addr(0x1388, 0x0822_3f4c).unwrap();
        assert_eq!(t.entries(), &[0x0822_3f4c, 0x0800_0200]);
        assert!(matches!(t.get_addr(0x138a), Err(TableError::UnknownId { id: 0x138a, .. })));
        assert!(matches!(t.get_addr(0x1387), Err(TableError::UnknownId { .. })));
    }

    #[test]
    fn emits_whole_table() {
        let mut t = EventTable::new("map", 0x10, 0, vec![0x0800_1234, 0x0800_0000]);
        t.set_addr(1, 0x0800_5678).unwrap();
        let mut set = PatchSet::new();
        t.emit(&mut set).unwrap();
        let patches = set.sorted();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].offset, 0x10);
        assert_eq!(patches[0].bytes, vec![0x34, 0x12, 0x00, 0x08, 0x78, 0x56, 0x00, 0x08]);
    }

    #[test]
    fn untouched_table_emits_nothing() {
        let mut t = EventTable::new("map", 0x10, 0, vec![0x0800_1234, 0x0800_5678]);
        // writing back the same pointer is not a change
        t.set_addr(0, 0x0800_1234).unwrap();
        assert!(!t.is_dirty());
        let mut set = PatchSet::new();
        t.emit(&mut set).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn untouched_table_does_not_collide_with_other_patches() {
        let base = vec![0u8; 0x20];
        let rom = Rom::new(base.clone());
        let t = EventTable::load(&rom, "map", 0x10, 2, 0).unwrap();
        let mut set = PatchSet::new();
        set.insert("fix.ips", 0x12, vec![0xaa, 0xbb]);
        t.emit(&mut set).unwrap();
        let image = compose(&base, &set).unwrap();
        assert_eq!(&image[0x10..0x18], &[0, 0, 0xaa, 0xbb, 0, 0, 0, 0]);
    }
}
