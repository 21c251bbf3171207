//! Free-space allocation and event relocation.
//!
//! An event that no longer fits in its original slot is assembled again at a
//! fresh address carved out of the free region, and its table entry is
//! redirected there. Free space is a bump cursor: nothing is ever released
//! within a run.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::asm::{Assembled, Assembler, Constants};
use crate::config::Layout;
use crate::error::Error;
use crate::grammar::Grammar;
use crate::patch::{PatchProducer, PatchSet};
use crate::table::EventTable;

/// Every allocation starts on a word boundary.
pub const ALLOC_ALIGN: u32 = 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("out of free space placing `{owner}`: needs {size} bytes, {remaining} left")]
    OutOfSpace { owner: String, size: usize, remaining: u32 },
    #[error("`{0}` was already placed in this run")]
    AlreadyPlaced(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub owner: String,
    pub addr: u32,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct FreeSpace {
    base: u32,
    end: u64,
    cursor: u64,
    owners: Vec<Allocation>,
}

impl FreeSpace {
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            end: u64::from(base) + u64::from(size),
            cursor: u64::from(base),
            owners: Vec::new(),
        }
    }

    pub fn from_layout(layout: &Layout) -> Self {
        Self::new(layout.free_base.0, layout.free_size.0)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn remaining(&self) -> u32 {
        (self.end - self.cursor.min(self.end)) as u32
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.owners
    }

    /// Reserve `size` bytes for `owner`.
    pub fn allocate(&mut self, owner: &str, size: usize) -> Result<u32, AllocError> {
        let align = u64::from(ALLOC_ALIGN);
        let addr = self.cursor.div_ceil(align) * align;
        let next = addr + size as u64;
        if next > self.end {
            return Err(AllocError::OutOfSpace {
                owner: owner.to_string(),
                size,
                remaining: self.remaining(),
            });
        }
        self.cursor = next;
        let addr = addr as u32;
        self.owners.push(Allocation {
            owner: owner.to_string(),
            addr,
            size,
        });
        debug!(owner, addr = format_args!("{addr:#010x}"), size, "allocated");
        Ok(addr)
    }
}

/// Where one unit ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub unit: String,
    pub table: String,
    pub id: u32,
    pub addr: u32,
    pub size: usize,
    pub capacity: usize,
    pub relocated: bool,
}

/// Places assembled units, relocating the ones that outgrow their slot.
pub struct Relocator<'g> {
    asm: Assembler<'g>,
    layout: Layout,
    space: FreeSpace,
    placed: BTreeSet<(String, u32)>,
    patches: PatchSet,
    placements: Vec<Placement>,
}

impl<'g> Relocator<'g> {
    pub fn new(grammar: &'g Grammar, layout: Layout) -> Self {
        Self {
            asm: Assembler::new(grammar),
            layout,
            space: FreeSpace::from_layout(&layout),
            placed: BTreeSet::new(),
            patches: PatchSet::new(),
            placements: Vec::new(),
        }
    }

    pub fn space(&self) -> &FreeSpace {
        &self.space
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Assemble `source` for entry `id` of `table`.
    ///
    /// The unit is first assembled at its current address. When it is larger
    /// than `capacity` it is assembled again at a freshly allocated address
    /// and the table entry is updated; label values depend on the base, so
    /// the first encoding cannot simply be moved.
    pub fn place(
        &mut self,
        table: &mut EventTable,
        id: u32,
        capacity: usize,
        source: &str,
        seed: &Constants,
    ) -> Result<Assembled, Error> {
        let table_name = table.name().to_string();
        let unit = format!("{table_name}[{id:#x}]");
        if !self.placed.insert((table_name.clone(), id)) {
            return Err(AllocError::AlreadyPlaced(unit).into());
        }

        let vanilla = table.get_addr(id)?;
        let mut assembled = self.asm.assemble(source, vanilla, seed)?;
        let relocated = assembled.len() > capacity;
        if relocated {
            let addr = self.space.allocate(&unit, assembled.len())?;
            assembled = self.asm.assemble(source, addr, seed)?;
            table.set_addr(id, addr)?;
            info!(
                unit = %unit,
                from = format_args!("{vanilla:#010x}"),
                to = format_args!("{addr:#010x}"),
                size = assembled.len(),
                capacity,
                "relocated"
            );
        }

        let offset = self.layout.pointer_to_offset(assembled.base)?;
        self.patches.insert(&unit, offset, assembled.bytes());
        self.placements.push(Placement {
            unit,
            table: table_name,
            id,
            addr: assembled.base,
            size: assembled.len(),
            capacity,
            relocated,
        });
        Ok(assembled)
    }
}

impl PatchProducer for Relocator<'_> {
    fn name(&self) -> &str {
        "relocator"
    }

    fn emit(&self, out: &mut PatchSet) -> Result<(), Error> {
        out.extend(self.patches.clone());
        Ok(())
    }
}
