//! The build pipeline: assemble every event, relocate what outgrew its
//! slot, then compose event, table and IPS patches over the base image.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use easm_rs::alloc::Allocation;
use easm_rs::ips::IpsFile;
use easm_rs::table::TableError;
use easm_rs::{
    preprocess, Constants, Defines, Error, EventTable, Grammar, Layout, PatchProducer, PatchSet, Placement,
    Relocator, Rom,
};

use crate::manifest::{Manifest, TableSpec};

/// One event to build, with its source text loaded.
#[derive(Debug, Clone)]
pub struct EventJob {
    pub table: String,
    pub id: u32,
    pub capacity: Option<usize>,
    pub source: String,
}

/// Everything a build needs, already in memory.
pub struct Job {
    pub rom: Rom,
    pub layout: Layout,
    pub grammar: Grammar,
    pub header: String,
    pub defines: Defines,
    pub constants: Constants,
    pub tables: Vec<TableSpec>,
    pub events: Vec<EventJob>,
    pub ips: Vec<IpsFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub placements: Vec<Placement>,
    pub allocations: Vec<Allocation>,
    pub free_remaining: u32,
    pub patches: usize,
    pub patched_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub output: PathBuf,
    #[serde(flatten)]
    pub summary: Summary,
}

impl Job {
    /// Read every input the manifest names.
    pub fn load(manifest: &Manifest) -> Result<Self> {
        let read = |p: &PathBuf| {
            let path = manifest.resolve(p);
            std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
        };
        let read_text = |p: &PathBuf| -> Result<String> {
            let bytes = read(p)?;
            String::from_utf8(bytes).with_context(|| format!("{} is not UTF-8", p.display()))
        };

        let mut header = String::new();
        for h in &manifest.headers {
            header.push_str(&read_text(h)?);
            header.push('\n');
        }

        let events = manifest
            .events
            .iter()
            .map(|e| {
                Ok(EventJob {
                    table: e.table.clone(),
                    id: e.id.0,
                    capacity: e.capacity.map(|c| c.0 as usize),
                    source: read_text(&e.source)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut seen = BTreeSet::new();
        let mut ips = Vec::new();
        for p in &manifest.ips {
            let path = manifest.resolve(p);
            if !seen.insert(path.clone()) {
                warn!(path = %path.display(), "ips file listed twice; applying once");
                continue;
            }
            ips.push(IpsFile::parse(&path.display().to_string(), &read(p)?)?);
        }

        Ok(Self {
            rom: Rom::new(read(&manifest.rom)?),
            layout: manifest.layout,
            grammar: manifest.grammar()?,
            header,
            defines: manifest.defines.clone(),
            constants: manifest.constants(),
            tables: manifest.tables.clone(),
            events,
            ips,
        })
    }

    /// Run the whole pipeline and return the patched image.
    pub fn run(&self) -> Result<(Rom, Summary), Error> {
        let mut tables = BTreeMap::new();
        for t in &self.tables {
            let table = EventTable::load(&self.rom, &t.name, t.offset.0, t.count.0 as usize, t.base_id.0)?;
            tables.insert(t.name.clone(), table);
        }

        let mut events: Vec<&EventJob> = self.events.iter().collect();
        events.sort_by(|a, b| (&a.table, a.id).cmp(&(&b.table, b.id)));

        let mut relocator = Relocator::new(&self.grammar, self.layout);
        for ev in events {
            let unit = format!("{}[{:#x}]", ev.table, ev.id);
            let table = tables
                .get_mut(&ev.table)
                .ok_or_else(|| TableError::UnknownTable(ev.table.clone()))?;
            self.place(&mut relocator, table, ev).map_err(|e| e.in_unit(&unit))?;
        }

        let mut patches = PatchSet::new();
        relocator.emit(&mut patches)?;
        for table in tables.values() {
            table.emit(&mut patches)?;
        }
        for ips in &self.ips {
            ips.emit(&mut patches)?;
        }

        let rom = self.rom.apply_patches(&patches)?;
        let summary = Summary {
            placements: relocator.placements().to_vec(),
            allocations: relocator.space().allocations().to_vec(),
            free_remaining: relocator.space().remaining(),
            patches: patches.len(),
            patched_bytes: patches.total_bytes(),
        };
        info!(
            events = summary.placements.len(),
            relocated = summary.allocations.len(),
            patches = summary.patches,
            "build finished"
        );
        Ok((rom, summary))
    }

    fn place(&self, relocator: &mut Relocator, table: &mut EventTable, ev: &EventJob) -> Result<(), Error> {
        let capacity = match ev.capacity {
            Some(c) => c,
            None => {
                let offset = self.layout.pointer_to_offset(table.get_addr(ev.id)?)?;
                self.rom.event_size(offset)?
            }
        };
        let mut defines = self.defines.clone();
        let text = preprocess(&format!("{}{}", self.header, ev.source), &mut defines)?;
        relocator.place(table, ev.id, capacity, &text, &self.constants)?;
        Ok(())
    }
}

/// Load, build and write the image a manifest describes.
pub fn build(manifest: &Manifest) -> Result<Report> {
    let job = Job::load(manifest)?;
    let (rom, summary) = job.run()?;
    let output = manifest.resolve(&manifest.output);
    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    std::fs::write(&output, rom.as_bytes()).with_context(|| format!("writing {}", output.display()))?;
    Ok(Report { output, summary })
}
