//! The term catalog.
//!
//! A dense vector indexed by term id, each entry the remote pointer to
//! the list's first block. Populated from the per-node meta files at
//! startup and immutable afterwards; workers share it read-only.

use std::path::Path;

use crate::block::remote_ptr::RemotePtr;
use crate::config::IndexKind;
use crate::error::{Error, Result};
use crate::index_file::{meta_file_name, MetaFile};

pub struct Catalog {
    entries: Vec<RemotePtr>,
    universe_size: u32,
}

impl Catalog {
    /// Builds the catalog from all nodes' meta files in `index_dir`.
    pub fn load(
        index_dir: &Path,
        kind: IndexKind,
        block_size: u32,
        num_nodes: u32,
    ) -> Result<Catalog> {
        let mut catalog: Option<Catalog> = None;

        for node in 0..num_nodes {
            let path = index_dir.join(meta_file_name(kind, block_size, node, num_nodes));
            let meta = MetaFile::read(&path)?;

            if meta.memory_node != node {
                return Err(Error::Config(format!(
                    "{}: meta file belongs to node {}",
                    path.display(),
                    meta.memory_node
                )));
            }
            if meta.block_size != block_size {
                return Err(Error::Config(format!(
                    "{}: built for block size {}, configured {}",
                    path.display(),
                    meta.block_size,
                    block_size
                )));
            }

            let catalog = catalog.get_or_insert_with(|| Catalog {
                entries: vec![RemotePtr::NULL; meta.universe_size as usize + 1],
                universe_size: meta.universe_size,
            });

            for &(term, offset) in &meta.entries {
                let entry = catalog
                    .entries
                    .get_mut(term as usize)
                    .ok_or_else(|| Error::Config(format!("term {term} outside the universe")))?;
                if !entry.is_null() {
                    return Err(Error::Config(format!(
                        "term {term} assigned by more than one meta file"
                    )));
                }
                *entry = RemotePtr::new(node, offset);
            }
        }

        catalog.ok_or_else(|| Error::Config("no memory nodes configured".into()))
    }

    /// Catalog over explicit entries (in-process setups and tests).
    pub fn from_entries(entries: Vec<RemotePtr>) -> Catalog {
        let universe_size = entries.len().saturating_sub(1) as u32;
        Catalog {
            entries,
            universe_size,
        }
    }

    #[inline]
    pub fn get(&self, term: u32) -> RemotePtr {
        self.entries[term as usize]
    }

    pub fn universe_size(&self) -> u32 {
        self.universe_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Local footprint, for the statistics report.
    pub fn byte_size(&self) -> u64 {
        (self.entries.len() * std::mem::size_of::<RemotePtr>()) as u64
    }
}
