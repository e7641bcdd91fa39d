//! Partition files and the initial block layout.
//!
//! The offline build step turns posting lists into per-memory-node
//! partitions: a binary index file holding the initial block arena
//! verbatim, and a meta file mapping each term to its first block.
//!
//! Meta file, a sequence of little-endian u32:
//!
//! ```text
//! [ memory_node_id, universe_size, num_entries, block_size,
//!   (term, first_block_offset) * num_entries ]
//! ```
//!
//! Lists are assigned to memory nodes round-robin; the blocks of one list
//! are consecutive on its node, linked by forward pointers with the
//! initial tag 0. Block (0, 0) of memory node 0 is reserved as the null
//! sentinel and never assigned. A dynamic build materializes one block
//! for every term of the universe so that inserts never start from the
//! sentinel; a static build leaves empty terms pointing at it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::block::layout::{is_version_slot, set_flag_word, set_raw_forward_word, set_static_forward};
use crate::block::remote_ptr::{encode_forward_word, RemotePtr};
use crate::config::IndexKind;
use crate::constants::{CACHE_LINE_ITEMS, DYNAMIC_FOOTER_WORDS, STATIC_FOOTER_WORDS, TOMBSTONE};
use crate::error::{Error, Result};

/// Payload slots of one block.
pub fn block_capacity(kind: IndexKind, block_size: u32) -> usize {
    let words = block_size as usize / 4;
    match kind {
        IndexKind::BlockDynamic => words - words / CACHE_LINE_ITEMS - DYNAMIC_FOOTER_WORDS,
        IndexKind::BlockStatic => words - STATIC_FOOTER_WORDS,
    }
}

pub fn meta_file_name(kind: IndexKind, block_size: u32, node: u32, num_nodes: u32) -> String {
    format!(
        "{}{}_m{}_of{}_meta.dat",
        kind.file_prefix(),
        block_size,
        node + 1,
        num_nodes
    )
}

pub fn index_file_name(kind: IndexKind, block_size: u32, node: u32, num_nodes: u32) -> String {
    format!(
        "{}{}_m{}_of{}_index.dat",
        kind.file_prefix(),
        block_size,
        node + 1,
        num_nodes
    )
}

/// Decoded meta file of one partition.
#[derive(Debug, Clone)]
pub struct MetaFile {
    pub memory_node: u32,
    pub universe_size: u32,
    pub block_size: u32,
    pub entries: Vec<(u32, u32)>,
}

impl MetaFile {
    pub fn read(path: &Path) -> Result<MetaFile> {
        let mut r = BufReader::new(File::open(path)?);
        let memory_node = r.read_u32::<LittleEndian>()?;
        let universe_size = r.read_u32::<LittleEndian>()?;
        let num_entries = r.read_u32::<LittleEndian>()?;
        let block_size = r.read_u32::<LittleEndian>()?;

        let mut entries = Vec::with_capacity(num_entries as usize);
        for _ in 0..num_entries {
            let term = r.read_u32::<LittleEndian>()?;
            let offset = r.read_u32::<LittleEndian>()?;
            entries.push((term, offset));
        }

        Ok(MetaFile {
            memory_node,
            universe_size,
            block_size,
            entries,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_u32::<LittleEndian>(self.memory_node)?;
        w.write_u32::<LittleEndian>(self.universe_size)?;
        w.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        w.write_u32::<LittleEndian>(self.block_size)?;
        for &(term, offset) in &self.entries {
            w.write_u32::<LittleEndian>(term)?;
            w.write_u32::<LittleEndian>(offset)?;
        }
        w.flush()?;
        Ok(())
    }
}

/// One memory node's share of the initial index.
#[derive(Debug)]
pub struct Partition {
    pub meta: MetaFile,
    /// The initial block arena, in words.
    pub blocks: Vec<u32>,
}

impl Partition {
    pub fn num_blocks(&self) -> u32 {
        (self.blocks.len() * 4 / self.meta.block_size as usize) as u32
    }

    pub fn byte_len(&self) -> u64 {
        self.blocks.len() as u64 * 4
    }
}

/// Builds the initial block layout from posting lists.
pub struct IndexBuilder {
    universe_size: u32,
    lists: BTreeMap<u32, Vec<u32>>,
}

impl IndexBuilder {
    pub fn new(universe_size: u32) -> Self {
        IndexBuilder {
            universe_size,
            lists: BTreeMap::new(),
        }
    }

    /// Registers the posting list of `term`; ids must be strictly
    /// ascending.
    pub fn add_list(&mut self, term: u32, ids: Vec<u32>) -> &mut Self {
        assert!(term <= self.universe_size, "term {term} outside universe");
        assert!(
            ids.windows(2).all(|w| w[0] < w[1]),
            "posting list of term {term} is not strictly ascending"
        );
        assert!(
            ids.iter().all(|&id| id != TOMBSTONE),
            "document id collides with the tombstone"
        );
        self.lists.insert(term, ids);
        self
    }

    /// Loads lists from a text file, one `term: id id ...` line each.
    pub fn from_text_file(path: &Path) -> Result<IndexBuilder> {
        let content = std::fs::read_to_string(path)?;
        let mut lists: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut universe = 0u32;

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let bad = |msg: &str| Error::Config(format!("lists line {}: {msg}", line_no + 1));
            let (term, rest) = line.split_once(':').ok_or_else(|| bad("missing term"))?;
            let term: u32 = term
                .trim()
                .parse()
                .map_err(|_| bad("invalid term id"))?;

            let mut ids = Vec::new();
            for token in rest.split_whitespace() {
                ids.push(token.parse::<u32>().map_err(|_| bad("invalid id"))?);
            }
            ids.sort_unstable();
            ids.dedup();

            universe = universe.max(term);
            lists.insert(term, ids);
        }

        let mut builder = IndexBuilder::new(universe);
        for (term, ids) in lists {
            builder.add_list(term, ids);
        }
        Ok(builder)
    }

    /// Produces the per-node partitions.
    pub fn build(&self, kind: IndexKind, block_size: u32, num_nodes: u32) -> Vec<Partition> {
        let capacity = block_capacity(kind, block_size);
        let block_words = block_size as usize / 4;

        let mut blocks: Vec<Vec<u32>> = vec![Vec::new(); num_nodes as usize];
        let mut entries: Vec<Vec<(u32, u32)>> = vec![Vec::new(); num_nodes as usize];

        // the null sentinel occupies (0, 0)
        blocks[0].extend(build_block(kind, block_size, &[], RemotePtr::NULL));

        let mut node = 0u32;
        let empty = Vec::new();
        let terms: Box<dyn Iterator<Item = u32>> = match kind {
            // inserts must never start from the sentinel, so every term
            // gets a materialized first block
            IndexKind::BlockDynamic => Box::new(0..=self.universe_size),
            IndexKind::BlockStatic => Box::new(self.lists.keys().copied()),
        };

        for (j, term) in terms.enumerate() {
            if j > 0 {
                node = (node + 1) % num_nodes;
            }
            let ids = self.lists.get(&term).unwrap_or(&empty);

            let node_blocks = &mut blocks[node as usize];
            let first_offset = (node_blocks.len() / block_words) as u32;
            entries[node as usize].push((term, first_offset));

            let num_list_blocks = ids.len().div_ceil(capacity).max(1) as u32;
            for (i, chunk) in ids
                .chunks(capacity)
                .chain(std::iter::repeat(&[][..]).take(usize::from(ids.is_empty())))
                .enumerate()
            {
                let next = if i as u32 + 1 == num_list_blocks {
                    RemotePtr::NULL
                } else {
                    RemotePtr::new(node, first_offset + i as u32 + 1)
                };
                node_blocks.extend(build_block(kind, block_size, chunk, next));
            }
        }

        blocks
            .into_iter()
            .zip(entries)
            .enumerate()
            .map(|(n, (blocks, entries))| Partition {
                meta: MetaFile {
                    memory_node: n as u32,
                    universe_size: self.universe_size,
                    block_size,
                    entries,
                },
                blocks,
            })
            .collect()
    }

    /// Writes `{meta,index}.dat` files for every node into `dir`.
    pub fn write_to_dir(
        &self,
        dir: &Path,
        kind: IndexKind,
        block_size: u32,
        num_nodes: u32,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        for partition in self.build(kind, block_size, num_nodes) {
            let node = partition.meta.memory_node;
            let meta_path = dir.join(meta_file_name(kind, block_size, node, num_nodes));
            partition.meta.write(&meta_path)?;

            let index_path = dir.join(index_file_name(kind, block_size, node, num_nodes));
            let mut w = BufWriter::new(File::create(&index_path)?);
            for &word in &partition.blocks {
                w.write_u32::<LittleEndian>(word)?;
            }
            w.flush()?;

            written.push(meta_path);
            written.push(index_path);
        }
        Ok(written)
    }
}

/// Lays out one block image.
fn build_block(kind: IndexKind, block_size: u32, ids: &[u32], next: RemotePtr) -> Vec<u32> {
    let block_words = block_size as usize / 4;
    assert!(ids.len() <= block_capacity(kind, block_size));
    let mut words = vec![TOMBSTONE; block_words];

    match kind {
        IndexKind::BlockDynamic => {
            for line in 0..block_words / CACHE_LINE_ITEMS {
                words[line * CACHE_LINE_ITEMS] = 0;
            }

            let mut pos = 1;
            for &id in ids {
                if is_version_slot(pos) {
                    pos += 1;
                }
                words[pos] = id;
                pos += 1;
            }

            set_raw_forward_word(
                &mut words,
                encode_forward_word(0, next.memory_node, next.offset),
            );
            set_flag_word(&mut words, 0);
        }
        IndexKind::BlockStatic => {
            words[..ids.len()].copy_from_slice(ids);
            set_static_forward(&mut words, next);
        }
    }

    words
}

/// Reads an index file's raw words (test and in-process helpers; memory
/// nodes stream the file straight into their arena).
pub fn read_index_words(path: &Path) -> Result<Vec<u32>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(Error::Config(format!(
            "index file {} is not word-aligned",
            path.display()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::layout;

    const BS: u32 = 128; // 26 payload slots per dynamic block

    #[test]
    fn test_capacity() {
        assert_eq!(block_capacity(IndexKind::BlockDynamic, 128), 26);
        assert_eq!(block_capacity(IndexKind::BlockStatic, 128), 30);
        assert_eq!(block_capacity(IndexKind::BlockDynamic, 1024), 236);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            meta_file_name(IndexKind::BlockDynamic, 1024, 0, 2),
            "dynamic_block1024_m1_of2_meta.dat"
        );
        assert_eq!(
            index_file_name(IndexKind::BlockStatic, 512, 1, 2),
            "block512_m2_of2_index.dat"
        );
    }

    #[test]
    fn test_single_node_build_reserves_sentinel() {
        let mut b = IndexBuilder::new(2);
        b.add_list(0, vec![1, 3, 5]);
        b.add_list(1, vec![2, 4]);

        let parts = b.build(IndexKind::BlockDynamic, BS, 1);
        assert_eq!(parts.len(), 1);
        let p = &parts[0];

        // sentinel + term 0 + term 1 + term 2 (materialized empty)
        assert_eq!(p.num_blocks(), 4);
        assert_eq!(p.meta.entries, vec![(0, 1), (1, 2), (2, 3)]);

        // sentinel is all tombstones and links nowhere
        let words = BS as usize / 4;
        let sentinel = &p.blocks[..words];
        assert!(layout::points_to_null(sentinel, true));
        assert!(layout::min_max(sentinel).is_none());

        // term 0's block carries its postings
        let t0 = &p.blocks[words..2 * words];
        let (min, max, _) = layout::min_max(t0).unwrap();
        assert_eq!((min, max), (1, 5));
    }

    #[test]
    fn test_multi_block_list_is_chained() {
        let ids: Vec<u32> = (1..=60).collect(); // needs 3 blocks of 26
        let mut b = IndexBuilder::new(0);
        b.add_list(0, ids);

        let parts = b.build(IndexKind::BlockDynamic, BS, 1);
        let p = &parts[0];
        assert_eq!(p.num_blocks(), 4); // sentinel + 3

        let words = BS as usize / 4;
        let block1 = &p.blocks[words..2 * words];
        let block2 = &p.blocks[2 * words..3 * words];
        let block3 = &p.blocks[3 * words..4 * words];

        assert_eq!(layout::forward_ptr(block1, true), RemotePtr::new(0, 2));
        assert_eq!(layout::forward_ptr(block2, true), RemotePtr::new(0, 3));
        assert!(layout::points_to_null(block3, true));

        // chain-level ordering
        let (_, max1, _) = layout::min_max(block1).unwrap();
        let (min2, _, _) = layout::min_max(block2).unwrap();
        assert!(max1 < min2);
    }

    #[test]
    fn test_round_robin_node_assignment() {
        let mut b = IndexBuilder::new(3);
        for t in 0..=3 {
            b.add_list(t, vec![t + 1]);
        }
        let parts = b.build(IndexKind::BlockDynamic, BS, 2);

        // terms 0, 2 on node 0 (after the sentinel), terms 1, 3 on node 1
        assert_eq!(parts[0].meta.entries, vec![(0, 1), (2, 2)]);
        assert_eq!(parts[1].meta.entries, vec![(1, 0), (3, 1)]);
    }

    #[test]
    fn test_static_build_skips_empty_terms() {
        let mut b = IndexBuilder::new(9);
        b.add_list(4, vec![1, 2]);
        let parts = b.build(IndexKind::BlockStatic, BS, 1);
        assert_eq!(parts[0].meta.entries, vec![(4, 1)]);
        assert_eq!(parts[0].num_blocks(), 2); // sentinel + one list block

        let words = BS as usize / 4;
        let block = &parts[0].blocks[words..];
        assert_eq!(&block[..2], &[1, 2]);
        assert!(layout::points_to_null(block, false));
    }

    #[test]
    fn test_meta_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut b = IndexBuilder::new(5);
        b.add_list(2, vec![10, 20, 30]);
        b.write_to_dir(dir.path(), IndexKind::BlockDynamic, BS, 1)
            .unwrap();

        let meta =
            MetaFile::read(&dir.path().join(meta_file_name(IndexKind::BlockDynamic, BS, 0, 1)))
                .unwrap();
        assert_eq!(meta.memory_node, 0);
        assert_eq!(meta.universe_size, 5);
        assert_eq!(meta.block_size, BS);
        assert_eq!(meta.entries.len(), 6); // all terms materialized

        let words =
            read_index_words(&dir.path().join(index_file_name(IndexKind::BlockDynamic, BS, 0, 1)))
                .unwrap();
        assert_eq!(words.len() % (BS as usize / 4), 0);
    }
}
