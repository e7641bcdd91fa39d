//! In-process engine fixture shared by the integration tests: builds an
//! initial index, loads it into anonymous arenas (one per memory node),
//! seeds the free lists, and hands out workers.
#![allow(dead_code)] // not every test binary uses every helper

use std::sync::Arc;

use invfab::block::layout;
use invfab::catalog::Catalog;
use invfab::config::{Config, IndexKind, Operation};
use invfab::constants::{DYNAMIC_FOOTER_WORDS, TOMBSTONE};
use invfab::dispatcher::Dispatcher;
use invfab::fabric::arena::Arena;
use invfab::free_list::{freelist_bytes, initialize_freelist, FreeList};
use invfab::index_file::IndexBuilder;
use invfab::worker::Worker;
use invfab::RemotePtr;

pub struct TestEngine {
    pub arenas: Vec<Arc<Arena>>,
    pub catalog: Arc<Catalog>,
    pub block_size: u32,
    pub kind: IndexKind,
    totals: Vec<u32>,
}

impl TestEngine {
    pub fn new(
        builder: &IndexBuilder,
        kind: IndexKind,
        block_size: u32,
        num_nodes: u32,
        extra_blocks: u32,
    ) -> Self {
        let parts = builder.build(kind, block_size, num_nodes);

        let mut arenas = Vec::new();
        let mut totals = Vec::new();
        let mut entries = Vec::new();

        for p in &parts {
            let total_blocks = p.num_blocks() + extra_blocks;
            let len = total_blocks as u64 * block_size as u64 + freelist_bytes(total_blocks);
            let arena = Arc::new(Arena::anonymous(len as usize).unwrap());
            arena.write_words(0, &p.blocks);
            initialize_freelist(&arena, block_size, p.num_blocks(), total_blocks);

            entries.resize(
                entries.len().max(p.meta.universe_size as usize + 1),
                RemotePtr::NULL,
            );
            for &(term, offset) in &p.meta.entries {
                entries[term as usize] = RemotePtr::new(p.meta.memory_node, offset);
            }

            arenas.push(arena);
            totals.push(total_blocks);
        }

        TestEngine {
            arenas,
            catalog: Arc::new(Catalog::from_entries(entries)),
            block_size,
            kind,
            totals,
        }
    }

    pub fn worker(&self, id: u32) -> Worker {
        Worker::new(
            id,
            self.block_size,
            self.kind.versioned(),
            256,
            &self.arenas,
        )
    }

    pub fn free_lists(&self) -> Vec<FreeList> {
        self.totals
            .iter()
            .enumerate()
            .map(|(node, &total)| FreeList::new(self.block_size, node as u32, total))
            .collect()
    }

    pub fn dispatcher(&self, threads: u32, operation: Operation) -> Dispatcher {
        let config = Config {
            num_compute_threads: threads,
            block_size: self.block_size,
            operation,
            index_kind: self.kind,
            disable_thread_pinning: true,
            ..Config::default()
        };
        Dispatcher::new(
            config,
            self.arenas.clone(),
            Arc::clone(&self.catalog),
            self.free_lists(),
        )
    }

    pub fn insert(&self, worker: &mut Worker, term: u32, id: u32) {
        let free_lists = self.free_lists();
        loop {
            let head = self.catalog.get(term);
            if worker.find_block_and_insert(head, id, 0, &free_lists) {
                break;
            }
        }
        worker.wait_outstanding();
    }

    pub fn intersect(&self, worker: &mut Worker, terms: &[u32]) -> Vec<u32> {
        let heads: Vec<RemotePtr> = terms.iter().map(|&t| self.catalog.get(t)).collect();
        let mut out = Vec::new();
        worker.block_intersection(&heads, &mut |v| out.push(v));
        worker.wait_outstanding();
        out
    }

    pub fn union(&self, worker: &mut Worker, terms: &[u32]) -> Vec<u32> {
        let heads: Vec<RemotePtr> = terms.iter().map(|&t| self.catalog.get(t)).collect();
        let mut out = Vec::new();
        worker.block_union(&heads, &mut |v| out.push(v));
        worker.wait_outstanding();
        out
    }

    pub fn scan(&self, worker: &mut Worker, term: u32) -> Vec<u32> {
        self.intersect(worker, &[term])
    }

    /// Walks a list chain, asserting the structural invariants along the
    /// way: bounded length, tag pairing on every link, ordered payload
    /// without interior tombstones, ascending across blocks.
    pub fn check_chain(&self, worker: &mut Worker, term: u32) -> ChainSummary {
        let mut ptr = self.catalog.get(term);
        assert!(!ptr.is_null(), "term {term} has no first block");

        let mut summary = ChainSummary::default();
        let mut expected_tag = 0u16;
        let mut previous_max: Option<u32> = None;

        for _ in 0..10_000 {
            worker.read_block(0, 0, ptr);
            worker.wait_outstanding();
            let slot = worker.read_buffer.get(0, 0);
            let words = &slot.data;

            assert!(!layout::is_locked(words), "settled block is locked");
            assert_eq!(
                layout::block_tag(words),
                expected_tag,
                "link tag does not match block {ptr} after {} blocks",
                summary.num_blocks
            );

            // ordered payload, tombstones only at the tail
            let entries = words.len() - DYNAMIC_FOOTER_WORDS;
            let mut prev = None;
            let mut tombstoned = false;
            for (idx, &w) in words.iter().enumerate().take(entries) {
                if layout::is_version_slot(idx) {
                    continue;
                }
                if w == TOMBSTONE {
                    tombstoned = true;
                    continue;
                }
                assert!(!tombstoned, "interior tombstone in block {ptr}");
                if let Some(p) = prev {
                    assert!(p < w, "unordered payload in block {ptr}");
                }
                if let Some(pm) = previous_max {
                    assert!(pm < w, "chain order violated entering block {ptr}");
                }
                prev = Some(w);
                summary.ids.push(w);
            }
            if let Some(p) = prev {
                previous_max = Some(p);
            }

            summary.num_blocks += 1;
            let next = layout::forward_ptr(words, true);
            if next.is_null() {
                return summary;
            }
            expected_tag = layout::forward_ptr_tag(words);
            ptr = next;
        }
        panic!("list of term {term} does not terminate");
    }
}

#[derive(Default)]
pub struct ChainSummary {
    pub num_blocks: u32,
    pub ids: Vec<u32>,
}
