//! Pipelined traversal of posting-list blocks.
//!
//! One read-buffer column per query term. On entry into a block the
//! successor READ is posted into the column's other row, so the fabric
//! fetches ahead while the scan consumes the current block. The scan is
//! the classic cyclic k-way intersection: advance the current column past
//! everything below the candidate value, bump the match count on
//! equality, adopt larger values as the new candidate.
//!
//! Union replaces the cyclic scan with a min-heap over the per-column
//! cursors; columns stream independently with the same prefetch.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::block::remote_ptr::RemotePtr;
use crate::constants::{READ_BUFFER_DEPTH, TOMBSTONE};
use crate::worker::Worker;

impl Worker {
    /// Posts the initial READ of every list head, one column each.
    fn post_list_heads(&mut self, heads: &[RemotePtr]) {
        self.t_read_list.start();
        for (col, &head) in heads.iter().enumerate() {
            if !head.is_null() {
                self.throttle();
                self.read_block(col as u32, 0, head);
            }
        }
        self.t_read_list.stop();
    }

    #[inline]
    fn slot_value(&self, col: u32, row: u32, pos: usize) -> u32 {
        self.read_buffer.get(col, row).data[pos]
    }

    /// Posts the READ of the successor of slot `(col, row)`, if any, into
    /// the column's other row.
    fn prefetch_successor(&mut self, col: u32, row: u32) {
        let next = self.read_buffer.get(col, row).forward_ptr();
        if !next.is_null() {
            self.throttle();
            self.read_block(col, (row + 1) % READ_BUFFER_DEPTH as u32, next);
        }
    }

    /// Streams every payload of column `col` starting at row 0 (the
    /// single-list case of intersection).
    fn stream_column(&mut self, col: u32, emit: &mut dyn FnMut(u32)) {
        let entries = self.payload_words();
        let mut row = 0u32;
        let mut pos = 0usize;

        loop {
            self.wait_ready(col, row);
            self.prefetch_successor(col, row);
            let points_to_null = self.read_buffer.get(col, row).points_to_null();

            loop {
                let slot = self.read_buffer.get(col, row);
                if pos >= entries || slot.data[pos] == TOMBSTONE {
                    break;
                }
                if self.versioned && pos % crate::constants::CACHE_LINE_ITEMS == 0 {
                    pos += 1;
                    continue;
                }
                emit(slot.data[pos]);
                pos += 1;
            }

            if points_to_null {
                return;
            }
            row = (row + 1) % READ_BUFFER_DEPTH as u32;
            pos = 0;
        }
    }

    /// Emits the ascending intersection of the lists rooted at `heads`.
    pub fn block_intersection(&mut self, heads: &[RemotePtr], emit: &mut dyn FnMut(u32)) {
        let k = heads.len();
        if k == 0 {
            return;
        }
        // a term with no postings makes the intersection empty
        if heads.iter().any(|h| h.is_null()) {
            return;
        }

        self.post_list_heads(heads);

        if k == 1 {
            self.stream_column(0, emit);
            return;
        }

        let entries = self.payload_words();
        let init_pos = self.init_pos();
        let versioned = self.versioned;
        let is_version = |pos: usize| versioned && pos % crate::constants::CACHE_LINE_ITEMS == 0;

        let mut row = vec![0u32; k];
        let mut pos = vec![init_pos; k];

        // seed the candidate from column 0
        self.wait_ready(0, 0);
        self.prefetch_successor(0, 0);
        let mut current_value = self.read_buffer.get(0, 0).data[pos[0]];
        pos[0] += 1;
        let mut count = 1usize;
        let mut col = 1usize;

        loop {
            let c = col as u32;
            self.wait_ready(c, row[col]);

            // entering a fresh block: fetch ahead
            if pos[col] == init_pos {
                self.prefetch_successor(c, row[col]);
            }

            {
                let slot = self.read_buffer.get(c, row[col]);
                let p = &mut pos[col];
                while *p < entries
                    && (is_version(*p)
                        || (slot.data[*p] != TOMBSTONE && slot.data[*p] < current_value))
                {
                    *p += 1;
                }
            }

            // end of block: either full and consumed, or split left the
            // rest tombstoned
            if pos[col] == entries || self.slot_value(c, row[col], pos[col]) == TOMBSTONE {
                if self.read_buffer.get(c, row[col]).points_to_null() {
                    // every remaining value here is below the candidate
                    // and nothing follows
                    return;
                }
                row[col] = (row[col] + 1) % READ_BUFFER_DEPTH as u32;
                pos[col] = init_pos;
                continue;
            }

            if self.slot_value(c, row[col], pos[col]) == current_value {
                count += 1;
                pos[col] += 1;

                if is_version(pos[col]) && pos[col] != entries {
                    pos[col] += 1;
                }

                if count == k {
                    emit(current_value);

                    // pick the next candidate, possibly from the next block
                    if pos[col] == entries || self.slot_value(c, row[col], pos[col]) == TOMBSTONE {
                        if self.read_buffer.get(c, row[col]).points_to_null() {
                            return;
                        }
                        row[col] = (row[col] + 1) % READ_BUFFER_DEPTH as u32;
                        pos[col] = init_pos;

                        self.wait_ready(c, row[col]);
                        self.prefetch_successor(c, row[col]);
                    }

                    current_value = self.slot_value(c, row[col], pos[col]);
                    count = 1;
                    pos[col] += 1;
                }
            } else if self.slot_value(c, row[col], pos[col]) > current_value {
                current_value = self.slot_value(c, row[col], pos[col]);
                count = 1;
                pos[col] += 1;
            }

            col = (col + 1) % k;
        }
    }

    /// Emits the ascending, deduplicated union of the lists rooted at
    /// `heads`.
    pub fn block_union(&mut self, heads: &[RemotePtr], emit: &mut dyn FnMut(u32)) {
        let k = heads.len();
        if k == 0 {
            return;
        }

        self.post_list_heads(heads);

        let init_pos = self.init_pos();
        let mut row = vec![0u32; k];
        let mut pos = vec![init_pos; k];

        let mut heap: BinaryHeap<Reverse<(u32, u32)>> = BinaryHeap::with_capacity(k);
        for (col, head) in heads.iter().enumerate() {
            if head.is_null() {
                continue;
            }
            if let Some(v) = self.union_advance(col as u32, &mut row[col], &mut pos[col]) {
                heap.push(Reverse((v, col as u32)));
            }
        }

        let mut last_emitted = None;
        while let Some(Reverse((value, col))) = heap.pop() {
            if last_emitted != Some(value) {
                emit(value);
                last_emitted = Some(value);
            }

            let col_idx = col as usize;
            if let Some(v) = self.union_advance(col, &mut row[col_idx], &mut pos[col_idx]) {
                heap.push(Reverse((v, col)));
            }
        }
    }

    /// Next payload of column `col`, crossing block boundaries with the
    /// usual prefetch; `None` once the list is exhausted.
    fn union_advance(&mut self, col: u32, row: &mut u32, pos: &mut usize) -> Option<u32> {
        let entries = self.payload_words();
        let init_pos = self.init_pos();

        loop {
            self.wait_ready(col, *row);
            if *pos == init_pos {
                self.prefetch_successor(col, *row);
            }

            while *pos < entries && self.versioned && *pos % crate::constants::CACHE_LINE_ITEMS == 0
            {
                *pos += 1;
            }

            {
                let slot = self.read_buffer.get(col, *row);
                if *pos < entries && slot.data[*pos] != TOMBSTONE {
                    let value = slot.data[*pos];
                    *pos += 1;
                    return Some(value);
                }
                if slot.points_to_null() {
                    return None;
                }
            }

            *row = (*row + 1) % READ_BUFFER_DEPTH as u32;
            *pos = init_pos;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::IndexKind;
    use crate::fabric::arena::Arena;
    use crate::index_file::IndexBuilder;
    use std::sync::Arc;

    const BS: u32 = 128; // 26 payload slots per dynamic block

    fn engine(builder: &IndexBuilder, kind: IndexKind) -> (Worker, Catalog) {
        let parts = builder.build(kind, BS, 1);
        let p = &parts[0];
        let arena = Arc::new(Arena::anonymous(p.byte_len() as usize).unwrap());
        arena.write_words(0, &p.blocks);

        let entries = {
            let mut v = vec![RemotePtr::NULL; p.meta.universe_size as usize + 1];
            for &(term, offset) in &p.meta.entries {
                v[term as usize] = RemotePtr::new(0, offset);
            }
            v
        };
        let worker = Worker::new(0, BS, kind.versioned(), 64, std::slice::from_ref(&arena));
        (worker, Catalog::from_entries(entries))
    }

    fn run_intersection(worker: &mut Worker, catalog: &Catalog, terms: &[u32]) -> Vec<u32> {
        let heads: Vec<RemotePtr> = terms.iter().map(|&t| catalog.get(t)).collect();
        let mut out = Vec::new();
        worker.block_intersection(&heads, &mut |v| out.push(v));
        worker.wait_outstanding();
        out
    }

    fn run_union(worker: &mut Worker, catalog: &Catalog, terms: &[u32]) -> Vec<u32> {
        let heads: Vec<RemotePtr> = terms.iter().map(|&t| catalog.get(t)).collect();
        let mut out = Vec::new();
        worker.block_union(&heads, &mut |v| out.push(v));
        worker.wait_outstanding();
        out
    }

    #[test]
    fn test_three_way_intersection() {
        let mut b = IndexBuilder::new(2);
        b.add_list(0, vec![1, 3, 5, 7]);
        b.add_list(1, vec![3, 5, 9]);
        b.add_list(2, vec![3, 5]);
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_intersection(&mut w, &cat, &[0, 1, 2]), vec![3, 5]);
    }

    #[test]
    fn test_disjoint_lists_intersect_empty() {
        let mut b = IndexBuilder::new(1);
        b.add_list(0, vec![1, 2]);
        b.add_list(1, vec![3, 4]);
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_intersection(&mut w, &cat, &[0, 1]), Vec::<u32>::new());
    }

    #[test]
    fn test_zero_and_single_term_queries() {
        let ids: Vec<u32> = (1..=60).collect(); // spans three blocks
        let mut b = IndexBuilder::new(0);
        b.add_list(0, ids.clone());
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_intersection(&mut w, &cat, &[]), Vec::<u32>::new());
        assert_eq!(run_intersection(&mut w, &cat, &[0]), ids);
    }

    #[test]
    fn test_intersection_across_block_boundaries() {
        let long: Vec<u32> = (1..=100).collect(); // four blocks
        let sparse: Vec<u32> = vec![2, 26, 27, 51, 99];
        let mut b = IndexBuilder::new(1);
        b.add_list(0, long);
        b.add_list(1, sparse.clone());
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_intersection(&mut w, &cat, &[0, 1]), sparse);
    }

    #[test]
    fn test_intersection_with_empty_term_is_empty() {
        let mut b = IndexBuilder::new(1);
        b.add_list(0, vec![1, 2, 3]);
        // term 1 materialized but empty
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_intersection(&mut w, &cat, &[0, 1]), Vec::<u32>::new());
    }

    #[test]
    fn test_three_way_union_deduplicates() {
        let mut b = IndexBuilder::new(2);
        b.add_list(0, vec![1, 4]);
        b.add_list(1, vec![2, 5]);
        b.add_list(2, vec![3, 6]);
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_union(&mut w, &cat, &[0, 1, 2]), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_union_with_overlap_and_blocks() {
        let a: Vec<u32> = (1..=60).map(|v| v * 2).collect(); // even, 3 blocks
        let b_ids: Vec<u32> = (1..=30).map(|v| v * 3).collect(); // multiples of 3
        let mut expected: Vec<u32> = a.iter().chain(b_ids.iter()).copied().collect();
        expected.sort_unstable();
        expected.dedup();

        let mut b = IndexBuilder::new(1);
        b.add_list(0, a);
        b.add_list(1, b_ids);
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_union(&mut w, &cat, &[0, 1]), expected);
    }

    #[test]
    fn test_union_skips_empty_lists() {
        let mut b = IndexBuilder::new(2);
        b.add_list(1, vec![7, 9]);
        let (mut w, cat) = engine(&b, IndexKind::BlockDynamic);

        assert_eq!(run_union(&mut w, &cat, &[0, 1, 2]), vec![7, 9]);
    }

    #[test]
    fn test_static_variant_shares_the_traversal() {
        let ids: Vec<u32> = (1..=45).collect(); // two static blocks (30 payload)
        let mut b = IndexBuilder::new(1);
        b.add_list(0, ids.clone());
        b.add_list(1, vec![10, 20, 40, 44]);
        let (mut w, cat) = engine(&b, IndexKind::BlockStatic);

        assert_eq!(
            run_intersection(&mut w, &cat, &[0, 1]),
            vec![10, 20, 40, 44]
        );
        assert_eq!(run_intersection(&mut w, &cat, &[0]), ids);
        assert_eq!(run_union(&mut w, &cat, &[1, 0]).len(), 45);
    }
}
