//! The insert path: find the target block of a list and insert in place.
//!
//! Lock-free against concurrent readers, linearized against other writers
//! through a per-block CAS lock on the flag word plus optimistic reads
//! validated by cache-line versions. Chain-level ABA is caught by the tag
//! pair: each block's forward pointer records the `b_tag` its successor
//! had at link time; a reader that observes a different tag knows the
//! block was recycled underneath it and restarts the whole operation from
//! the catalog.

use crate::block::remote_ptr::{encode_forward_word, RemotePtr};
use crate::constants::{CACHE_LINE_ITEMS, READ_BUFFER_DEPTH};
use crate::free_list::FreeList;
use crate::search::ordered_insert;
use crate::worker::Worker;

impl Worker {
    /// Inserts `id` into the list rooted at `head`, using read-buffer
    /// column `col`.
    ///
    /// Returns `false` if a block tag mismatch forced a restart; the
    /// caller retries from the catalog. Transient failures inside one
    /// block (torn read, lost lock race) are retried here.
    pub fn find_block_and_insert(
        &mut self,
        head: RemotePtr,
        id: u32,
        col: u32,
        free_lists: &[FreeList],
    ) -> bool {
        assert!(
            !head.is_null(),
            "insert into a list with no materialized first block"
        );

        let mut row = 0u32;
        self.read_block(col, row, head);

        // the first block of a list is never recycled, its tag stays 0
        let mut expected_tag = 0u16;
        let mut node = head.memory_node;
        let mut offs = head.offset;

        loop {
            self.wait_outstanding();

            let (is_valid, block_tag) = {
                let slot = self.read_buffer.get(col, row);
                (slot.is_valid, slot.block_tag())
            };

            if !is_valid {
                // optimistic read failed, re-READ the current block
                self.block_repeated_reads += 1;
                self.read_failed += 1;
                self.read_block(col, row, RemotePtr::new(node, offs));
                continue;
            }

            // the block was recycled since we read its predecessor; the
            // link we followed is stale
            if block_tag != expected_tag {
                self.list_repeated_reads += 1;
                return false;
            }

            let (next_expected_tag, next, min_max) = {
                let slot = self.read_buffer.get(col, row);
                (slot.forward_ptr_tag(), slot.forward_ptr(), slot.min_max())
            };

            // fetch ahead in case we descend
            if !next.is_null() {
                self.read_block(col, (row + 1) % READ_BUFFER_DEPTH as u32, next);
            }

            // an empty first block behaves like a tail with max < id
            let (max, max_pos) = match min_max {
                Some((_, max, max_pos)) => (Some(max), max_pos),
                None => (None, 0),
            };

            // the slot after max, stepping over a version word
            let insert_pos = if (max_pos + 1) % CACHE_LINE_ITEMS == 0 {
                max_pos + 2
            } else {
                max_pos + 1
            };

            let beyond_max = max.map_or(true, |m| m < id);

            if beyond_max && !next.is_null() {
                // all entries here are below id and a successor exists
                node = next.memory_node;
                offs = next.offset;
                expected_tag = next_expected_tag;
                row = (row + 1) % READ_BUFFER_DEPTH as u32;
                continue;
            }

            if !self.lock_block(col, row) {
                // lost the lock race; the block changed, re-READ it
                self.locking_failed += 1;
                self.block_repeated_reads += 1;
                self.read_block(col, row, RemotePtr::new(node, offs));
                continue;
            }

            let full = self.read_buffer.get(col, row).is_full();

            if beyond_max {
                // tail block
                if full {
                    // divide the entries and append id to the new block;
                    // id exceeds everything moved out of the old tail
                    self.allocate_and_split(col, row, free_lists, |_, b2_free, _, alloc| {
                        alloc[b2_free] = id;
                    });
                } else {
                    self.read_buffer.get_mut(col, row).data[insert_pos] = id;
                }
            } else {
                // id belongs inside this block
                if full {
                    self.allocate_and_split(col, row, free_lists, |b1_free, b2_free, block, alloc| {
                        if id < alloc[1] {
                            ordered_insert(block, id, b1_free);
                        } else {
                            ordered_insert(alloc, id, b2_free);
                        }
                    });
                } else {
                    ordered_insert(&mut self.read_buffer.get_mut(col, row).data, id, insert_pos);
                }
            }

            self.write_and_unlock(col, row);
            return true;
        }
    }

    /// Pops a block from a random node's free list, splits the locked
    /// block in `(col, row)` into it, lets `place` put the new id into
    /// either half, links the chain, and writes the allocation block back.
    ///
    /// `place` receives the first free payload positions of both halves
    /// plus both buffers: `(b1_free, b2_free, block, allocation)`.
    fn allocate_and_split<F>(&mut self, col: u32, row: u32, free_lists: &[FreeList], place: F)
    where
        F: FnOnce(usize, usize, &mut [u32], &mut [u32]),
    {
        let allocation_node = self.random_memory_node();
        let offset = free_lists[allocation_node as usize].allocate(self);
        let r = RemotePtr::new(allocation_node, offset);

        // one outstanding allocation per thread: the previous allocation
        // block write must have retired before the buffer is reused
        if self.allocation_block.just_writing {
            self.wait_for_write += 1;
            while self.allocation_block.just_writing {
                self.poll_cq_and_handle();
            }
        }

        // read the block to keep its tag history (tags survive in the
        // free list and defeat ABA on recycled links)
        self.read_allocation_block(r);
        self.wait_outstanding();

        // this is a reuse: the popped block enters its next tag generation
        self.allocation_block.bump_block_tag();

        {
            // split borrows: the read-buffer slot and the allocation
            // block are disjoint fields
            let Worker {
                read_buffer,
                allocation_block,
                ..
            } = self;
            let block = &mut read_buffer.get_mut(col, row).data;
            let alloc = &mut allocation_block.data;

            let (b1_free, b2_free) = crate::block::layout::split_block(block, alloc);

            place(b1_free, b2_free, block, alloc);

            // allocation block inherits the old forward pointer, the old
            // block points at the allocation block under its fresh tag
            let old_forward = crate::block::layout::raw_forward_word(block);
            crate::block::layout::set_raw_forward_word(alloc, old_forward);

            let a_tag = crate::block::layout::block_tag(alloc);
            crate::block::layout::set_raw_forward_word(
                block,
                encode_forward_word(a_tag, r.memory_node, r.offset),
            );
        }

        self.write_allocation_block();
        self.wait_outstanding();
    }

    /// Commit: clear the lock bit, bump versions, write the block back.
    fn write_and_unlock(&mut self, col: u32, row: u32) {
        self.read_buffer.get_mut(col, row).set_unlock();
        self.write_block(col, row);
    }
}
