//! Per-memory-node lock-free free list.
//!
//! The free list lives in remote memory right after the block arena:
//!
//! ```text
//! head_0 (u64) | ... | head_15 (u64) | next[0] (u32) | next[1] (u32) | ...
//! ```
//!
//! Each head slot is the top of an independent stack of free block
//! indices; operations pick a head at random to spread contention. A
//! tombstoned head means that partition is drained. `next[i]` chains block
//! `i` to its successor, tombstone-terminated; occupied blocks hold the
//! tombstone.

use crate::constants::{FREELIST_PARTITIONS, TOMBSTONE};
use crate::fabric::arena::Arena;
use crate::worker::Worker;
use rand::Rng;

use crate::block::wr_id::WR_READ_NO_HANDLE;

/// Client-side handle to one memory node's free list.
pub struct FreeList {
    block_size: u32,
    memory_node: u32,
    /// Block offset where the head area starts (== total block count).
    offset_blocks: u32,
}

impl FreeList {
    pub fn new(block_size: u32, memory_node: u32, offset_blocks: u32) -> Self {
        FreeList {
            block_size,
            memory_node,
            offset_blocks,
        }
    }

    fn first_head_offset(&self) -> u64 {
        self.offset_blocks as u64 * self.block_size as u64
    }

    fn head_offset(&self, partition: usize) -> u64 {
        self.first_head_offset() + partition as u64 * 8
    }

    fn next_offset(&self, block: u32) -> u64 {
        self.first_head_offset() + 8 * FREELIST_PARTITIONS as u64 + block as u64 * 4
    }

    /// Pops a free block index.
    ///
    /// Starts at a random head partition and falls over to the others when
    /// one is drained; only when every partition holds the tombstone is
    /// the node out of memory, which is fatal.
    pub fn allocate(&self, worker: &mut Worker) -> u32 {
        worker.remote_allocations += 1;
        let node = self.memory_node as usize;
        let mut drained = 0;
        let mut partition = rand::thread_rng().gen_range(0..FREELIST_PARTITIONS);

        loop {
            let head_offset = self.head_offset(partition);

            // READ head
            worker.post_balance += 1;
            {
                let Worker {
                    qps,
                    cq,
                    free_list_buffers,
                    ..
                } = worker;
                qps[node].post_read_u64(
                    cq,
                    head_offset,
                    &mut free_list_buffers[node].head,
                    WR_READ_NO_HANDLE,
                );
            }
            worker.wait_outstanding();

            let head = worker.free_list_buffers[node].head as u32;
            if head == TOMBSTONE {
                drained += 1;
                assert!(
                    drained < FREELIST_PARTITIONS,
                    "memory node {} out of memory",
                    self.memory_node
                );
                partition = (partition + 1) % FREELIST_PARTITIONS;
                continue;
            }
            drained = 0;

            // READ head->next
            worker.post_balance += 1;
            {
                let Worker {
                    qps,
                    cq,
                    free_list_buffers,
                    ..
                } = worker;
                qps[node].post_read_u32(
                    cq,
                    self.next_offset(head),
                    &mut free_list_buffers[node].head_next,
                    WR_READ_NO_HANDLE,
                );
            }
            worker.wait_outstanding();

            // swap head with head->next
            let head_next = worker.free_list_buffers[node].head_next as u64;
            worker.post_balance += 1;
            worker.post_balance_cas += 1;
            {
                let Worker {
                    qps,
                    cq,
                    cas_buffer,
                    free_list_buffers,
                    ..
                } = worker;
                qps[node].post_cas(
                    cq,
                    head_offset,
                    free_list_buffers[node].head,
                    head_next,
                    cas_buffer,
                    0,
                );
            }
            worker.wait_cas();

            // CAS wrote the observed old value into the buffer
            if worker.cas_buffer == worker.free_list_buffers[node].head {
                return head;
            }
            partition = rand::thread_rng().gen_range(0..FREELIST_PARTITIONS);
        }
    }

    /// Pushes `block` back onto the free list.
    ///
    /// The inline WRITE of `next[block]` is unsignaled; the CAS that
    /// publishes the new head orders it for other threads.
    pub fn deallocate(&self, worker: &mut Worker, block: u32) {
        worker.remote_deallocations += 1;
        let node = self.memory_node as usize;
        let head_offset = self.head_offset(rand::thread_rng().gen_range(0..FREELIST_PARTITIONS));

        loop {
            // READ head
            worker.post_balance += 1;
            {
                let Worker {
                    qps,
                    cq,
                    free_list_buffers,
                    ..
                } = worker;
                qps[node].post_read_u64(
                    cq,
                    head_offset,
                    &mut free_list_buffers[node].head,
                    WR_READ_NO_HANDLE,
                );
            }
            worker.wait_outstanding();

            let current_head = worker.free_list_buffers[node].head;

            // WRITE current head as next pointer of the reinserted block
            worker.qps[node].post_write_u32_inline(current_head as u32, self.next_offset(block));

            // swap head with the reinserted block
            worker.post_balance += 1;
            worker.post_balance_cas += 1;
            {
                let Worker {
                    qps, cq, cas_buffer, ..
                } = worker;
                qps[node].post_cas(cq, head_offset, current_head, block as u64, cas_buffer, 0);
            }
            worker.wait_cas();

            if worker.cas_buffer == current_head {
                return;
            }
        }
    }
}

/// Lays the free list out in a freshly loaded arena: blocks
/// `[0, num_index_blocks)` are occupied, the rest chain through the head
/// partitions with stride `FREELIST_PARTITIONS`.
pub fn initialize_freelist(
    arena: &Arena,
    block_size: u32,
    num_index_blocks: u32,
    total_blocks: u32,
) {
    assert!(total_blocks < u32::MAX, "cannot address all blocks with 4B");
    let base = total_blocks as u64 * block_size as u64;

    for i in 0..FREELIST_PARTITIONS as u32 {
        let head = num_index_blocks + i;
        let seed = if head < total_blocks {
            head as u64
        } else {
            TOMBSTONE as u64
        };
        arena.write_u64(base + i as u64 * 8, seed);
    }

    let next_base = base + 8 * FREELIST_PARTITIONS as u64;
    for i in 0..total_blocks {
        let next = if i < num_index_blocks {
            TOMBSTONE
        } else {
            let point_to = i + FREELIST_PARTITIONS as u32;
            if point_to < total_blocks {
                point_to
            } else {
                TOMBSTONE
            }
        };
        arena.write_u32(next_base + i as u64 * 4, next);
    }
}

/// Total bytes of the head area plus the next array.
pub fn freelist_bytes(total_blocks: u32) -> u64 {
    FREELIST_PARTITIONS as u64 * 8 + total_blocks as u64 * 4
}
