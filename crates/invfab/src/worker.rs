//! Per-thread compute state.
//!
//! A worker owns everything it touches on the hot path: one queue pair per
//! memory node, the completion queue they drain into, the read buffer, the
//! allocation block, the CAS result word, and the free-list scratch words.
//! Nothing here is shared between workers; cross-thread ordering exists
//! only through remote CAS.

use std::sync::Arc;

use rand::Rng;

use crate::block::layout;
use crate::block::remote_ptr::RemotePtr;
use crate::block::wr_id::{decode_wr_id, encode_wr_id, WR_READ_NO_HANDLE, WR_WRITE_ALLOCATION_BLOCK};
use crate::fabric::arena::Arena;
use crate::fabric::queue_pair::{CompletionQueue, QueuePair};
use crate::fabric::wc::{Wc, WcOpcode, WcStatus};
use crate::read_buffer::{BufferBlock, ReadBuffer};
use crate::stats::Counters;
use crate::timing::Interval;

/// Local landing words for free-list reads, one set per memory node.
#[derive(Default)]
pub struct FreeListBuffers {
    pub head: u64,
    pub head_next: u32,
}

pub struct Worker {
    pub id: u32,
    pub ctx_tid: u32,
    pub block_size: u32,
    pub versioned: bool,
    pub max_send_queue_wr: i32,

    pub qps: Vec<QueuePair>, // per memory node
    pub cq: CompletionQueue,
    pub read_buffer: ReadBuffer,
    pub allocation_block: BufferBlock,
    pub free_list_buffers: Vec<FreeListBuffers>,
    pub cas_buffer: u64,

    /// Posted signaled operations without a drained completion.
    pub post_balance: i32,
    /// Posted CAS operations without a drained completion.
    pub post_balance_cas: i32,

    // local statistics, summed by the dispatcher after the end barrier
    pub local_num_result: u64,
    pub processed_queries: u64,
    pub remote_reads_in_bytes: u64,
    pub remote_allocations: u64,
    pub remote_deallocations: u64,
    pub block_repeated_reads: u64,
    pub list_repeated_reads: u64,
    pub locking_failed: u64,
    pub read_failed: u64,
    pub wait_for_write: u64,

    pub t_operation: Interval,
    pub t_read_list: Interval,
    pub t_poll: Interval,

    wcs: Vec<Wc>,
}

impl Worker {
    pub fn new(
        id: u32,
        block_size: u32,
        versioned: bool,
        max_send_queue_wr: i32,
        arenas: &[Arc<Arena>],
    ) -> Self {
        let block_words = block_size as usize / 4;
        Worker {
            id,
            ctx_tid: 0,
            block_size,
            versioned,
            max_send_queue_wr,
            qps: arenas.iter().map(|a| QueuePair::new(Arc::clone(a))).collect(),
            cq: CompletionQueue::new(),
            read_buffer: ReadBuffer::new(block_size, versioned),
            allocation_block: BufferBlock::new(block_words, versioned),
            free_list_buffers: arenas.iter().map(|_| FreeListBuffers::default()).collect(),
            cas_buffer: 0,
            post_balance: 0,
            post_balance_cas: 0,
            local_num_result: 0,
            processed_queries: 0,
            remote_reads_in_bytes: 0,
            remote_allocations: 0,
            remote_deallocations: 0,
            block_repeated_reads: 0,
            list_repeated_reads: 0,
            locking_failed: 0,
            read_failed: 0,
            wait_for_write: 0,
            t_operation: Interval::new("operation"),
            t_read_list: Interval::new("read_list"),
            t_poll: Interval::new("polling"),
            wcs: Vec::new(),
        }
    }

    pub fn num_memory_nodes(&self) -> usize {
        self.qps.len()
    }

    pub fn random_memory_node(&self) -> u32 {
        rand::thread_rng().gen_range(0..self.qps.len() as u32)
    }

    /// Posts a READ of the block at `ptr` into slot `(col, row)`.
    pub fn read_block(&mut self, col: u32, row: u32, ptr: RemotePtr) {
        self.post_balance += 1;
        self.remote_reads_in_bytes += self.block_size as u64;
        let wr_id = encode_wr_id(self.ctx_tid, col, row);
        let block_size = self.block_size;

        let Worker {
            qps,
            cq,
            read_buffer,
            ..
        } = self;
        let slot = read_buffer.get_mut(col, row);
        slot.ready = false;
        slot.is_valid = false;
        slot.memory_node = ptr.memory_node;
        slot.remote_offset = ptr.offset;

        qps[ptr.memory_node as usize].post_read_words(
            cq,
            ptr.byte_offset(block_size),
            &mut slot.data,
            wr_id,
            true,
        );
    }

    /// Posts a READ of the block at `ptr` into the allocation block. The
    /// completion carries no handler; the caller waits synchronously.
    pub fn read_allocation_block(&mut self, ptr: RemotePtr) {
        self.post_balance += 1;
        self.remote_reads_in_bytes += self.block_size as u64;
        let block_size = self.block_size;

        let Worker {
            qps,
            cq,
            allocation_block,
            ..
        } = self;
        allocation_block.ready = false;
        allocation_block.memory_node = ptr.memory_node;
        allocation_block.remote_offset = ptr.offset;

        qps[ptr.memory_node as usize].post_read_words(
            cq,
            ptr.byte_offset(block_size),
            &mut allocation_block.data,
            WR_READ_NO_HANDLE,
            true,
        );
    }

    /// Bumps versions and writes slot `(col, row)` back to its pinned
    /// remote address (signaled).
    pub fn write_block(&mut self, col: u32, row: u32) {
        self.post_balance += 1;
        let wr_id = encode_wr_id(self.ctx_tid, col, row);
        let block_size = self.block_size;

        let Worker {
            qps,
            cq,
            read_buffer,
            ..
        } = self;
        let slot = read_buffer.get_mut(col, row);
        slot.increase_cache_line_versions();
        slot.just_writing = true;

        let remote = RemotePtr::new(slot.memory_node, slot.remote_offset);
        qps[remote.memory_node as usize].post_write_words(
            cq,
            &slot.data,
            remote.byte_offset(block_size),
            wr_id,
            true,
        );
    }

    /// Bumps versions and writes the allocation block to its pinned remote
    /// address (signaled, allocation sentinel id).
    pub fn write_allocation_block(&mut self) {
        self.post_balance += 1;
        let block_size = self.block_size;

        let Worker {
            qps,
            cq,
            allocation_block,
            ..
        } = self;
        allocation_block.increase_cache_line_versions();
        allocation_block.just_writing = true;

        let remote = RemotePtr::new(allocation_block.memory_node, allocation_block.remote_offset);
        qps[remote.memory_node as usize].post_write_words(
            cq,
            &allocation_block.data,
            remote.byte_offset(block_size),
            WR_WRITE_ALLOCATION_BLOCK,
            true,
        );
    }

    /// READ completion handler: re-issue the READ if the landed image is
    /// locked or torn, otherwise mark the slot ready.
    fn set_ready_and_validate(&mut self, wr_id: u64) {
        let (_, col, row) = decode_wr_id(wr_id);

        let needs_reread = {
            let slot = self.read_buffer.get_mut(col, row);
            self.versioned && (slot.is_locked() || !slot.validate_cache_lines())
        };

        if needs_reread {
            self.block_repeated_reads += 1;
            self.read_failed += 1;
            self.post_balance += 1;
            self.remote_reads_in_bytes += self.block_size as u64;
            let block_size = self.block_size;

            let Worker {
                qps,
                cq,
                read_buffer,
                ..
            } = self;
            let slot = read_buffer.get_mut(col, row);
            let remote = RemotePtr::new(slot.memory_node, slot.remote_offset);
            qps[remote.memory_node as usize].post_read_words(
                cq,
                remote.byte_offset(block_size),
                &mut slot.data,
                wr_id,
                true,
            );
        } else {
            self.read_buffer.get_mut(col, row).is_valid = true;
            self.read_buffer.set_ready(col, row);
        }
    }

    /// Drains the completion queue and dispatches handlers.
    pub fn poll_cq_and_handle(&mut self) {
        let mut wcs = std::mem::take(&mut self.wcs);
        let drained = self.cq.poll(&mut wcs, self.max_send_queue_wr as usize);

        for wc in &wcs {
            assert!(
                wc.status == WcStatus::Success,
                "work request {} failed: {}",
                wc.wr_id,
                wc.status
            );

            match wc.opcode {
                WcOpcode::RdmaRead => {
                    if wc.wr_id != WR_READ_NO_HANDLE {
                        self.set_ready_and_validate(wc.wr_id);
                    }
                }
                WcOpcode::CompSwap => {
                    self.post_balance_cas -= 1;
                }
                WcOpcode::RdmaWrite => {
                    if wc.wr_id == WR_WRITE_ALLOCATION_BLOCK {
                        self.allocation_block.just_writing = false;
                    } else {
                        let (_, col, row) = decode_wr_id(wc.wr_id);
                        self.read_buffer.get_mut(col, row).just_writing = false;
                    }
                }
                WcOpcode::Send => unreachable!("two-sided completion on the data path"),
            }
        }

        self.post_balance -= drained as i32;
        self.wcs = wcs;
    }

    /// Spins until every signaled post has completed.
    pub fn wait_outstanding(&mut self) {
        while self.post_balance > 0 {
            self.poll_cq_and_handle();
        }
    }

    /// Spins until the outstanding CAS has completed.
    pub fn wait_cas(&mut self) {
        while self.post_balance_cas > 0 {
            self.poll_cq_and_handle();
        }
    }

    /// Keeps the send queue below its work-request capacity.
    pub fn throttle(&mut self) {
        while self.post_balance >= self.max_send_queue_wr {
            self.poll_cq_and_handle();
        }
    }

    /// Spins until slot `(col, row)` holds a consistent, unlocked image.
    pub fn wait_ready(&mut self, col: u32, row: u32) {
        if self.read_buffer.get(col, row).is_ready() {
            return;
        }
        self.t_poll.start();
        while !self.read_buffer.get(col, row).is_ready() {
            self.poll_cq_and_handle();
        }
        self.t_poll.stop();
    }

    /// CAS-locks the block in slot `(col, row)` at its remote flag word.
    /// On success the local image's lock bit is set too.
    pub fn lock_block(&mut self, col: u32, row: u32) -> bool {
        let slot = self.read_buffer.get(col, row);
        let compare = slot.flag_word();
        let swap = compare | 1;
        let node = slot.memory_node;
        let flag_offset = (slot.remote_offset as u64 + 1) * self.block_size as u64 - 8;

        self.post_balance += 1;
        self.post_balance_cas += 1;
        {
            let Worker {
                qps, cq, cas_buffer, ..
            } = self;
            qps[node as usize].post_cas(cq, flag_offset, compare, swap, cas_buffer, 0);
        }

        self.wait_cas();

        if self.cas_buffer != compare {
            return false;
        }

        self.read_buffer.get_mut(col, row).set_lock();
        true
    }

    /// Flat counter snapshot for the statistics report.
    pub fn counters(&self) -> Counters {
        Counters {
            num_result: self.local_num_result,
            remote_reads_in_bytes: self.remote_reads_in_bytes,
            remote_allocations: self.remote_allocations,
            remote_deallocations: self.remote_deallocations,
            block_repeated_reads: self.block_repeated_reads,
            list_repeated_reads: self.list_repeated_reads,
            locking_failed: self.locking_failed,
            read_failed: self.read_failed,
            wait_for_write: self.wait_for_write,
            allocated_read_buffers_size: self.read_buffer.allocated_bytes(),
            ..Default::default()
        }
    }

    /// Payload word count of a block, i.e. everything before the footer.
    #[inline]
    pub fn payload_words(&self) -> usize {
        layout::payload_words(self.block_size as usize / 4, self.versioned)
    }

    /// First payload scan position of a block.
    #[inline]
    pub fn init_pos(&self) -> usize {
        layout::init_pos(self.versioned)
    }
}
