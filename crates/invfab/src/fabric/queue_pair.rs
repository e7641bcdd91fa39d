//! Queue pairs and the completion queue.
//!
//! Each compute worker owns one queue pair per memory node, all draining
//! into the worker's single completion queue — the same shape as detached
//! verbs queue pairs sharing their thread's send CQ. Operations are
//! executed against the arena at post time and their completions enqueued
//! in FIFO order, which gives the reliable-connection property the
//! protocol relies on: per queue pair, completions arrive in posting
//! order. Unsignaled posts execute but produce no completion.

use std::collections::VecDeque;
use std::sync::Arc;

use super::arena::Arena;
use super::wc::{Wc, WcOpcode, WcStatus};

/// Completion queue shared by all queue pairs of one worker.
#[derive(Default)]
pub struct CompletionQueue {
    entries: VecDeque<Wc>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        CompletionQueue::default()
    }

    #[inline]
    fn push(&mut self, wc: Wc) {
        self.entries.push_back(wc);
    }

    /// Drains up to `max` completions into `out`, returning the count.
    pub fn poll(&mut self, out: &mut Vec<Wc>, max: usize) -> usize {
        out.clear();
        let n = max.min(self.entries.len());
        out.extend(self.entries.drain(..n));
        n
    }

    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }
}

/// One-sided access path from a worker to one memory node.
pub struct QueuePair {
    arena: Arc<Arena>,
}

impl QueuePair {
    pub fn new(arena: Arc<Arena>) -> Self {
        QueuePair { arena }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Posts a READ of `dst.len()` words at `remote_offset` (bytes).
    pub fn post_read_words(
        &self,
        cq: &mut CompletionQueue,
        remote_offset: u64,
        dst: &mut [u32],
        wr_id: u64,
        signaled: bool,
    ) {
        self.arena.read_words(remote_offset, dst);
        if signaled {
            cq.push(Wc {
                wr_id,
                opcode: WcOpcode::RdmaRead,
                status: WcStatus::Success,
            });
        }
    }

    pub fn post_read_u64(
        &self,
        cq: &mut CompletionQueue,
        remote_offset: u64,
        dst: &mut u64,
        wr_id: u64,
    ) {
        *dst = self.arena.read_u64(remote_offset);
        cq.push(Wc {
            wr_id,
            opcode: WcOpcode::RdmaRead,
            status: WcStatus::Success,
        });
    }

    pub fn post_read_u32(
        &self,
        cq: &mut CompletionQueue,
        remote_offset: u64,
        dst: &mut u32,
        wr_id: u64,
    ) {
        *dst = self.arena.read_u32(remote_offset);
        cq.push(Wc {
            wr_id,
            opcode: WcOpcode::RdmaRead,
            status: WcStatus::Success,
        });
    }

    /// Posts a WRITE of `src` to `remote_offset` (bytes).
    pub fn post_write_words(
        &self,
        cq: &mut CompletionQueue,
        src: &[u32],
        remote_offset: u64,
        wr_id: u64,
        signaled: bool,
    ) {
        self.arena.write_words(remote_offset, src);
        if signaled {
            cq.push(Wc {
                wr_id,
                opcode: WcOpcode::RdmaWrite,
                status: WcStatus::Success,
            });
        }
    }

    /// Small inline WRITE, always unsignaled.
    pub fn post_write_u32_inline(&self, value: u32, remote_offset: u64) {
        self.arena.write_u32(remote_offset, value);
    }

    /// Posts a compare-and-swap; the observed old value lands in `result`.
    pub fn post_cas(
        &self,
        cq: &mut CompletionQueue,
        remote_offset: u64,
        compare: u64,
        swap: u64,
        result: &mut u64,
        wr_id: u64,
    ) {
        *result = self.arena.cas_u64(remote_offset, compare, swap);
        cq.push(Wc {
            wr_id,
            opcode: WcOpcode::CompSwap,
            status: WcStatus::Success,
        });
    }
}
