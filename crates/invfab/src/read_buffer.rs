//! Per-worker read buffer: a grid of block-sized slots.
//!
//! Columns are independent traversal cursors, one per query term; the
//! depth dimension double-buffers so the successor block can be fetched
//! while the current one is being scanned. Slot metadata remembers the
//! remote coordinates of the last READ so a locked or torn image can be
//! re-fetched without the traversal knowing.

use crate::block::layout;
use crate::block::remote_ptr::RemotePtr;
use crate::constants::{READ_BUFFER_DEPTH, READ_BUFFER_LENGTH};

/// One block slot plus its transfer state.
pub struct BufferBlock {
    pub data: Vec<u32>,

    /// Remote coordinates of the last READ, pinned for re-reads.
    pub memory_node: u32,
    pub remote_offset: u32,

    /// Completion for the last READ has arrived.
    pub ready: bool,
    /// Cache-line versions agreed on the last validation.
    pub is_valid: bool,
    /// A write-back is in flight; the contents are transient.
    pub just_writing: bool,

    versioned: bool,
}

impl BufferBlock {
    pub fn new(block_words: usize, versioned: bool) -> Self {
        BufferBlock {
            data: vec![0; block_words],
            memory_node: 0,
            remote_offset: 0,
            ready: false,
            is_valid: false,
            just_writing: false,
            versioned,
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready && !self.just_writing
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        layout::is_locked(&self.data)
    }

    pub fn set_lock(&mut self) {
        layout::set_lock(&mut self.data);
    }

    pub fn set_unlock(&mut self) {
        layout::set_unlock(&mut self.data);
    }

    pub fn flag_word(&self) -> u64 {
        layout::flag_word(&self.data)
    }

    pub fn block_tag(&self) -> u16 {
        layout::block_tag(&self.data)
    }

    /// Reuse step for a block popped from the free list: the next tag
    /// generation. Wraps at 2^16; a reader stalled across 65536 reuses of
    /// one slot would be fooled (no mitigation, the horizon is accepted).
    pub fn bump_block_tag(&mut self) {
        let tag = self.block_tag().wrapping_add(1);
        layout::set_block_tag(&mut self.data, tag);
    }

    pub fn forward_ptr_tag(&self) -> u16 {
        layout::forward_ptr_tag(&self.data)
    }

    pub fn raw_forward_word(&self) -> u64 {
        layout::raw_forward_word(&self.data)
    }

    pub fn set_raw_forward_word(&mut self, word: u64) {
        layout::set_raw_forward_word(&mut self.data, word);
    }

    pub fn forward_ptr(&self) -> RemotePtr {
        layout::forward_ptr(&self.data, self.versioned)
    }

    pub fn points_to_null(&self) -> bool {
        self.forward_ptr().is_null()
    }

    /// Validates the image and records the outcome in `is_valid`.
    pub fn validate_cache_lines(&mut self) -> bool {
        self.is_valid = layout::validate_cache_lines(&self.data);
        self.is_valid
    }

    pub fn increase_cache_line_versions(&mut self) {
        layout::increase_cache_line_versions(&mut self.data);
    }

    pub fn is_full(&self) -> bool {
        layout::is_full(&self.data)
    }

    pub fn min_max(&self) -> Option<(u32, u32, usize)> {
        layout::min_max(&self.data)
    }
}

/// `READ_BUFFER_LENGTH` columns × `READ_BUFFER_DEPTH` rows of slots.
pub struct ReadBuffer {
    pub block_size: u32,
    slots: Vec<Vec<BufferBlock>>,
}

impl ReadBuffer {
    pub fn new(block_size: u32, versioned: bool) -> Self {
        let block_words = block_size as usize / 4;
        let slots = (0..READ_BUFFER_LENGTH)
            .map(|_| {
                (0..READ_BUFFER_DEPTH)
                    .map(|_| BufferBlock::new(block_words, versioned))
                    .collect()
            })
            .collect();
        ReadBuffer { block_size, slots }
    }

    #[inline]
    pub fn get(&self, col: u32, row: u32) -> &BufferBlock {
        &self.slots[col as usize][row as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, col: u32, row: u32) -> &mut BufferBlock {
        &mut self.slots[col as usize][row as usize]
    }

    pub fn set_ready(&mut self, col: u32, row: u32) {
        self.slots[col as usize][row as usize].ready = true;
    }

    /// Total local memory held by the slots, for the statistics report.
    pub fn allocated_bytes(&self) -> u64 {
        (READ_BUFFER_LENGTH * READ_BUFFER_DEPTH) as u64 * self.block_size as u64
    }
}
