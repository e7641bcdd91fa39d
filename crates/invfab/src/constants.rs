//! Shared constants of the block index.

/// Cache-line size in bytes; every cache line of a block starts with a
/// 32-bit version word.
pub const CACHE_LINE_SIZE: usize = 64;

/// Number of 32-bit words per cache line.
pub const CACHE_LINE_ITEMS: usize = CACHE_LINE_SIZE / 4;

/// Maximum number of query terms; one read-buffer column per term.
pub const READ_BUFFER_LENGTH: usize = 32;

/// Buffered blocks per query term (double buffering).
pub const READ_BUFFER_DEPTH: usize = 2;

/// Footer of a dynamic block in bytes: remote-pointer word + flag word.
pub const DYNAMIC_FOOTER_SIZE: usize = 16;

/// Footer of a dynamic block in 32-bit words.
pub const DYNAMIC_FOOTER_WORDS: usize = DYNAMIC_FOOTER_SIZE / 4;

/// Footer of a static block in 32-bit words: next node + next offset.
pub const STATIC_FOOTER_WORDS: usize = 2;

/// Head slots of a memory node's free list; operations pick one at random.
pub const FREELIST_PARTITIONS: usize = 16;

/// Empty payload slot marker.
pub const TOMBSTONE: u32 = u32::MAX;

/// Smallest supported block size in bytes.
pub const MIN_BLOCK_SIZE: u32 = 128;
