//! Work-request id encoding.
//!
//! Completions carry the 64-bit id of the posting work request. Reads that
//! land in a read-buffer slot encode the slot coordinates so the completion
//! handler can validate and mark the slot; the top four bits carry the
//! thread offset within a shared context (zero for detached per-thread
//! queue pairs):
//!
//! ```text
//! [ ctx_tid (4) | col (30) | row (30) ]
//! ```

/// READ that does not target a read-buffer slot (free-list words, the
/// allocation block, verification scans). No completion handler runs.
pub const WR_READ_NO_HANDLE: u64 = u64::MAX;

/// WRITE of the allocation block; the completion clears its
/// `just_writing` flag instead of a read-buffer slot's.
pub const WR_WRITE_ALLOCATION_BLOCK: u64 = u64::MAX;

#[inline]
pub fn encode_wr_id(ctx_tid: u32, col: u32, row: u32) -> u64 {
    ((ctx_tid as u64) << 60) | ((col as u64) << 30) | row as u64
}

#[inline]
pub fn decode_wr_id(word: u64) -> (u32, u32, u32) {
    let ctx_tid = (word >> 60) as u32;
    let col = ((word << 4) >> 34) as u32;
    let row = ((word << 34) >> 34) as u32;
    (ctx_tid, col, row)
}
