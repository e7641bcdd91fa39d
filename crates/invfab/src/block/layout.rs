//! Accessors over a raw block image.
//!
//! A block is a fixed power-of-two number of bytes, viewed as 32-bit
//! words. Word 0 and every `CACHE_LINE_ITEMS`-th word thereafter hold the
//! cache-line version; the remaining words carry document ids in strictly
//! ascending order, trailing empty slots tombstoned. The last cache line
//! ends with the footer.
//!
//! Dynamic footer (last four words):
//!
//! ```text
//! word W-4, W-3:  forward pointer  [ p_tag(16) | m_id(10) | offset(38) ]
//!                 (high half in the lower-indexed word)
//! word W-2, W-1:  flag word, one little-endian u64:
//!                 [ cl_version(32) | reserved(15) | b_tag(16) | lock(1) ]
//! ```
//!
//! The flag word is the CAS target for locking; it must always be read and
//! written as one 64-bit word.
//!
//! Static footer (last two words): `[ next_node(32) | next_offset(32) ]`,
//! no versioning, no tags, no lock.
//!
//! All functions here are purely local computations on a block image that
//! has already been read into (or is about to be written from) a local
//! buffer.

use crate::block::remote_ptr::{decode_forward_word, RemotePtr};
use crate::constants::{CACHE_LINE_ITEMS, DYNAMIC_FOOTER_WORDS, STATIC_FOOTER_WORDS, TOMBSTONE};

const LOCK_BIT: u64 = 1;
const B_TAG_SHIFT: u32 = 1;
const B_TAG_MASK: u64 = 0xffff;
const VERSION_SHIFT: u32 = 32;

/// True for word positions that hold a cache-line version.
#[inline]
pub fn is_version_slot(pos: usize) -> bool {
    pos % CACHE_LINE_ITEMS == 0
}

/// Payload words of a block image, i.e. everything before the footer.
#[inline]
pub fn payload_words(block_words: usize, versioned: bool) -> usize {
    block_words
        - if versioned {
            DYNAMIC_FOOTER_WORDS
        } else {
            STATIC_FOOTER_WORDS
        }
}

/// First scan position: position 0 is a version word in the dynamic format.
#[inline]
pub fn init_pos(versioned: bool) -> usize {
    usize::from(versioned)
}

/// The flag word, assembled from the last two 32-bit words the way a
/// little-endian host reads the trailing u64.
#[inline]
pub fn flag_word(words: &[u32]) -> u64 {
    let n = words.len();
    ((words[n - 1] as u64) << 32) | words[n - 2] as u64
}

#[inline]
pub fn set_flag_word(words: &mut [u32], value: u64) {
    let n = words.len();
    words[n - 2] = value as u32;
    words[n - 1] = (value >> 32) as u32;
}

#[inline]
pub fn is_locked(words: &[u32]) -> bool {
    flag_word(words) & LOCK_BIT != 0
}

#[inline]
pub fn set_lock(words: &mut [u32]) {
    let w = flag_word(words);
    set_flag_word(words, w | LOCK_BIT);
}

#[inline]
pub fn set_unlock(words: &mut [u32]) {
    let w = flag_word(words);
    set_flag_word(words, w & !LOCK_BIT);
}

/// The block's reuse tag; incremented each time the block is taken from
/// the free list.
#[inline]
pub fn block_tag(words: &[u32]) -> u16 {
    ((flag_word(words) >> B_TAG_SHIFT) & B_TAG_MASK) as u16
}

#[inline]
pub fn set_block_tag(words: &mut [u32], tag: u16) {
    let w = flag_word(words) & !(B_TAG_MASK << B_TAG_SHIFT);
    set_flag_word(words, w | ((tag as u64) << B_TAG_SHIFT));
}

/// Forward-pointer word; high half lives in the lower-indexed word.
#[inline]
pub fn raw_forward_word(words: &[u32]) -> u64 {
    let n = words.len();
    ((words[n - 4] as u64) << 32) | words[n - 3] as u64
}

#[inline]
pub fn set_raw_forward_word(words: &mut [u32], value: u64) {
    let n = words.len();
    words[n - 4] = (value >> 32) as u32;
    words[n - 3] = value as u32;
}

/// Tag the predecessor recorded for its successor at link time.
#[inline]
pub fn forward_ptr_tag(words: &[u32]) -> u16 {
    let n = words.len();
    (words[n - 4] >> 16) as u16
}

/// Decodes the forward pointer of either footer format.
pub fn forward_ptr(words: &[u32], versioned: bool) -> RemotePtr {
    if versioned {
        decode_forward_word(raw_forward_word(words)).1
    } else {
        let n = words.len();
        RemotePtr::new(words[n - 2], words[n - 1])
    }
}

/// Static-footer link, written by the index builder only.
pub fn set_static_forward(words: &mut [u32], next: RemotePtr) {
    let n = words.len();
    words[n - 2] = next.memory_node;
    words[n - 1] = next.offset;
}

#[inline]
pub fn points_to_null(words: &[u32], versioned: bool) -> bool {
    forward_ptr(words, versioned).is_null()
}

/// Current cache-line version (the version word of the first line).
#[inline]
pub fn cache_line_version(words: &[u32]) -> u32 {
    words[0]
}

/// A block read is valid iff all cache-line version words agree and match
/// the version field of the flag word.
pub fn validate_cache_lines(words: &[u32]) -> bool {
    let num_cache_lines = words.len() / CACHE_LINE_ITEMS;
    let version = words[0];

    for line in 1..num_cache_lines {
        if words[line * CACHE_LINE_ITEMS] != version {
            return false;
        }
    }

    (flag_word(words) >> VERSION_SHIFT) as u32 == version
}

/// Pre-commit step of a writer: bump every cache-line version word and the
/// version field of the flag word to `v + 1`.
pub fn increase_cache_line_versions(words: &mut [u32]) {
    let num_cache_lines = words.len() / CACHE_LINE_ITEMS;
    let version = words[0].wrapping_add(1);

    for line in 0..num_cache_lines {
        words[line * CACHE_LINE_ITEMS] = version;
    }

    let w = flag_word(words) & 0xffff_ffff;
    set_flag_word(words, w | ((version as u64) << VERSION_SHIFT));
}

/// A dynamic block is full once its last payload slot is occupied.
#[inline]
pub fn is_full(words: &[u32]) -> bool {
    words[words.len() - 1 - DYNAMIC_FOOTER_WORDS] != TOMBSTONE
}

/// `(min, max, max_pos)` over the payload of a dynamic block, or `None`
/// for an all-tombstone block (a materialized head of an empty list).
pub fn min_max(words: &[u32]) -> Option<(u32, u32, usize)> {
    let min = words[1];
    if min == TOMBSTONE {
        return None;
    }

    let mut max_pos = words.len() - 1 - DYNAMIC_FOOTER_WORDS;
    while max_pos > 1 && (is_version_slot(max_pos) || words[max_pos] == TOMBSTONE) {
        max_pos -= 1;
    }

    Some((min, words[max_pos], max_pos))
}

/// Moves the upper half of `src`'s payload into the lower positions of
/// `dst`, tombstoning the moved-out slots of `src` and the unused tail of
/// `dst`. Version-word positions are preserved on both sides. Returns the
/// first free payload position of `(src, dst)` afterwards.
///
/// Footer words are untouched; the caller re-links the chain.
pub fn split_block(src: &mut [u32], dst: &mut [u32]) -> (usize, usize) {
    debug_assert_eq!(src.len(), dst.len());
    let num_cache_lines = src.len() / CACHE_LINE_ITEMS;
    let read_until = src.len() - DYNAMIC_FOOTER_WORDS;

    let move_from = num_cache_lines / 2 * CACHE_LINE_ITEMS + 1;
    let mut dst_iter = 1;

    for i in move_from..read_until {
        if is_version_slot(i) {
            continue;
        }

        dst[dst_iter] = src[i];
        src[i] = TOMBSTONE;
        dst_iter += 1;

        if is_version_slot(dst_iter) {
            dst_iter += 1;
        }
    }

    for j in dst_iter..read_until {
        if !is_version_slot(j) {
            dst[j] = TOMBSTONE;
        }
    }

    (move_from, dst_iter)
}
