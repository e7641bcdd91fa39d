//! A memory node's arena: the remotely addressable region.
//!
//! File-backed mappings let separate processes on one machine share the
//! arena (the server creates the file, clients map it through the region
//! token); anonymous mappings back in-process setups and tests. Either
//! way, access from the compute side is one-sided: plain copies for READ
//! and WRITE, a 64-bit atomic compare-exchange for CAS. The memory node
//! never participates.
//!
//! Plain reads may race with concurrent writers; a torn block image is
//! expected and is exactly what the cache-line version check downstream
//! detects. CAS words (block flag words, free-list heads) are 8-byte
//! aligned by layout.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions, MmapRaw};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The capability a compute node needs to address a memory node's arena.
///
/// With a verbs fabric this would be the remote address and rkey; over
/// shared memory it is the backing path plus the mapped length.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionToken {
    pub path: PathBuf,
    pub len: u64,
}

/// A mapped remote-memory region.
pub struct Arena {
    map: MmapRaw,
    len: usize,
}

// The mapping is a shared region mutated concurrently by design; all
// access goes through the raw pointer below.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// In-process arena with no backing file.
    pub fn anonymous(len: usize) -> Result<Arena> {
        let map: MmapMut = MmapOptions::new().len(len).map_anon()?;
        Ok(Arena {
            map: MmapRaw::from(map),
            len,
        })
    }

    /// Creates (or truncates) the backing file and maps it shared.
    pub fn create_file(path: &Path, len: u64) -> Result<Arena> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        let map = MmapRaw::map_raw(&file)?;
        Ok(Arena {
            map,
            len: len as usize,
        })
    }

    /// Maps an arena created by a memory node, using its region token.
    pub fn open_token(token: &RegionToken) -> Result<Arena> {
        let file = OpenOptions::new().read(true).write(true).open(&token.path)?;
        let actual = file.metadata()?.len();
        if actual != token.len {
            return Err(Error::Transport(format!(
                "arena {} has length {actual}, token says {}",
                token.path.display(),
                token.len
            )));
        }
        let map = MmapRaw::map_raw(&file)?;
        Ok(Arena {
            map,
            len: token.len as usize,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn at(&self, offset: u64, len: usize) -> *mut u8 {
        let offset = offset as usize;
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "remote access out of bounds: offset {offset} len {len} arena {}",
            self.len
        );
        // SAFETY: bounds checked above; the mapping lives as long as self.
        unsafe { self.map.as_mut_ptr().add(offset) }
    }

    /// One-sided READ into a local byte buffer.
    pub fn read(&self, offset: u64, dst: &mut [u8]) {
        let src = self.at(offset, dst.len());
        // SAFETY: src spans dst.len() mapped bytes; dst is exclusively
        // ours. Concurrent remote writers may race this copy; the caller
        // validates the image.
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) }
    }

    /// One-sided WRITE from a local byte buffer.
    pub fn write(&self, offset: u64, src: &[u8]) {
        let dst = self.at(offset, src.len());
        // SAFETY: dst spans src.len() mapped bytes; src is a live borrow.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) }
    }

    /// One-sided READ into a local word buffer.
    pub fn read_words(&self, offset: u64, dst: &mut [u32]) {
        let len = dst.len() * 4;
        let src = self.at(offset, len);
        // SAFETY: as in `read`; u32 has no invalid bit patterns.
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr().cast::<u8>(), len) }
    }

    /// One-sided WRITE from a local word buffer.
    pub fn write_words(&self, offset: u64, src: &[u32]) {
        let len = src.len() * 4;
        let dst = self.at(offset, len);
        // SAFETY: as in `write`.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr().cast::<u8>(), dst, len) }
    }

    pub fn read_u32(&self, offset: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read(offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    pub fn write_u32(&self, offset: u64, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }

    pub fn read_u64(&self, offset: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read(offset, &mut buf);
        u64::from_le_bytes(buf)
    }

    pub fn write_u64(&self, offset: u64, value: u64) {
        self.write(offset, &value.to_le_bytes());
    }

    /// 64-bit compare-and-swap on a naturally aligned word. Returns the
    /// observed old value; the swap took effect iff it equals `compare`.
    pub fn cas_u64(&self, offset: u64, compare: u64, swap: u64) -> u64 {
        assert!(offset % 8 == 0, "CAS target must be 8-byte aligned");
        let ptr = self.at(offset, 8).cast::<u64>();
        // SAFETY: ptr is aligned, in bounds, and valid for atomic access
        // for the lifetime of the mapping.
        let word = unsafe { AtomicU64::from_ptr(ptr) };
        match word.compare_exchange(compare, swap, Ordering::AcqRel, Ordering::Acquire) {
            Ok(old) => old,
            Err(old) => old,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_round_trip() {
        let arena = Arena::anonymous(4096).unwrap();
        let src: Vec<u32> = (0..64).collect();
        arena.write_words(256, &src);

        let mut dst = vec![0u32; 64];
        arena.read_words(256, &mut dst);
        assert_eq!(src, dst);
    }

    #[test]
    fn test_cas_success_and_failure() {
        let arena = Arena::anonymous(64).unwrap();
        arena.write_u64(8, 17);

        assert_eq!(arena.cas_u64(8, 17, 99), 17);
        assert_eq!(arena.read_u64(8), 99);

        // stale compare loses and leaves the word unchanged
        assert_eq!(arena.cas_u64(8, 17, 1), 99);
        assert_eq!(arena.read_u64(8), 99);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_access_is_fatal() {
        let arena = Arena::anonymous(64).unwrap();
        let mut buf = [0u8; 16];
        arena.read(56, &mut buf);
    }

    #[test]
    fn test_file_backed_arena_shared_via_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node0.arena");

        let server = Arena::create_file(&path, 4096).unwrap();
        server.write_u32(100, 0xdead_beef);

        let token = RegionToken {
            path: path.clone(),
            len: 4096,
        };
        let client = Arena::open_token(&token).unwrap();
        assert_eq!(client.read_u32(100), 0xdead_beef);

        client.write_u32(200, 7);
        assert_eq!(server.read_u32(200), 7);
    }
}
