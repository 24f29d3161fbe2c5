//! A fixed-size executable arena that the recompiler bump-allocates emitted host
//! code into, reset wholesale (together with the [BlockTable](crate::block_table::BlockTable))
//! when headroom runs low.

use crate::error::Error;
use region::{Allocation, Protection};
use std::ptr;

/// Total size of the code cache buffer, in bytes.
pub const CACHE_SIZE: usize = 16 * 1024;
/// Headroom reserved below `CACHE_SIZE`; `reserve()` refuses once `cursor + LEEWAY`
/// would exceed `CACHE_SIZE`.
pub const LEEWAY: usize = 1024;

/// A fixed 16 KiB buffer marked read/write/execute, with a bump-allocating write
/// cursor and a whole-cache reset operation.
///
/// Single-writer by convention: only the emulator thread that owns an executor
/// ever touches a `CodeCache`. Not `Sync`.
pub struct CodeCache {
    buffer: Allocation,
    cursor: usize,
}

impl CodeCache {
    /// Allocates a fresh RWX buffer of [CACHE_SIZE] bytes.
    pub fn new() -> Result<Self, Error> {
        let buffer = region::alloc(CACHE_SIZE, Protection::READ_WRITE_EXECUTE)
            .map_err(|source| Error::CacheAllocationFailed { source })?;
        Ok(CodeCache { buffer, cursor: 0 })
    }

    /// Returns the current write cursor as the entry point for the next block,
    /// expressed as a raw pointer into the cache buffer.
    pub fn reserve(&self) -> *mut u8 {
        unsafe { (self.buffer.as_ptr::<u8>() as *mut u8).add(self.cursor) }
    }

    /// Appends `bytes` at the write cursor and advances it.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` would overflow the buffer; callers must check
    /// [CodeCache::near_exhausted] (and [CodeCache::reset] if so) before emitting a
    /// block large enough to plausibly overrun the remaining headroom.
    pub fn emit(&mut self, bytes: &[u8]) {
        assert!(
            self.cursor + bytes.len() <= CACHE_SIZE,
            "code cache overflow: cursor {} + {} bytes > {}",
            self.cursor,
            bytes.len(),
            CACHE_SIZE
        );
        unsafe {
            let dst = (self.buffer.as_ptr::<u8>() as *mut u8).add(self.cursor);
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        self.cursor += bytes.len();
    }

    /// Returns true once `cursor + LEEWAY` would exceed [CACHE_SIZE].
    pub fn near_exhausted(&self) -> bool {
        self.cursor + LEEWAY > CACHE_SIZE
    }

    /// Rewinds the write cursor to zero. The caller MUST clear the
    /// [BlockTable](crate::block_table::BlockTable) in the same critical section: after a
    /// reset, any block pointers already handed out are invalid by construction and must not
    /// be reachable through stale table entries.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Returns the number of bytes emitted since the last reset.
    pub fn len(&self) -> usize {
        self.cursor
    }

    /// Returns true if nothing has been emitted since the last reset.
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Returns a read-only view of the emitted bytes, for `shutdown()`'s optional
    /// dump-to-file diagnostic.
    pub fn emitted_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr::<u8>(), self.cursor) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cache_starts_empty() {
        let cache = CodeCache::new().unwrap();
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert!(!cache.near_exhausted());
    }

    #[test]
    fn test_emit_advances_cursor_and_is_readable() {
        let mut cache = CodeCache::new().unwrap();
        let entry = cache.reserve();
        cache.emit(&[0x90, 0x90, 0xC3]); // nop; nop; ret
        assert_eq!(cache.len(), 3);
        unsafe {
            assert_eq!(*entry, 0x90);
            assert_eq!(*entry.add(2), 0xC3);
        }
    }

    #[test]
    fn test_near_exhausted_threshold() {
        let mut cache = CodeCache::new().unwrap();
        cache.emit(&vec![0x90; CACHE_SIZE - LEEWAY]);
        assert!(!cache.near_exhausted());
        cache.emit(&[0x90]);
        assert!(cache.near_exhausted());
    }

    #[test]
    fn test_reset_rewinds_cursor() {
        let mut cache = CodeCache::new().unwrap();
        cache.emit(&[0x90; 100]);
        cache.reset();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    #[should_panic]
    fn test_emit_past_capacity_panics() {
        let mut cache = CodeCache::new().unwrap();
        cache.emit(&vec![0u8; CACHE_SIZE + 1]);
    }
}
