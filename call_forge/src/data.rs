// Copyright 2026 the Call Forge Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data-blob table with pinned storage.
//!
//! Registered blobs get their addresses baked into generated instruction
//! streams, so storage must never move once handed out. Blobs live in a
//! chunked bump arena: chunks are mapped once, never resized, never freed
//! before the table drops, and later registrations never relocate earlier
//! ones. On Linux x86-64 chunks are mapped in the low 4 GiB (`MAP_32BIT`) so
//! every blob address is representable in the fixed 4-byte immediate width.
//!
//! The table is single-owner and deliberately not `Send`/`Sync`.

use core::fmt;
use std::collections::BTreeMap;

use crate::accessor::{Accessor, AccessorKind, TokenSource, UnknownAccessor};

/// Default arena chunk size. Blobs larger than this get a dedicated chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Errors from registering a blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlobError {
    /// The arena could not grow by a chunk large enough for the blob.
    AllocationFailed {
        /// Requested blob length in bytes (terminator excluded).
        len: usize,
    },
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed { len } => {
                write!(f, "failed to allocate blob storage for {len} bytes")
            }
        }
    }
}

impl std::error::Error for BlobError {}

struct Chunk {
    base: *mut u8,
    cap: usize,
    used: usize,
}

impl Chunk {
    #[cfg(unix)]
    fn map(cap: usize) -> Option<Chunk> {
        // Keep blob addresses below 4 GiB where the platform can: the
        // addresses are embedded as 4-byte immediates. x86-64 Linux has a
        // dedicated flag; elsewhere a low hint address is advisory and the
        // kernel falls back to its default placement.
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        let (hint, low_flag) = (std::ptr::null_mut(), libc::MAP_32BIT);
        #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
        let (hint, low_flag) = (0x2000_0000 as *mut libc::c_void, 0);

        let base = unsafe {
            libc::mmap(
                hint,
                cap,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON | low_flag,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return None;
        }
        Some(Chunk {
            base: base.cast(),
            cap,
            used: 0,
        })
    }

    #[cfg(not(unix))]
    fn map(cap: usize) -> Option<Chunk> {
        // Fallback storage for non-unix hosts: a leaked boxed slice, freed in
        // `unmap`. Addresses are stable but may exceed the 4-byte width; the
        // builder reports that instead of truncating.
        let mem = vec![0u8; cap].into_boxed_slice();
        Some(Chunk {
            base: Box::into_raw(mem).cast(),
            cap,
            used: 0,
        })
    }

    #[cfg(unix)]
    fn unmap(&mut self) {
        let rc = unsafe { libc::munmap(self.base.cast(), self.cap) };
        debug_assert_eq!(rc, 0);
    }

    #[cfg(not(unix))]
    fn unmap(&mut self) {
        drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.base, self.cap)) });
    }
}

/// Chunked bump arena with address-stable allocations.
struct BlobArena {
    chunks: Vec<Chunk>,
}

impl BlobArena {
    fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Reserves `len` bytes and returns their base pointer.
    ///
    /// Returned pointers stay valid and fixed until the arena drops; growing
    /// the arena adds chunks and never touches existing ones.
    fn alloc(&mut self, len: usize) -> Result<*mut u8, BlobError> {
        let fits_last = self
            .chunks
            .last()
            .is_some_and(|c| c.cap - c.used >= len);
        if !fits_last {
            let cap = len.max(CHUNK_SIZE);
            let chunk = Chunk::map(cap).ok_or(BlobError::AllocationFailed { len })?;
            self.chunks.push(chunk);
        }
        let Some(chunk) = self.chunks.last_mut() else {
            return Err(BlobError::AllocationFailed { len });
        };
        let ptr = unsafe { chunk.base.add(chunk.used) };
        chunk.used += len;
        Ok(ptr)
    }
}

impl Drop for BlobArena {
    fn drop(&mut self) {
        for chunk in &mut self.chunks {
            chunk.unmap();
        }
    }
}

#[derive(Copy, Clone)]
struct Blob {
    ptr: *const u8,
    /// Registered length, terminator excluded.
    len: usize,
}

/// Owns registered data blobs and issues accessors for them.
///
/// Blobs are immutable after registration and each carries a trailing NUL so
/// text blobs can be consumed directly by C string parameters.
pub struct DataTable {
    arena: BlobArena,
    entries: BTreeMap<Accessor, Blob>,
    tokens: TokenSource,
}

impl DataTable {
    /// Creates an empty table with a fresh random token stream.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tokens(TokenSource::new())
    }

    /// Creates an empty table drawing tokens from `tokens`.
    #[must_use]
    pub fn with_tokens(tokens: TokenSource) -> Self {
        Self {
            arena: BlobArena::new(),
            entries: BTreeMap::new(),
            tokens,
        }
    }

    /// Copies `bytes` plus a trailing NUL into owned pinned storage and
    /// returns a fresh accessor for the blob.
    pub fn register(&mut self, bytes: &[u8]) -> Result<Accessor, BlobError> {
        let stored_len = bytes.len() + 1;
        let ptr = self.arena.alloc(stored_len)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            ptr.add(bytes.len()).write(0);
        }
        let accessor = loop {
            let t = self.tokens.next_token();
            if !self.entries.contains_key(&t) {
                break t;
            }
        };
        self.entries.insert(
            accessor,
            Blob {
                ptr,
                len: bytes.len(),
            },
        );
        Ok(accessor)
    }

    /// Returns the raw address of the first byte of the stored blob.
    ///
    /// The address is stable across later registrations for as long as the
    /// table (or the [`crate::builder::Stub`] it moves into) is alive.
    pub fn address_of(&self, accessor: Accessor) -> Result<usize, UnknownAccessor> {
        self.entries
            .get(&accessor)
            .map(|b| b.ptr as usize)
            .ok_or(UnknownAccessor {
                accessor,
                kind: AccessorKind::Data,
            })
    }

    /// Returns the stored bytes, including the trailing NUL terminator.
    pub fn stored_bytes(&self, accessor: Accessor) -> Result<&[u8], UnknownAccessor> {
        self.entries
            .get(&accessor)
            .map(|b| unsafe { std::slice::from_raw_parts(b.ptr, b.len + 1) })
            .ok_or(UnknownAccessor {
                accessor,
                kind: AccessorKind::Data,
            })
    }

    /// Returns the number of registered blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no blob is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DataTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTable")
            .field("blobs", &self.entries.len())
            .field("chunks", &self.arena.chunks.len())
            .finish()
    }
}
