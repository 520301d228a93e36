/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Arena storage for inline-cache stub records.
//!
//! Stubs are small, written once, and die together, so they live in chunked
//! bump arenas rather than in the malloc heap. There are two retention
//! policies. Optimized stubs are cheap to regenerate and are purged
//! wholesale whenever the compartment discards JIT code. Fallback stubs must
//! survive recompilation of their unit, so a fresh compilation adopts the
//! old unit's chunks instead of copying the stubs out of them.

use std::ptr::NonNull;

use heap_traits::OutOfMemory;
use log::debug;

/// Chunk size for compartment-owned optimized stub arenas.
pub const OPTIMIZED_STUB_CHUNK_SIZE: usize = 4 * 1024;

/// Chunk size for per-compiled-unit fallback stub arenas.
pub const FALLBACK_STUB_CHUNK_SIZE: usize = 256;

const STUB_ALIGNMENT: usize = 8;

struct Chunk {
    buf: Box<[u8]>,
    used: usize,
}

impl Chunk {
    fn with_capacity(capacity: usize) -> Result<Chunk, OutOfMemory> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)?;
        buf.resize(capacity, 0);
        Ok(Chunk {
            buf: buf.into_boxed_slice(),
            used: 0,
        })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.used
    }
}

/// A chunked LIFO bump allocator. Allocations never move and never span
/// chunks; nothing is freed until the whole space is purged or its chunks
/// are adopted elsewhere.
pub struct StubSpace {
    chunks: Vec<Chunk>,
    default_chunk_size: usize,
}

impl StubSpace {
    pub fn new(default_chunk_size: usize) -> StubSpace {
        debug_assert!(default_chunk_size >= STUB_ALIGNMENT);
        StubSpace {
            chunks: Vec::new(),
            default_chunk_size,
        }
    }

    /// Bump-allocate `size` bytes, 8-byte aligned. Requests larger than the
    /// default chunk size get a dedicated chunk. A zero-size request returns
    /// the current bump position without advancing it.
    #[allow(unsafe_code)]
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        let size = (size + STUB_ALIGNMENT - 1) & !(STUB_ALIGNMENT - 1);
        let fits = self
            .chunks
            .last()
            .is_some_and(|chunk| chunk.remaining() >= size);
        if !fits {
            let capacity = self.default_chunk_size.max(size);
            self.chunks.try_reserve(1)?;
            self.chunks.push(Chunk::with_capacity(capacity)?);
        }
        let chunk = self.chunks.last_mut().unwrap();
        let offset = chunk.used;
        chunk.used += size;
        // SAFETY: offset <= buf.len() always holds, and one-past-the-end is
        // a valid non-null pointer for the zero-size case on a full chunk.
        let ptr = unsafe { NonNull::new_unchecked(chunk.buf.as_mut_ptr().add(offset)) };
        Ok(ptr)
    }

    /// Release every chunk. Afterwards the space is indistinguishable from a
    /// freshly constructed one.
    pub fn purge_all(&mut self) {
        let released = self.size_of_excluding_this();
        self.chunks.clear();
        debug!("stub space purged {released} bytes");
    }

    /// Take every chunk of `other`, preserving their bump positions, and
    /// append them to this space. `other` ends up empty, and no byte it has
    /// already handed out is ever handed out again by either space.
    pub fn adopt_from(&mut self, other: &mut StubSpace) {
        self.chunks.append(&mut other.chunks);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes reserved by the space's chunks.
    pub fn size_of_excluding_this(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.buf.len()).sum()
    }

    /// Bytes actually handed out.
    pub fn used_bytes(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.used).sum()
    }
}

/// Arena for optimized stubs. Compartment-owned; emptied wholesale when the
/// compartment discards its JIT code.
pub struct OptimizedStubSpace(StubSpace);

impl OptimizedStubSpace {
    pub fn new() -> OptimizedStubSpace {
        OptimizedStubSpace(StubSpace::new(OPTIMIZED_STUB_CHUNK_SIZE))
    }

    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        self.0.alloc(size)
    }

    /// Free all optimized stubs. Callers must have invalidated every call
    /// site into them first.
    pub fn purge(&mut self) {
        self.0.purge_all();
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.0.size_of_excluding_this()
    }

    pub fn used_bytes(&self) -> usize {
        self.0.used_bytes()
    }
}

impl Default for OptimizedStubSpace {
    fn default() -> OptimizedStubSpace {
        OptimizedStubSpace::new()
    }
}

/// Arena for fallback stubs, owned by one compiled unit's record. When a
/// unit is recompiled the new record adopts the old arena so the stubs keep
/// their addresses.
pub struct FallbackStubSpace(StubSpace);

impl FallbackStubSpace {
    pub fn new() -> FallbackStubSpace {
        FallbackStubSpace(StubSpace::new(FALLBACK_STUB_CHUNK_SIZE))
    }

    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        self.0.alloc(size)
    }

    pub fn adopt_from(&mut self, other: &mut FallbackStubSpace) {
        self.0.adopt_from(&mut other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn size_of_excluding_this(&self) -> usize {
        self.0.size_of_excluding_this()
    }

    pub fn used_bytes(&self) -> usize {
        self.0.used_bytes()
    }
}

impl Default for FallbackStubSpace {
    fn default() -> FallbackStubSpace {
        FallbackStubSpace::new()
    }
}
