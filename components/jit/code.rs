/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Handles to blocks of generated code.
//!
//! Code objects are GC-owned: the collector holds the strong references, and
//! the JIT's own tables hold weak ones so a cache entry can never keep dead
//! code alive. Locations inside code are (handle, offset) pairs; resolving a
//! location on finalized code yields `None`, which every patching path
//! treats as a hard error.

use std::sync::{Arc, Weak};

pub type JitCodeRef = Arc<JitCode>;
pub type WeakCodeRef = Weak<JitCode>;

/// What a block of generated code is for. Used for accounting and logging.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodeKind {
    Trampoline,
    Baseline,
    Ion,
    Other,
}

/// An immutable block of generated code. The bytes never change after
/// construction; mutable jump state (see
/// [`PatchableBackedge`]) lives in the runtime's backedge registry, not in
/// the code itself.
pub struct JitCode {
    bytes: Box<[u8]>,
    kind: CodeKind,
    entry_offset: usize,
}

impl JitCode {
    pub fn new(bytes: Box<[u8]>, kind: CodeKind) -> JitCodeRef {
        JitCode::with_entry_offset(bytes, kind, 0)
    }

    pub fn with_entry_offset(bytes: Box<[u8]>, kind: CodeKind, entry_offset: usize) -> JitCodeRef {
        assert!(entry_offset <= bytes.len());
        Arc::new(JitCode {
            bytes,
            kind,
            entry_offset,
        })
    }

    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn entry_offset(&self) -> usize {
        self.entry_offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether `addr` points into this block. Used by the fault handler to
    /// attribute access violations to protected generated code.
    pub fn contains_address(&self, addr: usize) -> bool {
        let base = self.bytes.as_ptr() as usize;
        addr >= base && addr < base + self.bytes.len()
    }
}

/// A position inside a block of generated code, held weakly.
#[derive(Clone)]
pub struct CodeLocation {
    code: WeakCodeRef,
    offset: usize,
}

impl CodeLocation {
    pub fn new(code: &JitCodeRef, offset: usize) -> CodeLocation {
        debug_assert!(offset <= code.size());
        CodeLocation {
            code: Arc::downgrade(code),
            offset,
        }
    }

    /// The owning code, or `None` once it has been finalized.
    pub fn code(&self) -> Option<JitCodeRef> {
        self.code.upgrade()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Where a patchable loop backedge currently jumps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackedgeTarget {
    /// Normal execution: straight back to the loop header.
    LoopHeader,
    /// Interrupt requested: detour through the interrupt check stub.
    InterruptCheck,
}

/// A loop backedge that the runtime can repoint between its loop header and
/// an interrupt check. Registered with the runtime while the owning code is
/// live; owners must unregister before finalizing the code.
#[derive(Clone)]
pub struct PatchableBackedge {
    pub backedge: CodeLocation,
    pub loop_header: CodeLocation,
    pub interrupt_check: CodeLocation,
}

/// GC mark hook. Whatever is traced stays alive across the collection.
pub trait Tracer {
    fn trace_code(&mut self, code: &JitCodeRef);
}
