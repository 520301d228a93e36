/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! The contracts between the garbage-collected heap and the rest of Kestrel.
//!
//! The heap accounting pass and the JIT caches both need a view of the heap
//! without depending on the collector's internals. This crate holds that
//! view: opaque identities, arena geometry, the closed set of cell kinds, and
//! the traversal traits a heap implementation provides so that a visitor can
//! walk zones, compartments, arenas and cells in order.

pub mod cell;
pub mod iterate;

use std::collections::TryReserveError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The size of a GC heap arena. Every arena holds cells of a single size
/// class and is accounted for as a whole.
pub const ARENA_SIZE: usize = 4096;

/// Bytes at the start of every arena reserved for the arena header.
pub const ARENA_HEADER_BYTES: usize = 64;

/// The size of a GC heap chunk. Chunks are carved into arenas.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// How many whole arenas fit in a chunk once the chunk header is paid for.
pub const ARENAS_PER_CHUNK: usize = 252;

/// Per-chunk overhead: the chunk header plus the tail that cannot hold
/// another whole arena.
pub const CHUNK_ADMIN_BYTES: usize = CHUNK_SIZE - ARENAS_PER_CHUNK * ARENA_SIZE;

/// The number of bytes of an arena that can actually hold cells of the given
/// size: a whole number of cells, after the header. The remainder (header
/// plus tail padding) is arena administration.
pub fn things_span(thing_size: usize) -> usize {
    debug_assert!(thing_size > 0);
    debug_assert!(thing_size <= ARENA_SIZE - ARENA_HEADER_BYTES);
    ((ARENA_SIZE - ARENA_HEADER_BYTES) / thing_size) * thing_size
}

/// Identity of a zone, the unit of GC heap ownership.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ZoneId(pub u32);

/// Identity of a compartment, the unit of script isolation within a zone.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CompartmentId(pub u32);

/// Identity of a script source. Several scripts can share one source, which
/// must be measured only once per accounting pass.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SourceId(pub u32);

/// Identity of an array buffer. Views refer to their buffer by id rather
/// than by an owning reference.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct BufferId(pub u32);

/// Allocation failure on a path that degrades or aborts instead of crashing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("allocation failed")
    }
}

impl std::error::Error for OutOfMemory {}

impl From<TryReserveError> for OutOfMemory {
    fn from(_: TryReserveError) -> OutOfMemory {
        OutOfMemory
    }
}

/// The closed set of GC cell kinds the accounting pass understands.
///
/// Dispatch over cells is exhaustive by construction (see
/// [`cell::CellRef`]); this tag exists for hosts that store kinds numerically
/// and for reporting labels.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CellKind {
    Object,
    String,
    Shape,
    BaseShape,
    Script,
    LazyScript,
    JitCode,
    TypeObject,
}

/// A numeric cell tag that names no [`CellKind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CellKindError(pub u32);

impl fmt::Display for CellKindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid cell kind tag: {}", self.0)
    }
}

impl std::error::Error for CellKindError {}

impl TryFrom<u32> for CellKind {
    type Error = CellKindError;

    fn try_from(tag: u32) -> Result<CellKind, CellKindError> {
        match tag {
            0 => Ok(CellKind::Object),
            1 => Ok(CellKind::String),
            2 => Ok(CellKind::Shape),
            3 => Ok(CellKind::BaseShape),
            4 => Ok(CellKind::Script),
            5 => Ok(CellKind::LazyScript),
            6 => Ok(CellKind::JitCode),
            7 => Ok(CellKind::TypeObject),
            other => Err(CellKindError(other)),
        }
    }
}
