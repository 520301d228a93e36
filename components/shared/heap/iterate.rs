/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The heap traversal contract.
//!
//! A heap implementation drives a [`HeapVisit`] visitor through its
//! structure in a fixed nesting order:
//!
//! 1. `visit_zone` announces a zone; every arena and zone-attributed cell
//!    that follows belongs to it, until the next `visit_zone`.
//! 2. `visit_compartment` announces each of the zone's compartments before
//!    any of their cells are visited. Compartment-attributed cells name
//!    their compartment by id; naming an id that was never announced in the
//!    current pass is a caller bug and fatal.
//! 3. `visit_arena` announces an arena of the current zone.
//! 4. `visit_cell` visits each live cell of the current arena, passing the
//!    arena's cell size.
//!
//! The heap must be quiescent for the whole traversal; that is the caller's
//! responsibility, not this crate's.

use crate::cell::CellRef;
use crate::{things_span, CompartmentId, ZoneId, ARENA_SIZE};

/// One GC arena, as seen by the traversal.
#[derive(Clone, Copy, Debug)]
pub struct ArenaInfo {
    /// The size of the cells this arena holds. Arenas are homogeneous.
    pub thing_size: usize,
}

impl ArenaInfo {
    /// Bytes of this arena that can hold cells.
    pub fn things_span(&self) -> usize {
        things_span(self.thing_size)
    }

    /// Bytes of this arena spent on the header and tail padding.
    pub fn admin_bytes(&self) -> usize {
        ARENA_SIZE - self.things_span()
    }
}

/// One GC chunk, as seen by the chunk walk.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkInfo {
    /// Arenas of this chunk whose pages have been returned to the OS.
    pub decommitted_arenas: usize,
}

pub trait ZoneRef {
    fn id(&self) -> ZoneId;
    /// Malloc-heap bytes of the zone's type inference pool.
    fn type_pool_bytes(&self) -> usize {
        0
    }
}

/// Malloc-heap byte counts a compartment reports about its own tables.
/// Filled in by [`CompartmentRef::add_compartment_sizes`].
#[derive(Clone, Debug, Default)]
pub struct CompartmentTableSizes {
    pub compartment_object: usize,
    pub cross_compartment_wrappers_table: usize,
    pub regexp_compartment: usize,
    pub debuggees_set: usize,
    pub compartment_shape_tables: usize,
    pub type_inference_allocation_site_tables: usize,
    pub type_inference_array_type_tables: usize,
    pub type_inference_object_type_tables: usize,
    /// Bytes of the JIT compartment's optimized stub arena.
    pub baseline_stubs_optimized: usize,
}

pub trait CompartmentRef {
    fn id(&self) -> CompartmentId;
    fn add_compartment_sizes(&self, sizes: &mut CompartmentTableSizes);
}

/// The visitor side of the traversal. Implemented by the accounting walker.
pub trait HeapVisit {
    fn visit_zone(&mut self, zone: &dyn ZoneRef);
    fn visit_compartment(&mut self, compartment: &dyn CompartmentRef);
    fn visit_arena(&mut self, arena: &ArenaInfo);
    fn visit_cell(&mut self, cell: CellRef<'_>, thing_size: usize);
}

/// The heap side of the traversal. Implemented by heap hosts (the real GC
/// heap, or a synthetic one in tests).
pub trait StatsHeap {
    fn zone_count(&self) -> usize;
    fn compartment_count(&self) -> usize;
    /// All chunks the GC has mapped, used or not.
    fn total_chunk_count(&self) -> usize;
    /// Chunks with no live arenas at all.
    fn unused_chunk_count(&self) -> usize;
    fn for_each_chunk(&self, callback: &mut dyn FnMut(&ChunkInfo));
    /// Drive the visitor over every zone, per the nesting order in the
    /// module documentation.
    fn iterate_zones_compartments_arenas_cells(&self, visitor: &mut dyn HeapVisit);
    /// Drive the visitor over a single zone and its compartments.
    fn iterate_zone(&self, zone: ZoneId, visitor: &mut dyn HeapVisit);
}
