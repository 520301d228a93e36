/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The visitor that attributes every live cell to a counter.
//!
//! [`StatsWalker`] implements [`HeapVisit`] over a [`RuntimeStats`] under
//! construction. The heap drives it in nesting order (zone, compartments,
//! arenas, cells); unused arena space falls out by subtraction: each arena
//! pre-charges its whole usable span to `unused_gc_things` and every live
//! cell takes its own size back out.

use std::marker::PhantomData;

use heap_traits::cell::{CellRef, ObjectClass};
use heap_traits::iterate::{ArenaInfo, CompartmentRef, CompartmentTableSizes, HeapVisit, ZoneRef};
use heap_traits::{CompartmentId, SourceId};
use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::stats::{
    CompartmentStats, NotableStringInfo, RuntimeStats, StringInfo, StringKey, ZoneStats,
};

mod private {
    pub trait Sealed {}
    impl Sealed for super::FineGrained {}
    impl Sealed for super::CoarseGrained {}
}

/// Compile-time choice of how much per-string work a pass does. The hot cell
/// loop must not pay a runtime branch for a check that is invariant across
/// the whole pass.
pub trait Granularity: private::Sealed {
    /// Whether the pass aggregates string contents for duplicate and notable
    /// detection. Hashing every string more than doubles the cost of a pass
    /// over a string-heavy heap, and the coarse buckets never use it.
    const TRACK_STRING_CONTENTS: bool;
}

/// Full fidelity, for engine-wide reporting.
pub enum FineGrained {}

/// Tab-scoped accounting: bulk counters only.
pub enum CoarseGrained {}

impl Granularity for FineGrained {
    const TRACK_STRING_CONTENTS: bool = true;
}

impl Granularity for CoarseGrained {
    const TRACK_STRING_CONTENTS: bool = false;
}

/// One accounting pass in flight.
pub struct StatsWalker<'a, G> {
    rt_stats: &'a mut RuntimeStats,
    compartment_index: FxHashMap<CompartmentId, usize>,
    seen_sources: FxHashSet<SourceId>,
    granularity: PhantomData<G>,
}

impl<'a, G: Granularity> StatsWalker<'a, G> {
    pub fn new(rt_stats: &'a mut RuntimeStats) -> StatsWalker<'a, G> {
        StatsWalker {
            rt_stats,
            compartment_index: FxHashMap::default(),
            seen_sources: FxHashSet::default(),
            granularity: PhantomData,
        }
    }

    fn current_zone(&mut self) -> &mut ZoneStats {
        self.rt_stats
            .zone_stats
            .last_mut()
            .expect("cell or arena visited before any zone")
    }

    fn compartment_stats(&mut self, id: CompartmentId) -> &mut CompartmentStats {
        let index = *self
            .compartment_index
            .get(&id)
            .unwrap_or_else(|| panic!("cell attributed to unknown compartment {:?}", id));
        &mut self.rt_stats.compartment_stats[index]
    }
}

impl<G: Granularity> HeapVisit for StatsWalker<'_, G> {
    fn visit_zone(&mut self, zone: &dyn ZoneRef) {
        let mut stats = if G::TRACK_STRING_CONTENTS {
            ZoneStats::new_fine_grained(zone.id())
        } else {
            ZoneStats::new_coarse_grained(zone.id())
        };
        stats.type_pool = zone.type_pool_bytes();
        self.rt_stats.zone_stats.push(stats);
    }

    fn visit_compartment(&mut self, compartment: &dyn CompartmentRef) {
        let mut table_sizes = CompartmentTableSizes::default();
        compartment.add_compartment_sizes(&mut table_sizes);

        let mut stats = CompartmentStats::new(compartment.id());
        stats.add_compartment_table_sizes(&table_sizes);

        let index = self.rt_stats.compartment_stats.len();
        let previous = self.compartment_index.insert(compartment.id(), index);
        assert!(
            previous.is_none(),
            "compartment {:?} announced twice in one pass",
            compartment.id()
        );
        self.rt_stats.compartment_stats.push(stats);
    }

    fn visit_arena(&mut self, arena: &ArenaInfo) {
        let admin = arena.admin_bytes();
        let span = arena.things_span();
        let zone = self.current_zone();
        zone.gc_heap_arena_admin += admin;
        // Cells that are unused never reach visit_cell, so charge the whole
        // span here and let each live cell subtract itself below.
        zone.unused_gc_things += span;
    }

    fn visit_cell(&mut self, cell: CellRef<'_>, thing_size: usize) {
        match cell {
            CellRef::Object(object) => {
                let class = object.class();
                if class.is_buffer_view() {
                    debug_assert!(
                        object.as_buffer_view().is_some(),
                        "buffer view cell without the view capability"
                    );
                    debug_assert_eq!(
                        object.elements_malloc_bytes(),
                        0,
                        "buffer bytes belong to the buffer, not its views"
                    );
                }
                let stats = self.compartment_stats(object.compartment());
                match class {
                    ObjectClass::Function => stats.objects_gc_heap_function += thing_size,
                    ObjectClass::DenseArray => stats.objects_gc_heap_dense_array += thing_size,
                    ObjectClass::CrossCompartmentWrapper => {
                        stats.objects_gc_heap_cross_compartment_wrapper += thing_size
                    },
                    ObjectClass::Ordinary |
                    ObjectClass::ArrayBuffer |
                    ObjectClass::TypedArray |
                    ObjectClass::DataView => stats.objects_gc_heap_ordinary += thing_size,
                }
                stats.objects_malloc_heap_slots += object.slots_malloc_bytes();
                stats.objects_malloc_heap_elements += object.elements_malloc_bytes();
            },

            CellRef::String(string) => {
                let is_short = string.is_short();
                let chars_size = string.chars_malloc_bytes();
                let zone = self.current_zone();
                if is_short {
                    debug_assert_eq!(chars_size, 0, "short strings have no out-of-line chars");
                    zone.strings_short_gc_heap += thing_size;
                } else {
                    zone.strings_normal_gc_heap += thing_size;
                    zone.strings_normal_malloc_heap += chars_size;
                }

                // Hashing the contents is expensive; the coarse pass skips it
                // and this branch compiles out.
                if G::TRACK_STRING_CONTENTS {
                    let table = zone
                        .strings
                        .as_mut()
                        .expect("fine-grained zone record has no strings table");
                    if table.try_reserve(1).is_err() {
                        // Losing one string's detail beats losing the pass.
                        warn!("out of memory; string dropped from duplicate tracking");
                    } else {
                        let key = StringKey {
                            chars: string.chars(),
                            is_short,
                        };
                        table
                            .entry(key)
                            .and_modify(|info| info.add(thing_size, chars_size))
                            .or_insert_with(|| StringInfo::new(is_short, thing_size, chars_size));
                    }
                }
            },

            CellRef::Shape(shape) => {
                let table_size = shape.table_malloc_bytes();
                let kids_size = shape.kids_malloc_bytes();
                let global_parented = shape.global_parented();
                let stats = self.compartment_stats(shape.compartment());
                if shape.in_dictionary() {
                    stats.shapes_gc_heap_dict += thing_size;
                    // Kids are only meaningful for tree shapes.
                    stats.shapes_malloc_heap_dict_tables += table_size;
                } else {
                    if global_parented {
                        stats.shapes_gc_heap_tree_global_parented += thing_size;
                    } else {
                        stats.shapes_gc_heap_tree_non_global_parented += thing_size;
                    }
                    stats.shapes_malloc_heap_tree_tables += table_size;
                    stats.shapes_malloc_heap_tree_kids += kids_size;
                }
            },

            CellRef::BaseShape(base) => {
                let stats = self.compartment_stats(base.compartment());
                stats.shapes_gc_heap_base += thing_size;
            },

            CellRef::Script(script) => {
                // A source record is shared between scripts; only the first
                // script seen for a source pays for it.
                let source_bytes = if self.seen_sources.insert(script.source()) {
                    script.source_bytes()
                } else {
                    0
                };
                let stats = self.compartment_stats(script.compartment());
                stats.scripts_gc_heap += thing_size;
                stats.scripts_malloc_heap_data += script.data_malloc_bytes();
                stats.type_inference_type_scripts += script.type_script_malloc_bytes();
                stats.baseline_data += script.baseline_data_bytes();
                stats.baseline_stubs_fallback += script.baseline_fallback_stubs_bytes();
                stats.ion_data += script.ion_data_bytes();
                self.rt_stats.runtime.script_sources += source_bytes;
            },

            CellRef::LazyScript(lazy) => {
                let zone = self.current_zone();
                zone.lazy_scripts_gc_heap += thing_size;
                zone.lazy_scripts_malloc_heap += lazy.malloc_bytes();
            },

            CellRef::JitCode => {
                // The code bytes themselves belong to the executable
                // allocator; only the cell is on the GC heap.
                self.current_zone().jit_codes_gc_heap += thing_size;
            },

            CellRef::TypeObject(type_object) => {
                let zone = self.current_zone();
                zone.type_objects_gc_heap += thing_size;
                zone.type_objects_malloc_heap += type_object.malloc_bytes();
            },
        }

        // See visit_arena: this cell's bytes were pre-charged as unused.
        self.current_zone().unused_gc_things -= thing_size;
    }
}

/// Move strings whose aggregate size reaches `threshold` out of `zone`'s
/// bulk counters and into its notable list.
///
/// Runs at most once per record. The strings table is left in place; callers
/// merge the per-zone tables into the grand total afterwards.
pub fn find_notable_strings(zone: &mut ZoneStats, threshold: usize) {
    debug_assert!(
        zone.notable_strings.is_empty(),
        "notable strings were already extracted from this record"
    );

    let Some(table) = zone.strings.take() else {
        return;
    };
    for (key, info) in &table {
        if info.gc_heap + info.malloc_heap < threshold {
            continue;
        }
        if zone.notable_strings.try_reserve(1).is_err() {
            // The string stays in the bulk counters; nothing is lost from
            // the totals, only from the per-string breakdown.
            warn!("out of memory; notable string not extracted");
            continue;
        }
        zone.notable_strings.push(NotableStringInfo::new(key, *info));

        // The bytes move from a bulk bucket to a notable entry.
        if info.is_short {
            debug_assert_eq!(info.malloc_heap, 0);
            debug_assert!(zone.strings_short_gc_heap >= info.gc_heap);
            zone.strings_short_gc_heap -= info.gc_heap;
        } else {
            debug_assert!(zone.strings_normal_gc_heap >= info.gc_heap);
            debug_assert!(zone.strings_normal_malloc_heap >= info.malloc_heap);
            zone.strings_normal_gc_heap -= info.gc_heap;
            zone.strings_normal_malloc_heap -= info.malloc_heap;
        }
    }
    zone.strings = Some(table);
}
