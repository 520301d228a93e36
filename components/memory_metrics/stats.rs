/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The records an accounting pass fills in.
//!
//! A pass produces one [`ZoneStats`] per zone and one [`CompartmentStats`]
//! per compartment, then folds them into the grand totals held by
//! [`RuntimeStats`]. All counters are bytes. The records are transient: they
//! observe the heap, they never own any part of it.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use heap_traits::iterate::CompartmentTableSizes;
use heap_traits::{CompartmentId, ZoneId};
use rustc_hash::FxHashMap;

/// Strings whose total size (cell plus character storage) reaches this many
/// bytes are reported individually instead of in the bulk string counters.
/// Also the cutoff below which report leaves fold into a sundries bucket.
pub const MEMORY_REPORTING_SUNDRIES_THRESHOLD: usize = 8 * 1024;

/// How many bytes of a notable string's contents are kept as its sample.
pub const MAX_STRING_SAMPLE_BYTES: usize = 1024;

/// Identity of a string's contents for duplicate aggregation.
///
/// Hashing and equality go through the characters, so distinct cells with
/// equal contents share one entry. Short and normal cells never merge: their
/// bytes live in different bulk counters.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StringKey {
    pub chars: Arc<str>,
    pub is_short: bool,
}

/// Aggregated sizes of every copy of one string seen by a pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StringInfo {
    pub is_short: bool,
    /// Bytes of the string cells on the GC heap.
    pub gc_heap: usize,
    /// Bytes of out-of-line character storage. Always 0 for short strings.
    pub malloc_heap: usize,
    /// How many copies have been seen.
    pub num_copies: usize,
}

impl StringInfo {
    pub fn new(is_short: bool, gc_size: usize, malloc_size: usize) -> StringInfo {
        StringInfo {
            is_short,
            gc_heap: gc_size,
            malloc_heap: malloc_size,
            num_copies: 1,
        }
    }

    /// Record one more copy of this string.
    pub fn add(&mut self, gc_size: usize, malloc_size: usize) {
        self.gc_heap += gc_size;
        self.malloc_heap += malloc_size;
        self.num_copies += 1;
    }

    /// Fold another zone's entry for the same string into this one.
    pub fn merge(&mut self, other: &StringInfo) {
        debug_assert_eq!(self.is_short, other.is_short);
        self.gc_heap += other.gc_heap;
        self.malloc_heap += other.malloc_heap;
        self.num_copies += other.num_copies;
    }
}

/// A string big enough to be reported on its own.
#[derive(Clone, Debug)]
pub struct NotableStringInfo {
    /// The contents, truncated to at most [`MAX_STRING_SAMPLE_BYTES`]. The
    /// cut lands on a character boundary, so the sample can be shorter.
    pub sample: String,
    /// The untruncated length of the contents, in bytes.
    pub length: usize,
    pub info: StringInfo,
}

impl NotableStringInfo {
    pub fn new(key: &StringKey, info: StringInfo) -> NotableStringInfo {
        let chars = &*key.chars;
        let mut end = chars.len().min(MAX_STRING_SAMPLE_BYTES);
        while !chars.is_char_boundary(end) {
            end -= 1;
        }
        NotableStringInfo {
            sample: chars[..end].to_owned(),
            length: chars.len(),
            info,
        }
    }
}

pub type StringsHashMap = FxHashMap<StringKey, StringInfo>;

/// Byte counters for one zone, or the grand total over all zones.
#[derive(Debug, Default)]
pub struct ZoneStats {
    pub id: ZoneId,
    pub gc_heap_arena_admin: usize,
    pub unused_gc_things: usize,
    pub strings_short_gc_heap: usize,
    pub strings_normal_gc_heap: usize,
    pub strings_normal_malloc_heap: usize,
    pub lazy_scripts_gc_heap: usize,
    pub lazy_scripts_malloc_heap: usize,
    pub jit_codes_gc_heap: usize,
    pub type_objects_gc_heap: usize,
    pub type_objects_malloc_heap: usize,
    pub type_pool: usize,
    /// Fine-grained passes only: per-contents aggregation used to spot
    /// duplicated and notable strings. Dropped once merged into the totals.
    pub strings: Option<StringsHashMap>,
    pub notable_strings: Vec<NotableStringInfo>,
}

impl ZoneStats {
    pub fn new_fine_grained(id: ZoneId) -> ZoneStats {
        ZoneStats {
            id,
            strings: Some(StringsHashMap::default()),
            ..ZoneStats::default()
        }
    }

    pub fn new_coarse_grained(id: ZoneId) -> ZoneStats {
        ZoneStats {
            id,
            ..ZoneStats::default()
        }
    }

    /// Fold `other`'s counters into `self`, leaving both strings tables
    /// alone. The caller decides separately what happens to the tables.
    ///
    /// Must run before `other`'s notable strings are extracted; the notable
    /// list is never merged.
    pub fn add_ignoring_strings(&mut self, other: &ZoneStats) {
        debug_assert!(other.notable_strings.is_empty());
        // Destructured in full so a newly added counter cannot be missed.
        let ZoneStats {
            id: _,
            gc_heap_arena_admin,
            unused_gc_things,
            strings_short_gc_heap,
            strings_normal_gc_heap,
            strings_normal_malloc_heap,
            lazy_scripts_gc_heap,
            lazy_scripts_malloc_heap,
            jit_codes_gc_heap,
            type_objects_gc_heap,
            type_objects_malloc_heap,
            type_pool,
            strings: _,
            notable_strings: _,
        } = other;
        self.gc_heap_arena_admin += gc_heap_arena_admin;
        self.unused_gc_things += unused_gc_things;
        self.strings_short_gc_heap += strings_short_gc_heap;
        self.strings_normal_gc_heap += strings_normal_gc_heap;
        self.strings_normal_malloc_heap += strings_normal_malloc_heap;
        self.lazy_scripts_gc_heap += lazy_scripts_gc_heap;
        self.lazy_scripts_malloc_heap += lazy_scripts_malloc_heap;
        self.jit_codes_gc_heap += jit_codes_gc_heap;
        self.type_objects_gc_heap += type_objects_gc_heap;
        self.type_objects_malloc_heap += type_objects_malloc_heap;
        self.type_pool += type_pool;
    }

    /// Merge another zone's strings table into this one's, consuming it.
    ///
    /// Panics if `self` has no table of its own.
    pub fn add_strings(&mut self, other: &mut ZoneStats) {
        let table = self
            .strings
            .as_mut()
            .expect("merging strings into a record that has no table");
        let Some(other_table) = other.strings.take() else {
            return;
        };
        for (key, info) in other_table {
            match table.entry(key) {
                Entry::Occupied(mut e) => e.get_mut().merge(&info),
                Entry::Vacant(e) => {
                    e.insert(info);
                },
            }
        }
    }

    /// Fold everything from `other` into `self`, strings table included.
    pub fn add(&mut self, other: &mut ZoneStats) {
        self.add_ignoring_strings(other);
        if other.strings.is_some() {
            self.add_strings(other);
        }
    }

    /// Bytes of live cells this record attributes to the GC heap, the
    /// already-extracted notable strings included.
    pub fn size_of_live_gc_things(&self) -> usize {
        let ZoneStats {
            id: _,
            gc_heap_arena_admin: _,
            unused_gc_things: _,
            strings_short_gc_heap,
            strings_normal_gc_heap,
            strings_normal_malloc_heap: _,
            lazy_scripts_gc_heap,
            lazy_scripts_malloc_heap: _,
            jit_codes_gc_heap,
            type_objects_gc_heap,
            type_objects_malloc_heap: _,
            type_pool: _,
            strings: _,
            notable_strings,
        } = self;
        let mut total = strings_short_gc_heap +
            strings_normal_gc_heap +
            lazy_scripts_gc_heap +
            jit_codes_gc_heap +
            type_objects_gc_heap;
        for notable in notable_strings {
            total += notable.info.gc_heap;
        }
        total
    }

    /// Fold this record into the coarse tab buckets. Only used on the coarse
    /// path, which never extracts notable strings.
    pub fn add_to_tab_sizes(&self, sizes: &mut TabSizes) {
        debug_assert!(self.notable_strings.is_empty());
        let ZoneStats {
            id: _,
            gc_heap_arena_admin,
            unused_gc_things,
            strings_short_gc_heap,
            strings_normal_gc_heap,
            strings_normal_malloc_heap,
            lazy_scripts_gc_heap,
            lazy_scripts_malloc_heap,
            jit_codes_gc_heap,
            type_objects_gc_heap,
            type_objects_malloc_heap,
            type_pool,
            strings: _,
            notable_strings: _,
        } = self;
        sizes.strings +=
            strings_short_gc_heap + strings_normal_gc_heap + strings_normal_malloc_heap;
        sizes.other += gc_heap_arena_admin +
            unused_gc_things +
            lazy_scripts_gc_heap +
            lazy_scripts_malloc_heap +
            jit_codes_gc_heap +
            type_objects_gc_heap +
            type_objects_malloc_heap +
            type_pool;
    }
}

/// Byte counters for one compartment, or the grand total over all of them.
#[derive(Debug, Default)]
pub struct CompartmentStats {
    pub id: CompartmentId,
    pub objects_gc_heap_ordinary: usize,
    pub objects_gc_heap_function: usize,
    pub objects_gc_heap_dense_array: usize,
    pub objects_gc_heap_cross_compartment_wrapper: usize,
    pub objects_malloc_heap_slots: usize,
    pub objects_malloc_heap_elements: usize,
    pub shapes_gc_heap_tree_global_parented: usize,
    pub shapes_gc_heap_tree_non_global_parented: usize,
    pub shapes_gc_heap_dict: usize,
    pub shapes_gc_heap_base: usize,
    pub shapes_malloc_heap_tree_tables: usize,
    pub shapes_malloc_heap_dict_tables: usize,
    pub shapes_malloc_heap_tree_kids: usize,
    pub shapes_malloc_heap_compartment_tables: usize,
    pub scripts_gc_heap: usize,
    pub scripts_malloc_heap_data: usize,
    pub baseline_data: usize,
    pub baseline_stubs_fallback: usize,
    pub baseline_stubs_optimized: usize,
    pub ion_data: usize,
    pub type_inference_type_scripts: usize,
    pub type_inference_allocation_site_tables: usize,
    pub type_inference_array_type_tables: usize,
    pub type_inference_object_type_tables: usize,
    pub compartment_object: usize,
    pub cross_compartment_wrappers_table: usize,
    pub regexp_compartment: usize,
    pub debuggees_set: usize,
}

impl CompartmentStats {
    pub fn new(id: CompartmentId) -> CompartmentStats {
        CompartmentStats {
            id,
            ..CompartmentStats::default()
        }
    }

    /// Fold the table sizes a compartment reports about itself into the
    /// matching counters.
    pub fn add_compartment_table_sizes(&mut self, sizes: &CompartmentTableSizes) {
        let CompartmentTableSizes {
            compartment_object,
            cross_compartment_wrappers_table,
            regexp_compartment,
            debuggees_set,
            compartment_shape_tables,
            type_inference_allocation_site_tables,
            type_inference_array_type_tables,
            type_inference_object_type_tables,
            baseline_stubs_optimized,
        } = sizes;
        self.compartment_object += compartment_object;
        self.cross_compartment_wrappers_table += cross_compartment_wrappers_table;
        self.regexp_compartment += regexp_compartment;
        self.debuggees_set += debuggees_set;
        self.shapes_malloc_heap_compartment_tables += compartment_shape_tables;
        self.type_inference_allocation_site_tables += type_inference_allocation_site_tables;
        self.type_inference_array_type_tables += type_inference_array_type_tables;
        self.type_inference_object_type_tables += type_inference_object_type_tables;
        self.baseline_stubs_optimized += baseline_stubs_optimized;
    }

    pub fn add(&mut self, other: &CompartmentStats) {
        // Destructured in full so a newly added counter cannot be missed.
        let CompartmentStats {
            id: _,
            objects_gc_heap_ordinary,
            objects_gc_heap_function,
            objects_gc_heap_dense_array,
            objects_gc_heap_cross_compartment_wrapper,
            objects_malloc_heap_slots,
            objects_malloc_heap_elements,
            shapes_gc_heap_tree_global_parented,
            shapes_gc_heap_tree_non_global_parented,
            shapes_gc_heap_dict,
            shapes_gc_heap_base,
            shapes_malloc_heap_tree_tables,
            shapes_malloc_heap_dict_tables,
            shapes_malloc_heap_tree_kids,
            shapes_malloc_heap_compartment_tables,
            scripts_gc_heap,
            scripts_malloc_heap_data,
            baseline_data,
            baseline_stubs_fallback,
            baseline_stubs_optimized,
            ion_data,
            type_inference_type_scripts,
            type_inference_allocation_site_tables,
            type_inference_array_type_tables,
            type_inference_object_type_tables,
            compartment_object,
            cross_compartment_wrappers_table,
            regexp_compartment,
            debuggees_set,
        } = other;
        self.objects_gc_heap_ordinary += objects_gc_heap_ordinary;
        self.objects_gc_heap_function += objects_gc_heap_function;
        self.objects_gc_heap_dense_array += objects_gc_heap_dense_array;
        self.objects_gc_heap_cross_compartment_wrapper +=
            objects_gc_heap_cross_compartment_wrapper;
        self.objects_malloc_heap_slots += objects_malloc_heap_slots;
        self.objects_malloc_heap_elements += objects_malloc_heap_elements;
        self.shapes_gc_heap_tree_global_parented += shapes_gc_heap_tree_global_parented;
        self.shapes_gc_heap_tree_non_global_parented += shapes_gc_heap_tree_non_global_parented;
        self.shapes_gc_heap_dict += shapes_gc_heap_dict;
        self.shapes_gc_heap_base += shapes_gc_heap_base;
        self.shapes_malloc_heap_tree_tables += shapes_malloc_heap_tree_tables;
        self.shapes_malloc_heap_dict_tables += shapes_malloc_heap_dict_tables;
        self.shapes_malloc_heap_tree_kids += shapes_malloc_heap_tree_kids;
        self.shapes_malloc_heap_compartment_tables += shapes_malloc_heap_compartment_tables;
        self.scripts_gc_heap += scripts_gc_heap;
        self.scripts_malloc_heap_data += scripts_malloc_heap_data;
        self.baseline_data += baseline_data;
        self.baseline_stubs_fallback += baseline_stubs_fallback;
        self.baseline_stubs_optimized += baseline_stubs_optimized;
        self.ion_data += ion_data;
        self.type_inference_type_scripts += type_inference_type_scripts;
        self.type_inference_allocation_site_tables += type_inference_allocation_site_tables;
        self.type_inference_array_type_tables += type_inference_array_type_tables;
        self.type_inference_object_type_tables += type_inference_object_type_tables;
        self.compartment_object += compartment_object;
        self.cross_compartment_wrappers_table += cross_compartment_wrappers_table;
        self.regexp_compartment += regexp_compartment;
        self.debuggees_set += debuggees_set;
    }

    /// Bytes of live cells this record attributes to the GC heap.
    pub fn size_of_live_gc_things(&self) -> usize {
        self.objects_gc_heap_ordinary +
            self.objects_gc_heap_function +
            self.objects_gc_heap_dense_array +
            self.objects_gc_heap_cross_compartment_wrapper +
            self.shapes_gc_heap_tree_global_parented +
            self.shapes_gc_heap_tree_non_global_parented +
            self.shapes_gc_heap_dict +
            self.shapes_gc_heap_base +
            self.scripts_gc_heap
    }

    /// Fold this record into the coarse tab buckets.
    pub fn add_to_tab_sizes(&self, sizes: &mut TabSizes) {
        let CompartmentStats {
            id: _,
            objects_gc_heap_ordinary,
            objects_gc_heap_function,
            objects_gc_heap_dense_array,
            objects_gc_heap_cross_compartment_wrapper,
            objects_malloc_heap_slots,
            objects_malloc_heap_elements,
            shapes_gc_heap_tree_global_parented,
            shapes_gc_heap_tree_non_global_parented,
            shapes_gc_heap_dict,
            shapes_gc_heap_base,
            shapes_malloc_heap_tree_tables,
            shapes_malloc_heap_dict_tables,
            shapes_malloc_heap_tree_kids,
            shapes_malloc_heap_compartment_tables,
            scripts_gc_heap,
            scripts_malloc_heap_data,
            baseline_data,
            baseline_stubs_fallback,
            baseline_stubs_optimized,
            ion_data,
            type_inference_type_scripts,
            type_inference_allocation_site_tables,
            type_inference_array_type_tables,
            type_inference_object_type_tables,
            compartment_object,
            cross_compartment_wrappers_table,
            regexp_compartment,
            debuggees_set,
        } = self;
        sizes.objects += objects_gc_heap_ordinary +
            objects_gc_heap_function +
            objects_gc_heap_dense_array +
            objects_gc_heap_cross_compartment_wrapper +
            objects_malloc_heap_slots +
            objects_malloc_heap_elements;
        sizes.other += shapes_gc_heap_tree_global_parented +
            shapes_gc_heap_tree_non_global_parented +
            shapes_gc_heap_dict +
            shapes_gc_heap_base +
            shapes_malloc_heap_tree_tables +
            shapes_malloc_heap_dict_tables +
            shapes_malloc_heap_tree_kids +
            shapes_malloc_heap_compartment_tables +
            scripts_gc_heap +
            scripts_malloc_heap_data +
            baseline_data +
            baseline_stubs_fallback +
            baseline_stubs_optimized +
            ion_data +
            type_inference_type_scripts +
            type_inference_allocation_site_tables +
            type_inference_array_type_tables +
            type_inference_object_type_tables +
            compartment_object +
            cross_compartment_wrappers_table +
            regexp_compartment +
            debuggees_set;
    }
}

/// Runtime-wide measurements that are not tied to any zone or compartment.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeSizes {
    /// Bytes of script source records, each counted once no matter how many
    /// scripts share it.
    pub script_sources: usize,
}

/// The coarse, tab-scoped buckets filled by `add_size_of_tab`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TabSizes {
    pub objects: usize,
    pub strings: usize,
    pub other: usize,
}

/// A full snapshot of the heap, as collected by `collect_runtime_stats`.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    /// Bytes of all chunks the GC has mapped.
    pub gc_heap_chunk_total: usize,
    /// Bytes of arenas whose pages have been returned to the OS.
    pub gc_heap_decommitted_arenas: usize,
    /// Bytes of chunks with no live arenas.
    pub gc_heap_unused_chunks: usize,
    /// Bytes of committed arenas holding no live cells, derived by
    /// subtraction at the end of a pass.
    pub gc_heap_unused_arenas: usize,
    /// Chunk header overhead across all dirty chunks.
    pub gc_heap_chunk_admin: usize,
    /// Bytes of all live cells.
    pub gc_heap_gc_things: usize,
    pub runtime: RuntimeSizes,
    pub zone_stats: Vec<ZoneStats>,
    pub compartment_stats: Vec<CompartmentStats>,
    pub z_totals: ZoneStats,
    pub c_totals: CompartmentStats,
}
