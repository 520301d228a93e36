/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Rendering a collected snapshot as about-memory style reports.
//!
//! Paths are vectors of segments; consumers join them with `/`. To keep the
//! output readable, per-zone and per-compartment leaves smaller than the
//! sundries threshold fold into that record's `sundries/gc-heap` or
//! `sundries/malloc-heap` bucket, and empty leaves are skipped entirely.
//! Notable strings always stand alone.

use serde::{Deserialize, Serialize};

use crate::stats::{
    CompartmentStats, RuntimeStats, ZoneStats, MEMORY_REPORTING_SUNDRIES_THRESHOLD,
};

/// A single memory-related measurement.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Report {
    /// The identifying path for this report.
    pub path: Vec<String>,

    /// The size, in bytes.
    pub size: usize,
}

/// An easy way to build a path for a report.
#[macro_export]
macro_rules! path {
    ($($x:expr),*) => {{
        use std::borrow::ToOwned;
        vec![$( $x.to_owned() ),*]
    }}
}

struct ReportBuilder {
    reports: Vec<Report>,
}

impl ReportBuilder {
    fn new() -> ReportBuilder {
        ReportBuilder {
            reports: Vec::new(),
        }
    }

    /// Record one leaf. Empty leaves are skipped.
    fn report(&mut self, base: &[String], leaf: &[&str], size: usize) {
        if size == 0 {
            return;
        }
        let mut path = base.to_vec();
        path.extend(leaf.iter().map(|segment| (*segment).to_owned()));
        self.reports.push(Report { path, size });
    }

    /// Record a leaf big enough to stand alone, or fold it into the given
    /// sundries bucket.
    fn sundry(&mut self, base: &[String], leaf: &[&str], size: usize, sundries: &mut usize) {
        if size >= MEMORY_REPORTING_SUNDRIES_THRESHOLD {
            self.report(base, leaf, size);
        } else {
            *sundries += size;
        }
    }

    fn zone_reports(&mut self, zone: &ZoneStats) {
        let ZoneStats {
            id,
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
            notable_strings,
        } = zone;

        let base: Vec<String> = path!["zones", format!("zone({})", id.0)];
        let mut gc = 0;
        let mut malloc = 0;

        self.sundry(&base, &["gc-heap-arena-admin"], *gc_heap_arena_admin, &mut gc);
        self.sundry(&base, &["unused-gc-things"], *unused_gc_things, &mut gc);
        self.sundry(
            &base,
            &["strings", "short", "gc-heap"],
            *strings_short_gc_heap,
            &mut gc,
        );
        self.sundry(
            &base,
            &["strings", "normal", "gc-heap"],
            *strings_normal_gc_heap,
            &mut gc,
        );
        self.sundry(
            &base,
            &["strings", "normal", "malloc-heap"],
            *strings_normal_malloc_heap,
            &mut malloc,
        );
        self.sundry(&base, &["lazy-scripts", "gc-heap"], *lazy_scripts_gc_heap, &mut gc);
        self.sundry(
            &base,
            &["lazy-scripts", "malloc-heap"],
            *lazy_scripts_malloc_heap,
            &mut malloc,
        );
        self.sundry(&base, &["jit-codes-gc-heap"], *jit_codes_gc_heap, &mut gc);
        self.sundry(&base, &["type-objects", "gc-heap"], *type_objects_gc_heap, &mut gc);
        self.sundry(
            &base,
            &["type-objects", "malloc-heap"],
            *type_objects_malloc_heap,
            &mut malloc,
        );
        self.sundry(&base, &["type-pool"], *type_pool, &mut malloc);

        // Notable strings stand alone; by construction each one reaches the
        // sundries threshold anyway.
        for notable in notable_strings {
            let mut notable_base = base.clone();
            notable_base.push("strings".to_owned());
            notable_base.push("notable".to_owned());
            notable_base.push(format!(
                "string(length={}, copies={}, {:?})",
                notable.length, notable.info.num_copies, notable.sample
            ));
            self.report(&notable_base, &["gc-heap"], notable.info.gc_heap);
            self.report(&notable_base, &["malloc-heap"], notable.info.malloc_heap);
        }

        self.report(&base, &["sundries", "gc-heap"], gc);
        self.report(&base, &["sundries", "malloc-heap"], malloc);
    }

    fn compartment_reports(&mut self, compartment: &CompartmentStats) {
        let CompartmentStats {
            id,
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
        } = compartment;

        let base: Vec<String> = path!["compartments", format!("compartment({})", id.0)];
        let mut gc = 0;
        let mut malloc = 0;

        self.sundry(
            &base,
            &["objects", "gc-heap", "ordinary"],
            *objects_gc_heap_ordinary,
            &mut gc,
        );
        self.sundry(
            &base,
            &["objects", "gc-heap", "function"],
            *objects_gc_heap_function,
            &mut gc,
        );
        self.sundry(
            &base,
            &["objects", "gc-heap", "dense-array"],
            *objects_gc_heap_dense_array,
            &mut gc,
        );
        self.sundry(
            &base,
            &["objects", "gc-heap", "cross-compartment-wrapper"],
            *objects_gc_heap_cross_compartment_wrapper,
            &mut gc,
        );
        self.sundry(
            &base,
            &["objects", "malloc-heap", "slots"],
            *objects_malloc_heap_slots,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["objects", "malloc-heap", "elements"],
            *objects_malloc_heap_elements,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["shapes", "gc-heap", "tree-global-parented"],
            *shapes_gc_heap_tree_global_parented,
            &mut gc,
        );
        self.sundry(
            &base,
            &["shapes", "gc-heap", "tree-non-global-parented"],
            *shapes_gc_heap_tree_non_global_parented,
            &mut gc,
        );
        self.sundry(&base, &["shapes", "gc-heap", "dict"], *shapes_gc_heap_dict, &mut gc);
        self.sundry(&base, &["shapes", "gc-heap", "base"], *shapes_gc_heap_base, &mut gc);
        self.sundry(
            &base,
            &["shapes", "malloc-heap", "tree-tables"],
            *shapes_malloc_heap_tree_tables,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["shapes", "malloc-heap", "dict-tables"],
            *shapes_malloc_heap_dict_tables,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["shapes", "malloc-heap", "tree-kids"],
            *shapes_malloc_heap_tree_kids,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["shapes", "malloc-heap", "compartment-tables"],
            *shapes_malloc_heap_compartment_tables,
            &mut malloc,
        );
        self.sundry(&base, &["scripts", "gc-heap"], *scripts_gc_heap, &mut gc);
        self.sundry(
            &base,
            &["scripts", "malloc-heap", "data"],
            *scripts_malloc_heap_data,
            &mut malloc,
        );
        self.sundry(&base, &["baseline", "data"], *baseline_data, &mut malloc);
        self.sundry(
            &base,
            &["baseline", "stubs", "fallback"],
            *baseline_stubs_fallback,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["baseline", "stubs", "optimized"],
            *baseline_stubs_optimized,
            &mut malloc,
        );
        self.sundry(&base, &["ion-data"], *ion_data, &mut malloc);
        self.sundry(
            &base,
            &["type-inference", "type-scripts"],
            *type_inference_type_scripts,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["type-inference", "allocation-site-tables"],
            *type_inference_allocation_site_tables,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["type-inference", "array-type-tables"],
            *type_inference_array_type_tables,
            &mut malloc,
        );
        self.sundry(
            &base,
            &["type-inference", "object-type-tables"],
            *type_inference_object_type_tables,
            &mut malloc,
        );
        self.sundry(&base, &["compartment-object"], *compartment_object, &mut malloc);
        self.sundry(
            &base,
            &["cross-compartment-wrappers-table"],
            *cross_compartment_wrappers_table,
            &mut malloc,
        );
        self.sundry(&base, &["regexp-compartment"], *regexp_compartment, &mut malloc);
        self.sundry(&base, &["debuggees-set"], *debuggees_set, &mut malloc);

        self.report(&base, &["sundries", "gc-heap"], gc);
        self.report(&base, &["sundries", "malloc-heap"], malloc);
    }
}

/// Render a collected snapshot as reports.
pub fn runtime_stats_reports(rt_stats: &RuntimeStats) -> Vec<Report> {
    let mut builder = ReportBuilder::new();

    let gc_heap: Vec<String> = path!["gc-heap"];
    builder.report(&gc_heap, &["unused-chunks"], rt_stats.gc_heap_unused_chunks);
    builder.report(&gc_heap, &["unused-arenas"], rt_stats.gc_heap_unused_arenas);
    builder.report(
        &gc_heap,
        &["decommitted-arenas"],
        rt_stats.gc_heap_decommitted_arenas,
    );
    builder.report(&gc_heap, &["chunk-admin"], rt_stats.gc_heap_chunk_admin);

    for zone in &rt_stats.zone_stats {
        builder.zone_reports(zone);
    }
    for compartment in &rt_stats.compartment_stats {
        builder.compartment_reports(compartment);
    }

    let runtime: Vec<String> = path!["runtime"];
    builder.report(&runtime, &["script-sources"], rt_stats.runtime.script_sources);

    builder.reports
}
