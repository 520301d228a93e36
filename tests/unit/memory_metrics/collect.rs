/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use heap_traits::cell::ObjectClass;
use heap_traits::iterate::ChunkInfo;
use heap_traits::{ZoneId, ARENA_SIZE, CHUNK_ADMIN_BYTES, CHUNK_SIZE};
use memory_metrics::{
    add_size_of_tab, collect_runtime_stats, NotableStringInfo, RuntimeStats, TabSizes, ZoneStats,
};

use crate::fixture::{
    arena, base_shape, jit_code, lazy_script, normal_string, object, short_string, FakeCell,
    FakeCompartment, FakeHeap, FakeObject, FakeScript, FakeZone,
};

/// Two zones in one dirty chunk of a three-chunk heap: a duplicated string
/// spread across both zones, one string big enough to be notable on its own,
/// and a script source shared by two scripts.
fn sample_heap() -> FakeHeap {
    let big = "z".repeat(9000);

    let mut zone1 = FakeZone::new(1);
    let mut compartment1 = FakeCompartment::new(1);
    compartment1.sizes.compartment_object = 128;
    compartment1.sizes.compartment_shape_tables = 96;
    compartment1.sizes.baseline_stubs_optimized = 512;
    zone1.compartments.push(compartment1);
    zone1.arenas.push(arena(
        64,
        vec![
            object(1, ObjectClass::Ordinary),
            FakeCell::Object(FakeObject {
                slots_malloc_bytes: 40,
                ..FakeObject::new(1, ObjectClass::Ordinary)
            }),
            object(1, ObjectClass::Function),
            normal_string("dup", 2900),
            normal_string("dup", 2900),
            normal_string(&big, 9000),
            jit_code(),
        ],
    ));

    let mut zone2 = FakeZone::new(2);
    zone2.compartments.push(FakeCompartment::new(2));
    zone2.arenas.push(arena(
        64,
        vec![
            normal_string("dup", 2900),
            short_string("s"),
            lazy_script(32),
            FakeCell::Script(FakeScript {
                data_malloc_bytes: 48,
                source_bytes: 100,
                ..FakeScript::new(2, 7)
            }),
            FakeCell::Script(FakeScript {
                data_malloc_bytes: 48,
                source_bytes: 100,
                ..FakeScript::new(2, 7)
            }),
            base_shape(2),
        ],
    ));

    FakeHeap {
        total_chunks: 3,
        unused_chunks: 2,
        chunks: vec![ChunkInfo {
            decommitted_arenas: 2,
        }],
        zones: vec![zone1, zone2],
    }
}

fn collect(heap: &FakeHeap) -> RuntimeStats {
    let mut rt_stats = RuntimeStats::default();
    collect_runtime_stats(heap, &mut rt_stats).expect("collection failed");
    rt_stats
}

fn notable(zone: &ZoneStats, length: usize) -> &NotableStringInfo {
    zone.notable_strings
        .iter()
        .find(|notable| notable.length == length)
        .expect("expected a notable string of that length")
}

#[test]
fn empty_heaps_collect_to_zero() {
    let heap = FakeHeap {
        total_chunks: 0,
        unused_chunks: 0,
        chunks: vec![],
        zones: vec![],
    };
    let rt_stats = collect(&heap);

    assert_eq!(rt_stats.gc_heap_chunk_total, 0);
    assert_eq!(rt_stats.gc_heap_unused_chunks, 0);
    assert_eq!(rt_stats.gc_heap_unused_arenas, 0);
    assert_eq!(rt_stats.gc_heap_decommitted_arenas, 0);
    assert_eq!(rt_stats.gc_heap_chunk_admin, 0);
    assert_eq!(rt_stats.gc_heap_gc_things, 0);
    assert!(rt_stats.zone_stats.is_empty());
    assert!(rt_stats.compartment_stats.is_empty());
    assert!(rt_stats.z_totals.strings.is_none());
    assert!(rt_stats.z_totals.notable_strings.is_empty());
}

#[test]
fn chunk_figures_scale_by_chunk_and_arena_size() {
    let rt_stats = collect(&sample_heap());

    assert_eq!(rt_stats.gc_heap_chunk_total, 3 * CHUNK_SIZE);
    assert_eq!(rt_stats.gc_heap_unused_chunks, 2 * CHUNK_SIZE);
    assert_eq!(rt_stats.gc_heap_decommitted_arenas, 2 * ARENA_SIZE);
    // Only the one dirty chunk pays header overhead.
    assert_eq!(rt_stats.gc_heap_chunk_admin, CHUNK_ADMIN_BYTES);
}

#[test]
fn totals_reconcile_with_the_chunk_figures() {
    let rt_stats = collect(&sample_heap());

    assert_eq!(rt_stats.z_totals.gc_heap_arena_admin, 128);
    assert_eq!(rt_stats.z_totals.unused_gc_things, 7232);
    assert_eq!(rt_stats.gc_heap_gc_things, 832);
    // Two arenas, covered exactly.
    assert_eq!(
        rt_stats.z_totals.gc_heap_arena_admin +
            rt_stats.z_totals.unused_gc_things +
            rt_stats.gc_heap_gc_things,
        2 * ARENA_SIZE
    );

    let accounted = rt_stats.gc_heap_decommitted_arenas +
        rt_stats.gc_heap_unused_chunks +
        rt_stats.gc_heap_unused_arenas +
        rt_stats.gc_heap_chunk_admin +
        rt_stats.z_totals.gc_heap_arena_admin +
        rt_stats.z_totals.unused_gc_things +
        rt_stats.gc_heap_gc_things;
    assert_eq!(
        accounted, rt_stats.gc_heap_chunk_total,
        "every mapped byte lands in exactly one bucket"
    );
}

#[test]
fn duplicates_merge_across_zones_in_the_totals() {
    let rt_stats = collect(&sample_heap());

    // Per zone, "dup" stays below the notable threshold; only the grand
    // total sees all three copies at once.
    let zone1 = &rt_stats.zone_stats[0];
    assert_eq!(zone1.notable_strings.len(), 1);
    assert_eq!(notable(zone1, 9000).info.malloc_heap, 9000);
    assert_eq!(zone1.strings_normal_gc_heap, 128);
    assert_eq!(zone1.strings_normal_malloc_heap, 5800);

    let zone2 = &rt_stats.zone_stats[1];
    assert!(zone2.notable_strings.is_empty());
    assert_eq!(zone2.strings_normal_gc_heap, 64);
    assert_eq!(zone2.strings_normal_malloc_heap, 2900);
    assert_eq!(zone2.strings_short_gc_heap, 64);

    let totals = &rt_stats.z_totals;
    assert_eq!(totals.notable_strings.len(), 2);
    let dup = notable(totals, 3);
    assert_eq!(dup.info.num_copies, 3);
    assert_eq!(dup.info.gc_heap, 192);
    assert_eq!(dup.info.malloc_heap, 8700);
    assert_eq!(dup.sample, "dup");
    let big = notable(totals, 9000);
    assert_eq!(big.info.num_copies, 1);
    assert_eq!(big.sample.len(), 1024);

    // With both strings extracted, the bulk counters drain completely.
    assert_eq!(totals.strings_normal_gc_heap, 0);
    assert_eq!(totals.strings_normal_malloc_heap, 0);
    assert_eq!(totals.strings_short_gc_heap, 64);

    // The per-zone tables are consumed by the merge, never copied.
    assert!(rt_stats.zone_stats.iter().all(|zone| zone.strings.is_none()));
    assert!(totals.strings.is_none());
}

#[test]
fn compartment_totals_fold_the_self_reported_tables() {
    let rt_stats = collect(&sample_heap());

    assert_eq!(rt_stats.zone_stats.len(), 2);
    assert_eq!(rt_stats.compartment_stats.len(), 2);

    let totals = &rt_stats.c_totals;
    assert_eq!(totals.objects_gc_heap_ordinary, 128);
    assert_eq!(totals.objects_gc_heap_function, 64);
    assert_eq!(totals.objects_malloc_heap_slots, 40);
    assert_eq!(totals.shapes_gc_heap_base, 64);
    assert_eq!(totals.scripts_gc_heap, 128);
    assert_eq!(totals.scripts_malloc_heap_data, 96);

    assert_eq!(totals.compartment_object, 128);
    assert_eq!(totals.shapes_malloc_heap_compartment_tables, 96);
    assert_eq!(totals.baseline_stubs_optimized, 512);

    assert_eq!(
        rt_stats.runtime.script_sources, 100,
        "two scripts, one source record"
    );
}

#[test]
#[cfg(debug_assertions)]
#[should_panic]
fn collecting_into_a_used_record_is_a_bug() {
    let heap = sample_heap();
    let mut rt_stats = RuntimeStats::default();
    collect_runtime_stats(&heap, &mut rt_stats).expect("collection failed");
    let _ = collect_runtime_stats(&heap, &mut rt_stats);
}

#[test]
fn tab_sizes_bucket_by_kind() {
    let mut decoy = FakeZone::new(1);
    decoy.compartments.push(FakeCompartment::new(1));
    decoy
        .arenas
        .push(arena(64, vec![object(1, ObjectClass::Ordinary)]));

    let mut target = FakeZone::new(2);
    target.type_pool_bytes = 512;
    target.compartments.push(FakeCompartment::new(2));
    target.arenas.push(arena(
        64,
        vec![
            FakeCell::Object(FakeObject {
                slots_malloc_bytes: 40,
                elements_malloc_bytes: 24,
                ..FakeObject::new(2, ObjectClass::Ordinary)
            }),
            normal_string("one", 16),
            normal_string("two", 16),
            short_string("s"),
            jit_code(),
            base_shape(2),
        ],
    ));
    let heap = FakeHeap::new(vec![decoy, target]);

    let mut sizes = TabSizes::default();
    add_size_of_tab(&heap, ZoneId(2), &mut sizes).expect("tab measurement failed");
    assert_eq!(
        sizes,
        TabSizes {
            objects: 64 + 40 + 24,
            strings: 64 + 2 * 64 + 2 * 16,
            // Arena admin, unused space, the JIT code cell, the type pool
            // and the base shape.
            other: 64 + 3648 + 64 + 512 + 64,
        }
    );

    // A second measurement accumulates; callers sum tabs into one record.
    add_size_of_tab(&heap, ZoneId(2), &mut sizes).expect("tab measurement failed");
    assert_eq!(
        sizes,
        TabSizes {
            objects: 2 * 128,
            strings: 2 * 224,
            other: 2 * 4352,
        }
    );
}
