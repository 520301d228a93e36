/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use heap_traits::{CompartmentId, ZoneId};
use memory_metrics::{
    runtime_stats_reports, CompartmentStats, NotableStringInfo, Report, RuntimeStats, StringInfo,
    StringKey, ZoneStats,
};

fn size_of(reports: &[Report], path: &[&str]) -> Option<usize> {
    reports
        .iter()
        .find(|report| {
            report
                .path
                .iter()
                .map(String::as_str)
                .eq(path.iter().copied())
        })
        .map(|report| report.size)
}

#[test]
fn zero_snapshots_render_to_nothing() {
    let rt_stats = RuntimeStats::default();
    assert!(runtime_stats_reports(&rt_stats).is_empty());
}

#[test]
fn chunk_figures_report_at_the_top_level() {
    let mut rt_stats = RuntimeStats::default();
    rt_stats.gc_heap_unused_chunks = 1 << 20;
    rt_stats.gc_heap_unused_arenas = 12345;
    rt_stats.gc_heap_chunk_admin = 16384;
    rt_stats.runtime.script_sources = 4096;
    let reports = runtime_stats_reports(&rt_stats);

    assert_eq!(size_of(&reports, &["gc-heap", "unused-chunks"]), Some(1 << 20));
    assert_eq!(size_of(&reports, &["gc-heap", "unused-arenas"]), Some(12345));
    assert_eq!(size_of(&reports, &["gc-heap", "chunk-admin"]), Some(16384));
    assert_eq!(
        size_of(&reports, &["gc-heap", "decommitted-arenas"]),
        None,
        "empty leaves are skipped"
    );
    assert_eq!(size_of(&reports, &["runtime", "script-sources"]), Some(4096));
}

#[test]
fn small_zone_leaves_fold_into_sundries() {
    let mut zone = ZoneStats::new_coarse_grained(ZoneId(7));
    zone.gc_heap_arena_admin = 64;
    zone.unused_gc_things = 100;
    zone.strings_short_gc_heap = 200;
    zone.strings_normal_gc_heap = 10000;
    zone.strings_normal_malloc_heap = 300;
    zone.type_pool = 400;
    let mut rt_stats = RuntimeStats::default();
    rt_stats.zone_stats.push(zone);
    let reports = runtime_stats_reports(&rt_stats);

    assert_eq!(
        size_of(&reports, &["zones", "zone(7)", "strings", "normal", "gc-heap"]),
        Some(10000),
        "leaves at the threshold stand alone"
    );
    assert_eq!(
        size_of(&reports, &["zones", "zone(7)", "sundries", "gc-heap"]),
        Some(64 + 100 + 200)
    );
    assert_eq!(
        size_of(&reports, &["zones", "zone(7)", "sundries", "malloc-heap"]),
        Some(300 + 400)
    );
    assert_eq!(
        size_of(&reports, &["zones", "zone(7)", "gc-heap-arena-admin"]),
        None,
        "folded leaves do not also stand alone"
    );
    assert_eq!(
        size_of(&reports, &["zones", "zone(7)", "strings", "short", "gc-heap"]),
        None
    );
}

#[test]
fn notable_strings_always_stand_alone() {
    let mut zone = ZoneStats::new_coarse_grained(ZoneId(1));
    zone.notable_strings.push(NotableStringInfo::new(
        &StringKey {
            chars: "ham".into(),
            is_short: false,
        },
        StringInfo::new(false, 64, 9000),
    ));
    let mut rt_stats = RuntimeStats::default();
    rt_stats.zone_stats.push(zone);
    let reports = runtime_stats_reports(&rt_stats);

    let base = [
        "zones",
        "zone(1)",
        "strings",
        "notable",
        "string(length=3, copies=1, \"ham\")",
    ];
    let mut gc_heap = base.to_vec();
    gc_heap.push("gc-heap");
    let mut malloc_heap = base.to_vec();
    malloc_heap.push("malloc-heap");
    assert_eq!(
        size_of(&reports, &gc_heap),
        Some(64),
        "notables stand alone even below the sundries threshold"
    );
    assert_eq!(size_of(&reports, &malloc_heap), Some(9000));
    assert_eq!(
        size_of(&reports, &["zones", "zone(1)", "sundries", "gc-heap"]),
        None
    );
}

#[test]
fn compartment_leaves_route_to_their_buckets() {
    let mut compartment = CompartmentStats::new(CompartmentId(3));
    compartment.objects_gc_heap_function = 20000;
    compartment.shapes_malloc_heap_tree_tables = 9000;
    compartment.scripts_gc_heap = 500;
    compartment.ion_data = 600;
    compartment.debuggees_set = 100;
    let mut rt_stats = RuntimeStats::default();
    rt_stats.compartment_stats.push(compartment);
    let reports = runtime_stats_reports(&rt_stats);

    let base = ["compartments", "compartment(3)"];
    assert_eq!(
        size_of(
            &reports,
            &[base[0], base[1], "objects", "gc-heap", "function"]
        ),
        Some(20000)
    );
    assert_eq!(
        size_of(
            &reports,
            &[base[0], base[1], "shapes", "malloc-heap", "tree-tables"]
        ),
        Some(9000)
    );
    assert_eq!(
        size_of(&reports, &[base[0], base[1], "sundries", "gc-heap"]),
        Some(500)
    );
    assert_eq!(
        size_of(&reports, &[base[0], base[1], "sundries", "malloc-heap"]),
        Some(600 + 100)
    );
    assert_eq!(
        size_of(&reports, &[base[0], base[1], "ion-data"]),
        None,
        "small leaves only appear through their sundries bucket"
    );
}
