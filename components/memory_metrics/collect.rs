/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Snapshot collection: drive a walker over a heap, then roll the per-zone
//! and per-compartment records up into grand totals.
//!
//! Both entry points require a quiescent heap. They observe, they never
//! allocate into the heap being measured.

use heap_traits::iterate::StatsHeap;
use heap_traits::{OutOfMemory, ZoneId, ARENA_SIZE, CHUNK_ADMIN_BYTES, CHUNK_SIZE};
use log::debug;

use crate::stats::{RuntimeStats, TabSizes, ZoneStats, MEMORY_REPORTING_SUNDRIES_THRESHOLD};
use crate::walker::{find_notable_strings, CoarseGrained, FineGrained, StatsWalker};

fn strings_table_len(zone: &ZoneStats) -> usize {
    zone.strings.as_ref().map_or(0, |table| table.len())
}

/// Measure the whole heap into `rt_stats`, which must be freshly
/// default-constructed.
///
/// Fails only if the top-level record vectors cannot be reserved; every
/// other allocation failure degrades inside the pass. On failure `rt_stats`
/// holds no partial snapshot.
pub fn collect_runtime_stats<H: StatsHeap>(
    heap: &H,
    rt_stats: &mut RuntimeStats,
) -> Result<(), OutOfMemory> {
    debug_assert!(rt_stats.zone_stats.is_empty());
    debug_assert!(rt_stats.compartment_stats.is_empty());

    rt_stats
        .compartment_stats
        .try_reserve_exact(heap.compartment_count())?;
    rt_stats.zone_stats.try_reserve_exact(heap.zone_count())?;

    rt_stats.gc_heap_chunk_total = heap.total_chunk_count() * CHUNK_SIZE;
    rt_stats.gc_heap_unused_chunks = heap.unused_chunk_count() * CHUNK_SIZE;

    let mut decommitted = 0;
    heap.for_each_chunk(&mut |chunk| {
        decommitted += chunk.decommitted_arenas * ARENA_SIZE;
    });
    rt_stats.gc_heap_decommitted_arenas = decommitted;

    {
        let mut walker = StatsWalker::<FineGrained>::new(rt_stats);
        heap.iterate_zones_compartments_arenas_cells(&mut walker);
    }

    // For each zone, sum everything except its strings into the totals and
    // extract its notable strings. Track which zone has the biggest strings
    // table along the way: that table already holds a subset of the grand
    // total's entries, so it is moved into the totals rather than copied.
    let mut biggest = 0;
    for i in 0..rt_stats.zone_stats.len() {
        rt_stats.z_totals.add_ignoring_strings(&rt_stats.zone_stats[i]);
        find_notable_strings(
            &mut rt_stats.zone_stats[i],
            MEMORY_REPORTING_SUNDRIES_THRESHOLD,
        );
        if strings_table_len(&rt_stats.zone_stats[i]) >
            strings_table_len(&rt_stats.zone_stats[biggest])
        {
            biggest = i;
        }
    }

    if !rt_stats.zone_stats.is_empty() {
        debug_assert!(rt_stats.z_totals.strings.is_none());
        rt_stats.z_totals.strings = rt_stats.zone_stats[biggest].strings.take();
        for i in 0..rt_stats.zone_stats.len() {
            if i != biggest {
                rt_stats.z_totals.add_strings(&mut rt_stats.zone_stats[i]);
            }
        }
    }
    find_notable_strings(&mut rt_stats.z_totals, MEMORY_REPORTING_SUNDRIES_THRESHOLD);
    rt_stats.z_totals.strings = None;

    for compartment in &rt_stats.compartment_stats {
        rt_stats.c_totals.add(compartment);
    }

    rt_stats.gc_heap_gc_things =
        rt_stats.z_totals.size_of_live_gc_things() + rt_stats.c_totals.size_of_live_gc_things();

    // The in-arena numbers must reconcile: live things, unused space and
    // arena admin together cover whole arenas.
    debug_assert_eq!(
        (rt_stats.z_totals.gc_heap_arena_admin +
            rt_stats.z_totals.unused_gc_things +
            rt_stats.gc_heap_gc_things) %
            ARENA_SIZE,
        0
    );

    let dirty_chunks =
        (rt_stats.gc_heap_chunk_total - rt_stats.gc_heap_unused_chunks) / CHUNK_SIZE;
    rt_stats.gc_heap_chunk_admin = dirty_chunks * CHUNK_ADMIN_BYTES;

    // Unused arena space is the one number with no direct measurement;
    // everything else is known, so compute it by difference.
    rt_stats.gc_heap_unused_arenas = rt_stats.gc_heap_chunk_total -
        rt_stats.gc_heap_decommitted_arenas -
        rt_stats.gc_heap_unused_chunks -
        rt_stats.z_totals.unused_gc_things -
        rt_stats.gc_heap_chunk_admin -
        rt_stats.z_totals.gc_heap_arena_admin -
        rt_stats.gc_heap_gc_things;

    debug!(
        "collected stats for {} zones and {} compartments",
        rt_stats.zone_stats.len(),
        rt_stats.compartment_stats.len()
    );
    Ok(())
}

/// Measure one zone and its compartments into coarse tab-scoped buckets.
pub fn add_size_of_tab<H: StatsHeap>(
    heap: &H,
    zone: ZoneId,
    sizes: &mut TabSizes,
) -> Result<(), OutOfMemory> {
    let mut rt_stats = RuntimeStats::default();
    rt_stats
        .compartment_stats
        .try_reserve_exact(heap.compartment_count())?;
    rt_stats.zone_stats.try_reserve_exact(1)?;

    {
        let mut walker = StatsWalker::<CoarseGrained>::new(&mut rt_stats);
        heap.iterate_zone(zone, &mut walker);
    }

    debug_assert_eq!(rt_stats.zone_stats.len(), 1);
    let mut zone_record = rt_stats
        .zone_stats
        .pop()
        .expect("single-zone walk visited no zones");
    rt_stats.z_totals.add(&mut zone_record);

    for compartment in &rt_stats.compartment_stats {
        rt_stats.c_totals.add(compartment);
    }

    rt_stats.z_totals.add_to_tab_sizes(sizes);
    rt_stats.c_totals.add_to_tab_sizes(sizes);
    Ok(())
}
