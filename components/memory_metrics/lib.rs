/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! Heap accounting for Kestrel.
//!
//! A memory-pressure report wants to know where every byte of the GC heap
//! went. This crate walks a quiescent heap once, attributes each live cell
//! to per-zone and per-compartment counters, pulls oversized strings out
//! into notable side entries, reconciles the totals against the heap's
//! reserved chunks, and renders the result as about-memory style reports.
//!
//! The walk is generic over [`heap_traits::iterate::StatsHeap`], so tests
//! drive it with synthetic heaps.

pub mod collect;
pub mod report;
pub mod stats;
pub mod walker;

pub use collect::{add_size_of_tab, collect_runtime_stats};
pub use report::{runtime_stats_reports, Report};
pub use stats::{
    CompartmentStats, NotableStringInfo, RuntimeSizes, RuntimeStats, StringInfo, StringKey,
    StringsHashMap, TabSizes, ZoneStats, MAX_STRING_SAMPLE_BYTES,
    MEMORY_REPORTING_SUNDRIES_THRESHOLD,
};
pub use walker::{find_notable_strings, CoarseGrained, FineGrained, Granularity, StatsWalker};
