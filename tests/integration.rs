//! Integration tests for the public `HashIndex` API.
//!
//! These tests go through the public `ehashkv` surface only: construction
//! on the default and on instrumented allocators, CRUD, iteration,
//! diagnostics and teardown.
//!
//! ## Coverage areas
//! - **Lifecycle**: `new`, `init` on owned and borrowed allocators, teardown
//! - **CRUD**: put, get, replace, delete across many splits and merges
//! - **Iteration**: completeness and staleness through the public handle
//! - **Config validation**: rejected `IndexConfig`
//! - **Diagnostics**: stats and graphviz output
//! - **Full cycle**: bulk insert, delete everything, pages returned

use std::collections::HashMap;

use ehashkv::diagnostics::{IndexStats, write_graphviz};
use ehashkv::{CountingAllocator, HashIndex, IndexConfig, IndexError, MmapAllocator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn random_pairs(n: usize, seed: u64) -> HashMap<u64, u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pairs = HashMap::with_capacity(n);
    while pairs.len() < n {
        pairs.insert(rng.random::<u64>(), rng.random::<u64>());
    }
    pairs
}

// ================================================================================================
// Lifecycle
// ================================================================================================

/// # Scenario
/// Create an index with defaults and tear it down.
///
/// # Starting environment
/// None.
///
/// # Actions
/// 1. `HashIndex::new()`.
/// 2. Inspect accessors, then `teardown()`.
///
/// # Expected behavior
/// Depth 1, empty, version 0, two slots.
#[test]
fn lifecycle_new_and_teardown() {
    init_tracing();
    let index = HashIndex::new().unwrap();
    assert_eq!(index.depth(), 1);
    assert!(index.is_empty());
    assert_eq!(index.version(), 0);
    assert_eq!(index.directory().number_of_buckets(), 2);
    assert_eq!(index.config(), &IndexConfig::default());
    index.teardown();
}

#[test]
fn lifecycle_invalid_config_rejected() {
    let config = IndexConfig {
        merge_threshold: 1 << 20,
        validate: false,
    };
    let err = HashIndex::init(MmapAllocator, config).unwrap_err();
    assert!(matches!(err, IndexError::InvalidConfig(_)));
}

/// # Scenario
/// Dropping without teardown still frees the memory, but the allocator
/// is never told.
///
/// # Starting environment
/// Borrowed counting allocator.
///
/// # Actions
/// 1. Init, insert, drop the index.
///
/// # Expected behavior
/// The allocator still counts the index's pages as live.
#[test]
fn lifecycle_drop_skips_allocator_releases() {
    let mut alloc = CountingAllocator::new(MmapAllocator);
    {
        let mut index = HashIndex::init(&mut alloc, IndexConfig::default()).unwrap();
        index.put(1, 1).unwrap();
    }
    let stats = alloc.stats();
    assert_eq!(stats.live_pages, 3);
    assert_eq!(stats.releases, 0);
}

// ================================================================================================
// CRUD
// ================================================================================================

/// # Scenario
/// Mixed workload over many splits and merges.
///
/// # Starting environment
/// Fresh index on a borrowed counting allocator.
///
/// # Actions
/// 1. Put 60 000 random pairs.
/// 2. Replace a third of them.
/// 3. Delete another third.
///
/// # Expected behavior
/// Every surviving key reads back its latest value, deleted keys are gone,
/// invariants hold, and teardown returns every page.
#[test]
fn crud_mixed_workload() {
    init_tracing();
    let mut alloc = CountingAllocator::new(MmapAllocator);
    let mut index = HashIndex::init(&mut alloc, IndexConfig::default()).unwrap();
    let mut pairs = random_pairs(60_000, 17);
    let keys: Vec<u64> = pairs.keys().copied().collect();

    for (&k, &v) in &pairs {
        index.put(k, v).unwrap();
    }
    for &k in keys.iter().step_by(3) {
        let old = pairs[&k];
        assert_eq!(index.replace(k, old / 2).unwrap(), Some(old));
        pairs.insert(k, old / 2);
    }
    for &k in keys.iter().skip(1).step_by(3) {
        assert_eq!(index.delete(k), pairs.remove(&k));
    }

    assert_eq!(index.len(), pairs.len() as u64);
    for &k in &keys {
        assert_eq!(index.get(k), pairs.get(&k).copied());
    }
    index.check_invariants().unwrap();
    index.teardown();

    let stats = alloc.stats();
    assert_eq!(stats.live_pages, 0);
    assert_eq!(stats.allocations, stats.releases);
}

// ================================================================================================
// Iteration
// ================================================================================================

#[test]
fn iteration_matches_contents() {
    let mut index = HashIndex::new().unwrap();
    let pairs = random_pairs(5_000, 4);
    for (&k, &v) in &pairs {
        index.put(k, v).unwrap();
    }
    let collected: HashMap<u64, u64> = index.iter().collect();
    assert_eq!(collected, pairs);
    index.teardown();
}

#[test]
fn iteration_detects_concurrent_modification() {
    let mut index = HashIndex::new().unwrap();
    index.put(1, 1).unwrap();
    index.put(2, 2).unwrap();

    let mut state = index.iterate_begin();
    index.iterate_next(&mut state).unwrap();
    index.replace(1, 10).unwrap();

    let err = index.iterate_next(&mut state).unwrap_err();
    assert!(matches!(err, IndexError::StaleIterator { .. }));
    index.teardown();
}

// ================================================================================================
// Diagnostics
// ================================================================================================

#[test]
fn diagnostics_reflect_structure() {
    let mut index = HashIndex::new().unwrap();
    for k in 0..20_000u64 {
        index.put(k, k).unwrap();
    }
    let stats = IndexStats::collect(&index);
    assert_eq!(stats.entries, 20_000);
    assert_eq!(stats.depth, index.depth());
    assert_eq!(stats.buckets, index.directory().bucket_count());
    assert!(stats.total_piece_bytes > 0);

    let mut dot = Vec::new();
    write_graphviz(&index, &mut dot).unwrap();
    let dot = String::from_utf8(dot).unwrap();
    assert_eq!(dot.matches("[label=\"Depth:").count(), stats.buckets + 1);
    index.teardown();
}

// ================================================================================================
// Full cycle
// ================================================================================================

/// # Scenario
/// Growth and shrink through the public API.
///
/// # Starting environment
/// Fresh index on a borrowed counting allocator.
///
/// # Actions
/// 1. Put 120 000 random pairs.
/// 2. Delete them all.
///
/// # Expected behavior
/// Empty index, depth and live pages below their peak, nothing left to
/// iterate.
#[test]
fn full_cycle_grow_then_shrink() {
    init_tracing();
    let mut alloc = CountingAllocator::new(MmapAllocator);
    let mut index = HashIndex::init(&mut alloc, IndexConfig::default()).unwrap();
    let pairs = random_pairs(120_000, 2024);
    for (&k, &v) in &pairs {
        index.put(k, v).unwrap();
    }
    let peak_depth = index.depth();
    let peak_pages = index.allocator().stats().live_pages;

    for (&k, &v) in &pairs {
        assert_eq!(index.delete(k), Some(v));
    }
    assert!(index.is_empty());
    assert!(index.depth() < peak_depth);
    assert!(index.allocator().stats().live_pages < peak_pages);
    assert_eq!(index.iter().next(), None);
    index.teardown();
    assert_eq!(alloc.stats().live_pages, 0);
}
