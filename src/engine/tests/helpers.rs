use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use crate::engine::HashIndex;
use crate::page::{CountingAllocator, MmapAllocator};
use crate::IndexConfig;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Validation on regardless of build profile.
pub fn checked_config() -> IndexConfig {
    init_tracing();
    IndexConfig {
        validate: true,
        ..IndexConfig::default()
    }
}

/// Fresh index on mapped pages with validation enabled.
pub fn new_index() -> HashIndex {
    HashIndex::init(MmapAllocator, checked_config()).unwrap()
}

/// Fresh index whose allocator is instrumented.
pub fn counted_index() -> HashIndex<CountingAllocator> {
    HashIndex::init(CountingAllocator::new(MmapAllocator), checked_config()).unwrap()
}

/// Fresh index that may hold at most `pages` pages at once.
pub fn limited_index(pages: u64) -> HashIndex<CountingAllocator> {
    HashIndex::init(
        CountingAllocator::with_page_limit(MmapAllocator, pages),
        checked_config(),
    )
    .unwrap()
}

/// `n` distinct pseudo-random keys from a fixed seed.
pub fn random_keys(n: usize, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = std::collections::HashSet::with_capacity(n);
    let mut keys = Vec::with_capacity(n);
    while keys.len() < n {
        let key: u64 = rng.random();
        if seen.insert(key) {
            keys.push(key);
        }
    }
    keys
}

/// Every pair in the index, sorted by key.
pub fn sorted_contents<A: crate::page::PageAllocator>(index: &mut HashIndex<A>) -> Vec<(u64, u64)> {
    let mut pairs: Vec<_> = index.iter().collect();
    pairs.sort_unstable();
    pairs
}

/// A key whose home piece is `home` and whose low bit is `parity`.
pub fn key_at(home: u64, parity: u64, n: u64) -> u64 {
    // 254 = 2 * 127 keeps both the home piece and the low bit fixed.
    let base = if home % 2 == parity { home } else { home + 127 };
    base + 254 * n
}
