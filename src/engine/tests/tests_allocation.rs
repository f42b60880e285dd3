//! Allocation failure and page accounting.
//!
//! Every page an operation needs is reserved before anything is modified,
//! so a refused allocation leaves the index logically unchanged. These
//! tests use a page budget on `CountingAllocator` to refuse allocations at
//! chosen points.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::engine::tests::helpers::*;
    use crate::page::{CountingAllocator, MmapAllocator};
    use crate::{HashIndex, IndexConfig, IndexError};

    #[test]
    fn init__allocates_three_pages() {
        let index = counted_index();
        let stats = index.allocator().stats();
        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.live_pages, 3);
        index.teardown();
    }

    /// # Scenario
    /// Init fails part-way and hands back what it got.
    ///
    /// # Starting environment
    /// Counting allocator with a budget of two pages.
    ///
    /// # Actions
    /// 1. Init an index (needs three).
    ///
    /// # Expected behavior
    /// `AllocationFailed`, and the two pages obtained were released.
    #[test]
    fn init__failure_releases_pages() {
        init_tracing();
        let mut alloc = CountingAllocator::with_page_limit(MmapAllocator, 2);
        let result = HashIndex::init(&mut alloc, IndexConfig::default());
        assert!(matches!(
            result,
            Err(IndexError::AllocationFailed { pages: 1 })
        ));

        let stats = alloc.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.releases, 2);
        assert_eq!(stats.live_pages, 0);
    }

    #[test]
    fn init__rejects_invalid_config() {
        let config = IndexConfig {
            merge_threshold: usize::MAX,
            ..IndexConfig::default()
        };
        let mut alloc = CountingAllocator::new(MmapAllocator);
        assert!(matches!(
            HashIndex::init(&mut alloc, config),
            Err(IndexError::InvalidConfig(_))
        ));
        assert_eq!(alloc.stats().allocations, 0);
    }

    /// # Scenario
    /// A put that needs a split fails cleanly when the split cannot get a
    /// page.
    ///
    /// # Starting environment
    /// Index with a three-page budget (exactly what init takes), the even
    /// bucket filled until it is one record from splitting.
    ///
    /// # Actions
    /// 1. Put even keys until one fails.
    ///
    /// # Expected behavior
    /// The failing put returns `AllocationFailed`, its key is absent, every
    /// earlier key is present and the entry count is unchanged.
    #[test]
    fn put__split_failure_leaves_index_unchanged() {
        let mut index = limited_index(3);
        let mut stored = Vec::new();
        let (failed, err) = loop {
            let k = 200 + 2 * stored.len() as u64;
            match index.put(k, u64::MAX) {
                Ok(()) => stored.push(k),
                Err(e) => break (k, e),
            }
        };
        assert_eq!(err, IndexError::AllocationFailed { pages: 1 });
        assert_eq!(index.get(failed), None);
        assert_eq!(index.len(), stored.len() as u64);
        for &k in &stored {
            assert_eq!(index.get(k), Some(u64::MAX));
        }
        assert_eq!(index.depth(), 1);
        index.check_invariants().unwrap();
        index.teardown();
    }

    /// # Scenario
    /// A replace that grows a record keeps the old value when the split it
    /// needs fails.
    ///
    /// # Starting environment
    /// Even bucket completely full of 2-byte-key/1-byte-value records under
    /// a three-page budget.
    ///
    /// # Actions
    /// 1. Replace one key with `u64::MAX` (10 bytes longer encoding).
    ///
    /// # Expected behavior
    /// `AllocationFailed`; the key still maps to its old value and the
    /// count is unchanged.
    #[test]
    fn replace__split_failure_restores_old_value() {
        let mut index = limited_index(3);
        let mut stored = Vec::new();
        loop {
            let k = 200 + 2 * stored.len() as u64;
            if index.put(k, 1).is_err() {
                break;
            }
            stored.push(k);
        }
        let victim = stored[stored.len() / 2];
        let before = index.len();

        assert_eq!(
            index.replace(victim, u64::MAX),
            Err(IndexError::AllocationFailed { pages: 1 })
        );
        assert_eq!(index.get(victim), Some(1));
        assert_eq!(index.len(), before);
        index.check_invariants().unwrap();
        index.teardown();
    }

    /// # Scenario
    /// A merge that cannot allocate is skipped without losing data.
    ///
    /// # Starting environment
    /// Four-page budget: init takes three, the split caused by 700 even
    /// keys takes the fourth.
    ///
    /// # Actions
    /// 1. Delete every even key.
    ///
    /// # Expected behavior
    /// Deletes all succeed, no merge happens (it would need a fifth page),
    /// the depth stays 2 and the index is empty and consistent.
    #[test]
    fn delete__merge_without_pages_is_skipped() {
        let mut index = limited_index(4);
        let keys: Vec<u64> = (0..700u64).map(|n| 200 + 2 * n).collect();
        for &k in &keys {
            index.put(k, u64::MAX).unwrap();
        }
        assert_eq!(index.depth(), 2);

        for &k in &keys {
            assert_eq!(index.delete(k), Some(u64::MAX));
        }
        assert_eq!(index.depth(), 2);
        assert!(index.is_empty());
        assert!(index.allocator().stats().failures > 0);
        index.check_invariants().unwrap();
        index.teardown();
    }

    /// # Scenario
    /// Teardown releases every page the index ever held.
    ///
    /// # Starting environment
    /// Borrowed counting allocator.
    ///
    /// # Actions
    /// 1. Insert 20 000 keys, delete half, tear down.
    ///
    /// # Expected behavior
    /// Allocations equal releases and no pages are live.
    #[test]
    fn teardown__balances_allocator() {
        init_tracing();
        let mut alloc = CountingAllocator::new(MmapAllocator);
        let mut index = HashIndex::init(&mut alloc, checked_config()).unwrap();
        let keys = random_keys(20_000, 3);
        for &k in &keys {
            index.put(k, k).unwrap();
        }
        for &k in keys.iter().step_by(2) {
            index.delete(k);
        }
        index.teardown();

        let stats = alloc.stats();
        assert!(stats.peak_pages > 3);
        assert_eq!(stats.live_pages, 0);
        assert_eq!(stats.allocations, stats.releases);
    }
}
