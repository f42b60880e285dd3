//! # Hash index engine
//!
//! [`HashIndex`] ties the [`Directory`] and its buckets to a
//! [`PageAllocator`] and implements the public operations.
//!
//! ## Design Overview
//!
//! A key is routed by its low `depth` bits to a directory slot, and from
//! there to a bucket. Inside the bucket it lives in the probe chain that
//! starts at piece `key % 127`.
//!
//! - **Put / replace** look the key up first. An equal value is a no-op,
//!   an encoding of the same length is overwritten in place, anything else
//!   is removed and re-inserted.
//! - **Insert** places the record in the first piece of its chain with
//!   room. When no piece within the chain limit has room the bucket is
//!   split ([`split`]) and the insert retried, doubling the directory as
//!   needed.
//! - **Delete** removes the record; when that empties a piece the overflow
//!   chain is shortened and, once it is gone, the bucket is merged with its
//!   buddy and the directory halved while possible ([`compaction`]).
//! - **Iteration** walks slots in order and visits each bucket once, using
//!   the bucket `seen` marker ([`iterator`]).
//!
//! ## Guarantees
//!
//! - **Allocation atomicity:** every page an operation needs is reserved
//!   before anything is modified. A refused allocation leaves the index
//!   logically unchanged.
//! - **Versioning:** every put, replace and delete call bumps the directory
//!   version, which invalidates outstanding [`IterState`]s.
//! - **Teardown:** [`HashIndex::teardown`] releases every page through the
//!   allocator. Dropping the index without it still unmaps the memory, but
//!   the allocator never sees the releases.

mod compaction;
mod iterator;
mod split;

#[cfg(test)]
mod tests;

pub use iterator::{Iter, IterState};

use std::fmt;

use tracing::{error, info, trace, warn};

use crate::bucket::Bucket;
use crate::directory::{BucketId, Directory};
use crate::layout::MIN_DEPTH;
use crate::page::{MmapAllocator, Page, PageAllocator};
use crate::varint;
use crate::{IndexConfig, IndexError, validate};

/// Extendible-hash index of `u64` keys to `u64` values.
///
/// Generic over the page source; [`HashIndex::new`] uses anonymous
/// memory mappings. Borrowed allocators work too:
///
/// ```rust
/// use ehashkv::{CountingAllocator, HashIndex, IndexConfig, MmapAllocator};
///
/// let mut alloc = CountingAllocator::new(MmapAllocator);
/// let mut index = HashIndex::init(&mut alloc, IndexConfig::default()).unwrap();
/// for key in 0..10_000u64 {
///     index.put(key, key * 2).unwrap();
/// }
/// assert_eq!(index.len(), 10_000);
/// index.teardown();
///
/// let stats = alloc.stats();
/// assert_eq!(stats.live_pages, 0);
/// assert_eq!(stats.allocations, stats.releases);
/// ```
pub struct HashIndex<A: PageAllocator = MmapAllocator> {
    alloc: A,
    config: IndexConfig,
    dir: Directory,
}

impl<A: PageAllocator> fmt::Debug for HashIndex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashIndex")
            .field("config", &self.config)
            .field("directory", &self.dir)
            .finish_non_exhaustive()
    }
}

impl HashIndex<MmapAllocator> {
    /// An index on anonymous mappings with the default configuration.
    pub fn new() -> Result<Self, IndexError> {
        Self::init(MmapAllocator, IndexConfig::default())
    }
}

impl<A: PageAllocator> HashIndex<A> {
    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Creates an empty index: a one-page directory at depth 1 over two
    /// empty buckets.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidConfig`] for a rejected `config`,
    /// [`IndexError::AllocationFailed`] when any of the three pages cannot
    /// be allocated. Pages obtained before the failure are released.
    pub fn init(mut alloc: A, config: IndexConfig) -> Result<Self, IndexError> {
        config.validate()?;

        let mut pages: Vec<Page> = Vec::with_capacity(3);
        for _ in 0..3 {
            match alloc.allocate(1) {
                Some(page) => pages.push(page),
                None => {
                    warn!(obtained = pages.len(), "allocation failed during init");
                    for page in pages {
                        alloc.release(page);
                    }
                    return Err(IndexError::AllocationFailed { pages: 1 });
                }
            }
        }
        let (Some(odd), Some(even), Some(table)) = (pages.pop(), pages.pop(), pages.pop()) else {
            return Err(IndexError::InvariantViolation(
                "init obtained fewer pages than requested".into(),
            ));
        };

        let dir = Directory::new(
            table,
            Bucket::new(even, MIN_DEPTH),
            Bucket::new(odd, MIN_DEPTH),
        );
        info!(
            merge_threshold = config.merge_threshold,
            validate = config.validate,
            "hash index initialised"
        );
        Ok(Self { alloc, config, dir })
    }

    /// Releases every bucket page and the directory backing through the
    /// allocator.
    pub fn teardown(self) {
        let Self { mut alloc, dir, .. } = self;
        let (table, buckets) = dir.into_parts();
        let count = buckets.len();
        for bucket in buckets {
            alloc.release(bucket.into_page());
        }
        alloc.release(table);
        info!(buckets = count, "hash index torn down");
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    /// Number of stored keys.
    pub fn len(&self) -> u64 {
        self.dir.entries()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Directory depth: the number of low key bits used for routing.
    pub fn depth(&self) -> u8 {
        self.dir.depth()
    }

    /// Mutation counter; see [`IterState`].
    pub fn version(&self) -> u32 {
        self.dir.version()
    }

    pub fn directory(&self) -> &Directory {
        &self.dir
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Runs every structural check over the directory and all buckets.
    pub fn check_invariants(&self) -> Result<(), IndexError> {
        validate::check_index(&self.dir)
    }

    // --------------------------------------------------------------------------------------------
    // Operations
    // --------------------------------------------------------------------------------------------

    /// Looks up `key`.
    pub fn get(&self, key: u64) -> Option<u64> {
        let (_, bucket) = self.dir.bucket_for(key)?;
        let value = bucket.find(key).map(|located| located.record.value);
        trace!(key, found = value.is_some(), "get");
        value
    }

    /// Inserts or updates `key`.
    ///
    /// # Errors
    ///
    /// See [`replace`](Self::replace).
    pub fn put(&mut self, key: u64, value: u64) -> Result<(), IndexError> {
        self.replace(key, value).map(|_| ())
    }

    /// Inserts or updates `key`, returning the previous value.
    ///
    /// # Errors
    ///
    /// - [`IndexError::AllocationFailed`] when a needed split cannot get its
    ///   pages. The index is left as it was before the call.
    /// - [`IndexError::CapacityExceeded`] when the directory would have to
    ///   grow past its maximum depth.
    /// - [`IndexError::InvariantViolation`] when validation is enabled and a
    ///   split produced an inconsistent structure.
    pub fn replace(&mut self, key: u64, value: u64) -> Result<Option<u64>, IndexError> {
        self.dir.bump_version();

        let (buf, len) = varint::encode_record(key, value);
        let encoded = &buf[..len];

        let id = self.dir.slot(self.dir.slot_of(key));
        let bucket = self.dir.bucket_mut(id).ok_or_else(|| dangling(id))?;

        let mut previous = None;
        if let Some(located) = bucket.find(key) {
            let old = located.record.value;
            if old == value {
                trace!(key, "replace with equal value");
                return Ok(Some(old));
            }
            if located.record.len == len {
                bucket.overwrite(&located, encoded);
                trace!(key, "replaced in place");
                return Ok(Some(old));
            }
            bucket.remove(&located);
            self.dir.set_entries(self.dir.entries() - 1);
            previous = Some(old);
        }

        match self.store(key, encoded) {
            Ok(()) => {
                trace!(key, replaced = previous.is_some(), "put");
                Ok(previous)
            }
            Err(e) => {
                if let Some(old) = previous {
                    self.reinstate(key, old);
                }
                Err(e)
            }
        }
    }

    /// Removes `key`, returning its value.
    pub fn delete(&mut self, key: u64) -> Option<u64> {
        self.dir.bump_version();

        let id = self.dir.slot(self.dir.slot_of(key));
        let bucket = self.dir.bucket_mut(id)?;
        let Some(located) = bucket.find(key) else {
            trace!(key, "delete of missing key");
            return None;
        };
        bucket.remove(&located);
        let emptied = bucket.piece(located.piece).is_empty();
        self.dir.set_entries(self.dir.entries().saturating_sub(1));
        trace!(key, emptied, "delete");

        if emptied {
            self.compact_after_delete(id, key, located.piece);
        }
        Some(located.record.value)
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Inserts an encoded record, splitting its bucket until it fits.
    fn store(&mut self, key: u64, encoded: &[u8]) -> Result<(), IndexError> {
        loop {
            let id = self.dir.slot(self.dir.slot_of(key));
            let bucket = self.dir.bucket_mut(id).ok_or_else(|| dangling(id))?;
            if bucket.try_insert(key, encoded).is_some() {
                self.dir.set_entries(self.dir.entries() + 1);
                return Ok(());
            }
            self.split(id, key)?;
        }
    }

    /// Puts back a record removed by a replace whose insert failed.
    ///
    /// The record left room in its own chain, so it fits again unless a
    /// split ran in between and reshuffled the bucket.
    fn reinstate(&mut self, key: u64, value: u64) {
        let (buf, len) = varint::encode_record(key, value);
        let id = self.dir.slot(self.dir.slot_of(key));
        let restored = self
            .dir
            .bucket_mut(id)
            .and_then(|bucket| bucket.try_insert(key, &buf[..len]))
            .is_some();
        if restored {
            self.dir.set_entries(self.dir.entries() + 1);
        } else {
            error!(key, "could not reinstate record after failed replace");
        }
    }

    /// Allocates `pages` pages or reports the failure.
    fn reserve(&mut self, pages: u32) -> Result<Page, IndexError> {
        self.alloc.allocate(pages).ok_or_else(|| {
            warn!(pages, "page allocation failed");
            IndexError::AllocationFailed { pages }
        })
    }

    /// Runs the bucket checks for the buckets under `slots`, then the
    /// directory check, when validation is on.
    fn validate_after(&self, op: &'static str, slots: &[usize]) -> Result<(), IndexError> {
        if !self.config.validate {
            return Ok(());
        }
        let result = slots
            .iter()
            .try_for_each(|&slot| validate::check_bucket_at(&self.dir, slot))
            .and_then(|()| validate::check_directory(&self.dir));
        if let Err(e) = &result {
            error!(op, error = %e, "structure check failed");
        }
        result
    }
}

fn dangling(id: BucketId) -> IndexError {
    IndexError::InvariantViolation(format!("slot references released bucket {id}"))
}
