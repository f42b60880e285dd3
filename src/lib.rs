//! # ehashkv
//!
//! An in-memory **extendible-hash** index mapping `u64` keys to `u64` values,
//! laid out directly on fixed-size 8 KiB pages obtained from a caller-supplied
//! [`PageAllocator`].
//!
//! ## Quick Start
//!
//! ```rust
//! use ehashkv::HashIndex;
//!
//! let mut index = HashIndex::new().unwrap();
//!
//! // Write
//! index.put(42, 4242).unwrap();
//!
//! // Read
//! assert_eq!(index.get(42), Some(4242));
//!
//! // Replace, returning the previous value
//! assert_eq!(index.replace(42, 7).unwrap(), Some(4242));
//!
//! // Iterate
//! index.put(1, 10).unwrap();
//! let mut pairs: Vec<_> = index.iter().collect();
//! pairs.sort();
//! assert_eq!(pairs, vec![(1, 10), (42, 7)]);
//!
//! // Delete
//! assert_eq!(index.delete(42), Some(7));
//! assert_eq!(index.get(42), None);
//!
//! // Hand every page back to the allocator
//! index.teardown();
//! ```
//!
//! ## Features
//!
//! - **Paged layout**: buckets are single pages of 127 pieces; records are
//!   varint-packed `(key, value)` pairs.
//! - **Directory doubling and halving**: the slot table grows on split and
//!   shrinks once sibling buckets have merged back together.
//! - **Overflow chains**: full pieces spill into their neighbours; chains
//!   are shortened again on delete.
//! - **Mutation-aware iteration**: an iterator detects any intervening
//!   write and stops with [`IndexError::StaleIterator`].
//! - **Injected memory**: every page comes from a [`PageAllocator`];
//!   [`CountingAllocator`] instruments usage and can enforce a budget.
//!
//! The key is used directly as its own hash: keys whose low bits collide in
//! large numbers force deep directories.

pub mod bucket;
pub mod diagnostics;
pub mod directory;
pub mod engine;
pub mod layout;
pub mod page;
pub mod validate;
pub mod varint;

pub use directory::{BucketId, Directory};
pub use engine::{HashIndex, Iter, IterState};
pub use page::{AllocationStats, CountingAllocator, MmapAllocator, Page, PageAllocator};

use thiserror::Error;

use crate::layout::{BUCKET_CAPACITY, DEFAULT_MERGE_THRESHOLD};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Runtime tuning for a [`HashIndex`].
///
/// Structural sizes (page, piece and header layout) are compile-time
/// constants in [`layout`]; only policy lives here.
///
/// # Example
///
/// ```rust
/// use ehashkv::IndexConfig;
///
/// let config = IndexConfig {
///     merge_threshold: 1024,
///     ..IndexConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Two sibling buckets whose records take at most this many bytes in
    /// total are merged into one on delete. `0` merges only empty buddies.
    ///
    /// Default: 2000. Must not exceed half a bucket's record capacity.
    pub merge_threshold: usize,

    /// Run structural invariant checks after every split, merge and
    /// directory shrink.
    ///
    /// Default: on in debug builds, off in release builds.
    pub validate: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            validate: cfg!(debug_assertions),
        }
    }
}

impl IndexConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.merge_threshold > BUCKET_CAPACITY / 2 {
            return Err(IndexError::InvalidConfig(format!(
                "merge_threshold must be <= {}",
                BUCKET_CAPACITY / 2
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`HashIndex`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// The page allocator could not supply memory.
    #[error("allocation of {pages} page(s) failed")]
    AllocationFailed { pages: u32 },

    /// The index changed since the iterator was started.
    #[error("iterator is stale: started at version {expected}, index is at {found}")]
    StaleIterator { expected: u32, found: u32 },

    /// A structural check failed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The directory cannot double past its maximum depth.
    #[error("directory depth {depth} cannot grow further")]
    CapacityExceeded { depth: u8 },

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
