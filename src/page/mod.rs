//! # Pages and page allocators
//!
//! Every byte the index stores lives in a [`Page`]: a zeroed block of one
//! or more [`PAGE_SIZE`]-byte pages obtained from a [`PageAllocator`].
//! Buckets take exactly one page; the directory takes a power-of-two page
//! set that is replaced as the slot table grows or shrinks.
//!
//! The allocator is injected by the caller, which keeps the index agnostic
//! of where its memory comes from:
//!
//! - [`MmapAllocator`]: anonymous memory mappings via `memmap2`. Mappings
//!   start zeroed and are aligned to the OS page size.
//! - [`CountingAllocator`]: wraps another allocator, records allocation
//!   statistics and can enforce a page budget. This is the instrumentation
//!   hook used by tests and benchmarks; there is no global counter.
//!
//! Allocators report exhaustion by returning `None`. The index turns that
//! into [`IndexError::AllocationFailed`](crate::IndexError::AllocationFailed)
//! and leaves its state untouched.


use std::fmt;

use memmap2::MmapMut;
use tracing::{trace, warn};

use crate::layout::PAGE_SIZE;

// ------------------------------------------------------------------------------------------------
// Page
// ------------------------------------------------------------------------------------------------

/// An owned, zero-initialised run of `pages * PAGE_SIZE` bytes.
///
/// Dropping a `Page` unmaps it. Pages should normally go back through
/// [`PageAllocator::release`] so instrumenting allocators stay balanced.
pub struct Page {
    map: MmapMut,
    pages: u32,
}

impl Page {
    /// Maps `pages` fresh zeroed pages.
    pub fn zeroed(pages: u32) -> std::io::Result<Self> {
        if pages == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "a page set must contain at least one page",
            ));
        }
        let map = MmapMut::map_anon(pages as usize * PAGE_SIZE)?;
        Ok(Self { map, pages })
    }

    /// Number of [`PAGE_SIZE`] pages in this block.
    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Always `false`: a page set holds at least one page.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("pages", &self.pages)
            .field("addr", &self.map.as_ptr())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Allocator trait
// ------------------------------------------------------------------------------------------------

/// Source of pages for the index.
///
/// Implementations must hand out zeroed memory of exactly
/// `pages * PAGE_SIZE` bytes. They are called synchronously from inside
/// index operations and must not call back into the index.
pub trait PageAllocator {
    /// Allocates `pages` contiguous pages, or `None` when memory is exhausted.
    fn allocate(&mut self, pages: u32) -> Option<Page>;

    /// Returns a page set previously obtained from [`allocate`](Self::allocate).
    fn release(&mut self, page: Page);
}

impl<A: PageAllocator + ?Sized> PageAllocator for &mut A {
    fn allocate(&mut self, pages: u32) -> Option<Page> {
        (**self).allocate(pages)
    }

    fn release(&mut self, page: Page) {
        (**self).release(page)
    }
}

/// Allocator backed by anonymous memory mappings.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapAllocator;

impl PageAllocator for MmapAllocator {
    fn allocate(&mut self, pages: u32) -> Option<Page> {
        match Page::zeroed(pages) {
            Ok(page) => {
                trace!(pages, "mapped page set");
                Some(page)
            }
            Err(e) => {
                warn!(pages, error = %e, "anonymous mapping failed");
                None
            }
        }
    }

    fn release(&mut self, page: Page) {
        trace!(pages = page.pages(), "unmapping page set");
        drop(page);
    }
}

// ------------------------------------------------------------------------------------------------
// Instrumentation
// ------------------------------------------------------------------------------------------------

/// Counters maintained by [`CountingAllocator`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocationStats {
    /// Successful `allocate` calls.
    pub allocations: u64,
    /// `release` calls.
    pub releases: u64,
    /// Requests refused, either by the page budget or by the inner allocator.
    pub failures: u64,
    /// Pages currently handed out.
    pub live_pages: u64,
    /// High-water mark of `live_pages`.
    pub peak_pages: u64,
}

impl AllocationStats {
    /// Bytes currently handed out.
    pub fn live_bytes(&self) -> u64 {
        self.live_pages * PAGE_SIZE as u64
    }
}

/// Allocator wrapper that counts pages and optionally enforces a budget.
///
/// # Example
///
/// ```rust
/// use ehashkv::{CountingAllocator, HashIndex, IndexConfig, MmapAllocator};
///
/// let mut alloc = CountingAllocator::new(MmapAllocator);
/// let index = HashIndex::init(&mut alloc, IndexConfig::default()).unwrap();
/// index.teardown();
/// assert_eq!(alloc.stats().live_pages, 0);
/// ```
#[derive(Debug, Default)]
pub struct CountingAllocator<A = MmapAllocator> {
    inner: A,
    stats: AllocationStats,
    page_limit: Option<u64>,
}

impl<A: PageAllocator> CountingAllocator<A> {
    /// Wraps `inner` without a page budget.
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            stats: AllocationStats::default(),
            page_limit: None,
        }
    }

    /// Wraps `inner`, refusing any request that would push live pages past `limit`.
    pub fn with_page_limit(inner: A, limit: u64) -> Self {
        Self {
            inner,
            stats: AllocationStats::default(),
            page_limit: Some(limit),
        }
    }

    /// Changes (or removes) the page budget. Pages already handed out are unaffected.
    pub fn set_page_limit(&mut self, limit: Option<u64>) {
        self.page_limit = limit;
    }

    pub fn stats(&self) -> AllocationStats {
        self.stats
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: PageAllocator> PageAllocator for CountingAllocator<A> {
    fn allocate(&mut self, pages: u32) -> Option<Page> {
        let requested = u64::from(pages);
        if let Some(limit) = self.page_limit
            && self.stats.live_pages + requested > limit
        {
            self.stats.failures += 1;
            trace!(pages, limit, live = self.stats.live_pages, "page budget exhausted");
            return None;
        }

        let Some(page) = self.inner.allocate(pages) else {
            self.stats.failures += 1;
            return None;
        };

        self.stats.allocations += 1;
        self.stats.live_pages += requested;
        self.stats.peak_pages = self.stats.peak_pages.max(self.stats.live_pages);
        Some(page)
    }

    fn release(&mut self, page: Page) {
        self.stats.releases += 1;
        self.stats.live_pages = self.stats.live_pages.saturating_sub(u64::from(page.pages()));
        self.inner.release(page);
    }
}

// ------------------------------------------------------------------------------------------------
// Little-endian field helpers
// ------------------------------------------------------------------------------------------------

#[inline]
pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[inline]
pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
