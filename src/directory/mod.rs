//! # Directory
//!
//! The directory maps the low `depth` bits of a key to the bucket that owns
//! them. It lives in its own page set:
//!
//! ```text
//! offset 0         8             12            16         20      21 .. 32   32 ..
//!        [entries][buckets u32][pages u32][version u32][depth][reserved][slot 0][slot 1] ...
//! ```
//!
//! `buckets` is the slot count, always `2^depth`. Each slot is a
//! little-endian `u32` [`BucketId`]. Several slots reference the same bucket
//! when that bucket's depth is below the directory depth.
//!
//! ## Ownership
//!
//! Buckets are owned by an arena inside the directory, addressed by
//! [`BucketId`]. Slots only hold ids, so aliasing slots never own anything
//! and releasing a bucket is a single arena removal followed by rewiring.
//!
//! ## Resizing
//!
//! Doubling copies the slot table into its upper half. When the doubled
//! table no longer fits the backing, the caller supplies a page set twice
//! as large ([`Directory::grow`]). Halving drops the upper half once every
//! slot equals its partner; the caller may then move the table into a
//! smaller page set ([`Directory::rehome`]).

#[cfg(test)]
mod tests;

use std::fmt;

use tracing::debug;

use crate::bucket::Bucket;
use crate::layout::{DIRECTORY_HEADER_SIZE, MIN_DEPTH, PAGE_SIZE, SLOT_SIZE, depth_mask};
use crate::page::{Page, read_u32, read_u64, write_u32, write_u64};

const ENTRIES_OFFSET: usize = 0;
const BUCKETS_OFFSET: usize = 8;
const PAGES_OFFSET: usize = 12;
const VERSION_OFFSET: usize = 16;
const DEPTH_OFFSET: usize = 20;

/// Handle of a bucket in the directory's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(pub(crate) u32);

impl BucketId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Slots a backing of `pages` pages can hold.
pub(crate) fn slot_capacity(pages: u32) -> usize {
    (pages as usize * PAGE_SIZE - DIRECTORY_HEADER_SIZE) / SLOT_SIZE
}

/// Bytes needed for the header plus `slots` slots.
pub(crate) fn table_bytes(slots: usize) -> usize {
    DIRECTORY_HEADER_SIZE + slots * SLOT_SIZE
}

// ------------------------------------------------------------------------------------------------
// Directory
// ------------------------------------------------------------------------------------------------

pub struct Directory {
    page: Page,
    arena: Vec<Option<Bucket>>,
    free: Vec<u32>,
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("depth", &self.depth())
            .field("slots", &self.number_of_buckets())
            .field("pages", &self.directory_pages())
            .field("entries", &self.entries())
            .field("version", &self.version())
            .field("live_buckets", &self.bucket_count())
            .finish()
    }
}

impl Directory {
    /// Formats `page` as a depth-1 directory over two fresh buckets.
    ///
    /// Slot 0 references `even`, slot 1 references `odd`.
    pub(crate) fn new(page: Page, even: Bucket, odd: Bucket) -> Self {
        let pages = page.pages();
        let mut dir = Self {
            page,
            arena: Vec::new(),
            free: Vec::new(),
        };
        dir.page.as_bytes_mut()[..DIRECTORY_HEADER_SIZE].fill(0);
        dir.set_depth(MIN_DEPTH);
        dir.set_number_of_buckets(1 << MIN_DEPTH);
        dir.set_directory_pages(pages);

        let even = dir.insert_bucket(even);
        let odd = dir.insert_bucket(odd);
        dir.set_slot(0, even);
        dir.set_slot(1, odd);
        dir
    }

    /// Splits the directory into its backing page and every live bucket.
    pub(crate) fn into_parts(self) -> (Page, Vec<Bucket>) {
        let buckets = self.arena.into_iter().flatten().collect();
        (self.page, buckets)
    }

    // --------------------------------------------------------------------------------------------
    // Header
    // --------------------------------------------------------------------------------------------

    /// Records stored across all buckets.
    pub fn entries(&self) -> u64 {
        read_u64(self.page.as_bytes(), ENTRIES_OFFSET)
    }

    pub(crate) fn set_entries(&mut self, entries: u64) {
        write_u64(self.page.as_bytes_mut(), ENTRIES_OFFSET, entries);
    }

    /// Number of slots, `2^depth`.
    pub fn number_of_buckets(&self) -> u32 {
        read_u32(self.page.as_bytes(), BUCKETS_OFFSET)
    }

    fn set_number_of_buckets(&mut self, n: u32) {
        write_u32(self.page.as_bytes_mut(), BUCKETS_OFFSET, n);
    }

    /// Pages backing the header and slot table.
    pub fn directory_pages(&self) -> u32 {
        read_u32(self.page.as_bytes(), PAGES_OFFSET)
    }

    fn set_directory_pages(&mut self, pages: u32) {
        write_u32(self.page.as_bytes_mut(), PAGES_OFFSET, pages);
    }

    /// Mutation counter, bumped by every put, replace and delete.
    pub fn version(&self) -> u32 {
        read_u32(self.page.as_bytes(), VERSION_OFFSET)
    }

    pub(crate) fn bump_version(&mut self) {
        let next = self.version().wrapping_add(1);
        write_u32(self.page.as_bytes_mut(), VERSION_OFFSET, next);
    }

    pub fn depth(&self) -> u8 {
        self.page.as_bytes()[DEPTH_OFFSET]
    }

    fn set_depth(&mut self, depth: u8) {
        self.page.as_bytes_mut()[DEPTH_OFFSET] = depth;
    }

    // --------------------------------------------------------------------------------------------
    // Slots
    // --------------------------------------------------------------------------------------------

    /// Slot index for `key` at the current depth.
    pub fn slot_of(&self, key: u64) -> usize {
        (key & depth_mask(self.depth())) as usize
    }

    pub fn slot(&self, index: usize) -> BucketId {
        debug_assert!(index < self.number_of_buckets() as usize);
        BucketId(read_u32(
            self.page.as_bytes(),
            DIRECTORY_HEADER_SIZE + index * SLOT_SIZE,
        ))
    }

    pub(crate) fn set_slot(&mut self, index: usize, id: BucketId) {
        debug_assert!(index < slot_capacity(self.page.pages()));
        write_u32(
            self.page.as_bytes_mut(),
            DIRECTORY_HEADER_SIZE + index * SLOT_SIZE,
            id.0,
        );
    }

    /// Every slot in table order.
    pub fn slots(&self) -> impl Iterator<Item = BucketId> + '_ {
        (0..self.number_of_buckets() as usize).map(|i| self.slot(i))
    }

    // --------------------------------------------------------------------------------------------
    // Bucket arena
    // --------------------------------------------------------------------------------------------

    pub fn bucket(&self, id: BucketId) -> Option<&Bucket> {
        self.arena.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn bucket_mut(&mut self, id: BucketId) -> Option<&mut Bucket> {
        self.arena.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// The bucket responsible for `key`.
    pub fn bucket_for(&self, key: u64) -> Option<(BucketId, &Bucket)> {
        let id = self.slot(self.slot_of(key));
        self.bucket(id).map(|b| (id, b))
    }

    /// Live buckets with their ids, each exactly once.
    pub fn buckets(&self) -> impl Iterator<Item = (BucketId, &Bucket)> + '_ {
        self.arena
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|b| (BucketId(i as u32), b)))
    }

    pub(crate) fn buckets_mut(&mut self) -> impl Iterator<Item = &mut Bucket> + '_ {
        self.arena.iter_mut().flatten()
    }

    pub fn bucket_count(&self) -> usize {
        self.arena.len() - self.free.len()
    }

    /// Adopts `bucket`, reusing a released id when one is available.
    pub(crate) fn insert_bucket(&mut self, bucket: Bucket) -> BucketId {
        match self.free.pop() {
            Some(slot) => {
                self.arena[slot as usize] = Some(bucket);
                BucketId(slot)
            }
            None => {
                self.arena.push(Some(bucket));
                BucketId((self.arena.len() - 1) as u32)
            }
        }
    }

    /// Removes a bucket from the arena. Slots still naming `id` must be
    /// rewired by the caller.
    pub(crate) fn take_bucket(&mut self, id: BucketId) -> Option<Bucket> {
        let bucket = self.arena.get_mut(id.index())?.take()?;
        self.free.push(id.0);
        Some(bucket)
    }

    // --------------------------------------------------------------------------------------------
    // Resizing
    // --------------------------------------------------------------------------------------------

    /// Whether doubling needs a larger backing than the current one.
    pub(crate) fn grow_needs_backing(&self) -> bool {
        table_bytes(self.number_of_buckets() as usize * 2) > self.page.len()
    }

    /// Doubles the slot table, moving it into `backing` first when given.
    ///
    /// Returns the replaced backing for release.
    pub(crate) fn grow(&mut self, backing: Option<Page>) -> Option<Page> {
        let old = backing.map(|page| self.rehome(page));
        let n = self.number_of_buckets() as usize;
        debug_assert!(table_bytes(n * 2) <= self.page.len());

        let table = &mut self.page.as_bytes_mut()[DIRECTORY_HEADER_SIZE..];
        table.copy_within(..n * SLOT_SIZE, n * SLOT_SIZE);
        self.set_number_of_buckets((n * 2) as u32);
        self.set_depth(self.depth() + 1);

        debug!(
            depth = self.depth(),
            slots = n * 2,
            pages = self.directory_pages(),
            "directory doubled"
        );
        old
    }

    /// Whether the upper half of the table mirrors the lower half.
    pub(crate) fn can_halve(&self) -> bool {
        if self.depth() <= MIN_DEPTH {
            return false;
        }
        let half = self.number_of_buckets() as usize / 2;
        (0..half).all(|i| self.slot(i) == self.slot(i + half))
    }

    /// Drops the upper half of the table. Callers check [`can_halve`](Self::can_halve).
    pub(crate) fn halve(&mut self) {
        let n = self.number_of_buckets() as usize;
        let half = n / 2;
        self.page.as_bytes_mut()[table_bytes(half)..table_bytes(n)].fill(0);
        self.set_number_of_buckets(half as u32);
        self.set_depth(self.depth() - 1);
        debug!(depth = self.depth(), slots = half, "directory halved");
    }

    /// Smallest power-of-two page count below the current backing that
    /// still holds the table, if the table fits in half the backing.
    pub(crate) fn shrink_target(&self) -> Option<u32> {
        let pages = self.directory_pages();
        let needed = table_bytes(self.number_of_buckets() as usize);
        let mut target = pages;
        while target > 1 && needed <= (target / 2) as usize * PAGE_SIZE {
            target /= 2;
        }
        (target < pages).then_some(target)
    }

    /// Copies header and slot table into `page` and adopts it.
    ///
    /// Returns the previous backing for release.
    pub(crate) fn rehome(&mut self, mut page: Page) -> Page {
        let used = table_bytes(self.number_of_buckets() as usize);
        debug_assert!(used <= page.len());
        page.as_bytes_mut()[..used].copy_from_slice(&self.page.as_bytes()[..used]);
        let pages = page.pages();
        let old = std::mem::replace(&mut self.page, page);
        self.set_directory_pages(pages);
        old
    }
}
