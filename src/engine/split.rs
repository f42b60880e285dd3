//! Bucket splitting and directory doubling.
//!
//! A split raises the bucket's depth by one and moves the records whose
//! newly significant bit is set into a fresh sibling bucket. When the
//! bucket was already as deep as the directory, the directory doubles
//! first. Pages for both are reserved before anything changes.

use tracing::{debug, warn};

use super::{HashIndex, dangling};
use crate::IndexError;
use crate::bucket::Bucket;
use crate::directory::BucketId;
use crate::layout::{MAX_DEPTH, depth_mask};
use crate::page::PageAllocator;

impl<A: PageAllocator> HashIndex<A> {
    /// Splits bucket `id`, which `key` routes to.
    ///
    /// On error nothing has been modified, except for a failed validation
    /// which reports a structure that is already in place.
    pub(super) fn split(&mut self, id: BucketId, key: u64) -> Result<(), IndexError> {
        let old_depth = self.dir.bucket(id).ok_or_else(|| dangling(id))?.depth();
        let dir_depth = self.dir.depth();
        let grow = old_depth >= dir_depth;
        if grow && dir_depth >= MAX_DEPTH {
            warn!(depth = dir_depth, "directory at maximum depth");
            return Err(IndexError::CapacityExceeded { depth: dir_depth });
        }

        // Reserve every page before mutating.
        let sibling_page = self.reserve(1)?;
        let backing = if grow && self.dir.grow_needs_backing() {
            match self.reserve(self.dir.directory_pages() * 2) {
                Ok(page) => Some(page),
                Err(e) => {
                    self.alloc.release(sibling_page);
                    return Err(e);
                }
            }
        } else {
            None
        };

        if grow && let Some(old) = self.dir.grow(backing) {
            self.alloc.release(old);
        }

        let new_depth = old_depth + 1;
        let bit = 1u64 << old_depth;
        let bucket = self.dir.bucket_mut(id).ok_or_else(|| dangling(id))?;
        let records: Vec<(u64, u64)> = bucket.records().collect();
        bucket.reset(new_depth);

        let mut sibling = Bucket::new(sibling_page, new_depth);
        let mut spill = Vec::new();
        let mut moved = 0usize;
        for (k, v) in records {
            let placed = if k & bit != 0 {
                moved += 1;
                sibling.insert(k, v)
            } else {
                bucket.insert(k, v)
            };
            if !placed {
                spill.push((k, v));
            }
        }
        let sibling_id = self.dir.insert_bucket(sibling);

        let stride = bit as usize;
        let n = self.dir.number_of_buckets() as usize;
        let start = (key & depth_mask(old_depth)) as usize;
        for i in (start..n).step_by(stride) {
            let target = if i & stride != 0 { sibling_id } else { id };
            self.dir.set_slot(i, target);
        }

        debug!(
            bucket = %id,
            sibling = %sibling_id,
            depth = new_depth,
            dir_depth = self.dir.depth(),
            moved,
            spilled = spill.len(),
            "bucket split"
        );

        if !spill.is_empty() {
            // Spilled records already counted; store re-adds them.
            self.dir
                .set_entries(self.dir.entries() - spill.len() as u64);
            for (k, v) in spill {
                let (buf, len) = crate::varint::encode_record(k, v);
                self.store(k, &buf[..len])?;
            }
        }

        self.validate_after("split", &[start, start | stride])
    }
}
