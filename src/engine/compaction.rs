//! Shrinking after deletes: overflow merge, buddy merge, directory halving.

use tracing::{debug, warn};

use super::HashIndex;
use crate::bucket::{Bucket, ChainState};
use crate::directory::BucketId;
use crate::layout::{MIN_DEPTH, depth_mask};
use crate::page::PageAllocator;

impl<A: PageAllocator> HashIndex<A> {
    /// Follow-up for a delete that left `piece` of bucket `id` empty.
    pub(super) fn compact_after_delete(&mut self, id: BucketId, key: u64, piece: usize) {
        let Some(bucket) = self.dir.bucket_mut(id) else {
            return;
        };
        if bucket.merge_overflow(piece) == ChainState::Residual {
            return;
        }

        if self.merge_buddies(id, key) {
            self.shrink_directory();
        }
    }

    /// Merges the bucket holding `key` with its buddy for as long as both
    /// have the same depth and fit under the merge threshold together.
    ///
    /// Returns whether at least one merge happened.
    fn merge_buddies(&mut self, mut id: BucketId, key: u64) -> bool {
        let mut merged_any = false;
        loop {
            let Some(bucket) = self.dir.bucket(id) else {
                return merged_any;
            };
            let depth = bucket.depth();
            if depth <= MIN_DEPTH {
                return merged_any;
            }

            let pattern = key & depth_mask(depth);
            let buddy_id = self.dir.slot((pattern ^ (1 << (depth - 1))) as usize);
            let Some(buddy) = self.dir.bucket(buddy_id) else {
                return merged_any;
            };
            if buddy_id == id || buddy.depth() != depth {
                return merged_any;
            }
            let combined = bucket.used_bytes() + buddy.used_bytes();
            if combined > self.config.merge_threshold {
                return merged_any;
            }

            match self.merge_pair(id, buddy_id, depth, pattern) {
                Some(merged) => {
                    id = merged;
                    merged_any = true;
                }
                None => return merged_any,
            }
        }
    }

    /// Replaces buckets `a` and `b` (buddies at `depth`) with one bucket at
    /// `depth - 1`. Leaves both untouched if the merge cannot complete.
    fn merge_pair(
        &mut self,
        a: BucketId,
        b: BucketId,
        depth: u8,
        pattern: u64,
    ) -> Option<BucketId> {
        let Some(page) = self.alloc.allocate(1) else {
            warn!(bucket = %a, buddy = %b, "merge skipped: page allocation failed");
            return None;
        };
        let mut merged = Bucket::new(page, depth - 1);

        let records: Vec<(u64, u64)> = [a, b]
            .into_iter()
            .filter_map(|id| self.dir.bucket(id))
            .flat_map(|bucket| bucket.records())
            .collect();
        for &(k, v) in &records {
            if !merged.insert(k, v) {
                warn!(bucket = %a, buddy = %b, key = k, "merge aborted: record does not fit");
                self.alloc.release(merged.into_page());
                return None;
            }
        }

        let merged_id = self.dir.insert_bucket(merged);
        let stride = 1usize << (depth - 1);
        let start = (pattern & depth_mask(depth - 1)) as usize;
        let n = self.dir.number_of_buckets() as usize;
        for i in (start..n).step_by(stride) {
            self.dir.set_slot(i, merged_id);
        }
        for old in [a, b] {
            if let Some(bucket) = self.dir.take_bucket(old) {
                self.alloc.release(bucket.into_page());
            }
        }

        debug!(
            merged = %merged_id,
            from = %a,
            buddy = %b,
            depth = depth - 1,
            records = records.len(),
            "buddy buckets merged"
        );
        // A delete has no error path; validate_after logs the failure.
        let checked = self.validate_after("merge", &[start]);
        debug_assert!(checked.is_ok(), "merge left an inconsistent structure");
        Some(merged_id)
    }

    /// Halves the directory while every slot equals its partner, then moves
    /// the table into a smaller page set when it fits.
    fn shrink_directory(&mut self) {
        let before = self.dir.depth();
        while self.dir.can_halve() {
            self.dir.halve();
        }
        if self.dir.depth() == before {
            return;
        }

        if let Some(target) = self.dir.shrink_target() {
            match self.alloc.allocate(target) {
                Some(page) => {
                    let old = self.dir.rehome(page);
                    debug!(from = old.pages(), to = target, "directory backing shrunk");
                    self.alloc.release(old);
                }
                None => {
                    warn!(pages = target, "keeping larger directory backing");
                }
            }
        }

        debug!(from = before, to = self.dir.depth(), "directory shrunk");
        let checked = self.validate_after("shrink", &[]);
        debug_assert!(checked.is_ok(), "shrink left an inconsistent structure");
    }
}
