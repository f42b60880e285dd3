//! # Structural validation
//!
//! Checks the invariants the engine relies on. They are cheap enough to run
//! after every split, merge and shrink in debug builds (the `validate`
//! field of [`IndexConfig`](crate::IndexConfig)) and can be run
//! on demand through [`HashIndex::check_invariants`](crate::HashIndex::check_invariants).
//!
//! Every failure is reported as [`IndexError::InvariantViolation`] with a
//! message naming the bucket, slot or key involved.


use std::collections::HashSet;

use crate::IndexError;
use crate::directory::{BucketId, Directory};
use crate::layout::{PIECE_CAPACITY, depth_mask};

fn violation(msg: String) -> IndexError {
    IndexError::InvariantViolation(msg)
}

/// Checks the bucket referenced by `slot`.
///
/// - the bucket is live and no deeper than the directory;
/// - every slot sharing its low `depth` bits with `slot` references it;
/// - every key carries those bits;
/// - the entry counter matches the records present;
/// - every record is found by probing from its home piece;
/// - no piece claims more than its capacity.
///
/// Only the `2^(dir_depth - depth)` slots of the bucket's own pattern are
/// read. That no other slot names the bucket is a property of the whole
/// table, covered by [`check_directory`].
pub fn check_bucket_at(dir: &Directory, slot: usize) -> Result<(), IndexError> {
    let slots = dir.number_of_buckets() as usize;
    if slot >= slots {
        return Err(violation(format!(
            "slot {slot} is outside a table of {slots} slots"
        )));
    }
    let id = dir.slot(slot);
    let bucket = dir
        .bucket(id)
        .ok_or_else(|| violation(format!("slot {slot} references released bucket {id}")))?;
    let depth = bucket.depth();
    if depth > dir.depth() {
        return Err(violation(format!(
            "bucket {id} depth {depth} exceeds directory depth {}",
            dir.depth()
        )));
    }

    let mask = depth_mask(depth);
    let pattern = slot as u64 & mask;
    for i in (pattern as usize..slots).step_by(1usize << depth) {
        let other = dir.slot(i);
        if other != id {
            return Err(violation(format!(
                "slot {i} shares the low {depth} bits of bucket {id} but references {other}"
            )));
        }
    }

    for (index, piece) in bucket.pieces().enumerate() {
        let used = piece.header().bytes_used as usize;
        if used > PIECE_CAPACITY {
            return Err(violation(format!(
                "bucket {id} piece {index} claims {used} bytes"
            )));
        }
    }

    let mut count = 0u64;
    for (index, piece) in bucket.pieces().enumerate() {
        for record in piece.records() {
            count += 1;
            if record.key & mask != pattern {
                return Err(violation(format!(
                    "key {} in bucket {id} does not match pattern {pattern:#b}/{depth}",
                    record.key
                )));
            }
            let reachable = bucket
                .find(record.key)
                .is_some_and(|found| found.piece == index && found.record == record);
            if !reachable {
                return Err(violation(format!(
                    "key {} in bucket {id} piece {index} is unreachable or duplicated",
                    record.key
                )));
            }
        }
    }
    if count != bucket.entries() {
        return Err(violation(format!(
            "bucket {id} counts {} entries but holds {count}",
            bucket.entries()
        )));
    }
    Ok(())
}

/// Checks bucket `id` from the first slot that references it.
///
/// Scans the slot table to find that slot; prefer [`check_bucket_at`] when
/// the slot is known.
pub fn check_bucket(dir: &Directory, id: BucketId) -> Result<(), IndexError> {
    if dir.bucket(id).is_none() {
        return Err(violation(format!("bucket {id} is not live")));
    }
    let slot = dir
        .slots()
        .position(|slot| slot == id)
        .ok_or_else(|| violation(format!("bucket {id} is not referenced by any slot")))?;
    check_bucket_at(dir, slot)
}

/// Checks the directory header and slot table.
///
/// - the slot count is `2^depth`;
/// - every slot names a live bucket no deeper than the directory;
/// - slot `i` equals slot `i mod 2^bucket_depth`;
/// - every live bucket has exactly one canonical slot (below `2^depth` of
///   the bucket), so it is referenced and never under two patterns;
/// - the directory entry counter equals the sum over buckets.
pub fn check_directory(dir: &Directory) -> Result<(), IndexError> {
    let depth = dir.depth();
    let slots = dir.number_of_buckets() as usize;
    if slots != 1usize << depth {
        return Err(violation(format!(
            "directory at depth {depth} has {slots} slots"
        )));
    }

    let mut canonical = HashSet::new();
    for (i, id) in dir.slots().enumerate() {
        let bucket = dir
            .bucket(id)
            .ok_or_else(|| violation(format!("slot {i} references released bucket {id}")))?;
        let bucket_depth = bucket.depth();
        if bucket_depth > depth {
            return Err(violation(format!(
                "slot {i}: bucket {id} depth {bucket_depth} exceeds directory depth {depth}"
            )));
        }
        let first = (i as u64 & depth_mask(bucket_depth)) as usize;
        if first == i {
            if !canonical.insert(id) {
                return Err(violation(format!(
                    "bucket {id} has a second canonical slot {i}"
                )));
            }
        } else if dir.slot(first) != id {
            return Err(violation(format!(
                "slot {i} references {id} but slot {first} references {}",
                dir.slot(first)
            )));
        }
    }

    let mut total = 0u64;
    for (id, bucket) in dir.buckets() {
        if !canonical.contains(&id) {
            return Err(violation(format!("bucket {id} is not referenced")));
        }
        total += bucket.entries();
    }
    if total != dir.entries() {
        return Err(violation(format!(
            "directory counts {} entries, buckets hold {total}",
            dir.entries()
        )));
    }
    Ok(())
}

/// Runs [`check_directory`], then [`check_bucket_at`] from every bucket's
/// canonical slot.
pub fn check_index(dir: &Directory) -> Result<(), IndexError> {
    check_directory(dir)?;
    for (i, id) in dir.slots().enumerate() {
        let canonical = dir
            .bucket(id)
            .is_some_and(|bucket| i < 1usize << bucket.depth());
        if canonical {
            check_bucket_at(dir, i)?;
        }
    }
    Ok(())
}
