//! # Buckets
//!
//! A bucket is one page: a 64-byte header followed by 127 [`Piece`]s.
//!
//! ```text
//! offset 0      8       9      10 .. 64     64 .. 8192
//!        [entries u64][depth][seen][reserved][piece 0][piece 1] ... [piece 126]
//! ```
//!
//! ## Probing
//!
//! A key's home piece is `key % 127`. Lookups probe the home piece and then
//! the following pieces (wrapping) for as long as each probed piece carries
//! the `overflowed` flag. Inserts place the record in the first piece with
//! room, flagging every full piece they pass, so the record stays reachable.
//!
//! ## Overflow merge
//!
//! Deletes can leave chains longer than their contents need. Running
//! [`Bucket::merge_overflow`] on a piece relocates displaced records of its
//! chain back toward their home piece and recomputes the chain's flags from
//! the records that remain, so a piece stays flagged only while some record
//! is probed past it.

#[cfg(test)]
mod tests;

pub mod piece;

use tracing::debug;

use crate::layout::{
    BUCKET_HEADER_SIZE, MAX_CHAIN_LENGTH, PAGE_SIZE, PIECE_SIZE, PIECES_PER_BUCKET, home_piece,
    piece_after,
};
use crate::page::{Page, read_u64, write_u64};
use crate::varint::{self, MAX_RECORD_SIZE};

pub use piece::{Piece, PieceHeader, PieceMut, PieceRecords, Record};

const ENTRIES_OFFSET: usize = 0;
const DEPTH_OFFSET: usize = 8;
const SEEN_OFFSET: usize = 9;

// ------------------------------------------------------------------------------------------------
// Located records
// ------------------------------------------------------------------------------------------------

/// A record together with the piece it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub piece: usize,
    pub record: Record,
}

/// Outcome of [`Bucket::merge_overflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No piece of the chain is flagged any more.
    Cleared,
    /// Some records still live past their home piece.
    Residual,
}

// ------------------------------------------------------------------------------------------------
// Bucket
// ------------------------------------------------------------------------------------------------

/// A bucket page.
pub struct Bucket {
    page: Page,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("entries", &self.entries())
            .field("depth", &self.depth())
            .field("used_bytes", &self.used_bytes())
            .finish_non_exhaustive()
    }
}

impl Bucket {
    /// Formats `page` as an empty bucket at `depth`.
    pub(crate) fn new(page: Page, depth: u8) -> Self {
        debug_assert!(page.len() >= PAGE_SIZE, "bucket page too small");
        let mut bucket = Self { page };
        bucket.reset(depth);
        bucket
    }

    /// Gives the page back, e.g. to release it to the allocator.
    pub(crate) fn into_page(self) -> Page {
        self.page
    }

    /// Empties every piece and the header, then sets `depth`.
    pub(crate) fn reset(&mut self, depth: u8) {
        self.page.as_bytes_mut()[..PAGE_SIZE].fill(0);
        self.set_depth(depth);
    }

    // --------------------------------------------------------------------------------------------
    // Header
    // --------------------------------------------------------------------------------------------

    /// Records stored in this bucket.
    pub fn entries(&self) -> u64 {
        read_u64(self.page.as_bytes(), ENTRIES_OFFSET)
    }

    fn set_entries(&mut self, entries: u64) {
        write_u64(self.page.as_bytes_mut(), ENTRIES_OFFSET, entries);
    }

    /// Number of low key bits this bucket is responsible for.
    pub fn depth(&self) -> u8 {
        self.page.as_bytes()[DEPTH_OFFSET]
    }

    pub(crate) fn set_depth(&mut self, depth: u8) {
        self.page.as_bytes_mut()[DEPTH_OFFSET] = depth;
    }

    /// Traversal marker used to visit aliased buckets once.
    pub fn seen(&self) -> bool {
        self.page.as_bytes()[SEEN_OFFSET] != 0
    }

    pub(crate) fn set_seen(&mut self, seen: bool) {
        self.page.as_bytes_mut()[SEEN_OFFSET] = u8::from(seen);
    }

    // --------------------------------------------------------------------------------------------
    // Pieces
    // --------------------------------------------------------------------------------------------

    fn piece_range(index: usize) -> std::ops::Range<usize> {
        debug_assert!(index < PIECES_PER_BUCKET);
        let start = BUCKET_HEADER_SIZE + index * PIECE_SIZE;
        start..start + PIECE_SIZE
    }

    pub fn piece(&self, index: usize) -> Piece<'_> {
        Piece::new(&self.page.as_bytes()[Self::piece_range(index)])
    }

    pub(crate) fn piece_mut(&mut self, index: usize) -> PieceMut<'_> {
        PieceMut::new(&mut self.page.as_bytes_mut()[Self::piece_range(index)])
    }

    pub fn pieces(&self) -> impl Iterator<Item = Piece<'_>> + '_ {
        (0..PIECES_PER_BUCKET).map(|i| self.piece(i))
    }

    /// Every `(key, value)` stored in the bucket, in piece order.
    pub fn records(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.pieces()
            .flat_map(|piece| piece.records())
            .map(|r| (r.key, r.value))
    }

    /// Total bytes of packed records across all pieces.
    pub fn used_bytes(&self) -> usize {
        self.pieces().map(|p| p.bytes_used()).sum()
    }

    /// Whether any piece carries the overflow flag.
    pub fn has_overflow(&self) -> bool {
        self.pieces().any(|p| p.overflowed())
    }

    // --------------------------------------------------------------------------------------------
    // Record operations
    // --------------------------------------------------------------------------------------------

    /// Probes the chain starting at the key's home piece.
    pub fn find(&self, key: u64) -> Option<Located> {
        let home = home_piece(key);
        for step in 0..PIECES_PER_BUCKET {
            let index = piece_after(home, step);
            let piece = self.piece(index);
            if let Some(record) = piece.find(key) {
                return Some(Located {
                    piece: index,
                    record,
                });
            }
            if !piece.overflowed() {
                break;
            }
        }
        None
    }

    /// Places an encoded record for `key` in the first piece of its chain
    /// with room, flagging the full pieces in front of it.
    ///
    /// Returns the piece used, or `None` without modifying the bucket when
    /// no piece within [`MAX_CHAIN_LENGTH`] has room. The caller must have
    /// checked that `key` is not already present.
    pub(crate) fn try_insert(&mut self, key: u64, encoded: &[u8]) -> Option<usize> {
        let home = home_piece(key);
        let steps = (0..MAX_CHAIN_LENGTH)
            .find(|&step| self.piece(piece_after(home, step)).free() >= encoded.len())?;

        for step in 0..steps {
            self.piece_mut(piece_after(home, step)).set_overflowed(true);
        }
        let target = piece_after(home, steps);
        let appended = self.piece_mut(target).append(encoded);
        debug_assert!(appended, "piece reported room it did not have");
        self.set_entries(self.entries() + 1);
        Some(target)
    }

    /// Encodes and places `(key, value)`; see [`try_insert`](Self::try_insert).
    pub(crate) fn insert(&mut self, key: u64, value: u64) -> bool {
        let (buf, len) = varint::encode_record(key, value);
        self.try_insert(key, &buf[..len]).is_some()
    }

    /// Appends an encoded record to a specific piece, bypassing the chain.
    /// Builds layouts that probing alone would never produce.
    #[cfg(test)]
    pub(crate) fn restore(&mut self, piece: usize, encoded: &[u8]) -> bool {
        if self.piece_mut(piece).append(encoded) {
            self.set_entries(self.entries() + 1);
            true
        } else {
            false
        }
    }

    /// Removes a located record, shifting the rest of its piece left.
    pub(crate) fn remove(&mut self, located: &Located) {
        self.piece_mut(located.piece)
            .remove(located.record.offset, located.record.len);
        self.set_entries(self.entries().saturating_sub(1));
    }

    /// Rewrites a located record in place with an encoding of equal length.
    pub(crate) fn overwrite(&mut self, located: &Located, encoded: &[u8]) {
        debug_assert_eq!(located.record.len, encoded.len());
        self.piece_mut(located.piece)
            .overwrite(located.record.offset, encoded);
    }

    // --------------------------------------------------------------------------------------------
    // Overflow merge
    // --------------------------------------------------------------------------------------------

    /// Pieces of the overflow run through `index`, in probe order.
    ///
    /// The run extends backward over flagged predecessors and forward over
    /// flagged pieces up to and including the first unflagged one. When
    /// every piece is flagged the run is the whole bucket.
    fn overflow_run(&self, index: usize) -> Vec<usize> {
        if self.pieces().all(|p| p.overflowed()) {
            return (1..=PIECES_PER_BUCKET)
                .map(|step| piece_after(index, step))
                .collect();
        }

        let mut start = index;
        loop {
            let prev = piece_after(start, PIECES_PER_BUCKET - 1);
            if !self.piece(prev).overflowed() {
                break;
            }
            start = prev;
        }

        let mut run = vec![start];
        let mut cur = start;
        while self.piece(cur).overflowed() {
            cur = piece_after(cur, 1);
            run.push(cur);
        }
        run
    }

    /// Shortens the overflow chain that passes through `index`.
    ///
    /// Walking the chain backward from its tail, records stored away from
    /// their home piece move to the first piece with room between home and
    /// their current position. Flags in the chain are then recomputed from
    /// the records left in it.
    pub(crate) fn merge_overflow(&mut self, index: usize) -> ChainState {
        let run = self.overflow_run(index);
        if run.len() == 1 {
            return ChainState::Cleared;
        }

        let mut moved = 0usize;
        for &current in run.iter().rev() {
            let displaced: Vec<Record> = self
                .piece(current)
                .records()
                .filter(|r| home_piece(r.key) != current)
                .collect();

            // Highest offset first keeps earlier offsets valid.
            for record in displaced.iter().rev() {
                let home = home_piece(record.key);
                let distance = (current + PIECES_PER_BUCKET - home) % PIECES_PER_BUCKET;
                let Some(step) = (0..distance)
                    .find(|&s| self.piece(piece_after(home, s)).free() >= record.len)
                else {
                    continue;
                };

                let mut bytes = [0u8; MAX_RECORD_SIZE];
                bytes[..record.len].copy_from_slice(
                    &self.piece(current).data()[record.offset..record.offset + record.len],
                );
                self.piece_mut(current).remove(record.offset, record.len);
                let appended = self
                    .piece_mut(piece_after(home, step))
                    .append(&bytes[..record.len]);
                debug_assert!(appended);
                moved += 1;
            }
        }

        for &i in &run {
            self.piece_mut(i).set_overflowed(false);
        }
        for &current in &run {
            let homes: Vec<usize> = self
                .piece(current)
                .records()
                .map(|r| home_piece(r.key))
                .filter(|&home| home != current)
                .collect();
            for home in homes {
                let distance = (current + PIECES_PER_BUCKET - home) % PIECES_PER_BUCKET;
                for step in 0..distance {
                    self.piece_mut(piece_after(home, step)).set_overflowed(true);
                }
            }
        }

        let state = if run.iter().any(|&i| self.piece(i).overflowed()) {
            ChainState::Residual
        } else {
            ChainState::Cleared
        };
        debug!(
            piece = index,
            run_len = run.len(),
            moved,
            ?state,
            "merged overflow chain"
        );
        state
    }
}
