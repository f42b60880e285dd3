//! Mutation-aware iteration.
//!
//! An [`IterState`] is a cursor `(slot, piece, offset)` plus the directory
//! version it was started at. It does not borrow the index, so writes can
//! happen between steps; the next step then fails with
//! [`IndexError::StaleIterator`] and every step after it fails the same way.
//!
//! Aliased buckets are visited once. A bucket at depth `d` is entered only
//! from its canonical slot, the one below `2^d`; every later slot naming
//! it has already been covered. The decision depends on the cursor alone,
//! so several iterations can be interleaved without disturbing each other.
//! Starting an iteration still clears every bucket's `seen` marker and
//! entering a bucket sets it, for inspection by callers.

use tracing::error;

use super::{HashIndex, dangling};
use crate::IndexError;
use crate::layout::PIECES_PER_BUCKET;
use crate::page::PageAllocator;

/// Cursor for [`HashIndex::iterate_next`].
#[derive(Debug, Clone)]
pub struct IterState {
    version: u32,
    slot: usize,
    piece: usize,
    offset: usize,
    /// The bucket under `slot` has been entered and marked seen.
    entered: bool,
    halted: bool,
}

impl IterState {
    /// Directory version this iteration belongs to.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether a stale check has already failed.
    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

impl<A: PageAllocator> HashIndex<A> {
    /// Starts an iteration over every `(key, value)` pair.
    pub fn iterate_begin(&mut self) -> IterState {
        for bucket in self.dir.buckets_mut() {
            bucket.set_seen(false);
        }
        IterState {
            version: self.dir.version(),
            slot: 0,
            piece: 0,
            offset: 0,
            entered: false,
            halted: false,
        }
    }

    /// Advances `state`, returning the next pair or `None` when done.
    ///
    /// # Errors
    ///
    /// [`IndexError::StaleIterator`] if the index was modified since
    /// [`iterate_begin`](Self::iterate_begin).
    pub fn iterate_next(
        &mut self,
        state: &mut IterState,
    ) -> Result<Option<(u64, u64)>, IndexError> {
        let found = self.dir.version();
        if state.halted || found != state.version {
            state.halted = true;
            return Err(IndexError::StaleIterator {
                expected: state.version,
                found,
            });
        }

        let slots = self.dir.number_of_buckets() as usize;
        while state.slot < slots {
            let id = self.dir.slot(state.slot);
            let bucket = self.dir.bucket_mut(id).ok_or_else(|| dangling(id))?;

            if !state.entered {
                if state.slot >= 1usize << bucket.depth() {
                    state.slot += 1;
                    continue;
                }
                bucket.set_seen(true);
                state.entered = true;
                state.piece = 0;
                state.offset = 0;
            }

            while state.piece < PIECES_PER_BUCKET {
                let piece = bucket.piece(state.piece);
                if state.offset < piece.bytes_used() {
                    if let Some(record) = piece.record_at(state.offset) {
                        state.offset += record.len;
                        return Ok(Some((record.key, record.value)));
                    }
                    error!(bucket = %id, piece = state.piece, "skipping undecodable piece tail");
                }
                state.piece += 1;
                state.offset = 0;
            }

            state.entered = false;
            state.slot += 1;
        }
        Ok(None)
    }

    /// Borrowing iterator over every `(key, value)` pair.
    pub fn iter(&mut self) -> Iter<'_, A> {
        let state = self.iterate_begin();
        Iter { index: self, state }
    }
}

/// Iterator returned by [`HashIndex::iter`].
///
/// Holds the index mutably, so it can never go stale.
pub struct Iter<'a, A: PageAllocator> {
    index: &'a mut HashIndex<A>,
    state: IterState,
}

impl<A: PageAllocator> Iterator for Iter<'_, A> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<(u64, u64)> {
        match self.index.iterate_next(&mut self.state) {
            Ok(item) => item,
            Err(e) => {
                error!(error = %e, "iteration stopped");
                None
            }
        }
    }
}
