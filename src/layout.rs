//! Structural constants of the paged layout.
//!
//! These values fix the byte layout of buckets and the directory.  They
//! are compile-time only: changing any of them changes where every field
//! lives inside a page.

/// Size of one allocator page in bytes.
pub const PAGE_SIZE: usize = 8192;

/// Size of the bucket header that precedes the pieces.
pub const BUCKET_HEADER_SIZE: usize = 64;

/// Size of one piece: a header byte followed by the record buffer.
pub const PIECE_SIZE: usize = 64;

/// Bytes of packed records a single piece can hold.
pub const PIECE_CAPACITY: usize = PIECE_SIZE - 1;

/// Pieces per bucket page.
pub const PIECES_PER_BUCKET: usize = 127;

/// Longest overflow chain probed when placing a record.
///
/// One more than [`PIECES_PER_BUCKET`], so a failed placement has seen
/// every piece of the bucket.
pub const MAX_CHAIN_LENGTH: usize = 128;

/// Total record bytes one bucket can hold.
pub const BUCKET_CAPACITY: usize = PIECES_PER_BUCKET * PIECE_CAPACITY;

/// Default combined size (bytes of records) under which two sibling
/// buckets are merged back into one.
pub const DEFAULT_MERGE_THRESHOLD: usize = 2000;

/// Size of the directory header that precedes the slot table.
pub const DIRECTORY_HEADER_SIZE: usize = 32;

/// Bytes per directory slot (a little-endian `u32` bucket id).
pub const SLOT_SIZE: usize = 4;

/// Deepest directory supported; `number_of_buckets` is a `u32`.
pub const MAX_DEPTH: u8 = 31;

/// Depth the directory starts at, and never shrinks below.
pub const MIN_DEPTH: u8 = 1;

const _: () = assert!(BUCKET_HEADER_SIZE + PIECES_PER_BUCKET * PIECE_SIZE == PAGE_SIZE);
const _: () = assert!(PIECE_CAPACITY < 128);

/// Low-bit mask selecting `depth` bits.
#[inline]
pub(crate) fn depth_mask(depth: u8) -> u64 {
    (1u64 << depth) - 1
}

/// Home piece of a key inside any bucket.
#[inline]
pub(crate) fn home_piece(key: u64) -> usize {
    (key % PIECES_PER_BUCKET as u64) as usize
}

/// Piece `steps` positions after `start`, wrapping around the bucket.
#[inline]
pub(crate) fn piece_after(start: usize, steps: usize) -> usize {
    (start + steps) % PIECES_PER_BUCKET
}
