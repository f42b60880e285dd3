
use crate::bucket::Bucket;
use crate::page::Page;

/// A fresh one-page bucket at `depth`.
pub(super) fn new_bucket(depth: u8) -> Bucket {
    Bucket::new(Page::zeroed(1).expect("map page"), depth)
}

/// Key number `n` whose home piece is `home`.
pub(super) fn key_in_piece(home: u64, n: u64) -> u64 {
    home + 127 * n
}
