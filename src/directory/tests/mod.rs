
use crate::bucket::Bucket;
use crate::directory::Directory;
use crate::page::Page;

pub(super) fn bucket(depth: u8) -> Bucket {
    Bucket::new(Page::zeroed(1).expect("map bucket"), depth)
}

/// A depth-1 directory on a single page.
pub(super) fn directory() -> Directory {
    Directory::new(Page::zeroed(1).expect("map directory"), bucket(1), bucket(1))
}
