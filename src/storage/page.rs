pub mod hash_bucket;

use crate::storage::error::{StorageError, StorageResult};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    /// Byte offset of the page in its backend. Fails when the page would end
    /// past `u64::MAX`.
    pub fn offset(self, page_size: usize) -> StorageResult<u64> {
        let page_size = page_size as u64;
        self.0
            .checked_add(1)
            .and_then(|pages| pages.checked_mul(page_size))
            .map(|end| end - page_size)
            .ok_or(StorageError::PageOutOfRange {
                page_id: self.0,
                page_size: page_size as usize,
            })
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub use hash_bucket::{Bucket, BucketLayout};
