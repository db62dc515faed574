//! On-disk hash bucket layout.
//!
//! A bucket is one or more cachelines holding a fixed number of key/value
//! slots followed by an 8-byte little-endian chain link:
//!
//! ```text
//! +--------+--------+-----+--------+---------+------------+
//! | slot 0 | slot 1 | ... | slot k | padding | chain link |
//! +--------+--------+-----+--------+---------+------------+
//! ```
//!
//! A slot whose bytes are all zero is empty. A chain link of zero ends the chain.

use crate::storage::error::{StorageError, StorageResult};
use byteorder::{ByteOrder, LittleEndian};

/// Size of the trailing chain link.
pub const CHAIN_LINK_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLayout {
    key_size: usize,
    value_size: usize,
    cacheline: usize,
    bucket_bytes: usize,
    slots: usize,
}

impl BucketLayout {
    pub fn new(key_size: usize, value_size: usize, cacheline: usize) -> StorageResult<Self> {
        let entry_size = key_size + value_size;
        if entry_size == 0 {
            return Err(StorageError::InvalidConfig(
                "key and value cannot both be zero-sized".into(),
            ));
        }
        if cacheline <= CHAIN_LINK_SIZE {
            return Err(StorageError::InvalidConfig(format!(
                "cacheline must exceed {} bytes, got {}",
                CHAIN_LINK_SIZE, cacheline
            )));
        }

        // Every cacheline gives up room for a chain link, even though only the
        // last one stores it.
        let reduced = cacheline - CHAIN_LINK_SIZE;
        let lines = entry_size.div_ceil(reduced).max(1);
        let bucket_bytes = lines * cacheline;
        let slots = (bucket_bytes - CHAIN_LINK_SIZE) / entry_size;

        Ok(Self {
            key_size,
            value_size,
            cacheline,
            bucket_bytes,
            slots,
        })
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn cacheline(&self) -> usize {
        self.cacheline
    }

    pub fn entry_size(&self) -> usize {
        self.key_size + self.value_size
    }

    pub fn bucket_bytes(&self) -> usize {
        self.bucket_bytes
    }

    /// Bytes available to slots.
    fn usable_bytes(&self) -> usize {
        self.bucket_bytes - CHAIN_LINK_SIZE
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn chain_link_offset(&self) -> usize {
        self.usable_bytes()
    }

    /// Byte offset of head bucket `bucket_no`.
    pub fn bucket_offset(&self, bucket_no: usize) -> u64 {
        (bucket_no * self.bucket_bytes) as u64
    }

    /// Offset of a slot within a bucket.
    pub fn slot_offset(&self, slot: usize) -> StorageResult<usize> {
        let offset = slot * self.entry_size();
        self.check_range(offset, self.entry_size())?;
        Ok(offset)
    }

    fn check_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        if offset + len > self.usable_bytes() {
            return Err(StorageError::OutOfRange {
                offset,
                len,
                limit: self.usable_bytes(),
            });
        }
        Ok(())
    }

    /// A zero-padded bucket with `entry` in slot 0 and no successor.
    pub fn new_bucket(&self, entry: &[u8]) -> StorageResult<Vec<u8>> {
        self.check_range(0, entry.len())?;
        let mut bucket = vec![0u8; self.bucket_bytes];
        bucket[..entry.len()].copy_from_slice(entry);
        Ok(bucket)
    }

    pub fn encode_link(next: u64) -> [u8; CHAIN_LINK_SIZE] {
        let mut link = [0u8; CHAIN_LINK_SIZE];
        LittleEndian::write_u64(&mut link, next);
        link
    }
}

/// Read-only view over the bytes of one bucket.
pub struct Bucket<'a> {
    layout: &'a BucketLayout,
    data: &'a [u8],
}

impl<'a> Bucket<'a> {
    pub fn new(layout: &'a BucketLayout, data: &'a [u8]) -> StorageResult<Self> {
        if data.len() != layout.bucket_bytes {
            return Err(StorageError::OutOfRange {
                offset: 0,
                len: data.len(),
                limit: layout.bucket_bytes,
            });
        }
        Ok(Self { layout, data })
    }

    pub fn slots(&self) -> usize {
        self.layout.slots
    }

    pub fn slot(&self, slot: usize) -> StorageResult<&'a [u8]> {
        let offset = self.layout.slot_offset(slot)?;
        Ok(&self.data[offset..offset + self.layout.entry_size()])
    }

    pub fn key(&self, slot: usize) -> StorageResult<&'a [u8]> {
        Ok(&self.slot(slot)?[..self.layout.key_size])
    }

    pub fn value(&self, slot: usize) -> StorageResult<&'a [u8]> {
        Ok(&self.slot(slot)?[self.layout.key_size..])
    }

    pub fn is_empty_slot(&self, slot: usize) -> StorageResult<bool> {
        Ok(self.slot(slot)?.iter().all(|&b| b == 0))
    }

    /// Offset of the next bucket in the chain, or 0 at the end.
    pub fn next(&self) -> u64 {
        LittleEndian::read_u64(&self.data[self.layout.chain_link_offset()..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_layout_u64_pairs() -> Result<()> {
        let layout = BucketLayout::new(8, 8, 64)?;
        assert_eq!(layout.bucket_bytes(), 64);
        assert_eq!(layout.usable_bytes(), 56);
        assert_eq!(layout.slots(), 3);
        assert_eq!(layout.chain_link_offset(), 56);
        assert_eq!(layout.bucket_offset(5), 320);
        Ok(())
    }

    #[test]
    fn test_layout_spans_cachelines() -> Result<()> {
        // 100-byte entries need two reduced cachelines
        let layout = BucketLayout::new(36, 64, 64)?;
        assert_eq!(layout.bucket_bytes(), 128);
        assert_eq!(layout.slots(), 1);

        // Exactly one reduced cacheline still fits in one line
        let layout = BucketLayout::new(28, 28, 64)?;
        assert_eq!(layout.bucket_bytes(), 64);
        assert_eq!(layout.slots(), 1);

        Ok(())
    }

    #[test]
    fn test_invalid_layout() {
        assert!(BucketLayout::new(0, 0, 64).is_err());
        assert!(BucketLayout::new(8, 8, 8).is_err());
    }

    #[test]
    fn test_slot_out_of_range() -> Result<()> {
        let layout = BucketLayout::new(8, 8, 64)?;
        assert_eq!(layout.slot_offset(2)?, 32);
        assert!(matches!(
            layout.slot_offset(3),
            Err(StorageError::OutOfRange {
                offset: 48,
                len: 16,
                limit: 56
            })
        ));
        Ok(())
    }

    #[test]
    fn test_bucket_view() -> Result<()> {
        let layout = BucketLayout::new(4, 4, 64)?;
        let mut entry = Vec::new();
        entry.extend_from_slice(&7u32.to_le_bytes());
        entry.extend_from_slice(&9u32.to_le_bytes());

        let mut data = layout.new_bucket(&entry)?;
        data[layout.chain_link_offset()..].copy_from_slice(&BucketLayout::encode_link(640));

        let bucket = Bucket::new(&layout, &data)?;
        assert_eq!(bucket.key(0)?, &7u32.to_le_bytes());
        assert_eq!(bucket.value(0)?, &9u32.to_le_bytes());
        assert!(!bucket.is_empty_slot(0)?);
        assert!(bucket.is_empty_slot(1)?);
        assert_eq!(bucket.next(), 640);

        Ok(())
    }

    #[test]
    fn test_bucket_wrong_size() -> Result<()> {
        let layout = BucketLayout::new(8, 8, 64)?;
        let data = vec![0u8; 32];
        assert!(Bucket::new(&layout, &data).is_err());
        Ok(())
    }
}
