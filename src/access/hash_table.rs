//! Disk-resident hash index with chained, cacheline-sized buckets.
//!
//! The table has a fixed number of head buckets laid out back to back from
//! offset 0 of its backend. Keys hash to a head bucket; when every slot along
//! a chain is taken, a new bucket is appended at the end of the backend and
//! linked from the last bucket of the chain. The table never resizes.
//!
//! All reads and writes go straight to the backend; nothing is cached.

use crate::access::codec::{FixedCodec, TableKey};
use crate::config::{StorageConfig, TableConfig, DEFAULT_CACHELINE};
use crate::storage::backend::Backend;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{Bucket, BucketLayout};
use std::marker::PhantomData;
use std::ops::ControlFlow;

/// Location of one slot: bucket offset in the backend plus slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotRef {
    bucket: u64,
    slot: usize,
}

enum Probe<V> {
    Hit { at: SlotRef, value: V },
    Miss { first_empty: Option<SlotRef>, tail: u64 },
}

pub struct HashTable<K, V, B: Backend> {
    backend: B,
    bucket_count: usize,
    layout: BucketLayout,
    _marker: PhantomData<(K, V)>,
}

impl<K: TableKey, V: FixedCodec, B: Backend> HashTable<K, V, B> {
    /// Create a table, zero-filling its head buckets.
    pub fn create(backend: B, bucket_count: usize) -> StorageResult<Self> {
        Self::create_with_cacheline(backend, bucket_count, DEFAULT_CACHELINE)
    }

    pub fn create_with_cacheline(
        backend: B,
        bucket_count: usize,
        cacheline: usize,
    ) -> StorageResult<Self> {
        let mut table = Self::attach(backend, bucket_count, cacheline)?;

        let zeros = vec![0u8; table.layout.bucket_bytes()];
        for bucket_no in 0..bucket_count {
            let offset = table.layout.bucket_offset(bucket_no);
            table.backend.write(&zeros, offset)?;
        }

        log::debug!(
            "Created hash table on {}: {} buckets of {} bytes, {} slots each",
            table.backend.handle(),
            bucket_count,
            table.layout.bucket_bytes(),
            table.layout.slots()
        );

        Ok(table)
    }

    /// Create a table sized to `config.cacheline`.
    pub fn create_with_config(
        backend: B,
        bucket_count: usize,
        config: &StorageConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        Self::create_with_cacheline(backend, bucket_count, config.cacheline)
    }

    /// Attach to a table previously built with the same geometry.
    pub fn open(backend: B, bucket_count: usize) -> StorageResult<Self> {
        Self::open_with_cacheline(backend, bucket_count, DEFAULT_CACHELINE)
    }

    pub fn open_with_cacheline(
        backend: B,
        bucket_count: usize,
        cacheline: usize,
    ) -> StorageResult<Self> {
        let table = Self::attach(backend, bucket_count, cacheline)?;

        let len = table.backend.len()?;
        if len < table.head_region_len() {
            return Err(StorageError::Corrupted(format!(
                "backend holds {} bytes but {} head buckets need {}",
                len,
                bucket_count,
                table.head_region_len()
            )));
        }

        Ok(table)
    }

    /// Open a table described by persisted metadata, checking it matches `K` and `V`.
    pub fn open_with_config(backend: B, config: &TableConfig) -> StorageResult<Self> {
        if config.key_size != K::SIZE || config.value_size != V::SIZE {
            return Err(StorageError::InvalidConfig(format!(
                "table stores {}-byte keys and {}-byte values, expected {} and {}",
                config.key_size,
                config.value_size,
                K::SIZE,
                V::SIZE
            )));
        }
        Self::open_with_cacheline(backend, config.bucket_count, config.cacheline)
    }

    fn attach(backend: B, bucket_count: usize, cacheline: usize) -> StorageResult<Self> {
        if bucket_count == 0 {
            return Err(StorageError::InvalidConfig(
                "bucket_count must be nonzero".into(),
            ));
        }
        let layout = BucketLayout::new(K::SIZE, V::SIZE, cacheline)?;

        Ok(Self {
            backend,
            bucket_count,
            layout,
            _marker: PhantomData,
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    pub fn config(&self) -> TableConfig {
        TableConfig {
            bucket_count: self.bucket_count,
            cacheline: self.layout.cacheline(),
            key_size: K::SIZE,
            value_size: V::SIZE,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Head bucket number for a key.
    pub fn hash(&self, key: &K) -> usize {
        (key.hash_key() % self.bucket_count as u64) as usize
    }

    /// Insert `key` if absent. Returns the value now stored under `key`: the
    /// existing one when the key was already present, otherwise `value`.
    pub fn insert(&mut self, key: K, value: V) -> StorageResult<V> {
        let entry = self.encode_entry(&key, &value);
        if entry.iter().all(|&b| b == 0) {
            return Err(StorageError::ReservedEntry);
        }

        match self.probe(&key)? {
            Probe::Hit { value: existing, .. } => Ok(existing),
            Probe::Miss {
                first_empty: Some(at),
                ..
            } => {
                let offset = at.bucket + self.layout.slot_offset(at.slot)? as u64;
                self.backend.write(&entry, offset)?;
                Ok(value)
            }
            Probe::Miss {
                first_empty: None,
                tail,
            } => {
                let new_bucket = self.backend.len()?;
                let data = self.layout.new_bucket(&entry)?;
                self.backend.write(&data, new_bucket)?;

                let link = BucketLayout::encode_link(new_bucket);
                let link_offset = tail + self.layout.chain_link_offset() as u64;
                self.backend.write(&link, link_offset)?;

                log::trace!(
                    "Chained bucket at {} after {} for head bucket {}",
                    new_bucket,
                    tail,
                    self.hash(&key)
                );
                Ok(value)
            }
        }
    }

    pub fn get(&mut self, key: &K) -> StorageResult<V> {
        match self.probe(key)? {
            Probe::Hit { value, .. } => Ok(value),
            Probe::Miss { .. } => Err(StorageError::KeyNotFound),
        }
    }

    pub fn contains(&mut self, key: &K) -> StorageResult<bool> {
        Ok(matches!(self.probe(key)?, Probe::Hit { .. }))
    }

    /// Zero the key's slot in place. Chains are never shortened.
    pub fn remove(&mut self, key: &K) -> StorageResult<()> {
        match self.probe(key)? {
            Probe::Hit { at, .. } => {
                let offset = at.bucket + self.layout.slot_offset(at.slot)? as u64;
                let zeros = vec![0u8; self.layout.entry_size()];
                self.backend.write(&zeros, offset)?;
                Ok(())
            }
            Probe::Miss { .. } => Err(StorageError::KeyNotFound),
        }
    }

    /// Every live entry, by head bucket and then chain order.
    pub fn entries(&mut self) -> StorageResult<Vec<(K, V)>> {
        let mut entries = Vec::new();
        for bucket_no in 0..self.bucket_count {
            self.walk_chain::<(), _>(bucket_no, |_, bucket| {
                for slot in 0..bucket.slots() {
                    if !bucket.is_empty_slot(slot)? {
                        let key = K::decode(bucket.key(slot)?);
                        entries.push((key, V::decode(bucket.value(slot)?)));
                    }
                }
                Ok(ControlFlow::Continue(()))
            })?;
        }
        Ok(entries)
    }

    /// Number of buckets in the chain starting at head bucket `bucket_no`.
    pub fn chain_length(&mut self, bucket_no: usize) -> StorageResult<usize> {
        if bucket_no >= self.bucket_count {
            return Err(StorageError::OutOfRange {
                offset: bucket_no,
                len: 1,
                limit: self.bucket_count,
            });
        }

        let mut length = 0;
        self.walk_chain::<(), _>(bucket_no, |_, _| {
            length += 1;
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(length)
    }

    fn head_region_len(&self) -> u64 {
        self.layout.bucket_offset(self.bucket_count)
    }

    fn encode_entry(&self, key: &K, value: &V) -> Vec<u8> {
        let mut entry = vec![0u8; self.layout.entry_size()];
        key.encode(&mut entry[..K::SIZE]);
        value.encode(&mut entry[K::SIZE..]);
        entry
    }

    /// Walk the key's chain, recording an exact match and the first empty
    /// slot independently. Only occupied slots can match.
    fn probe(&mut self, key: &K) -> StorageResult<Probe<V>> {
        let key_bytes = key.to_bytes();
        let mut first_empty = None;
        let mut tail = 0;

        let hit = self.walk_chain(self.hash(key), |offset, bucket| {
            tail = offset;
            for slot in 0..bucket.slots() {
                if bucket.is_empty_slot(slot)? {
                    if first_empty.is_none() {
                        first_empty = Some(SlotRef {
                            bucket: offset,
                            slot,
                        });
                    }
                } else if bucket.key(slot)? == key_bytes.as_slice() {
                    let at = SlotRef {
                        bucket: offset,
                        slot,
                    };
                    return Ok(ControlFlow::Break((at, V::decode(bucket.value(slot)?))));
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;

        Ok(match hit {
            Some((at, value)) => Probe::Hit { at, value },
            None => Probe::Miss { first_empty, tail },
        })
    }

    /// Visit each bucket of a chain in order until `visit` breaks or the chain ends.
    fn walk_chain<T, F>(&mut self, bucket_no: usize, mut visit: F) -> StorageResult<Option<T>>
    where
        F: FnMut(u64, &Bucket<'_>) -> StorageResult<ControlFlow<T>>,
    {
        let layout = self.layout;
        let head_region = self.head_region_len();
        let backend_len = self.backend.len()?;
        let max_hops = backend_len / layout.bucket_bytes() as u64 + 1;

        let mut buf = vec![0u8; layout.bucket_bytes()];
        let mut offset = layout.bucket_offset(bucket_no);
        let mut hops = 0;

        loop {
            self.backend.read(&mut buf, offset)?;
            let bucket = Bucket::new(&layout, &buf)?;

            if let ControlFlow::Break(found) = visit(offset, &bucket)? {
                return Ok(Some(found));
            }

            let next = bucket.next();
            if next == 0 {
                return Ok(None);
            }

            hops += 1;
            let past_end = next
                .checked_add(layout.bucket_bytes() as u64)
                .map_or(true, |end| end > backend_len);
            if next < head_region || past_end || hops > max_hops
            {
                return Err(StorageError::Corrupted(format!(
                    "bucket at {} links to invalid offset {}",
                    offset, next
                )));
            }
            offset = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::MemoryBackend;
    use crate::storage::disk::{BlockFileBackend, FileBackend};
    use anyhow::Result;
    use tempfile::tempdir;

    fn new_table(bucket_count: usize) -> Result<HashTable<u64, u64, MemoryBackend>> {
        Ok(HashTable::create(MemoryBackend::new(), bucket_count)?)
    }

    #[test]
    fn test_create_materializes_head_buckets() -> Result<()> {
        let table = new_table(10)?;
        assert_eq!(table.bucket_count(), 10);
        assert_eq!(table.layout().bucket_bytes(), 64);
        assert_eq!(table.backend().len()?, 640);
        assert!(table.backend().as_bytes().iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let mut table = new_table(8)?;
        assert_eq!(table.insert(1, 100)?, 100);
        assert_eq!(table.insert(2, 200)?, 200);

        assert_eq!(table.get(&1)?, 100);
        assert_eq!(table.get(&2)?, 200);
        assert!(table.contains(&1)?);
        assert!(!table.contains(&3)?);

        Ok(())
    }

    #[test]
    fn test_duplicate_insert_keeps_original() -> Result<()> {
        let mut table = new_table(8)?;
        table.insert(5, 50)?;

        assert_eq!(table.insert(5, 99)?, 50);
        assert_eq!(table.get(&5)?, 50);
        assert_eq!(table.entries()?.len(), 1);

        Ok(())
    }

    #[test]
    fn test_missing_key() -> Result<()> {
        let mut table = new_table(8)?;
        table.insert(1, 1)?;

        assert!(matches!(table.get(&2), Err(StorageError::KeyNotFound)));
        assert!(matches!(table.remove(&2), Err(StorageError::KeyNotFound)));
        assert_eq!(table.get(&1)?, 1);

        Ok(())
    }

    #[test]
    fn test_remove_then_get() -> Result<()> {
        let mut table = new_table(8)?;
        table.insert(3, 30)?;
        table.insert(11, 110)?;

        table.remove(&3)?;
        assert!(table.get(&3).unwrap_err().is_not_found());
        assert_eq!(table.get(&11)?, 110);

        // Removing twice misses
        assert!(matches!(table.remove(&3), Err(StorageError::KeyNotFound)));

        Ok(())
    }

    #[test]
    fn test_collisions_chain_buckets() -> Result<()> {
        let mut table = new_table(4)?;
        // 3 slots per bucket: 7 colliding keys need 3 buckets
        for i in 0..7u64 {
            table.insert(1 + 4 * i, i + 1)?;
        }

        assert_eq!(table.chain_length(1)?, 3);
        assert_eq!(table.chain_length(0)?, 1);
        assert_eq!(table.backend().len()?, 4 * 64 + 2 * 64);
        for i in 0..7u64 {
            assert_eq!(table.get(&(1 + 4 * i))?, i + 1);
        }

        Ok(())
    }

    #[test]
    fn test_removed_slot_is_reused() -> Result<()> {
        let mut table = new_table(1)?;
        for key in 1..=6u64 {
            table.insert(key, key * 10)?;
        }
        let len_before = table.backend().len()?;

        // Free a slot in the head bucket; the next insert fills it
        table.remove(&2)?;
        table.insert(7, 70)?;
        assert_eq!(table.backend().len()?, len_before);
        assert_eq!(table.chain_length(0)?, 2);

        let slot_key = u64::decode(&table.backend().as_bytes()[16..24]);
        assert_eq!(slot_key, 7);

        Ok(())
    }

    #[test]
    fn test_key_after_hole_is_found() -> Result<()> {
        let mut table = new_table(1)?;
        for key in 1..=4u64 {
            table.insert(key, key)?;
        }
        table.remove(&1)?;

        // Key 4 lives in the overflow bucket behind an empty head slot
        assert_eq!(table.insert(4, 400)?, 4);
        assert_eq!(table.entries()?.len(), 3);

        Ok(())
    }

    #[test]
    fn test_zero_key_with_value() -> Result<()> {
        let mut table = new_table(4)?;
        table.insert(0, 77)?;
        assert_eq!(table.get(&0)?, 77);

        // An empty slot never matches the zero key
        let mut empty = new_table(4)?;
        assert!(matches!(empty.get(&0), Err(StorageError::KeyNotFound)));

        Ok(())
    }

    #[test]
    fn test_all_zero_entry_rejected() -> Result<()> {
        let mut table = new_table(4)?;
        assert!(matches!(
            table.insert(0, 0),
            Err(StorageError::ReservedEntry)
        ));
        // Zero value with a nonzero key is fine
        table.insert(9, 0)?;
        assert_eq!(table.get(&9)?, 0);
        Ok(())
    }

    #[test]
    fn test_create_with_config_uses_cacheline() -> Result<()> {
        let config = StorageConfig {
            cacheline: 128,
            ..StorageConfig::default()
        };
        let table: HashTable<u64, u64, _> =
            HashTable::create_with_config(MemoryBackend::new(), 4, &config)?;
        assert_eq!(table.layout().bucket_bytes(), 128);
        assert_eq!(table.layout().slots(), 7);
        assert_eq!(table.config().cacheline, 128);
        assert_eq!(table.backend().len()?, 512);
        Ok(())
    }

    #[test]
    fn test_zero_bucket_count() {
        let result = HashTable::<u64, u64, _>::create(MemoryBackend::new(), 0);
        assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
    }

    #[test]
    fn test_byte_array_keys() -> Result<()> {
        let mut table: HashTable<[u8; 16], u32, _> = HashTable::create(MemoryBackend::new(), 32)?;
        // 20-byte entries: 2 per bucket
        assert_eq!(table.layout().slots(), 2);

        let keys: Vec<[u8; 16]> = (0..50u32)
            .map(|i| {
                let mut key = [0u8; 16];
                key[..8].copy_from_slice(b"session-");
                key[8..12].copy_from_slice(&i.to_be_bytes());
                key
            })
            .collect();
        for (i, key) in keys.iter().enumerate() {
            table.insert(*key, i as u32 + 1)?;
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(key)?, i as u32 + 1);
        }

        Ok(())
    }

    #[test]
    fn test_wide_entries_span_cachelines() -> Result<()> {
        let mut table: HashTable<u64, [u8; 100], _> = HashTable::create(MemoryBackend::new(), 2)?;
        assert_eq!(table.layout().bucket_bytes(), 128);
        assert_eq!(table.layout().slots(), 1);

        table.insert(1, [1u8; 100])?;
        table.insert(3, [3u8; 100])?;
        assert_eq!(table.chain_length(1)?, 2);
        assert_eq!(table.get(&3)?, [3u8; 100]);

        Ok(())
    }

    #[test]
    fn test_reopen_file_table() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.kv");

        {
            let mut table = HashTable::<u64, u64, _>::create(FileBackend::create(&path)?, 16)?;
            for key in 1..100u64 {
                table.insert(key, key * key)?;
            }
        }

        let mut table = HashTable::<u64, u64, _>::open(FileBackend::open(&path)?, 16)?;
        for key in 1..100u64 {
            assert_eq!(table.get(&key)?, key * key);
        }
        assert_eq!(table.entries()?.len(), 99);

        Ok(())
    }

    #[test]
    fn test_open_short_backend() -> Result<()> {
        let mut mem = MemoryBackend::new();
        mem.write(&[0u8; 100], 0)?;
        let result = HashTable::<u64, u64, _>::open(mem, 10);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
        Ok(())
    }

    #[test]
    fn test_open_with_mismatched_config() -> Result<()> {
        let table = HashTable::<u64, u64, _>::create(MemoryBackend::new(), 4)?;
        let mut config = table.config();
        config.value_size = 4;

        let result = HashTable::<u64, u64, _>::open_with_config(table.into_backend(), &config);
        assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_corrupt_chain_link() -> Result<()> {
        let mut table = new_table(2)?;
        table.insert(1, 1)?;

        // Point head bucket 1's link back into the head region
        let mut mem = table.into_backend();
        mem.write(&BucketLayout::encode_link(8), 64 + 56)?;

        let mut table = HashTable::<u64, u64, _>::open(mem, 2)?;
        assert!(matches!(table.get(&3), Err(StorageError::Corrupted(_))));

        // A link near the top of the address space
        let mut mem = table.into_backend();
        mem.write(&BucketLayout::encode_link(u64::MAX - 10), 64 + 56)?;
        let mut table = HashTable::<u64, u64, _>::open(mem, 2)?;
        assert!(matches!(table.get(&3), Err(StorageError::Corrupted(_))));
        assert!(matches!(table.insert(5, 50), Err(StorageError::Corrupted(_))));
        Ok(())
    }

    #[test]
    fn test_block_file_backend() -> Result<()> {
        let dir = tempdir()?;
        let backend = BlockFileBackend::create(&dir.path().join("blocks.kv"))?;
        let mut table = HashTable::<u32, u32, _>::create(backend, 8)?;

        for key in 0..64u32 {
            table.insert(key * 8, key + 1)?;
        }
        for key in 0..64u32 {
            assert_eq!(table.get(&(key * 8))?, key + 1);
        }
        assert_eq!(table.backend().len()? % 4096, 0);

        Ok(())
    }
}
