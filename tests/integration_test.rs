use anyhow::Result;
use rand::Rng;
use std::collections::HashMap;
use tempfile::tempdir;
use vibekv::access::HashTable;
use vibekv::config::{StorageConfig, TableConfig};
use vibekv::storage::backend::{Backend, BufferedBackend, MemoryBackend};
use vibekv::storage::disk::{BlockFileBackend, FileBackend};
use vibekv::storage::{BufferPool, PageId, StorageError};

#[test]
fn test_ten_bucket_table() -> Result<()> {
    let mut table: HashTable<u64, u64, _> = HashTable::create(MemoryBackend::new(), 10)?;
    let mut rng = rand::thread_rng();

    let mut expected = HashMap::new();
    for key in (101..=801u64).step_by(100).chain([109, 110]) {
        let value = rng.gen_range(1..u64::MAX);
        assert_eq!(table.insert(key, value)?, value);
        expected.insert(key, value);
    }

    for (key, value) in &expected {
        assert_eq!(table.get(key)?, *value);
    }
    assert!(matches!(table.get(&45), Err(StorageError::KeyNotFound)));

    // 101..=801 all land in bucket 1, three slots per bucket
    assert_eq!(table.hash(&101), 1);
    assert_eq!(table.chain_length(1)?, 3);
    assert_eq!(table.hash(&109), 9);
    assert_eq!(table.hash(&110), 0);
    assert_eq!(table.chain_length(0)?, 1);

    Ok(())
}

#[test]
fn test_table_over_buffered_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("buffered.kv");

    {
        let file = FileBackend::create(&path)?;
        let backend = BufferedBackend::new(file, 2);
        let mut table: HashTable<u32, u64, _> = HashTable::create(backend, 256)?;
        for key in 1..2000u32 {
            table.insert(key, key as u64 * 3)?;
        }
        assert_eq!(table.get(&1999)?, 5997);
    }

    // The buffered backend wrote everything back on drop
    let mut table: HashTable<u32, u64, _> = HashTable::open(FileBackend::open(&path)?, 256)?;
    for key in (1..2000u32).step_by(37) {
        assert_eq!(table.get(&key)?, key as u64 * 3);
    }
    assert_eq!(table.entries()?.len(), 1999);

    Ok(())
}

#[test]
fn test_table_metadata_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("meta.kv");

    {
        let mut table: HashTable<u64, u64, _> =
            HashTable::create_with_cacheline(BlockFileBackend::create(&path)?, 40, 128)?;
        table.config().save(&path)?;
        table.insert(7, 700)?;
        table.insert(47, 4700)?;
        table.remove(&7)?;
    }

    let config = TableConfig::load(&path)?;
    assert_eq!(config.bucket_count, 40);
    assert_eq!(config.cacheline, 128);

    let mut table: HashTable<u64, u64, _> =
        HashTable::open_with_config(BlockFileBackend::open(&path)?, &config)?;
    assert_eq!(table.layout().bucket_bytes(), 128);
    assert!(!table.contains(&7)?);
    assert_eq!(table.get(&47)?, 4700);

    Ok(())
}

#[test]
fn test_pool_over_block_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("pages.db");

    {
        let pool = BufferPool::new(BlockFileBackend::create(&path)?, 3)?;
        for page in 0..8u64 {
            let mut lease = pool.pin(PageId(page))?;
            lease.write_at(0, &page.to_le_bytes())?;
        }
        // Three pages are still resident and dirty; drop writes them back
        assert_eq!(pool.resident_count(), 3);
        assert_eq!(pool.stats().evictions, 5);
    }

    let pool = BufferPool::new(BlockFileBackend::open(&path)?, 2)?;
    for page in 0..8u64 {
        let lease = pool.pin(PageId(page))?;
        let mut buf = [0u8; 8];
        lease.read_at(0, &mut buf)?;
        assert_eq!(u64::from_le_bytes(buf), page);
    }

    Ok(())
}

#[test]
fn test_pool_exhausted_then_recovers() -> Result<()> {
    let pool = BufferPool::new(MemoryBackend::new(), 2)?;

    let first = pool.pin(PageId(0))?;
    let second = pool.pin(PageId(1))?;
    assert!(matches!(
        pool.pin(PageId(2)),
        Err(StorageError::PoolExhausted { capacity: 2 })
    ));

    second.release();
    let third = pool.pin(PageId(2))?;
    assert!(pool.is_resident(PageId(0)));
    assert!(!pool.is_resident(PageId(1)));

    drop(first);
    drop(third);
    Ok(())
}

#[test]
fn test_pool_custom_page_size() -> Result<()> {
    let mut mem = MemoryBackend::new();
    {
        let config = StorageConfig {
            page_size: 512,
            pool_capacity: 4,
            ..StorageConfig::default()
        };
        let pool = BufferPool::with_config(&mut mem, &config)?;
        let mut lease = pool.pin(PageId(3))?;
        lease.write_at(510, &[0xAB, 0xCD])?;
    }

    assert_eq!(mem.len()?, 2048);
    assert_eq!(&mem.as_bytes()[2046..], &[0xAB, 0xCD]);
    Ok(())
}
