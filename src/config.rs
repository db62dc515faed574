//! Configuration for the storage layer and for persisted hash tables.

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of frames in a buffer pool.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Processor cacheline size used to size hash buckets.
pub const DEFAULT_CACHELINE: usize = 64;

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Size of a cached page in bytes.
    pub page_size: usize,
    /// Number of frames held by a buffer pool.
    pub pool_capacity: usize,
    /// Cacheline size hash buckets are aligned to.
    pub cacheline: usize,
    /// Number of buffers a `BufferedBackend` keeps in memory.
    pub buffered_pool_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            page_size: DEFAULT_PAGE_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            cacheline: DEFAULT_CACHELINE,
            buffered_pool_size: 16,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> StorageResult<()> {
        if self.page_size == 0 {
            return Err(StorageError::InvalidConfig("page_size must be nonzero".into()));
        }
        if self.pool_capacity == 0 {
            return Err(StorageError::InvalidConfig(
                "pool_capacity must be nonzero".into(),
            ));
        }
        if self.buffered_pool_size == 0 {
            return Err(StorageError::InvalidConfig(
                "buffered_pool_size must be nonzero".into(),
            ));
        }
        // Chain links take the last 8 bytes of every bucket.
        if self.cacheline <= 8 {
            return Err(StorageError::InvalidConfig(format!(
                "cacheline must exceed 8 bytes, got {}",
                self.cacheline
            )));
        }
        Ok(())
    }
}

/// Geometry of a hash table, stored next to the table file so it can be reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub bucket_count: usize,
    pub cacheline: usize,
    pub key_size: usize,
    pub value_size: usize,
}

impl TableConfig {
    /// Path of the metadata sidecar for a table file.
    pub fn meta_path(table_path: &Path) -> PathBuf {
        let mut name = table_path.as_os_str().to_owned();
        name.push(".meta");
        PathBuf::from(name)
    }

    pub fn save(&self, table_path: &Path) -> anyhow::Result<()> {
        let encoded = bincode::serialize(self)?;
        fs::write(Self::meta_path(table_path), encoded)?;
        Ok(())
    }

    pub fn load(table_path: &Path) -> anyhow::Result<Self> {
        let meta_path = Self::meta_path(table_path);
        let data = fs::read(&meta_path)
            .map_err(|e| anyhow::anyhow!("Failed to read table metadata {:?}: {}", meta_path, e))?;
        Ok(bincode::deserialize(&data)?)
    }
}
