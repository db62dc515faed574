//! Byte-addressable storage backends.
//!
//! Both the buffer pool and the hash table are written against the [`Backend`]
//! trait. Each implementation fixes its own policy for reads that run past the
//! current length:
//!
//! - [`MemoryBackend`]: holes and bytes past the end read as zeros
//! - [`FileBackend`](crate::storage::disk::FileBackend): fails with `UnexpectedEof`
//! - [`BlockFileBackend`](crate::storage::disk::BlockFileBackend): blocks past the end read as zeros
//! - [`BufferedBackend`]: buffers past the inner backend's end read as zeros

pub mod buffered;
pub mod memory;

use crate::storage::error::StorageResult;
use std::fmt;
use std::path::PathBuf;

pub use buffered::BufferedBackend;
pub use memory::MemoryBackend;

/// Identity of a backend, used only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHandle {
    Memory,
    File(PathBuf),
    Buffered(Box<BackendHandle>),
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendHandle::Memory => write!(f, "memory"),
            BackendHandle::File(path) => write!(f, "file:{}", path.display()),
            BackendHandle::Buffered(inner) => write!(f, "buffered({})", inner),
        }
    }
}

pub trait Backend {
    /// Fill `buf` with the bytes starting at `offset`. Returns the number of bytes read.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize>;

    /// Write all of `buf` at `offset`, extending the backend if needed.
    fn write(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize>;

    /// Current length in bytes.
    fn len(&self) -> StorageResult<u64>;

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrink or grow the backend to exactly `len` bytes.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Push written bytes to stable storage.
    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn handle(&self) -> BackendHandle;
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        (**self).read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        (**self).write(buf, offset)
    }

    fn len(&self) -> StorageResult<u64> {
        (**self).len()
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        (**self).truncate(len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn handle(&self) -> BackendHandle {
        (**self).handle()
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        (**self).read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        (**self).write(buf, offset)
    }

    fn len(&self) -> StorageResult<u64> {
        (**self).len()
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        (**self).truncate(len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        (**self).sync()
    }

    fn handle(&self) -> BackendHandle {
        (**self).handle()
    }
}
