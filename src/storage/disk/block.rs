//! Block-aligned file access.
//!
//! Files handled here are kept at a length that is a whole multiple of
//! [`BLOCK_SIZE`]. Block `n` occupies `[n * BLOCK_SIZE, (n + 1) * BLOCK_SIZE)`.

use super::file::FileBackend;
use crate::storage::backend::{Backend, BackendHandle};
use crate::storage::error::{StorageError, StorageResult};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const BLOCK_SIZE: usize = 4096;

pub fn block_offset(block_no: u64) -> u64 {
    block_no * BLOCK_SIZE as u64
}

pub fn file_len(file: &File) -> StorageResult<u64> {
    Ok(file.metadata()?.len())
}

/// Number of complete blocks in the file.
pub fn block_count(file: &File) -> StorageResult<u64> {
    Ok(file_len(file)? / BLOCK_SIZE as u64)
}

pub fn is_aligned(file: &File) -> StorageResult<bool> {
    Ok(file_len(file)? % BLOCK_SIZE as u64 == 0)
}

/// Pad a file with zeros up to the next block boundary. Aligned files are left alone.
pub fn prepare(file: &File) -> StorageResult<()> {
    if is_aligned(file)? {
        return Ok(());
    }

    let blocks = block_count(file)?;
    log::debug!("Padding file from {} bytes to {} blocks", file_len(file)?, blocks + 1);
    truncate_to_blocks(file, blocks + 1)
}

/// Set the file length to exactly `block_no` blocks.
pub fn truncate_to_blocks(file: &File, block_no: u64) -> StorageResult<()> {
    file.set_len(block_offset(block_no))?;
    Ok(())
}

fn check_block_buffer(len: usize) -> StorageResult<()> {
    if len != BLOCK_SIZE {
        return Err(StorageError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Buffer size must be BLOCK_SIZE ({}), got {}", BLOCK_SIZE, len),
        )));
    }
    Ok(())
}

/// Read one block. Blocks past the end of the file read as zeros and return 0.
pub fn read_block(file: &mut File, block_no: u64, buf: &mut [u8]) -> StorageResult<usize> {
    check_block_buffer(buf.len())?;

    if block_no >= block_count(file)? {
        buf.fill(0);
        return Ok(0);
    }

    file.seek(SeekFrom::Start(block_offset(block_no)))?;
    file.read_exact(buf)?;

    Ok(BLOCK_SIZE)
}

pub fn write_block(file: &mut File, block_no: u64, buf: &[u8]) -> StorageResult<usize> {
    check_block_buffer(buf.len())?;

    file.seek(SeekFrom::Start(block_offset(block_no)))?;
    file.write_all(buf)?;

    Ok(BLOCK_SIZE)
}

/// Write a block after the last complete block. Returns its block number.
pub fn append_block(file: &mut File, buf: &[u8]) -> StorageResult<u64> {
    let block_no = block_count(file)?;
    write_block(file, block_no, buf)?;
    Ok(block_no)
}

/// File backend whose length is always a whole number of blocks.
pub struct BlockFileBackend {
    inner: FileBackend,
}

impl BlockFileBackend {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let inner = FileBackend::open(path)?;
        prepare(inner.file())?;
        Ok(Self { inner })
    }

    pub fn create(path: &Path) -> StorageResult<Self> {
        let inner = FileBackend::create(path)?;
        Ok(Self { inner })
    }

    pub fn block_count(&self) -> StorageResult<u64> {
        block_count(self.inner.file())
    }

    pub fn read_block(&mut self, block_no: u64, buf: &mut [u8]) -> StorageResult<usize> {
        read_block(self.inner.file_mut(), block_no, buf)
    }

    pub fn write_block(&mut self, block_no: u64, buf: &[u8]) -> StorageResult<usize> {
        write_block(self.inner.file_mut(), block_no, buf)
    }

    pub fn append_block(&mut self, buf: &[u8]) -> StorageResult<u64> {
        append_block(self.inner.file_mut(), buf)
    }

    pub fn into_inner(self) -> FileBackend {
        self.inner
    }
}

impl Backend for BlockFileBackend {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let len = self.inner.len()?;
        if offset >= len {
            buf.fill(0);
            return Ok(buf.len());
        }

        let available = ((len - offset) as usize).min(buf.len());
        self.inner.read(&mut buf[..available], offset)?;
        buf[available..].fill(0);

        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        let written = self.inner.write(buf, offset)?;
        prepare(self.inner.file())?;
        Ok(written)
    }

    fn len(&self) -> StorageResult<u64> {
        self.inner.len()
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.inner.truncate(len)?;
        prepare(self.inner.file())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn handle(&self) -> BackendHandle {
        self.inner.handle()
    }
}
