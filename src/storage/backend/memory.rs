use super::{Backend, BackendHandle};
use crate::storage::error::StorageResult;

/// Growable in-memory backend.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: Vec<u8>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Backend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let start = (offset as usize).min(self.data.len());
        let end = (offset as usize + buf.len()).min(self.data.len());
        let available = end - start;

        buf[..available].copy_from_slice(&self.data[start..end]);
        buf[available..].fill(0);

        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn handle(&self) -> BackendHandle {
        BackendHandle::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_write_and_read() -> Result<()> {
        let mut mem = MemoryBackend::new();
        assert_eq!(mem.len()?, 0);

        mem.write(b"hello", 0)?;
        let mut buf = [0u8; 5];
        assert_eq!(mem.read(&mut buf, 0)?, 5);
        assert_eq!(&buf, b"hello");

        Ok(())
    }

    #[test]
    fn test_write_past_end_extends() -> Result<()> {
        let mut mem = MemoryBackend::new();
        mem.write(&[7u8; 4], 100)?;
        assert_eq!(mem.len()?, 104);

        // The hole before the write reads as zeros
        let mut buf = [1u8; 100];
        mem.read(&mut buf, 0)?;
        assert!(buf.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_read_past_end_zero_fills() -> Result<()> {
        let mut mem = MemoryBackend::new();
        mem.write(&[9u8; 8], 0)?;

        let mut buf = [1u8; 16];
        assert_eq!(mem.read(&mut buf, 4)?, 16);
        assert_eq!(&buf[..4], &[9u8; 4]);
        assert!(buf[4..].iter().all(|&b| b == 0));

        let mut far = [1u8; 8];
        mem.read(&mut far, 1 << 20)?;
        assert_eq!(far, [0u8; 8]);
        assert_eq!(mem.len()?, 8);

        Ok(())
    }

    #[test]
    fn test_truncate() -> Result<()> {
        let mut mem = MemoryBackend::new();
        mem.write(&[5u8; 64], 0)?;
        mem.truncate(16)?;
        assert_eq!(mem.len()?, 16);
        assert_eq!(mem.as_bytes(), &[5u8; 16]);
        Ok(())
    }
}
