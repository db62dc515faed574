use super::{Backend, BackendHandle};
use crate::config::StorageConfig;
use crate::storage::error::StorageResult;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

/// Size of each buffer held by a [`BufferedBackend`].
pub const BUFFER_SIZE: usize = 4096;

struct Buffer {
    data: Box<[u8]>,
    dirty: bool,
}

/// Client-side write-back buffering over any backend.
///
/// Reads and writes are served from page-sized buffers that are loaded from the
/// inner backend on first touch. When `max_buffers` are resident, the buffer
/// loaded first is written back and dropped.
pub struct BufferedBackend<B: Backend> {
    inner: B,
    buffers: HashMap<u64, Buffer>,
    load_order: VecDeque<u64>,
    max_buffers: usize,
    /// Highest byte written through this layer.
    len: u64,
}

impl<B: Backend> BufferedBackend<B> {
    pub fn new(inner: B, max_buffers: usize) -> Self {
        Self {
            inner,
            buffers: HashMap::with_capacity(max_buffers),
            load_order: VecDeque::with_capacity(max_buffers),
            max_buffers: max_buffers.max(1),
            len: 0,
        }
    }

    /// Buffer at most `config.buffered_pool_size` buffers.
    pub fn with_config(inner: B, config: &StorageConfig) -> Self {
        Self::new(inner, config.buffered_pool_size)
    }

    pub fn buffered_count(&self) -> usize {
        self.buffers.len()
    }

    /// Write every dirty buffer back to the inner backend.
    pub fn flush(&mut self) -> StorageResult<()> {
        let mut buffer_nos: Vec<u64> = self.buffers.keys().copied().collect();
        buffer_nos.sort_unstable();
        for buffer_no in buffer_nos {
            self.flush_buffer(buffer_no)?;
        }
        self.inner.sync()
    }

    fn buffer_offset(buffer_no: u64) -> u64 {
        buffer_no * BUFFER_SIZE as u64
    }

    fn flush_buffer(&mut self, buffer_no: u64) -> StorageResult<()> {
        let Some(buffer) = self.buffers.get_mut(&buffer_no) else {
            return Ok(());
        };
        if !buffer.dirty {
            return Ok(());
        }

        // Never write past the logical end, so the inner length tracks ours.
        let offset = Self::buffer_offset(buffer_no);
        let end = self.len.max(self.inner.len()?);
        let valid = (end.saturating_sub(offset) as usize).min(BUFFER_SIZE);
        self.inner.write(&buffer.data[..valid], offset)?;
        buffer.dirty = false;

        Ok(())
    }

    fn evict_one(&mut self) -> StorageResult<()> {
        if let Some(victim) = self.load_order.pop_front() {
            if let Err(e) = self.flush_buffer(victim) {
                self.load_order.push_front(victim);
                return Err(e);
            }
            self.buffers.remove(&victim);
            log::trace!("Evicted buffer {} from {}", victim, self.inner.handle());
        }
        Ok(())
    }

    fn load_buffer(&mut self, buffer_no: u64) -> StorageResult<&mut Buffer> {
        if !self.buffers.contains_key(&buffer_no) && self.buffers.len() >= self.max_buffers {
            self.evict_one()?;
        }

        match self.buffers.entry(buffer_no) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let data = read_buffer(&mut self.inner, buffer_no)?;
                self.load_order.push_back(buffer_no);
                Ok(entry.insert(Buffer { data, dirty: false }))
            }
        }
    }
}

/// Load one buffer from `inner`. Bytes past its end read as zeros.
fn read_buffer<B: Backend>(inner: &mut B, buffer_no: u64) -> StorageResult<Box<[u8]>> {
    let mut data = vec![0u8; BUFFER_SIZE].into_boxed_slice();
    let offset = buffer_no * BUFFER_SIZE as u64;
    let inner_len = inner.len()?;
    if offset < inner_len {
        let available = ((inner_len - offset) as usize).min(BUFFER_SIZE);
        inner.read(&mut data[..available], offset)?;
    }
    Ok(data)
}

impl<B: Backend> Backend for BufferedBackend<B> {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let mut done = 0;
        while done < buf.len() {
            let position = offset + done as u64;
            let buffer_no = position / BUFFER_SIZE as u64;
            let within = (position % BUFFER_SIZE as u64) as usize;
            let chunk = (BUFFER_SIZE - within).min(buf.len() - done);

            let buffer = self.load_buffer(buffer_no)?;
            buf[done..done + chunk].copy_from_slice(&buffer.data[within..within + chunk]);
            done += chunk;
        }

        Ok(buf.len())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut done = 0;
        while done < buf.len() {
            let position = offset + done as u64;
            let buffer_no = position / BUFFER_SIZE as u64;
            let within = (position % BUFFER_SIZE as u64) as usize;
            let chunk = (BUFFER_SIZE - within).min(buf.len() - done);

            let buffer = self.load_buffer(buffer_no)?;
            buffer.data[within..within + chunk].copy_from_slice(&buf[done..done + chunk]);
            buffer.dirty = true;
            done += chunk;

            // Raised per chunk so buffers evicted mid-write are written back in full.
            self.len = self.len.max(position + chunk as u64);
        }

        Ok(buf.len())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.len.max(self.inner.len()?))
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        self.flush()?;
        self.buffers.clear();
        self.load_order.clear();
        self.len = len;
        self.inner.truncate(len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.flush()
    }

    fn handle(&self) -> BackendHandle {
        BackendHandle::Buffered(Box::new(self.inner.handle()))
    }
}

impl<B: Backend> Drop for BufferedBackend<B> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Failed to flush buffers for {}: {}", self.inner.handle(), e);
        }
    }
}
