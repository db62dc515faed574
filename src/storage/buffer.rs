pub mod clock;

use crate::config::StorageConfig;
use crate::storage::backend::Backend;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use clock::Clock;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;

pub type FrameId = usize;

/// Bookkeeping for one resident page.
#[derive(Debug)]
pub(crate) struct Frame {
    page_id: PageId,
    frame_id: FrameId,
    pin_count: u32,
    dirty: bool,
    clock_ref: bool,
}

impl Frame {
    fn new(page_id: PageId, frame_id: FrameId) -> Self {
        Self {
            page_id,
            frame_id,
            pin_count: 0,
            dirty: false,
            clock_ref: false,
        }
    }
}

/// Snapshot of a resident frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub page_id: PageId,
    pub frame_id: FrameId,
    /// Offset of the frame within the pool's memory.
    pub memory_offset: usize,
    pub pin_count: u32,
    pub dirty: bool,
    pub clock_ref: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flushes: u64,
}

struct PoolState {
    page_table: HashMap<PageId, Frame>,
    free_frames: Vec<FrameId>,
    clock: Clock,
    stats: PoolStats,
}

/// Fixed-capacity page cache over a [`Backend`] with clock eviction.
///
/// The pool is single-threaded: bookkeeping lives behind `RefCell`s, so the
/// type is not `Sync` and must be wrapped in an external lock to be shared.
/// Page bytes are reached through [`PageLease`], which keeps the page pinned
/// until it is dropped.
pub struct BufferPool<B: Backend> {
    backend: RefCell<B>,
    /// Frame memory, allocated once. Frame `i` holds bytes
    /// `[i * page_size, (i + 1) * page_size)` of the pool's memory.
    frames: Box<[RefCell<Box<[u8]>>]>,
    state: RefCell<PoolState>,
    page_size: usize,
}

impl<B: Backend> BufferPool<B> {
    pub fn new(backend: B, capacity: usize) -> StorageResult<Self> {
        let config = StorageConfig {
            pool_capacity: capacity,
            ..StorageConfig::default()
        };
        Self::with_config(backend, &config)
    }

    pub fn with_config(backend: B, config: &StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        let capacity = config.pool_capacity;
        let page_size = config.page_size;

        let frames = (0..capacity)
            .map(|_| RefCell::new(vec![0u8; page_size].into_boxed_slice()))
            .collect();

        // Popped from the back, so frame 0 is handed out first.
        let free_frames = (0..capacity).rev().collect();

        log::debug!(
            "Created buffer pool over {} with {} frames of {} bytes",
            backend.handle(),
            capacity,
            page_size
        );

        Ok(Self {
            backend: RefCell::new(backend),
            frames,
            state: RefCell::new(PoolState {
                page_table: HashMap::with_capacity(capacity),
                free_frames,
                clock: Clock::with_capacity(capacity),
                stats: PoolStats::default(),
            }),
            page_size,
        })
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pin a page, loading it from the backend if it is not resident.
    pub fn pin(&self, page_id: PageId) -> StorageResult<PageLease<'_, B>> {
        let mut state = self.state.borrow_mut();

        if let Some(frame) = state.page_table.get_mut(&page_id) {
            frame.pin_count += 1;
            frame.clock_ref = true;
            let frame_id = frame.frame_id;
            state.stats.hits += 1;
            return Ok(PageLease::new(self, page_id, frame_id));
        }

        // Reject unaddressable pages before a frame is claimed.
        page_id.offset(self.page_size)?;

        state.stats.misses += 1;
        let frame_id = match state.free_frames.pop() {
            Some(frame_id) => frame_id,
            None => self.evict(&mut state)?,
        };

        if let Err(e) = self.load(page_id, frame_id) {
            state.free_frames.push(frame_id);
            return Err(e);
        }

        let mut frame = Frame::new(page_id, frame_id);
        frame.pin_count = 1;
        frame.clock_ref = true;
        state.page_table.insert(page_id, frame);
        state.clock.push(page_id);

        log::trace!("Loaded page {} into frame {}", page_id, frame_id);

        Ok(PageLease::new(self, page_id, frame_id))
    }

    /// Write a page back if it is dirty. Pages that are not resident are ignored.
    ///
    /// Fails with `PageInUse` while a lease holds a `data_mut` borrow of the page.
    pub fn flush(&self, page_id: PageId) -> StorageResult<()> {
        self.flush_frame(page_id)?;
        self.backend.borrow_mut().sync()
    }

    /// Write back every dirty resident page and sync the backend.
    pub fn flush_all(&self) -> StorageResult<()> {
        let mut page_ids: Vec<PageId> = self.state.borrow().page_table.keys().copied().collect();
        page_ids.sort_unstable();

        for page_id in page_ids {
            self.flush_frame(page_id)?;
        }

        self.backend.borrow_mut().sync()
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.state.borrow().page_table.contains_key(&page_id)
    }

    pub fn resident_count(&self) -> usize {
        self.state.borrow().page_table.len()
    }

    /// Resident pages in clock order, starting at the hand.
    pub fn resident_pages(&self) -> Vec<PageId> {
        let state = self.state.borrow();
        state
            .clock
            .iter()
            .filter(|page_id| state.page_table.contains_key(page_id))
            .copied()
            .collect()
    }

    pub fn frame_info(&self, page_id: PageId) -> Option<FrameInfo> {
        let state = self.state.borrow();
        state.page_table.get(&page_id).map(|frame| FrameInfo {
            page_id: frame.page_id,
            frame_id: frame.frame_id,
            memory_offset: frame.frame_id * self.page_size,
            pin_count: frame.pin_count,
            dirty: frame.dirty,
            clock_ref: frame.clock_ref,
        })
    }

    pub fn stats(&self) -> PoolStats {
        self.state.borrow().stats
    }

    fn unpin(&self, page_id: PageId) {
        let mut state = self.state.borrow_mut();
        match state.page_table.get_mut(&page_id) {
            Some(frame) if frame.pin_count > 0 => frame.pin_count -= 1,
            _ => log::debug!("Ignoring unpin of page {} with no outstanding pins", page_id),
        }
    }

    fn mark_modified(&self, page_id: PageId) {
        if let Some(frame) = self.state.borrow_mut().page_table.get_mut(&page_id) {
            frame.dirty = true;
        }
    }

    fn flush_frame(&self, page_id: PageId) -> StorageResult<()> {
        let mut state = self.state.borrow_mut();
        let Some(frame) = state.page_table.get_mut(&page_id) else {
            return Ok(());
        };
        if !frame.dirty {
            return Ok(());
        }

        self.write_frame(page_id, frame.frame_id)?;
        frame.dirty = false;
        state.stats.flushes += 1;

        Ok(())
    }

    /// Free one frame using the clock. Fails if every resident page is pinned.
    fn evict(&self, state: &mut PoolState) -> StorageResult<FrameId> {
        let victim = state
            .clock
            .select_victim(&mut state.page_table)
            .ok_or(StorageError::PoolExhausted {
                capacity: self.capacity(),
            })?;

        let (frame_id, dirty) = match state.page_table.get(&victim) {
            Some(frame) => (frame.frame_id, frame.dirty),
            None => {
                return Err(StorageError::Corrupted(format!(
                    "clock selected page {} with no frame",
                    victim
                )))
            }
        };

        if dirty {
            if let Err(e) = self.write_frame(victim, frame_id) {
                state.clock.push(victim);
                return Err(e);
            }
            state.stats.flushes += 1;
        }

        state.page_table.remove(&victim);
        state.stats.evictions += 1;
        log::debug!("Evicted page {} from frame {}", victim, frame_id);

        Ok(frame_id)
    }

    /// Read a page into a frame. Bytes past the end of the backend read as zeros.
    fn load(&self, page_id: PageId, frame_id: FrameId) -> StorageResult<()> {
        let mut data = self.frames[frame_id].borrow_mut();
        let mut backend = self.backend.borrow_mut();

        let offset = page_id.offset(self.page_size)?;
        let len = backend.len()?;
        if offset >= len {
            data.fill(0);
            return Ok(());
        }

        let available = ((len - offset) as usize).min(self.page_size);
        backend.read(&mut data[..available], offset)?;
        data[available..].fill(0);

        Ok(())
    }

    fn write_frame(&self, page_id: PageId, frame_id: FrameId) -> StorageResult<()> {
        let data = self.frames[frame_id]
            .try_borrow()
            .map_err(|_| StorageError::PageInUse(page_id))?;
        self.backend
            .borrow_mut()
            .write(&data, page_id.offset(self.page_size)?)?;
        Ok(())
    }
}

impl<B: Backend> Drop for BufferPool<B> {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            log::error!("Failed to flush buffer pool on drop: {}", e);
        }
    }
}

/// A pinned page. Dropping the lease unpins the page exactly once.
pub struct PageLease<'a, B: Backend> {
    pool: &'a BufferPool<B>,
    page_id: PageId,
    frame_id: FrameId,
}

impl<'a, B: Backend> PageLease<'a, B> {
    fn new(pool: &'a BufferPool<B>, page_id: PageId, frame_id: FrameId) -> Self {
        Self {
            pool,
            page_id,
            frame_id,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Borrow the page bytes.
    ///
    /// Panics if another lease on the same page holds a `data_mut` borrow.
    pub fn data(&self) -> Ref<'_, [u8]> {
        Ref::map(self.pool.frames[self.frame_id].borrow(), |data| &data[..])
    }

    /// Mutably borrow the page bytes. Call [`mark_modified`](Self::mark_modified)
    /// for the change to be written back.
    ///
    /// Panics if any other borrow of the same page is live.
    pub fn data_mut(&mut self) -> RefMut<'_, [u8]> {
        RefMut::map(self.pool.frames[self.frame_id].borrow_mut(), |data| {
            &mut data[..]
        })
    }

    pub fn mark_modified(&self) {
        self.pool.mark_modified(self.page_id);
    }

    /// Copy `buf.len()` bytes out of the page starting at `offset`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> StorageResult<()> {
        self.check_range(offset, buf.len())?;
        buf.copy_from_slice(&self.data()[offset..offset + buf.len()]);
        Ok(())
    }

    /// Copy `bytes` into the page at `offset` and mark it modified.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> StorageResult<()> {
        self.check_range(offset, bytes.len())?;
        self.data_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.mark_modified();
        Ok(())
    }

    /// Unpin the page now instead of at end of scope.
    pub fn release(self) {}

    fn check_range(&self, offset: usize, len: usize) -> StorageResult<()> {
        if offset + len > self.pool.page_size {
            return Err(StorageError::OutOfRange {
                offset,
                len,
                limit: self.pool.page_size,
            });
        }
        Ok(())
    }
}

impl<B: Backend> Drop for PageLease<'_, B> {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id);
    }
}
