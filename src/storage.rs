//! Storage layer implementation for vibekv.
//!
//! Key components:
//!
//! - **Backend**: byte-addressable storage (memory, file, block-padded file, buffered)
//! - **BufferPool**: fixed set of page frames with clock eviction and pin leases
//! - **BucketLayout**: cacheline-sized hash bucket format with a trailing chain link
//!
//! Everything above this layer addresses storage through [`Backend`].

pub mod backend;
pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use backend::{Backend, BackendHandle, BufferedBackend, MemoryBackend};
pub use buffer::{BufferPool, FrameInfo, PageLease, PoolStats};
pub use disk::{BlockFileBackend, FileBackend, BLOCK_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{Bucket, BucketLayout, PageId};
