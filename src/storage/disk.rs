//! File-backed storage: a raw file backend and block-aligned file access.

pub mod block;
pub mod file;

pub use block::{BlockFileBackend, BLOCK_SIZE};
pub use file::FileBackend;
