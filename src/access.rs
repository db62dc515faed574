//! Access layer for keyed records.
//!
//! - **HashTable**: fixed-bucket hash index over any [`Backend`](crate::storage::Backend)
//! - **FixedCodec**: fixed-width encoding for keys and values
//! - **TableKey**: keys with a hash that is stable across runs

pub mod codec;
pub mod hash_table;

pub use codec::{FixedCodec, TableKey};
pub use hash_table::HashTable;
