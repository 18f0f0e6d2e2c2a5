//! This crate provides a sorted set of integer keys that is backed by a
//! B-tree stored in a temporary file.
//!
//! In contrast to the in-memory set implementations of the standard library,
//! the keys do not live on the heap: every node of the tree is read from and
//! written to a memory mapped temporary file. The set is explicitly
//! transient, it can not be persisted and re-opened later, but it can grow
//! beyond what fits comfortably into main memory.
//!
//! # Example
//!
//! ```rust
//! use transient_btree_set::{BtreeConfig, BtreeSet, Error};
//!
//! fn main() -> std::result::Result<(), Error> {
//!     let mut b = BtreeSet::<u64>::with_capacity(BtreeConfig::default(), 1024)?;
//!     b.insert(42)?;
//!     b.insert(3)?;
//!
//!     assert_eq!(true, b.contains(&42)?);
//!     assert_eq!(2, b.len());
//!     assert_eq!(3, b.first()?);
//!     Ok(())
//! }
//! ```

mod btree;
mod error;
mod file;

pub use btree::cursor::{Cursor, Iter};
pub use btree::node::KeyType;
pub use btree::BtreeSet;
pub use error::Error;

/// Configuration for a [`BtreeSet`].
#[derive(Clone, Debug)]
pub struct BtreeConfig {
    order: usize,
    block_cache_size: usize,
}

impl Default for BtreeConfig {
    fn default() -> Self {
        BtreeConfig {
            order: 128,
            block_cache_size: 16,
        }
    }
}

impl BtreeConfig {
    /// Set the order of the tree, which controls how many keys a single node
    /// can hold. Nodes store at most `2 * order - 1` keys and, except for the
    /// root, at least `order - 1`.
    pub fn order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    /// Set the number of node blocks that are kept in an in-memory cache.
    pub fn block_cache_size(mut self, block_cache_size: usize) -> Self {
        self.block_cache_size = block_cache_size;
        self
    }
}
