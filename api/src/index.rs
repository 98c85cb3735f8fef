//! The contract a key index offers to its clients.
//!
//! The driver that loads records and runs queries only ever talks to the
//! index through this trait: it hands the index `(key, pointer)` pairs and
//! gets back opaque [`BlockPtr`]s, which it resolves to records through the
//! data-block layer. Keeping the surface this narrow is what lets the tests
//! and the experiment driver stay independent of the tree internals.
//!
//! All methods take the [`Disk`] explicitly. The disk is the single shared
//! resource of the system; passing it per call (shared for reads, exclusive
//! for mutations) makes the access pattern visible in the signatures
//! instead of hiding a global behind the implementation.

use std::error;

use crate::controller::Disk;
use crate::types::{BlockPtr, Key, Rating};

/// An ordered index from composite `(rating, id)` keys to block pointers,
/// supporting point lookups by rating, inclusive range scans and bulk
/// deletion of a rating.
pub trait RangeIndex: Sized {
    /// The error type of the implementation.
    type Error: error::Error;

    /// Insert `(key, ptr)` into the index. Keys are unique; inserting a key
    /// that is already present is an error.
    fn insert(&mut self, disk: &mut Disk, key: Key, ptr: BlockPtr) -> Result<(), Self::Error>;

    /// Return the pointers of every entry whose rating equals `rating`, in
    /// ascending key order.
    fn search(&self, disk: &Disk, rating: Rating) -> Result<Vec<BlockPtr>, Self::Error>;

    /// Return the pointers of every entry with `lo <= rating <= hi`, in
    /// ascending key order. A `None` bound means unbounded on that side.
    fn search_range(
        &self,
        disk: &Disk,
        lo: Option<Rating>,
        hi: Option<Rating>,
    ) -> Result<Vec<BlockPtr>, Self::Error>;

    /// Delete every entry whose rating equals `rating` and return how many
    /// entries were removed.
    fn delete(&mut self, disk: &mut Disk, rating: Rating) -> Result<usize, Self::Error>;

    /// Number of levels in the index, counting the root level and the leaf
    /// level. An index holding only an empty root has height 1.
    fn height(&self, disk: &Disk) -> Result<u32, Self::Error>;

    /// Total number of nodes in the index.
    fn num_nodes(&self, disk: &Disk) -> Result<u64, Self::Error>;

    /// Flush the root to the disk. Mutating operations already persist
    /// everything they touch; this exists so clients can ask for an explicit
    /// synchronization point without knowing that.
    fn save(&self, disk: &mut Disk) -> Result<(), Self::Error>;
}
