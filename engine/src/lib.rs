//! A disk-backed B+ tree index over a simulated block store.
//!
//! The crate is organised as a stack of layers, each one only talking to the
//! layer directly below it:
//!
//! 1. [`data_block`] frames raw blocks as slot arrays of fixed-size records.
//! 2. [`index_block`] frames raw blocks as B+ tree node payloads: an
//!    interleaved sequence of pointers and keys behind a typed header.
//! 3. [`node`] projects an index block into a typed, in-memory node that can
//!    be manipulated and flushed back.
//! 4. [`tree`] is the B+ tree engine itself: insertion with split cascades,
//!    point and range search over the linked leaf level, and deletion with
//!    borrow/merge rebalancing.
//!
//! Around the core sit the collaborators that feed and exercise it:
//! [`heap`] (the append-only chain of data blocks record bytes live in),
//! [`ingest`] (TSV parsing and sorting) and [`experiment`] (the measurement
//! routines behind the `experiments` binary).
//!
//! Every layer reports failures through its own error enum in [`error`];
//! lower-layer errors are wrapped, never swallowed.
//!
//! All state lives in the block store of
//! [`bptree_api::controller::Disk`]; in-memory structures are transient
//! projections that must be flushed to count. The system is single-threaded;
//! there is no locking anywhere, and none is needed.
//!
//! [`data_block`]: data_block/index.html
//! [`index_block`]: index_block/index.html
//! [`node`]: node/index.html
//! [`tree`]: tree/index.html
//! [`heap`]: heap/index.html
//! [`ingest`]: ingest/index.html
//! [`experiment`]: experiment/index.html

// This line forces you to write documentation for all important things.
#![deny(missing_docs)]

pub mod data_block;
pub mod error;
pub mod experiment;
pub mod heap;
pub mod index_block;
pub mod ingest;
pub mod node;
pub mod tree;
