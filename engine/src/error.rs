//! The errors of the engine layers.
//!
//! One enum per layer, each wrapping the errors of the layers below it with
//! `#[from]`, so the `?` operator moves errors up the stack without manual
//! conversion. The split mirrors the failure taxonomy of the system:
//!
//! * [`DataBlockError`] / [`IndexBlockError`]: misuse of the block framing
//!   (wrong tag, misaligned or out-of-range offsets, oversized payloads).
//!   These indicate bugs in the calling code, not bad user input.
//! * [`TreeError`]: everything the tree engine can run into, including
//!   structural corruption detected while walking the tree.
//! * [`IngestError`]: problems with the input file; the only errors that
//!   carry source positions, because they are the only ones a user can fix.

use std::io;
use std::num::ParseIntError;

use bptree_api::error::{CodecError, DiskError};
use thiserror::Error;

/// Errors of the data-block layer.
#[derive(Error, Debug)]
pub enum DataBlockError {
    /// Errors from the block store.
    #[error("error in the block store")]
    Disk(#[from] DiskError),
    /// Errors from the byte codec.
    #[error("error encoding a record")]
    Codec(#[from] CodecError),
    /// The block's type tag does not mark it as a data block.
    #[error("wrong block type: expected a data block, found tag {0}")]
    WrongBlockType(u8),
    /// The offset does not land on a record slot boundary.
    #[error("offset {0} does not align with a record slot")]
    MisalignedOffset(u32),
    /// The record slot at this offset extends past the end of the block.
    #[error("offset {0} is beyond the end of the block")]
    OffsetOutOfRange(u32),
    /// The record bytes do not match the record size in the block header.
    #[error("record of {given} bytes does not match the block's record size {expected}")]
    RecordSizeMismatch {
        /// Record size stored in the block header.
        expected: u32,
        /// Length of the record handed in.
        given: usize,
    },
    /// The record does not even fit into an empty block.
    #[error("record does not fit in an empty data block")]
    RecordTooLarge,
}

/// Errors of the index-block layer.
#[derive(Error, Debug)]
pub enum IndexBlockError {
    /// Errors from the block store.
    #[error("error in the block store")]
    Disk(#[from] DiskError),
    /// Errors from the byte codec.
    #[error("error encoding a key")]
    Codec(#[from] CodecError),
    /// The block's type tag does not mark it as an index block.
    #[error("wrong block type: expected an index block, found tag {0}")]
    WrongBlockType(u8),
    /// The serialized pointers and keys do not fit the block.
    #[error("node payload of {needed} bytes exceeds the {available} available")]
    PayloadTooLarge {
        /// Bytes the payload would occupy.
        needed: usize,
        /// Bytes the block has left after the header.
        available: usize,
    },
    /// A node payload must carry exactly one more pointer than keys.
    #[error("payload with {pointers} pointers and {keys} keys violates the arity invariant")]
    ArityMismatch {
        /// Number of pointers handed in.
        pointers: usize,
        /// Number of keys handed in.
        keys: usize,
    },
    /// The block contents contradict its own header.
    #[error("corrupt index block: {0}")]
    Corrupt(&'static str),
}

/// Errors of the B+ tree engine.
#[derive(Error, Debug)]
pub enum TreeError {
    /// Errors from the block store.
    #[error("error in the block store")]
    Disk(#[from] DiskError),
    /// Errors from the data-block layer while resolving record slots.
    #[error("error in the data-block layer")]
    DataBlock(#[from] DataBlockError),
    /// Errors from the index-block layer.
    #[error("error in the index-block layer")]
    IndexBlock(#[from] IndexBlockError),
    /// The key being inserted is already present.
    #[error("duplicate key {0}")]
    DuplicateKey(String),
    /// The key being deleted is not present.
    #[error("key {0} not found")]
    KeyNotFound(String),
    /// The block size leaves no room for a usable node.
    #[error("block size only fits {capacity} keys per node; at least 3 are required")]
    BlockTooSmall {
        /// Keys per node the block size allows.
        capacity: u32,
    },
    /// A structural invariant of the tree does not hold.
    #[error("corrupt tree: {0}")]
    Corrupt(&'static str),
}

/// Errors while reading the input file.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The file could not be read.
    #[error("cannot read the input file")]
    Io(#[from] io::Error),
    /// A line has fewer than three tab-separated fields.
    #[error("line {line}: expected three tab-separated fields")]
    MissingField {
        /// 1-based line number.
        line: usize,
    },
    /// The rating field could not be parsed.
    #[error("line {line}: bad rating")]
    BadRating {
        /// 1-based line number.
        line: usize,
        /// The underlying validation failure.
        source: CodecError,
    },
    /// The votes field could not be parsed.
    #[error("line {line}: bad vote count")]
    BadVotes {
        /// 1-based line number.
        line: usize,
        /// The underlying parse failure.
        source: ParseIntError,
    },
}
