//! The base error types of the storage stack.
//!
//! Two classes of failure originate in this crate and are wrapped by the
//! engine's per-layer error enums:
//!
//! * [`CodecError`]: input-validation failures while encoding values into
//!   their fixed-width byte form. These surface all the way to the ingest
//!   boundary, where the caller decides whether to skip the offending record
//!   or abort.
//! * [`DiskError`]: failures of the simulated block device. These are fatal
//!   for the in-flight logical operation; no rollback is attempted because no
//!   transaction boundary exists.
//!
//! Both enums use [`thiserror`](https://docs.rs/thiserror) so the `Display`
//! and `Error` traits come for free, and so higher layers can embed them with
//! `#[from]` and convert via the `?` operator.

use thiserror::Error;

/// Errors produced while validating or encoding values for the on-disk form.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The string does not fit in its fixed-width field.
    #[error("string length {len} exceeds field width {width}")]
    StringTooLong {
        /// Length of the offending string, in characters.
        len: usize,
        /// Width of the target field, in bytes.
        width: usize,
    },
    /// A character of the string maps to a byte outside `[1, 255]`.
    /// Byte 0 is reserved as the string terminator.
    #[error("character with code point {0} cannot be stored in one byte")]
    InvalidByte(u32),
    /// The rating value is below the supported minimum of `1.0`.
    #[error("rating must be >= 1.0")]
    FloatOutOfRange,
    /// The integer part of the rating does not fit in 16 bits.
    #[error("integer part of rating exceeds 65535")]
    IntegerPartOverflow,
    /// The fractional digits of the rating do not fit in 16 bits.
    #[error("fractional part of rating exceeds 65535")]
    FractionalPartOverflow,
    /// The rating string is not a plain decimal number.
    #[error("rating is not a decimal number: {0:?}")]
    FloatSyntax(String),
}

/// Errors produced by the simulated block device.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DiskError {
    /// The block id is 0 (the reserved null id) or past the end of the disk.
    #[error("invalid block id {id}; valid ids are [1, {nblocks})")]
    InvalidBlockId {
        /// The rejected block id.
        id: u32,
        /// Number of blocks on the disk.
        nblocks: u32,
    },
    /// Every block has been handed out and the free queue is empty.
    #[error("disk full")]
    DiskFull,
    /// Invalid input to a block-level read or write.
    #[error("invalid block input: {0}")]
    BlockInput(&'static str),
}

/// Shorthand for results carrying a [`DiskError`].
pub type DiskResult<T> = std::result::Result<T, DiskError>;
