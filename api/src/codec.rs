//! The byte codec: fixed-width, little-endian encodings for every value
//! that crosses the block boundary.
//!
//! All functions here are pure. Encoding validates its input and reports
//! [`CodecError`]s; decoding assumes the caller hands it a buffer of at
//! least the advertised width. Offsets into blocks are validated by the
//! framing layers *before* any slice reaches this module, so a short buffer
//! here is a programming error, not a runtime condition.
//!
//! Strings are stored as one byte per character, zero-padded to the field
//! width; byte 0 is the terminator and therefore cannot appear inside a
//! string. Characters must have code points in `[1, 255]`, which keeps the
//! mapping between characters and bytes one-to-one and makes `String`
//! ordering agree with byte ordering.
//!
//! Ratings are stored as two unsigned 16-bit halves (the integer part and
//! the fractional digits) rather than as an IEEE float. This preserves the
//! exact printed decimal of the source data (`7.3` stays `7.3`), so
//! equality in queries never trips over binary float rounding.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::CodecError;
use crate::types::{BlockPtr, Key, Rating, Record, ID_SIZE, KEY_SIZE, POINTER_SIZE, RECORD_SIZE};

/// Encode `s` into a fixed-width, zero-padded buffer of `width` bytes.
///
/// Fails with [`CodecError::StringTooLong`] if the string has more than
/// `width` characters, and with [`CodecError::InvalidByte`] if any character
/// does not fit a single non-zero byte.
pub fn encode_str(s: &str, width: usize) -> Result<Vec<u8>, CodecError> {
    let len = s.chars().count();
    if len > width {
        return Err(CodecError::StringTooLong { len, width });
    }
    let mut res = Vec::with_capacity(width);
    for ch in s.chars() {
        let byte = ch as u32;
        if byte == 0 || byte > 255 {
            return Err(CodecError::InvalidByte(byte));
        }
        res.push(byte as u8);
    }
    res.resize(width, 0);
    Ok(res)
}

/// Decode a fixed-width string field: read until the first zero byte or the
/// end of the buffer.
pub fn decode_str(buf: &[u8]) -> String {
    buf.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Encode an unsigned 32-bit integer, little-endian.
pub fn encode_u32(n: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, n);
    buf
}

/// Decode an unsigned 32-bit integer from the first four bytes of `buf`.
pub fn decode_u32(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(buf)
}

/// Encode a rating as its two little-endian 16-bit halves.
pub fn encode_rating(r: Rating) -> [u8; 4] {
    let mut buf = [0u8; 4];
    LittleEndian::write_u16(&mut buf[0..2], r.whole());
    LittleEndian::write_u16(&mut buf[2..4], r.frac());
    buf
}

/// Decode a rating from the first four bytes of `buf`.
pub fn decode_rating(buf: &[u8]) -> Rating {
    Rating::from_parts(
        LittleEndian::read_u16(&buf[0..2]),
        LittleEndian::read_u16(&buf[2..4]),
    )
}

/// Encode a record as `id(10) | rating(4) | votes(4)`.
pub fn encode_record(r: &Record) -> Result<[u8; RECORD_SIZE], CodecError> {
    let mut buf = [0u8; RECORD_SIZE];
    let id = encode_str(&r.id, ID_SIZE)?;
    buf[..ID_SIZE].copy_from_slice(&id);
    buf[ID_SIZE..ID_SIZE + 4].copy_from_slice(&encode_rating(r.rating));
    buf[ID_SIZE + 4..].copy_from_slice(&encode_u32(r.votes));
    Ok(buf)
}

/// Decode a record from the first [`RECORD_SIZE`] bytes of `buf`.
pub fn decode_record(buf: &[u8]) -> Record {
    Record {
        id: decode_str(&buf[..ID_SIZE]),
        rating: decode_rating(&buf[ID_SIZE..ID_SIZE + 4]),
        votes: decode_u32(&buf[ID_SIZE + 4..ID_SIZE + 8]),
    }
}

/// Encode a composite key as `rating(4) | id(10)`.
pub fn encode_key(k: &Key) -> Result<[u8; KEY_SIZE], CodecError> {
    let mut buf = [0u8; KEY_SIZE];
    buf[..4].copy_from_slice(&encode_rating(k.rating));
    let id = encode_str(&k.id, ID_SIZE)?;
    buf[4..].copy_from_slice(&id);
    Ok(buf)
}

/// Decode a composite key from the first [`KEY_SIZE`] bytes of `buf`.
pub fn decode_key(buf: &[u8]) -> Key {
    Key {
        rating: decode_rating(&buf[..4]),
        id: decode_str(&buf[4..KEY_SIZE]),
    }
}

/// Encode a block pointer as `block_id(4) | offset(4)`.
pub fn encode_ptr(p: BlockPtr) -> [u8; POINTER_SIZE] {
    let mut buf = [0u8; POINTER_SIZE];
    buf[..4].copy_from_slice(&encode_u32(p.block_id));
    buf[4..].copy_from_slice(&encode_u32(p.offset));
    buf
}

/// Decode a block pointer from the first [`POINTER_SIZE`] bytes of `buf`.
pub fn decode_ptr(buf: &[u8]) -> BlockPtr {
    BlockPtr::new(decode_u32(&buf[..4]), decode_u32(&buf[4..POINTER_SIZE]))
}
