//! Index-block framing: a B+ tree node payload behind a 21-byte header.
//!
//! Layout of an index block:
//!
//! ```text
//! | tag(1) | block_id(4) | parent_block_id(4) | num_keys(4) | pointer_size(4) | key_size(4) |
//! | pointer | key | pointer | key | ... | pointer |  (num_keys+1 pointers, num_keys keys)
//! ```
//!
//! Tags: 2 marks a non-leaf node, 3 a leaf. Tag 1 is a legacy "root" marker
//! that older images may carry; it is accepted on read (classified by its
//! contents) and never written. Trailing bytes after the payload are zero.
//!
//! In a leaf the last pointer slot is not a record pointer: it holds the
//! block id of the next leaf in key order (offset 0), forming the chain the
//! range scans walk. The null pointer marks the end of the chain.

use bptree_api::codec::{decode_key, decode_ptr, decode_u32, encode_key, encode_ptr, encode_u32};
use bptree_api::types::{Block, BlockPtr, Key, KEY_SIZE, POINTER_SIZE};

use crate::error::IndexBlockError;

/// Legacy tag for the root node; read-only compatibility.
pub const ROOT_TAG: u8 = 1;
/// Type tag of a non-leaf index block.
pub const INNER_TAG: u8 = 2;
/// Type tag of a leaf index block.
pub const LEAF_TAG: u8 = 3;
/// Bytes reserved for the index-block header.
pub const INDEX_HEADER_SIZE: u32 = 21;

/// The role of an index block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// An internal node: every pointer refers to a child index block.
    Inner,
    /// A leaf node: pointers refer to record slots, plus the chain pointer.
    Leaf,
}

/// The decoded header of an index block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Role of the node.
    pub kind: IndexKind,
    /// Id of the block, repeated inside the block itself.
    pub block_id: u32,
    /// Block id of the parent node; 0 for the root.
    pub parent: u32,
    /// Number of keys in the payload.
    pub num_keys: u32,
    /// Size of an encoded pointer, in bytes.
    pub pointer_size: u32,
    /// Size of an encoded key, in bytes.
    pub key_size: u32,
}

/// Number of keys a node fits in a block of `block_size` bytes: the header
/// and the trailing pointer come off the top, every key costs a pointer and
/// a key slot.
pub fn key_capacity(block_size: u32) -> u32 {
    (block_size - INDEX_HEADER_SIZE - POINTER_SIZE as u32) / (POINTER_SIZE + KEY_SIZE) as u32
}

/// Initialize `block` as an empty index block of the given kind.
pub fn init_index_block(block: &mut Block, kind: IndexKind, id: u32, parent: u32) {
    let bytes = block.contents_as_mut();
    bytes[0] = match kind {
        IndexKind::Inner => INNER_TAG,
        IndexKind::Leaf => LEAF_TAG,
    };
    bytes[1..5].copy_from_slice(&encode_u32(id));
    bytes[5..9].copy_from_slice(&encode_u32(parent));
    bytes[9..13].copy_from_slice(&encode_u32(0));
    bytes[13..17].copy_from_slice(&encode_u32(POINTER_SIZE as u32));
    bytes[17..21].copy_from_slice(&encode_u32(KEY_SIZE as u32));
}

/// Decode the header of `block`, checking the type tag.
///
/// A legacy root tag is classified by its contents: a root without children
/// (no keys, null first pointer) is a leaf, anything else is a non-leaf.
pub fn read_header(block: &Block) -> Result<IndexHeader, IndexBlockError> {
    let bytes = block.contents_as_ref();
    let num_keys = decode_u32(&bytes[9..13]);
    let kind = match bytes[0] {
        INNER_TAG => IndexKind::Inner,
        LEAF_TAG => IndexKind::Leaf,
        ROOT_TAG => {
            let first_ptr = decode_ptr(&bytes[21..21 + POINTER_SIZE]);
            if num_keys == 0 && first_ptr.is_null() {
                IndexKind::Leaf
            } else {
                IndexKind::Inner
            }
        }
        other => return Err(IndexBlockError::WrongBlockType(other)),
    };
    Ok(IndexHeader {
        kind,
        block_id: decode_u32(&bytes[1..5]),
        parent: decode_u32(&bytes[5..9]),
        num_keys,
        pointer_size: decode_u32(&bytes[13..17]),
        key_size: decode_u32(&bytes[17..21]),
    })
}

/// Serialize the interleaved payload `pointer, key, pointer, ..., pointer`
/// into `block`, update `num_keys` and zero the remainder.
///
/// Requires one more pointer than keys and enough room in the block.
pub fn write_payload(
    block: &mut Block,
    ptrs: &[BlockPtr],
    keys: &[Key],
) -> Result<(), IndexBlockError> {
    read_header(block)?;
    if ptrs.len() != keys.len() + 1 {
        return Err(IndexBlockError::ArityMismatch {
            pointers: ptrs.len(),
            keys: keys.len(),
        });
    }
    let needed = ptrs.len() * POINTER_SIZE + keys.len() * KEY_SIZE;
    let available = block.len() as usize - INDEX_HEADER_SIZE as usize;
    if needed > available {
        return Err(IndexBlockError::PayloadTooLarge { needed, available });
    }

    let mut encoded = Vec::with_capacity(needed);
    for (i, key) in keys.iter().enumerate() {
        encoded.extend_from_slice(&encode_ptr(ptrs[i]));
        encoded.extend_from_slice(&encode_key(key)?);
    }
    encoded.extend_from_slice(&encode_ptr(ptrs[keys.len()]));

    let bytes = block.contents_as_mut();
    let start = INDEX_HEADER_SIZE as usize;
    bytes[start..start + needed].copy_from_slice(&encoded);
    bytes[start + needed..].fill(0);
    bytes[9..13].copy_from_slice(&encode_u32(keys.len() as u32));
    Ok(())
}

/// Deserialize the payload of `block` into its pointers and keys.
pub fn read_payload(block: &Block) -> Result<(Vec<BlockPtr>, Vec<Key>), IndexBlockError> {
    let header = read_header(block)?;
    let num_keys = header.num_keys as usize;
    let needed = (num_keys + 1) * POINTER_SIZE + num_keys * KEY_SIZE;
    if INDEX_HEADER_SIZE as usize + needed > block.len() as usize {
        return Err(IndexBlockError::Corrupt(
            "num_keys in header exceeds the block size",
        ));
    }

    let bytes = block.contents_as_ref();
    let mut pos = INDEX_HEADER_SIZE as usize;
    let mut pointers = Vec::with_capacity(num_keys + 1);
    let mut keys = Vec::with_capacity(num_keys);
    for _ in 0..num_keys {
        pointers.push(decode_ptr(&bytes[pos..pos + POINTER_SIZE]));
        pos += POINTER_SIZE;
        keys.push(decode_key(&bytes[pos..pos + KEY_SIZE]));
        pos += KEY_SIZE;
    }
    pointers.push(decode_ptr(&bytes[pos..pos + POINTER_SIZE]));
    Ok((pointers, keys))
}
