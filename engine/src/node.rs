//! The in-memory projection of a B+ tree node.
//!
//! A [`Node`] is built from an index block on demand and thrown away after
//! use; the block store stays the single source of truth. The parent is
//! held as a block id only (navigating to it means reading its block),
//! which is what keeps the projection free of shared mutable object graphs.
//!
//! The wire format stores `num_keys + 1` pointers for every node. The
//! projection splits that last slot by role: an inner node holds the child
//! ids, a leaf holds one record pointer per key plus a first-class `next`
//! field for the leaf chain. [`Node::flush`] folds the chain pointer back
//! into the last pointer slot when serializing.

use bptree_api::controller::Disk;
use bptree_api::types::{Block, BlockPtr, Key};

use crate::error::IndexBlockError;
use crate::index_block::{self, IndexKind};

/// The role-specific part of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    /// A leaf: one record pointer per key, plus the id of the next leaf in
    /// key order (0 if this is the rightmost leaf).
    Leaf {
        /// Pointers to the record slot of each key.
        records: Vec<BlockPtr>,
        /// Block id of the next leaf; 0 terminates the chain.
        next: u32,
    },
    /// An inner node: one child block id more than keys.
    Inner {
        /// Block ids of the children, left to right.
        children: Vec<u32>,
    },
}

/// A typed view of one index block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Id of the block this node lives in.
    pub block_id: u32,
    /// Block id of the parent node; 0 for the root.
    pub parent: u32,
    /// The keys, in ascending order.
    pub keys: Vec<Key>,
    /// The role-specific payload.
    pub body: NodeBody,
}

impl Node {
    /// A fresh, empty leaf for the given block.
    pub fn new_leaf(block_id: u32, parent: u32) -> Node {
        Node {
            block_id,
            parent,
            keys: Vec::new(),
            body: NodeBody::Leaf {
                records: Vec::new(),
                next: 0,
            },
        }
    }

    /// Build the projection of block `id`.
    pub fn load(disk: &Disk, id: u32) -> Result<Node, IndexBlockError> {
        let block = disk.read_block(id)?;
        let header = index_block::read_header(&block)?;
        if header.block_id != id {
            return Err(IndexBlockError::Corrupt(
                "block id in header does not match its location",
            ));
        }
        let (mut ptrs, keys) = index_block::read_payload(&block)?;
        let body = match header.kind {
            IndexKind::Leaf => {
                let chain = ptrs
                    .pop()
                    .ok_or(IndexBlockError::Corrupt("leaf without a chain pointer"))?;
                NodeBody::Leaf {
                    records: ptrs,
                    next: chain.block_id,
                }
            }
            IndexKind::Inner => {
                if ptrs.iter().any(|p| p.block_id == 0) {
                    return Err(IndexBlockError::Corrupt("null child pointer in inner node"));
                }
                NodeBody::Inner {
                    children: ptrs.into_iter().map(|p| p.block_id).collect(),
                }
            }
        };
        Ok(Node {
            block_id: id,
            parent: header.parent,
            keys,
            body,
        })
    }

    /// Serialize this node and write it back to its block.
    pub fn flush(&self, disk: &mut Disk) -> Result<(), IndexBlockError> {
        let mut block = Block::new_zero(self.block_id, disk.block_size());
        let (kind, ptrs) = match &self.body {
            NodeBody::Leaf { records, next } => {
                let mut ptrs = records.clone();
                ptrs.push(BlockPtr::new(*next, 0));
                (IndexKind::Leaf, ptrs)
            }
            NodeBody::Inner { children } => (
                IndexKind::Inner,
                children.iter().map(|&c| BlockPtr::new(c, 0)).collect(),
            ),
        };
        index_block::init_index_block(&mut block, kind, self.block_id, self.parent);
        index_block::write_payload(&mut block, &ptrs, &self.keys)?;
        disk.write_block(&block)?;
        Ok(())
    }

    /// Whether this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf { .. })
    }

    /// The child ids of an inner node, `None` for a leaf.
    pub fn children(&self) -> Option<&[u32]> {
        match &self.body {
            NodeBody::Inner { children } => Some(children),
            NodeBody::Leaf { .. } => None,
        }
    }

    /// The child id at `pos`, `None` for a leaf or an out-of-range position.
    pub fn child(&self, pos: usize) -> Option<u32> {
        self.children().and_then(|c| c.get(pos).copied())
    }

    /// The record pointer at `pos`, `None` for an inner node or an
    /// out-of-range position.
    pub fn record(&self, pos: usize) -> Option<BlockPtr> {
        match &self.body {
            NodeBody::Leaf { records, .. } => records.get(pos).copied(),
            NodeBody::Inner { .. } => None,
        }
    }

    /// The id of the next leaf in the chain (0 at the end), `None` for an
    /// inner node.
    pub fn next_leaf(&self) -> Option<u32> {
        match &self.body {
            NodeBody::Leaf { next, .. } => Some(*next),
            NodeBody::Inner { .. } => None,
        }
    }

    /// Mutable access to a leaf's keys, record pointers and chain pointer.
    pub fn leaf_parts_mut(&mut self) -> Option<(&mut Vec<Key>, &mut Vec<BlockPtr>, &mut u32)> {
        let Node { keys, body, .. } = self;
        match body {
            NodeBody::Leaf { records, next } => Some((keys, records, next)),
            NodeBody::Inner { .. } => None,
        }
    }

    /// Mutable access to an inner node's keys and children.
    pub fn inner_parts_mut(&mut self) -> Option<(&mut Vec<Key>, &mut Vec<u32>)> {
        let Node { keys, body, .. } = self;
        match body {
            NodeBody::Inner { children } => Some((keys, children)),
            NodeBody::Leaf { .. } => None,
        }
    }

}
