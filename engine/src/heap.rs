//! The record heap: the append-only chain of data blocks record bytes live
//! in.
//!
//! The loader drives this in lockstep with the tree: every record is first
//! appended here, and the returned `(block_id, offset)` pointer is what the
//! tree indexes. Records are packed into the current tail block until it is
//! full, then a fresh block is allocated and initialized; every append
//! writes the touched block back immediately.

use bptree_api::codec::{decode_record, encode_record};
use bptree_api::controller::Disk;
use bptree_api::types::{BlockPtr, Record};

use crate::data_block;
use crate::error::DataBlockError;

/// An append-only collection of data blocks holding fixed-size records.
#[derive(Debug)]
pub struct RecordHeap {
    /// The tail block new records go into.
    current: u32,
    /// Every data block allocated so far, in allocation order.
    block_ids: Vec<u32>,
}

impl RecordHeap {
    /// Create a heap with one empty data block.
    pub fn new(disk: &mut Disk) -> Result<RecordHeap, DataBlockError> {
        let id = Self::fresh_block(disk)?;
        Ok(RecordHeap {
            current: id,
            block_ids: vec![id],
        })
    }

    fn fresh_block(disk: &mut Disk) -> Result<u32, DataBlockError> {
        let id = disk.allocate()?;
        let mut block = disk.read_block(id)?;
        data_block::init_data_block(&mut block, id);
        disk.write_block(&block)?;
        Ok(id)
    }

    /// Append `record` and return the pointer to its slot.
    pub fn append(&mut self, disk: &mut Disk, record: &Record) -> Result<BlockPtr, DataBlockError> {
        let bytes = encode_record(record)?;
        let mut block = disk.read_block(self.current)?;
        if let Some(offset) = data_block::insert_record(&mut block, &bytes)? {
            disk.write_block(&block)?;
            return Ok(BlockPtr::new(self.current, offset));
        }

        // tail is full; start a fresh block and retry there
        let id = Self::fresh_block(disk)?;
        let mut block = disk.read_block(id)?;
        let offset = data_block::insert_record(&mut block, &bytes)?
            .ok_or(DataBlockError::RecordTooLarge)?;
        disk.write_block(&block)?;
        self.current = id;
        self.block_ids.push(id);
        Ok(BlockPtr::new(id, offset))
    }

    /// Resolve a pointer back to its decoded record.
    pub fn fetch(&self, disk: &Disk, ptr: BlockPtr) -> Result<Record, DataBlockError> {
        let block = disk.read_block(ptr.block_id)?;
        let bytes = data_block::read_record(&block, ptr.offset)?;
        Ok(decode_record(&bytes))
    }

    /// Number of data blocks allocated so far.
    pub fn block_count(&self) -> usize {
        self.block_ids.len()
    }

    /// The ids of every data block, in allocation order.
    pub fn block_ids(&self) -> &[u32] {
        &self.block_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bptree_api::types::Rating;

    static BLOCK_SIZE: u32 = 100;

    fn record(id: &str, whole: u16, votes: u32) -> Record {
        Record {
            id: id.to_string(),
            rating: Rating::from_parts(whole, 0),
            votes,
        }
    }

    #[test]
    fn append_rolls_over_to_fresh_blocks() {
        let mut disk = Disk::new(BLOCK_SIZE, 64);
        let mut heap = RecordHeap::new(&mut disk).unwrap();

        // 100-byte blocks hold 4 records; ten spill into three blocks
        let mut ptrs = Vec::new();
        for i in 0..10u16 {
            let rec = record(&format!("h{}", i), i + 1, 7);
            ptrs.push(heap.append(&mut disk, &rec).unwrap());
        }
        assert_eq!(heap.block_count(), 3);

        // Every pointer resolves back to its record
        for (i, &ptr) in ptrs.iter().enumerate() {
            let rec = heap.fetch(&disk, ptr).unwrap();
            assert_eq!(rec.id, format!("h{}", i));
        }
        // The first block is full, in slot order
        let block = disk.read_block(heap.block_ids()[0]).unwrap();
        assert_eq!(data_block::scan_records(&block).unwrap().len(), 4);
    }
}
