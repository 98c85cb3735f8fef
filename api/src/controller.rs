//! Implementation of the simulated disk and a very simple block controller
//! for it.
//!
//! The disk is an in-memory arena of `nblocks` fixed-size blocks, all
//! zero-initialized at construction. It stands in for a real device: the
//! only operations are reading a block, writing a block back, and asking
//! for / returning a block id. There is deliberately no byte-granular
//! access; every layer above works in whole blocks, the way it would have
//! to against real hardware.
//!
//! Block id 0 is reserved and never handed out, so the all-zero pointer can
//! serve as the null sentinel throughout the stack.
//!
//! Reads return a *copy* of the block. Mutating the copy does nothing until
//! it is written back with [`Disk::write_block`]; between logical
//! operations the arena is the sole source of truth.

use std::collections::VecDeque;

use crate::error::{DiskError, DiskResult};
use crate::types::Block;

/// The simulated disk: a block arena plus an allocator over it.
///
/// Allocation hands out never-used blocks in increasing order starting at
/// id 1, except that ids returned through [`Disk::deallocate`] are reused
/// first, in FIFO order. The FIFO choice keeps reuse stable and
/// predictable, which the tests rely on.
#[derive(Debug)]
pub struct Disk {
    /// Size of the blocks this disk reads and writes.
    block_size: u32,
    /// Total number of blocks this disk consists of.
    nblocks: u32,
    /// The backing store, `nblocks * block_size` bytes, zeroed at start.
    arena: Vec<u8>,
    /// The next never-allocated block id. Starts at 1; id 0 is the null id.
    next_free_idx: u32,
    /// Ids returned by `deallocate`, reused before fresh ids.
    free_list: VecDeque<u32>,
}

impl Disk {
    /// Create a disk of `nblocks` blocks of `block_size` bytes each, all
    /// zeroed.
    pub fn new(block_size: u32, nblocks: u32) -> Disk {
        Disk {
            block_size,
            nblocks,
            arena: vec![0; block_size as usize * nblocks as usize],
            next_free_idx: 1,
            free_list: VecDeque::new(),
        }
    }

    /// Size of the blocks on this disk, in bytes.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Total number of blocks on this disk (including the reserved id 0).
    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }

    /// Number of blocks currently allocated.
    pub fn num_allocated(&self) -> u64 {
        (self.next_free_idx as u64 - 1) - self.free_list.len() as u64
    }

    /// One-line description of the disk geometry, for reports.
    pub fn info(&self) -> String {
        format!(
            "disk size: {} B, block size: {} B, blocks: {}",
            self.block_size as u64 * self.nblocks as u64,
            self.block_size,
            self.nblocks
        )
    }

    fn check_id(&self, id: u32) -> DiskResult<()> {
        if id == 0 || id >= self.nblocks {
            return Err(DiskError::InvalidBlockId {
                id,
                nblocks: self.nblocks,
            });
        }
        Ok(())
    }

    fn block_range(&self, id: u32) -> std::ops::Range<usize> {
        let start = id as usize * self.block_size as usize;
        start..start + self.block_size as usize
    }

    /// Read the block with id `id` from the disk.
    ///
    /// The returned block is a copy; write it back to persist any changes.
    pub fn read_block(&self, id: u32) -> DiskResult<Block> {
        self.check_id(id)?;
        let data: Box<[u8]> = self.arena[self.block_range(id)].into();
        Ok(Block::new(id, data))
    }

    /// Write the given block back to the disk at its own block number.
    ///
    /// Fails if the block is not exactly block-sized or its id is invalid.
    pub fn write_block(&mut self, b: &Block) -> DiskResult<()> {
        self.check_id(b.block_no)?;
        if b.len() != self.block_size {
            return Err(DiskError::BlockInput(
                "trying to write a non-block-sized block",
            ));
        }
        let range = self.block_range(b.block_no);
        self.arena[range].copy_from_slice(b.contents_as_ref());
        Ok(())
    }

    /// Hand out a block id, reusing deallocated ids (FIFO) before touching
    /// never-used ones. Fails with [`DiskError::DiskFull`] once both are
    /// exhausted.
    pub fn allocate(&mut self) -> DiskResult<u32> {
        if let Some(id) = self.free_list.pop_front() {
            return Ok(id);
        }
        if self.next_free_idx >= self.nblocks {
            return Err(DiskError::DiskFull);
        }
        let id = self.next_free_idx;
        self.next_free_idx += 1;
        Ok(id)
    }

    /// Return block `id` to the allocator: its contents are zeroed and the
    /// id is queued for reuse.
    pub fn deallocate(&mut self, id: u32) -> DiskResult<()> {
        self.check_id(id)?;
        let range = self.block_range(id);
        self.arena[range].fill(0);
        self.free_list.push_back(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Disk;
    use crate::error::DiskError;
    use crate::types::Block;

    // For these tests we use a toy disk with 10 blocks of 10 bytes each.
    static BLOCK_SIZE: u32 = 10;
    static NBLOCKS: u32 = 10;

    fn disk_setup() -> Disk {
        Disk::new(BLOCK_SIZE, NBLOCKS)
    }

    #[test]
    fn create_disk_test() {
        let mut disk = disk_setup();

        // Some random blocks are indeed zero at start-up
        let zero_block = |i| Block::new_zero(i, BLOCK_SIZE);
        assert_eq!(disk.read_block(3).unwrap(), zero_block(3));
        assert_eq!(disk.read_block(9).unwrap(), zero_block(9));

        // Id 0 is the reserved null id, id 10 falls off the end
        assert!(disk.read_block(0).is_err());
        assert!(disk.read_block(NBLOCKS).is_err());
        assert!(disk.write_block(&zero_block(NBLOCKS)).is_err());

        // Writes of the wrong size are rejected
        let sized_block = |s| Block::new_zero(3, s);
        assert!(disk.write_block(&sized_block(BLOCK_SIZE + 1)).is_err());
        assert!(disk.write_block(&sized_block(BLOCK_SIZE - 1)).is_err());

        // Write a counting pattern and read it back
        let bw = Block::new(3, (0..10).collect());
        disk.write_block(&bw).unwrap();
        assert_eq!(disk.read_block(3).unwrap(), bw);

        // A read is a copy: mutating it does not change the disk
        let mut copy = disk.read_block(3).unwrap();
        copy.write_data(&[99], 0).unwrap();
        assert_eq!(disk.read_block(3).unwrap(), bw);
    }

    #[test]
    fn allocation_test() {
        let mut disk = disk_setup();

        // Fresh ids are handed out in order, starting at 1
        assert_eq!(disk.allocate().unwrap(), 1);
        assert_eq!(disk.allocate().unwrap(), 2);
        assert_eq!(disk.allocate().unwrap(), 3);
        assert_eq!(disk.num_allocated(), 3);

        // Deallocation zeroes the block and queues the id for FIFO reuse
        disk.write_block(&Block::new(2, (0..10).collect())).unwrap();
        disk.deallocate(2).unwrap();
        disk.deallocate(3).unwrap();
        assert_eq!(disk.num_allocated(), 1);
        assert_eq!(disk.read_block(2).unwrap(), Block::new_zero(2, BLOCK_SIZE));
        assert_eq!(disk.allocate().unwrap(), 2);
        assert_eq!(disk.allocate().unwrap(), 3);
        // Queue drained, back to fresh ids
        assert_eq!(disk.allocate().unwrap(), 4);
    }

    #[test]
    fn disk_full_test() {
        let mut disk = disk_setup();

        // Ids 1..=9 are allocatable, then the disk is full
        for expected in 1..NBLOCKS {
            assert_eq!(disk.allocate().unwrap(), expected);
        }
        assert_eq!(disk.allocate(), Err(DiskError::DiskFull));

        // Deallocating makes exactly one id available again
        disk.deallocate(5).unwrap();
        assert_eq!(disk.allocate().unwrap(), 5);
        assert_eq!(disk.allocate(), Err(DiskError::DiskFull));
    }
}
