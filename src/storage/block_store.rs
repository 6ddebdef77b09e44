use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bitvec::vec::BitVec;
use log::trace;

use crate::error::{FsError, Resource, Result};
use crate::layout::block::{Block, EMPTY_BLOCK};
use crate::tfs::BlockNumber;

use super::latency::AccessDelay;

/// A fixed array of data blocks.
///
/// The allocation bitmap has its own lock. Block contents are guarded per block, but the
/// store does not decide who may touch a block: callers reach a block only through an inode
/// they hold locked, so the content locks are never contended in practice and always come
/// last in the lock order.
pub struct BlockStore {
    blocks: Vec<RwLock<Block>>,
    /// Tracks the allocation status of blocks.
    /// A value of `true` represents "taken".
    bitmap: Mutex<BitVec>,
    delay: Arc<dyn AccessDelay>,
}

impl BlockStore {
    /// Constructs a store of `num_blocks` free, zeroed blocks.
    pub fn new(num_blocks: usize, delay: Arc<dyn AccessDelay>) -> Self {
        Self {
            blocks: (0..num_blocks).map(|_| RwLock::new(EMPTY_BLOCK)).collect(),
            bitmap: Mutex::new(BitVec::repeat(false, num_blocks)),
            delay,
        }
    }

    /// The total number of blocks, free or taken.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Claims the first free block and returns its number. The block is zero-filled.
    pub fn alloc(&self) -> Result<BlockNumber> {
        let block_number = {
            let mut bitmap = self.bitmap.lock()?;

            let assigned = bitmap.first_zero();
            self.delay
                .delay_scan(assigned.map_or(bitmap.len(), |block| block + 1));

            let block = assigned.ok_or(FsError::Exhausted(Resource::Block))?;
            bitmap.set(block, true);

            block
        };

        // the block is ours now, so nobody else can be looking at it
        *self.write(block_number)? = EMPTY_BLOCK;

        trace!("allocated block {block_number}");
        Ok(block_number)
    }

    /// Returns a block to the free pool. The caller must guarantee nothing still uses it.
    pub fn free(&self, block_number: BlockNumber) -> Result<()> {
        self.free_all([block_number])
    }

    /// Frees every block in `block_numbers` under a single acquisition of the bitmap lock.
    ///
    /// Fails on the first invalid block number; blocks before it stay freed.
    pub fn free_all<I>(&self, block_numbers: I) -> Result<()>
    where
        I: IntoIterator<Item = BlockNumber>,
    {
        let mut bitmap = self.bitmap.lock()?;

        for block_number in block_numbers {
            self.check(block_number)?;
            self.delay.delay();

            bitmap.set(block_number, false);
            trace!("freed block {block_number}");
        }

        Ok(())
    }

    /// Shared access to a block's bytes.
    pub fn read(&self, block_number: BlockNumber) -> Result<RwLockReadGuard<'_, Block>> {
        self.check(block_number)?;
        self.delay.delay();

        Ok(self.blocks[block_number].read()?)
    }

    /// Exclusive access to a block's bytes.
    pub fn write(&self, block_number: BlockNumber) -> Result<RwLockWriteGuard<'_, Block>> {
        self.check(block_number)?;
        self.delay.delay();

        Ok(self.blocks[block_number].write()?)
    }

    pub fn is_allocated(&self, block_number: BlockNumber) -> Result<bool> {
        self.check(block_number)?;

        Ok(self.bitmap.lock()?[block_number])
    }

    pub fn free_count(&self) -> Result<usize> {
        Ok(self.bitmap.lock()?.count_zeros())
    }

    /// Marks every block as free.
    pub fn reset(&self) -> Result<()> {
        self.bitmap.lock()?.fill(false);

        Ok(())
    }

    fn check(&self, block_number: BlockNumber) -> Result<()> {
        if block_number >= self.blocks.len() {
            return Err(FsError::InvalidBlock(block_number));
        }

        Ok(())
    }
}
