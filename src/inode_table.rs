use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bitvec::vec::BitVec;
use log::{debug, warn};

use crate::directory;
use crate::error::{FsError, Resource, Result};
use crate::layout::block::{Block, BLOCK_SIZE};
use crate::layout::inode::{
    Inode, InodeType, FREE_INDIRECT_ENTRY, FREE_INODE, INDIRECT_ENTRY_SIZE, MAX_FILE_BLOCKS,
    NUM_DIRECT,
};
use crate::storage::{AccessDelay, BlockStore};
use crate::tfs::{BlockNumber, InodeNumber};

/// A fixed array of inodes.
///
/// The allocation bitmap is guarded by a table-wide lock that is only held while a slot is
/// being claimed or released. Each inode sits behind its own reader/writer lock, and every
/// read or change of an inode's size or block list goes through that lock.
pub struct InodeTable {
    inodes: Vec<RwLock<Inode>>,
    /// Tracks the allocation status of inodes.
    /// A value of `true` represents "taken".
    bitmap: Mutex<BitVec>,
    delay: Arc<dyn AccessDelay>,
}

impl InodeTable {
    pub fn new(num_inodes: usize, delay: Arc<dyn AccessDelay>) -> Self {
        Self {
            inodes: (0..num_inodes).map(|_| RwLock::new(FREE_INODE)).collect(),
            bitmap: Mutex::new(BitVec::repeat(false, num_inodes)),
            delay,
        }
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// Claims the first free inode and initializes it as `inode_type`.
    ///
    /// A directory gets one data block filled with free entries. If that block cannot be
    /// allocated the slot is released again.
    pub fn create(&self, blocks: &BlockStore, inode_type: InodeType) -> Result<InodeNumber> {
        let mut bitmap = self.bitmap.lock()?;

        let assigned = bitmap.first_zero();
        self.delay
            .delay_scan(assigned.map_or(bitmap.len(), |inumber| inumber + 1));
        let inumber = assigned.ok_or(FsError::Exhausted(Resource::Inode))?;

        // lock the slot before anything is written into it
        let mut inode = self.inodes[inumber].write()?;
        bitmap.set(inumber, true);

        self.delay.delay();
        *inode = Inode::new(inode_type);

        if inode_type == InodeType::Directory {
            match directory::format(blocks) {
                Ok(block_number) => {
                    inode.direct[0] = Some(block_number);
                    inode.size = BLOCK_SIZE;
                }
                Err(err) => {
                    warn!("[inode #{inumber}] directory initialization failed, releasing slot");

                    *inode = FREE_INODE;
                    bitmap.set(inumber, false);

                    return Err(err);
                }
            }
        }

        debug!("[inode #{inumber}] created {inode_type:?}");
        Ok(inumber)
    }

    /// Frees every block owned by the inode and releases its slot.
    ///
    /// The caller must not hold a lock on the inode.
    pub fn delete(&self, blocks: &BlockStore, inumber: InodeNumber) -> Result<()> {
        self.check(inumber)?;

        // the inode itself and its bitmap entry
        self.delay.delay();
        self.delay.delay();

        let mut bitmap = self.bitmap.lock()?;
        let mut inode = self.inodes[inumber].write()?;

        if !bitmap[inumber] {
            return Err(FsError::InvalidInode(inumber));
        }

        free_all_blocks(blocks, &mut inode)?;
        *inode = FREE_INODE;
        bitmap.set(inumber, false);

        debug!("[inode #{inumber}] deleted");
        Ok(())
    }

    /// Shared access to an inode.
    pub fn read(&self, inumber: InodeNumber) -> Result<RwLockReadGuard<'_, Inode>> {
        self.check(inumber)?;
        self.delay.delay();

        Ok(self.inodes[inumber].read()?)
    }

    /// Exclusive access to an inode.
    pub fn write(&self, inumber: InodeNumber) -> Result<RwLockWriteGuard<'_, Inode>> {
        self.check(inumber)?;
        self.delay.delay();

        Ok(self.inodes[inumber].write()?)
    }

    pub fn is_taken(&self, inumber: InodeNumber) -> Result<bool> {
        self.check(inumber)?;

        Ok(self.bitmap.lock()?[inumber])
    }

    /// The inode numbers currently in use.
    pub fn taken(&self) -> Result<Vec<InodeNumber>> {
        Ok(self.bitmap.lock()?.iter_ones().collect())
    }

    /// Marks every slot as free without touching the blocks they own.
    pub fn reset(&self) -> Result<()> {
        let mut bitmap = self.bitmap.lock()?;

        for inode in &self.inodes {
            *inode.write()? = FREE_INODE;
        }
        bitmap.fill(false);

        Ok(())
    }

    pub fn check(&self, inumber: InodeNumber) -> Result<()> {
        if inumber >= self.inodes.len() {
            return Err(FsError::InvalidInode(inumber));
        }

        Ok(())
    }
}

/// Returns the number of the data block at logical `position` of the inode.
///
/// Positions below [`NUM_DIRECT`] are read from the inode; the rest are looked up in the
/// indirect block.
pub fn data_block_at(blocks: &BlockStore, inode: &Inode, position: usize) -> Result<BlockNumber> {
    if position >= MAX_FILE_BLOCKS {
        return Err(FsError::NotAllocated(position));
    }

    if position < NUM_DIRECT {
        return inode.direct[position].ok_or(FsError::NotAllocated(position));
    }

    let indirect = inode.indirect.ok_or(FsError::NotAllocated(position))?;
    let indirect_block = blocks.read(indirect)?;

    indirect_entry(&indirect_block, position - NUM_DIRECT).ok_or(FsError::NotAllocated(position))
}

/// Records `block_number` as the data block at logical `position` of the inode.
///
/// The indirect block is allocated on first use. An occupied slot is never overwritten.
pub fn attach_block_at(
    blocks: &BlockStore,
    inode: &mut Inode,
    position: usize,
    block_number: BlockNumber,
) -> Result<()> {
    if position >= MAX_FILE_BLOCKS {
        return Err(FsError::InvalidArgs("block position exceeds the maximum file size"));
    }

    if position < NUM_DIRECT {
        if inode.direct[position].is_some() {
            return Err(FsError::SlotOccupied(position));
        }

        inode.direct[position] = Some(block_number);
        return Ok(());
    }

    let indirect = match inode.indirect {
        Some(indirect) => indirect,
        None => {
            let indirect = blocks
                .alloc()
                .map_err(|_| FsError::AllocationFailure("growing the indirect block"))?;
            blocks.write(indirect)?.fill(0xff);
            inode.indirect = Some(indirect);

            indirect
        }
    };

    let mut indirect_block = blocks.write(indirect)?;
    let index = position - NUM_DIRECT;
    if indirect_entry(&indirect_block, index).is_some() {
        return Err(FsError::SlotOccupied(position));
    }

    set_indirect_entry(&mut indirect_block, index, block_number);
    Ok(())
}

/// The data blocks owned by the inode in logical order, not including the indirect block.
pub fn allocated_blocks(blocks: &BlockStore, inode: &Inode) -> Result<Vec<BlockNumber>> {
    let mut block_numbers: Vec<BlockNumber> = inode.direct.iter().flatten().copied().collect();

    if let Some(indirect) = inode.indirect {
        let indirect_block = blocks.read(indirect)?;
        block_numbers.extend(indirect_entries(&indirect_block));
    }

    Ok(block_numbers)
}

/// Frees the direct blocks, the blocks listed in the indirect block, and the indirect block
/// itself. Leaves the inode owning no blocks. Does not change its size.
pub fn free_all_blocks(blocks: &BlockStore, inode: &mut Inode) -> Result<()> {
    let mut owned = allocated_blocks(blocks, inode)?;
    owned.extend(inode.indirect);

    blocks.free_all(owned)?;

    inode.direct = [None; NUM_DIRECT];
    inode.indirect = None;

    Ok(())
}

fn indirect_entry(block: &Block, index: usize) -> Option<BlockNumber> {
    let start = index * INDIRECT_ENTRY_SIZE;
    let bytes: [u8; INDIRECT_ENTRY_SIZE] = block[start..start + INDIRECT_ENTRY_SIZE]
        .try_into()
        .expect("slice is INDIRECT_ENTRY_SIZE bytes long");

    match u32::from_le_bytes(bytes) {
        FREE_INDIRECT_ENTRY => None,
        block_number => Some(block_number as BlockNumber),
    }
}

fn indirect_entries(block: &Block) -> impl Iterator<Item = BlockNumber> + '_ {
    block
        .chunks_exact(INDIRECT_ENTRY_SIZE)
        .map(|b| u32::from_le_bytes(b.try_into().expect("chunks are exactly 4 bytes")))
        .filter(|b| *b != FREE_INDIRECT_ENTRY)
        .map(|b| b as BlockNumber)
}

fn set_indirect_entry(block: &mut Block, index: usize, block_number: BlockNumber) {
    let start = index * INDIRECT_ENTRY_SIZE;
    block[start..start + INDIRECT_ENTRY_SIZE].copy_from_slice(&(block_number as u32).to_le_bytes());
}
