use std::mem::size_of;

use crate::tfs::{BlockNumber, InodeNumber};

use super::block::BLOCK_SIZE;

/// The number of blocks an inode addresses directly.
pub const NUM_DIRECT: usize = 10;

/// Entries of an indirect block are stored as little-endian `u32`s.
pub const INDIRECT_ENTRY_SIZE: usize = size_of::<u32>();

const_assert!(BLOCK_SIZE % INDIRECT_ENTRY_SIZE == 0);
/// The number of block numbers that fit in the indirect block.
pub const NUM_INDIRECT: usize = BLOCK_SIZE / INDIRECT_ENTRY_SIZE;

/// The number of data blocks a single inode can own, not counting its indirect block.
pub const MAX_FILE_BLOCKS: usize = NUM_DIRECT + NUM_INDIRECT;

pub const MAX_FILE_SIZE: usize = MAX_FILE_BLOCKS * BLOCK_SIZE;

/// Marks an unused slot inside an indirect block.
pub const FREE_INDIRECT_ENTRY: u32 = u32::MAX;

pub const ROOT_INODE: InodeNumber = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Inode {
    /// file type (directory or regular)
    pub type_: InodeType,
    /// file size in bytes
    pub size: usize,
    /// block #s for the first NUM_DIRECT blocks
    pub direct: [Option<BlockNumber>; NUM_DIRECT],
    /// block number of the indirect block
    pub indirect: Option<BlockNumber>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeType {
    /// This inode describes a regular data file.
    File,
    /// This inode describes a directory.
    Directory,
}

/// The contents of an inode slot that is not in use.
pub const FREE_INODE: Inode = Inode::new(InodeType::File);

impl Inode {
    /// Constructs an inode of the given type that owns no blocks.
    #[must_use]
    pub const fn new(type_: InodeType) -> Self {
        Self {
            type_,
            size: 0,
            direct: [None; NUM_DIRECT],
            indirect: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.type_ == InodeType::Directory
    }

    /// The number of data blocks needed to hold `self.size` bytes.
    pub fn block_count(&self) -> usize {
        self.size.div_ceil(BLOCK_SIZE)
    }
}
