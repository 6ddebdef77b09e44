use std::mem::size_of;

/// size of a data block in bytes
pub const BLOCK_SIZE: usize = 1024;

pub type Block = [u8; BLOCK_SIZE];
const_assert!(size_of::<Block>() == BLOCK_SIZE);

/// A block with every byte set to zero.
pub const EMPTY_BLOCK: Block = [0; BLOCK_SIZE];
