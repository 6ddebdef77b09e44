//! The entries of a directory live in the directory inode's only data block, as a fixed
//! array of [`DirectoryEntry`] records. Free records carry [`FREE_ENTRY_INUMBER`] and are
//! reused first-come.
//!
//! Functions that change a directory take the directory inode by `&mut`, so they can only be
//! called by someone holding its write lock.
//!
//! [`FREE_ENTRY_INUMBER`]: crate::layout::directory_entry::FREE_ENTRY_INUMBER

use log::debug;

use crate::error::{FsError, Result};
use crate::inode_table::InodeTable;
use crate::layout::block::Block;
use crate::layout::directory_entry::{
    DirectoryEntry, DirectoryEntryName, DIRECTORY_ENTRIES_PER_BLOCK, DIRECTORY_ENTRY_SIZE,
    FREE_DIRECTORY_ENTRY,
};
use crate::layout::inode::Inode;
use crate::storage::BlockStore;
use crate::tfs::{BlockNumber, InodeNumber};

/// Allocates a block and fills it with free entries.
pub fn format(blocks: &BlockStore) -> Result<BlockNumber> {
    let block_number = blocks.alloc()?;

    let formatted = blocks.write(block_number).and_then(|mut block| {
        (0..DIRECTORY_ENTRIES_PER_BLOCK)
            .try_for_each(|index| write_entry(&mut block, index, &FREE_DIRECTORY_ENTRY))
    });

    if let Err(err) = formatted {
        blocks.free(block_number)?;
        return Err(err);
    }

    Ok(block_number)
}

/// Adds an entry named `name` pointing at `child_inumber` in the first free slot.
///
/// Names longer than the entry can hold are truncated.
pub fn insert(
    inodes: &InodeTable,
    blocks: &BlockStore,
    dir_inumber: InodeNumber,
    dir: &mut Inode,
    child_inumber: InodeNumber,
    name: &str,
) -> Result<()> {
    inodes.check(dir_inumber)?;
    inodes.check(child_inumber)?;

    let name = DirectoryEntryName::truncated(name)?;
    let mut block = blocks.write(directory_block(dir_inumber, dir)?)?;

    for index in 0..DIRECTORY_ENTRIES_PER_BLOCK {
        if read_entry(&block, index)?.is_free() {
            let entry = DirectoryEntry::new(child_inumber, name)?;
            write_entry(&mut block, index, &entry)?;

            debug!("[inode #{dir_inumber}] added entry {} -> #{child_inumber}", entry.name);
            return Ok(());
        }
    }

    Err(FsError::DirectoryFull(dir_inumber))
}

/// Frees the first entry that points at `child_inumber`. Returns whether one was found.
pub fn remove(
    blocks: &BlockStore,
    dir_inumber: InodeNumber,
    dir: &mut Inode,
    child_inumber: InodeNumber,
) -> Result<bool> {
    let mut block = blocks.write(directory_block(dir_inumber, dir)?)?;

    for index in 0..DIRECTORY_ENTRIES_PER_BLOCK {
        if read_entry(&block, index)?.inumber() == Some(child_inumber) {
            write_entry(&mut block, index, &FREE_DIRECTORY_ENTRY)?;

            debug!("[inode #{dir_inumber}] removed entry for #{child_inumber}");
            return Ok(true);
        }
    }

    Ok(false)
}

/// Finds the inode number of the entry named `name`.
///
/// Holds the directory's read lock for the duration of the scan.
pub fn lookup(
    inodes: &InodeTable,
    blocks: &BlockStore,
    dir_inumber: InodeNumber,
    name: &str,
) -> Result<Option<InodeNumber>> {
    let name = DirectoryEntryName::truncated(name)?;

    let dir = inodes.read(dir_inumber)?;
    let block = blocks.read(directory_block(dir_inumber, &dir)?)?;

    for index in 0..DIRECTORY_ENTRIES_PER_BLOCK {
        let entry = read_entry(&block, index)?;
        if !entry.is_free() && entry.name == name {
            return Ok(entry.inumber());
        }
    }

    Ok(None)
}

/// The entries in use, in slot order.
pub fn entries(
    inodes: &InodeTable,
    blocks: &BlockStore,
    dir_inumber: InodeNumber,
) -> Result<Vec<DirectoryEntry>> {
    let dir = inodes.read(dir_inumber)?;
    let block = blocks.read(directory_block(dir_inumber, &dir)?)?;

    let mut entries = vec![];
    for index in 0..DIRECTORY_ENTRIES_PER_BLOCK {
        let entry = read_entry(&block, index)?;
        if !entry.is_free() {
            entries.push(entry);
        }
    }

    Ok(entries)
}

fn directory_block(dir_inumber: InodeNumber, dir: &Inode) -> Result<BlockNumber> {
    if !dir.is_directory() {
        return Err(FsError::NotADirectory(dir_inumber));
    }

    dir.direct[0].ok_or(FsError::NotAllocated(0))
}

fn read_entry(block: &Block, index: usize) -> Result<DirectoryEntry> {
    let start = index * DIRECTORY_ENTRY_SIZE;

    Ok(bincode::deserialize(
        &block[start..start + DIRECTORY_ENTRY_SIZE],
    )?)
}

fn write_entry(block: &mut Block, index: usize, entry: &DirectoryEntry) -> Result<()> {
    let start = index * DIRECTORY_ENTRY_SIZE;
    bincode::serialize_into(&mut block[start..start + DIRECTORY_ENTRY_SIZE], entry)?;

    Ok(())
}
