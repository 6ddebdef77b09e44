use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use enumflags2::{bitflags, BitFlags};
use log::{debug, info, warn};

use crate::config::FsConfig;
use crate::directory;
use crate::error::{FsError, Result};
use crate::inode_table::{self, InodeTable};
use crate::layout::block::BLOCK_SIZE;
use crate::layout::directory_entry::DirectoryEntryName;
use crate::layout::inode::{Inode, InodeType, MAX_FILE_BLOCKS, MAX_FILE_SIZE, ROOT_INODE};
use crate::open_file_table::OpenFileTable;
use crate::storage::{AccessDelay, BlockStore};

// inode numbers are stored as `i32`s inside directory blocks, but we use `usize`s since they
// index the inode table
pub type InodeNumber = usize;

// block numbers are stored as `u32`s inside indirect blocks, but we use `usize`s to avoid
// littering the code with casts.
pub type BlockNumber = usize;

/// Index into the open file table.
pub type FileHandle = usize;

/// Flags accepted by [`Tfs::open`]. The values match the wire encoding.
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// Create the file if it does not exist.
    Create = 0b001,
    /// Discard the contents of an existing file.
    Truncate = 0b010,
    /// Start at the end of the file instead of the beginning.
    Append = 0b100,
}

/// An in-memory filesystem with a single, flat root directory.
///
/// Locks are always taken in this order:
///
/// 1. the file creation lock (only by opens that may create)
/// 2. the inode table's allocation bitmap
/// 3. an open file entry (held across a read or write)
/// 4. an inode
/// 5. the block store's allocation bitmap
/// 6. the contents of a data block
///
/// The open file table's own bitmap is never held while waiting for anything but an entry
/// lock, and no inode lock is held while an open file entry is acquired.
pub struct Tfs {
    inodes: InodeTable,
    blocks: BlockStore,
    open_files: OpenFileTable,
    /// Serializes every open that may create a file, so two opens of the same new name cannot
    /// both insert an entry.
    creation: Mutex<()>,
}

impl Tfs {
    /// Builds empty tables sized by `config` and creates the root directory.
    pub fn init(config: FsConfig) -> Result<Self> {
        Self::init_with_delay(config, config.latency.into_delay())
    }

    /// Like [`Self::init`], with a caller-provided latency hook instead of `config.latency`.
    pub fn init_with_delay(config: FsConfig, delay: Arc<dyn AccessDelay>) -> Result<Self> {
        let tfs = Self {
            inodes: InodeTable::new(config.inode_table_size, Arc::clone(&delay)),
            blocks: BlockStore::new(config.data_blocks, delay),
            open_files: OpenFileTable::new(config.max_open_files),
            creation: Mutex::new(()),
        };

        let root = tfs.inodes.create(&tfs.blocks, InodeType::Directory)?;
        if root != ROOT_INODE {
            return Err(FsError::InvalidInode(root));
        }

        info!("{} inodes", tfs.inodes.len());
        info!("{} data blocks of {BLOCK_SIZE} bytes", tfs.blocks.len());
        info!("{} open file entries", tfs.open_files.len());

        Ok(tfs)
    }

    /// Opens the file at `path`, returning a handle for [`Self::read`] and [`Self::write`].
    pub fn open(&self, path: &str, flags: impl Into<BitFlags<OpenFlag>>) -> Result<FileHandle> {
        let flags = flags.into();
        let name = file_name(path)?;
        self.open_files.ensure_accepting()?;

        debug!("opening {path:?} with {flags:?}");

        let creation = if flags.contains(OpenFlag::Create) {
            let creation = self.creation.lock()?;
            // the tables may have been wiped while we waited
            self.open_files.ensure_accepting()?;

            Some(creation)
        } else {
            None
        };

        let resolved = match directory::lookup(&self.inodes, &self.blocks, ROOT_INODE, name) {
            Ok(Some(inumber)) => self
                .prepare_existing(inumber, flags)
                .map(|offset| (inumber, offset)),
            Ok(None) if creation.is_some() => self.create_file(name).map(|inumber| (inumber, 0)),
            Ok(None) => Err(FsError::NotFound(path.to_owned())),
            Err(err) => Err(err),
        };
        drop(creation);

        let (inumber, offset) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                // a shutdown that reset the tables under us takes precedence
                self.open_files.ensure_accepting()?;
                return Err(err);
            }
        };

        self.open_files.acquire(inumber, offset)
    }

    /// Closes a handle. Its number may be handed out again by a later [`Self::open`].
    pub fn close(&self, handle: FileHandle) -> Result<()> {
        self.open_files.release(handle)
    }

    /// Writes `data` at the handle's offset and advances it.
    ///
    /// Returns the number of bytes written, which is less than `data.len()` when the file
    /// reaches [`MAX_FILE_SIZE`] or the block store runs out of blocks. Bytes written before
    /// that point stay written.
    pub fn write(&self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        let mut file = self.open_files.get(handle)?;
        let inumber = file.inumber;
        let mut inode = self.inodes.write(inumber)?;

        debug!(
            "[inode #{inumber}] writing through handle #{} (offset = {}; data.len() = {})",
            file.handle(),
            file.offset,
            data.len()
        );

        let written = self.write_at(&mut inode, file.offset, data)?;
        file.offset += written;

        debug!("[inode #{inumber}] wrote {written} bytes");
        Ok(written)
    }

    /// Reads up to `max_len` bytes from the handle's offset and advances it.
    ///
    /// Returns an empty vector at the end of the file.
    pub fn read(&self, handle: FileHandle, max_len: usize) -> Result<Vec<u8>> {
        let mut file = self.open_files.get(handle)?;
        let inumber = file.inumber;
        let inode = self.inodes.read(inumber)?;

        debug!(
            "[inode #{inumber}] reading through handle #{} (offset = {}; max_len = {max_len})",
            file.handle(),
            file.offset
        );

        let offset = file.offset;
        let end = offset.saturating_add(max_len).min(inode.size);

        let mut data = Vec::with_capacity(end.saturating_sub(offset));
        let mut position = offset;
        while position < end {
            let start_offset = position % BLOCK_SIZE;
            let block_start = position - start_offset;
            let end_position = (block_start + BLOCK_SIZE).min(end);

            let block_number =
                inode_table::data_block_at(&self.blocks, &inode, position / BLOCK_SIZE)?;
            let block = self.blocks.read(block_number)?;
            data.extend_from_slice(&block[start_offset..end_position - block_start]);

            position = end_position;
        }

        file.offset += data.len();
        Ok(data)
    }

    /// Resolves `path` to an inode number.
    pub fn lookup(&self, path: &str) -> Result<InodeNumber> {
        let name = file_name(path)?;

        directory::lookup(&self.inodes, &self.blocks, ROOT_INODE, name)?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))
    }

    /// The names and inode numbers in the root directory.
    pub fn read_directory(&self) -> Result<Vec<(String, InodeNumber)>> {
        Ok(directory::entries(&self.inodes, &self.blocks, ROOT_INODE)?
            .into_iter()
            .filter_map(|entry| Some((entry.name.to_string(), entry.inumber()?)))
            .collect())
    }

    /// Copies the contents of the file at `source_path` into a file at `dest` on the host,
    /// creating or truncating it. Returns the number of bytes copied.
    pub fn copy_to_external_fs(&self, source_path: &str, dest: &Path) -> Result<usize> {
        let handle = self.open(source_path, BitFlags::empty())?;

        let copied = self.copy_out(handle, dest);
        let closed = self.close(handle);

        let copied = copied?;
        closed?;

        info!("copied {copied} bytes from {source_path:?} to {}", dest.display());
        Ok(copied)
    }

    /// The number of open file handles.
    pub fn open_count(&self) -> Result<usize> {
        self.open_files.open_count()
    }

    /// The number of data blocks not owned by any inode.
    pub fn free_block_count(&self) -> Result<usize> {
        self.blocks.free_count()
    }

    /// Checks the filesystem for consistency.
    ///
    /// The result is only meaningful while no other thread is changing the filesystem.
    pub fn check(&self) -> Result<()> {
        {
            let root = self.inodes.read(ROOT_INODE)?;
            if !root.is_directory() {
                return Err(FsError::Inconsistent(
                    "root inode does not represent a directory".into(),
                ));
            }

            let root_blocks = inode_table::allocated_blocks(&self.blocks, &root)?;
            if root_blocks.len() != 1 || root.direct[0].is_none() || root.indirect.is_some() {
                return Err(FsError::Inconsistent(
                    "root directory does not own exactly one block".into(),
                ));
            }
        }

        let mut owners: HashMap<BlockNumber, InodeNumber> = HashMap::new();

        for inumber in self.inodes.taken()? {
            let inode = self.inodes.read(inumber)?;

            if inode.size > MAX_FILE_SIZE {
                return Err(FsError::Inconsistent(format!(
                    "size of inode {inumber} is greater than the maximum file size"
                )));
            }

            let mut owned = inode_table::allocated_blocks(&self.blocks, &inode)?;
            if owned.len() < inode.block_count() {
                return Err(FsError::Inconsistent(format!(
                    "inode {inumber} doesn't have enough blocks to store {} bytes",
                    inode.size
                )));
            }
            owned.extend(inode.indirect);

            for block_number in owned {
                if !self.blocks.is_allocated(block_number)? {
                    return Err(FsError::Inconsistent(format!(
                        "block {block_number} of inode {inumber} is marked free"
                    )));
                }

                if let Some(owner) = owners.insert(block_number, inumber) {
                    return Err(FsError::Inconsistent(format!(
                        "block {block_number} is owned by inodes {owner} and {inumber}"
                    )));
                }
            }
        }

        let mut names = HashSet::new();
        for entry in directory::entries(&self.inodes, &self.blocks, ROOT_INODE)? {
            let Some(inumber) = entry.inumber() else {
                return Err(FsError::Inconsistent(format!(
                    "invalid inode number in directory entry: {}",
                    entry.inumber
                )));
            };

            if !self.inodes.is_taken(inumber)? {
                return Err(FsError::Inconsistent(format!(
                    "entry {} points at free inode {inumber}",
                    entry.name
                )));
            }

            if !names.insert(entry.name.clone()) {
                return Err(FsError::Inconsistent(format!(
                    "directory contains duplicate entry: {}",
                    entry.name
                )));
            }
        }

        Ok(())
    }

    /// Stops accepting opens, waits for every open handle to be closed, then wipes all files.
    pub fn destroy_after_all_closed(&self) -> Result<()> {
        info!("shutdown requested, waiting for open files to be closed");

        self.open_files.stop_accepting()?;
        self.open_files.wait_until_all_closed()?;

        // no create may be halfway through while the tables are wiped
        let _creation = self.creation.lock()?;
        self.inodes.reset()?;
        self.blocks.reset()?;

        info!("filesystem destroyed");
        Ok(())
    }

    /// Tears the filesystem down immediately.
    pub fn destroy(self) {
        info!("filesystem destroyed");
    }

    /// Applies the truncate and append flags to an existing file and returns the initial
    /// offset for its new handle.
    fn prepare_existing(&self, inumber: InodeNumber, flags: BitFlags<OpenFlag>) -> Result<usize> {
        if flags.contains(OpenFlag::Truncate) {
            let mut inode = self.inodes.write(inumber)?;
            if inode.is_directory() {
                return Err(FsError::IsADirectory(inumber));
            }

            inode_table::free_all_blocks(&self.blocks, &mut inode)?;
            inode.size = 0;

            debug!("[inode #{inumber}] truncated");
            return Ok(0);
        }

        let inode = self.inodes.read(inumber)?;
        if inode.is_directory() {
            return Err(FsError::IsADirectory(inumber));
        }

        Ok(if flags.contains(OpenFlag::Append) {
            inode.size
        } else {
            0
        })
    }

    /// Creates a file inode and links it into the root directory. Must be called with the
    /// creation lock held.
    fn create_file(&self, name: &str) -> Result<InodeNumber> {
        let inumber = self.inodes.create(&self.blocks, InodeType::File)?;

        let inserted = {
            let mut root = self.inodes.write(ROOT_INODE)?;
            directory::insert(&self.inodes, &self.blocks, ROOT_INODE, &mut root, inumber, name)
        };

        if let Err(err) = inserted {
            warn!("[inode #{inumber}] could not link {name:?} into the root directory: {err}");
            self.inodes.delete(&self.blocks, inumber)?;

            return Err(err);
        }

        Ok(inumber)
    }

    /// Writes `data` into the inode starting at byte `offset`, allocating blocks as needed.
    /// Grows the size if the write ends past it.
    fn write_at(&self, inode: &mut Inode, offset: usize, data: &[u8]) -> Result<usize> {
        let end = offset.saturating_add(data.len()).min(MAX_FILE_SIZE);
        if offset >= end {
            return Ok(0);
        }

        // a write past the end (another handle may have truncated the file) first gets
        // zeroed blocks for the gap
        for position in inode.block_count()..offset / BLOCK_SIZE {
            if self.block_for_write(inode, position)?.is_none() {
                return Ok(0);
            }
        }

        let mut position = offset;
        let mut written = 0;
        while position < end {
            let start_offset = position % BLOCK_SIZE;
            let block_start = position - start_offset;
            let end_position = (block_start + BLOCK_SIZE).min(end);

            let Some(block_number) = self.block_for_write(inode, position / BLOCK_SIZE)? else {
                warn!("out of space after writing {written} of {} bytes", data.len());
                break;
            };

            let mut block = self.blocks.write(block_number)?;
            block[start_offset..end_position - block_start]
                .copy_from_slice(&data[position - offset..end_position - offset]);

            written += end_position - position;
            position = end_position;
        }

        inode.size = inode.size.max(offset + written);
        Ok(written)
    }

    /// Returns the data block at logical `position`, attaching a fresh one if the slot is
    /// empty. `None` means there is no room for another block.
    fn block_for_write(&self, inode: &mut Inode, position: usize) -> Result<Option<BlockNumber>> {
        if position >= MAX_FILE_BLOCKS {
            return Ok(None);
        }

        match inode_table::data_block_at(&self.blocks, inode, position) {
            Ok(block_number) => return Ok(Some(block_number)),
            Err(FsError::NotAllocated(_)) => {}
            Err(err) => return Err(err),
        }

        let block_number = match self.blocks.alloc() {
            Ok(block_number) => block_number,
            Err(FsError::Exhausted(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        match inode_table::attach_block_at(&self.blocks, inode, position, block_number) {
            Ok(()) => Ok(Some(block_number)),
            Err(FsError::AllocationFailure(reason)) => {
                warn!("allocation failed while {reason}");
                self.blocks.free(block_number)?;
                Ok(None)
            }
            Err(err) => {
                self.blocks.free(block_number)?;
                Err(err)
            }
        }
    }

    fn copy_out(&self, handle: FileHandle, dest: &Path) -> Result<usize> {
        let mut dest_file = File::create(dest)?;

        let mut copied = 0;
        loop {
            let chunk = self.read(handle, BLOCK_SIZE)?;
            if chunk.is_empty() {
                break;
            }

            dest_file.write_all(&chunk)?;
            copied += chunk.len();
        }

        Ok(copied)
    }
}

/// Extracts the file name from an absolute path like `/name`.
fn file_name(path: &str) -> Result<&str> {
    let invalid = || FsError::InvalidPath(path.to_owned());

    let name = path.strip_prefix('/').ok_or_else(invalid)?;
    if name.contains('/') {
        return Err(invalid());
    }

    DirectoryEntryName::try_from(name).map_err(|_| invalid())?;

    Ok(name)
}
