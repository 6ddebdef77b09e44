use std::fmt;
use std::sync::PoisonError;

use thiserror::Error;

use crate::tfs::{BlockNumber, FileHandle, InodeNumber};

/// A fixed-size table that can run out of free slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inode,
    Block,
    OpenFile,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Inode => "inodes",
            Resource::Block => "data blocks",
            Resource::OpenFile => "open file entries",
        };

        write!(f, "{name}")
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FsError {
    #[error("no more free {0}")]
    Exhausted(Resource),
    #[error("invalid inode number: {0}")]
    InvalidInode(InodeNumber),
    #[error("invalid block number: {0}")]
    InvalidBlock(BlockNumber),
    #[error("invalid file handle: {0}")]
    InvalidHandle(FileHandle),
    #[error("file handle {0} is not open")]
    AlreadyClosed(FileHandle),
    #[error("invalid arguments: {0}")]
    InvalidArgs(&'static str),
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("no such file: {0:?}")]
    NotFound(String),
    #[error("inode {0} is a directory")]
    IsADirectory(InodeNumber),
    #[error("inode {0} is not a directory")]
    NotADirectory(InodeNumber),
    #[error("entry already exists: {0:?}")]
    AlreadyExists(String),
    #[error("block slot {0} of the inode is already occupied")]
    SlotOccupied(usize),
    #[error("block slot {0} of the inode is not allocated")]
    NotAllocated(usize),
    #[error("directory {0} has no free entries")]
    DirectoryFull(InodeNumber),
    #[error("allocation failed while {0}")]
    AllocationFailure(&'static str),
    #[error("filesystem is inconsistent: {0}")]
    Inconsistent(String),
    #[error("filesystem is shutting down")]
    ShuttingDown,
    #[error("a lock was poisoned by a panicking thread")]
    LockPoisoned,
    #[error("encoding directory entry")]
    Encoding(#[from] bincode::Error),
    #[error("host filesystem error")]
    Io(#[from] std::io::Error),
}

impl<T> From<PoisonError<T>> for FsError {
    fn from(_: PoisonError<T>) -> Self {
        FsError::LockPoisoned
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
