//! An in-memory filesystem with a single flat root directory, safe to use from many threads
//! at once.
//!
//! See [`Tfs`] for the operations and the order in which locks are taken.

pub mod config;
pub mod directory;
pub mod error;
pub mod inode_table;
pub mod layout;
pub mod open_file_table;
pub mod storage;
pub mod tfs;

pub use config::{FsConfig, Latency};
pub use error::{FsError, Resource, Result};
pub use tfs::{BlockNumber, FileHandle, InodeNumber, OpenFlag, Tfs};
