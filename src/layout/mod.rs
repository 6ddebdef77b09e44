//! Constants and structures that define how the filesystem lays out its state in memory.

/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// Data blocks.
pub mod block;
/// Directory entries and entry names.
pub mod directory_entry;
/// Inodes.
pub mod inode;
