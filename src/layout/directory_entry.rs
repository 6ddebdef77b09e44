use std::fmt::{self, Debug};

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FsError, Result};
use crate::tfs::InodeNumber;

use super::block::BLOCK_SIZE;

/// The number of bytes reserved for a name inside a directory entry, including the
/// nul-terminator.
pub const MAX_FILE_NAME: usize = 40;

/// The maximum supported length of a file name, excluding the nul-terminator.
pub const MAX_NAME_LEN: usize = MAX_FILE_NAME - 1;

/// The number of bytes a directory entry occupies inside a directory block: the name
/// followed by a 32-bit inode number.
pub const DIRECTORY_ENTRY_SIZE: usize = MAX_FILE_NAME + 4;

/// The number of directory entries that fit in a block.
pub const DIRECTORY_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIRECTORY_ENTRY_SIZE;
const_assert!(DIRECTORY_ENTRIES_PER_BLOCK > 0);

/// Inode number stored in entries that are available for reuse.
pub const FREE_ENTRY_INUMBER: i32 = -1;

/// A free directory entry.
pub const FREE_DIRECTORY_ENTRY: DirectoryEntry = DirectoryEntry {
    name: DirectoryEntryName([0; MAX_FILE_NAME]),
    inumber: FREE_ENTRY_INUMBER,
};

/// A directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The name of the entry.
    pub name: DirectoryEntryName,
    /// The inode number, or [`FREE_ENTRY_INUMBER`].
    pub inumber: i32,
}

impl DirectoryEntry {
    /// Constructs an entry pointing at `inumber`.
    pub fn new(inumber: InodeNumber, name: DirectoryEntryName) -> Result<DirectoryEntry> {
        let inumber = i32::try_from(inumber).map_err(|_| FsError::InvalidInode(inumber))?;

        Ok(DirectoryEntry { name, inumber })
    }

    pub fn is_free(&self) -> bool {
        self.inumber == FREE_ENTRY_INUMBER
    }

    /// The inode number this entry points at, if the entry is in use.
    pub fn inumber(&self) -> Option<InodeNumber> {
        InodeNumber::try_from(self.inumber).ok()
    }
}

/// A nul-padded name, as used in [`DirectoryEntry`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DirectoryEntryName([u8; MAX_FILE_NAME]);

impl DirectoryEntryName {
    /// Builds a name from the first [`MAX_NAME_LEN`] bytes of `name`.
    ///
    /// Fails for empty names.
    pub fn truncated(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() {
            return Err(FsError::InvalidArgs("empty file name"));
        }

        let len = bytes.len().min(MAX_NAME_LEN);
        let mut converted = [0; MAX_FILE_NAME];
        converted[..len].copy_from_slice(&bytes[..len]);

        Ok(DirectoryEntryName(converted))
    }

    /// The name without its nul padding.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(MAX_FILE_NAME);
        &self.0[..len]
    }
}

impl TryFrom<&str> for DirectoryEntryName {
    type Error = FsError;

    fn try_from(value: &str) -> Result<Self> {
        if value.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidArgs("file name is too long"));
        }

        if value.as_bytes().contains(&0) {
            return Err(FsError::InvalidArgs("file name contains a nul byte"));
        }

        Self::truncated(value)
    }
}

impl Debug for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirectoryEntryName")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl fmt::Display for DirectoryEntryName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

// serde only derives array impls up to 32 elements, so the name is encoded by hand as a
// fixed-width tuple. bincode writes tuples without a length prefix.
impl Serialize for DirectoryEntryName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(MAX_FILE_NAME)?;
        for byte in &self.0 {
            tuple.serialize_element(byte)?;
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for DirectoryEntryName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NameVisitor;

        impl<'de> Visitor<'de> for NameVisitor {
            type Value = DirectoryEntryName;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{MAX_FILE_NAME} name bytes")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut bytes = [0; MAX_FILE_NAME];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }

                Ok(DirectoryEntryName(bytes))
            }
        }

        deserializer.deserialize_tuple(MAX_FILE_NAME, NameVisitor)
    }
}
