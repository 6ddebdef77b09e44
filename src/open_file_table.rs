use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

use bitvec::vec::BitVec;
use log::debug;

use crate::error::{FsError, Resource, Result};
use crate::tfs::{FileHandle, InodeNumber};

/// The position state behind an open file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFileEntry {
    pub inumber: InodeNumber,
    pub offset: usize,
}

struct TableState {
    /// Tracks the allocation status of entries.
    /// A value of `true` represents "taken".
    taken: BitVec,
    /// Cleared once the filesystem starts shutting down.
    accepting: bool,
}

/// A fixed array of open file entries.
///
/// Mirrors the inode table's two tiers: a table-wide lock for the allocation bitmap and a
/// lock per entry for its offset.
pub struct OpenFileTable {
    entries: Vec<Mutex<Option<OpenFileEntry>>>,
    state: Mutex<TableState>,
    /// Signalled whenever the last open entry is released.
    all_closed: Condvar,
}

/// Exclusive access to an open entry, held for as long as its offset is in use.
pub struct OpenFile<'a> {
    handle: FileHandle,
    entry: MutexGuard<'a, Option<OpenFileEntry>>,
}

impl OpenFile<'_> {
    pub fn handle(&self) -> FileHandle {
        self.handle
    }
}

impl Deref for OpenFile<'_> {
    type Target = OpenFileEntry;

    fn deref(&self) -> &Self::Target {
        self.entry
            .as_ref()
            .expect("OpenFile is only handed out for occupied entries")
    }
}

impl DerefMut for OpenFile<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.entry
            .as_mut()
            .expect("OpenFile is only handed out for occupied entries")
    }
}

impl OpenFileTable {
    pub fn new(max_open_files: usize) -> Self {
        Self {
            entries: (0..max_open_files).map(|_| Mutex::new(None)).collect(),
            state: Mutex::new(TableState {
                taken: BitVec::repeat(false, max_open_files),
                accepting: true,
            }),
            all_closed: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Claims the first free entry for `inumber`, starting at `offset`.
    pub fn acquire(&self, inumber: InodeNumber, offset: usize) -> Result<FileHandle> {
        let mut state = self.state.lock()?;
        if !state.accepting {
            return Err(FsError::ShuttingDown);
        }

        let handle = state
            .taken
            .first_zero()
            .ok_or(FsError::Exhausted(Resource::OpenFile))?;

        *self.entries[handle].lock()? = Some(OpenFileEntry { inumber, offset });
        state.taken.set(handle, true);

        debug!("[handle #{handle}] opened inode #{inumber} at offset {offset}");
        Ok(handle)
    }

    /// Releases an entry so its handle can be reused.
    ///
    /// Waits for any read or write currently going through the handle.
    pub fn release(&self, handle: FileHandle) -> Result<()> {
        self.check(handle)?;

        let mut state = self.state.lock()?;
        let mut entry = self.entries[handle].lock()?;

        if !state.taken[handle] {
            return Err(FsError::AlreadyClosed(handle));
        }

        *entry = None;
        state.taken.set(handle, false);

        if state.taken.not_any() {
            self.all_closed.notify_all();
        }

        debug!("[handle #{handle}] closed");
        Ok(())
    }

    /// Locks the entry behind `handle`.
    pub fn get(&self, handle: FileHandle) -> Result<OpenFile<'_>> {
        self.check(handle)?;

        let entry = self.entries[handle].lock()?;
        if entry.is_none() {
            return Err(FsError::AlreadyClosed(handle));
        }

        Ok(OpenFile { handle, entry })
    }

    /// The number of entries currently taken.
    pub fn open_count(&self) -> Result<usize> {
        Ok(self.state.lock()?.taken.count_ones())
    }

    /// Fails with [`FsError::ShuttingDown`] once [`Self::stop_accepting`] has been called.
    pub fn ensure_accepting(&self) -> Result<()> {
        if !self.state.lock()?.accepting {
            return Err(FsError::ShuttingDown);
        }

        Ok(())
    }

    /// Makes every later [`Self::acquire`] fail with [`FsError::ShuttingDown`].
    pub fn stop_accepting(&self) -> Result<()> {
        self.state.lock()?.accepting = false;

        Ok(())
    }

    /// Blocks until no entry is taken.
    pub fn wait_until_all_closed(&self) -> Result<()> {
        let state = self.state.lock()?;
        let _state = self
            .all_closed
            .wait_while(state, |state| state.taken.any())?;

        Ok(())
    }

    fn check(&self, handle: FileHandle) -> Result<()> {
        if handle >= self.entries.len() {
            return Err(FsError::InvalidHandle(handle));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_acquire_reuses_lowest_handle() {
        let table = OpenFileTable::new(3);

        assert_eq!(table.acquire(7, 0).unwrap(), 0);
        assert_eq!(table.acquire(7, 10).unwrap(), 1);
        table.release(0).unwrap();
        assert_eq!(table.acquire(8, 0).unwrap(), 0);

        let entry = table.get(1).unwrap();
        assert_eq!(*entry, OpenFileEntry { inumber: 7, offset: 10 });
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let table = OpenFileTable::new(2);
        table.acquire(1, 0).unwrap();
        table.acquire(1, 0).unwrap();

        assert!(matches!(
            table.acquire(1, 0),
            Err(FsError::Exhausted(Resource::OpenFile))
        ));
        assert_eq!(table.open_count().unwrap(), 2);

        table.release(1).unwrap();
        assert_eq!(table.acquire(2, 0).unwrap(), 1);
        assert!(table.acquire(2, 0).is_err());
    }

    #[test]
    fn test_release_errors() {
        let table = OpenFileTable::new(2);

        assert!(matches!(table.release(5), Err(FsError::InvalidHandle(5))));
        assert!(matches!(table.release(0), Err(FsError::AlreadyClosed(0))));

        let handle = table.acquire(1, 0).unwrap();
        table.release(handle).unwrap();
        assert!(matches!(
            table.release(handle),
            Err(FsError::AlreadyClosed(_))
        ));
        assert!(matches!(table.get(handle), Err(FsError::AlreadyClosed(_))));
    }

    #[test]
    fn test_offset_update_through_guard() {
        let table = OpenFileTable::new(1);
        let handle = table.acquire(1, 0).unwrap();

        table.get(handle).unwrap().offset += 5;
        assert_eq!(table.get(handle).unwrap().offset, 5);
    }

    #[test]
    fn test_guard_reports_its_handle() {
        let table = OpenFileTable::new(3);
        table.acquire(1, 0).unwrap();
        let handle = table.acquire(2, 0).unwrap();

        let file = table.get(handle).unwrap();
        assert_eq!(file.handle(), 1);
        assert_eq!(file.inumber, 2);
    }

    #[test]
    fn test_stop_accepting() {
        let table = OpenFileTable::new(2);
        let handle = table.acquire(1, 0).unwrap();
        table.stop_accepting().unwrap();

        assert!(matches!(table.acquire(1, 0), Err(FsError::ShuttingDown)));
        table.release(handle).unwrap();
    }

    #[test]
    fn test_wait_until_all_closed() {
        let table = Arc::new(OpenFileTable::new(2));
        let first = table.acquire(1, 0).unwrap();
        let second = table.acquire(2, 0).unwrap();

        let closer = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                table.release(first).unwrap();
                thread::sleep(Duration::from_millis(20));
                table.release(second).unwrap();
            })
        };

        table.wait_until_all_closed().unwrap();
        assert_eq!(table.open_count().unwrap(), 0);

        closer.join().unwrap();
    }
}
