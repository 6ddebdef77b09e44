use std::sync::Arc;
use std::time::Duration;

use crate::storage::{AccessDelay, NoDelay, SleepDelay, SpinDelay};

/// Simulated cost of touching filesystem metadata or data blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Latency {
    /// Accesses are free.
    None,
    /// Busy-loop for the given number of iterations on every access.
    Spin { iterations: u32 },
    /// Sleep on every access.
    Sleep(Duration),
}

impl Latency {
    pub fn into_delay(self) -> Arc<dyn AccessDelay> {
        match self {
            Latency::None => Arc::new(NoDelay),
            Latency::Spin { iterations } => Arc::new(SpinDelay::new(iterations)),
            Latency::Sleep(duration) => Arc::new(SleepDelay::new(duration)),
        }
    }
}

/// Sizes of the filesystem tables, fixed at initialisation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsConfig {
    /// The number of slots in the inode table, including the root directory.
    pub inode_table_size: usize,
    /// The number of data blocks in the block store.
    pub data_blocks: usize,
    /// The number of files that may be open at once.
    pub max_open_files: usize,
    pub latency: Latency,
}

impl FsConfig {
    pub const DEFAULT_INODE_TABLE_SIZE: usize = 50;
    pub const DEFAULT_DATA_BLOCKS: usize = 1024;
    pub const DEFAULT_MAX_OPEN_FILES: usize = 20;
    pub const DEFAULT_DELAY_ITERATIONS: u32 = 5000;

    /// The default table sizes with latency simulation turned off.
    #[must_use]
    pub fn without_latency() -> Self {
        Self {
            latency: Latency::None,
            ..Self::default()
        }
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            inode_table_size: Self::DEFAULT_INODE_TABLE_SIZE,
            data_blocks: Self::DEFAULT_DATA_BLOCKS,
            max_open_files: Self::DEFAULT_MAX_OPEN_FILES,
            latency: Latency::Spin {
                iterations: Self::DEFAULT_DELAY_ITERATIONS,
            },
        }
    }
}
