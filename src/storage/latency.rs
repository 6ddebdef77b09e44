use std::hint;
use std::thread;
use std::time::Duration;

use crate::layout::block::BLOCK_SIZE;

/// The number of allocation-state entries that fit in a block, each entry taking four bytes.
pub const BITMAP_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Hook invoked on every access to filesystem state, emulating the cost of reaching
/// secondary storage.
pub trait AccessDelay: Send + Sync {
    fn delay(&self);

    /// Charges the cost of scanning the first `scanned` entries of an allocation bitmap,
    /// one access per block's worth of entries.
    fn delay_scan(&self, scanned: usize) {
        for _ in 0..scanned.div_ceil(BITMAP_ENTRIES_PER_BLOCK).max(1) {
            self.delay();
        }
    }
}

/// Accesses cost nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl AccessDelay for NoDelay {
    fn delay(&self) {}
}

/// Busy-waits for a fixed number of iterations.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    iterations: u32,
}

impl SpinDelay {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }
}

impl AccessDelay for SpinDelay {
    fn delay(&self) {
        for i in 0..self.iterations {
            // keeps the optimizer from removing the loop
            hint::black_box(i);
        }
    }
}

/// Puts the calling thread to sleep.
#[derive(Debug, Clone, Copy)]
pub struct SleepDelay {
    duration: Duration,
}

impl SleepDelay {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl AccessDelay for SleepDelay {
    fn delay(&self) {
        thread::sleep(self.duration);
    }
}
