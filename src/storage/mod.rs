/// The data block store and its allocation bitmap.
mod block_store;
/// Simulated storage access latency.
mod latency;

pub use block_store::*;
pub use latency::*;
