//! Buffer pool: in-memory page cache with second-chance clock eviction and
//! a background flusher thread.

mod frame;
mod pool;

pub use pool::{BufferPool, FrameReadGuard, FrameWriteGuard, PageGuard, PoolOverflow};
