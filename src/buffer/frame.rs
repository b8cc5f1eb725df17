//! A single cached page frame: its bytes, pin count, dirty bit, and
//! second-chance eviction bit, all guarded by one reader/writer latch.

use crate::page::PageBuf;
use crate::types::PageId;
use parking_lot::RwLock;

/// The guarded contents of a frame. Every field lives behind the frame's
/// latch so pin/dirty/second-chance updates never race page reads/writes.
pub struct FrameBody {
    pub page_id: PageId,
    pub bytes: PageBuf,
    pub dirty: bool,
    pub pin_count: u32,
    pub second_chance: bool,
}

impl FrameBody {
    fn empty() -> Self {
        Self {
            page_id: PageId::INVALID,
            bytes: PageBuf::new(),
            dirty: false,
            pin_count: 0,
            second_chance: false,
        }
    }
}

pub struct Frame {
    pub latch: RwLock<FrameBody>,
}

impl Frame {
    pub fn empty() -> Self {
        Self {
            latch: RwLock::new(FrameBody::empty()),
        }
    }
}
