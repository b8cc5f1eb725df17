//! Buffer pool: a fixed-capacity cache of page frames with second-chance
//! clock eviction, grounded on the clock-bit / named-flusher-thread pattern
//! in `other_examples`' dotlanth buffer manager, adapted to this crate's
//! page and WAL types.

use crate::buffer::frame::{Frame, FrameBody};
use crate::error::{Result, StorageError};
use crate::page::{cell::OverflowReader, cell::OverflowWriter, PageBuf};
use crate::storage::{overflow, DiskManager};
use crate::types::{PageId, NEXT_PAGE_ID_KEY, PAGE_BUFFER_SIZE};
use crate::wal::LogManager;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

struct PoolState {
    page_to_frame: HashMap<PageId, usize>,
    eviction_start_idx: usize,
    overflow_pages: Vec<PageId>,
}

/// In-memory page cache mediating all access to the database file.
pub struct BufferPool {
    frames: Vec<Frame>,
    state: RwLock<PoolState>,
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
    flusher_running: Mutex<bool>,
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, log: Arc<LogManager>) -> Arc<Self> {
        Self::with_capacity(disk, log, PAGE_BUFFER_SIZE)
    }

    pub fn with_capacity(disk: Arc<DiskManager>, log: Arc<LogManager>, capacity: usize) -> Arc<Self> {
        let mut frames = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            frames.push(Frame::empty());
        }
        Arc::new(Self {
            frames,
            state: RwLock::new(PoolState {
                page_to_frame: HashMap::with_capacity(capacity),
                eviction_start_idx: 0,
                overflow_pages: Vec::new(),
            }),
            disk,
            log,
            flusher_running: Mutex::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Fetch and pin `page_id`, loading it from disk on a cache miss.
    pub fn get(self: &Arc<Self>, page_id: PageId) -> Result<PageGuard> {
        {
            let state = self.state.read();
            if let Some(&idx) = state.page_to_frame.get(&page_id) {
                let mut body = self.frames[idx].latch.write();
                body.pin_count += 1;
                body.second_chance = true;
                drop(body);
                return Ok(PageGuard {
                    frame_idx: idx,
                    page_id,
                    pool: Arc::clone(self),
                });
            }
        }

        let mut state = self.state.write();
        if let Some(&idx) = state.page_to_frame.get(&page_id) {
            let mut body = self.frames[idx].latch.write();
            body.pin_count += 1;
            body.second_chance = true;
            drop(body);
            return Ok(PageGuard {
                frame_idx: idx,
                page_id,
                pool: Arc::clone(self),
            });
        }

        let bytes = self.disk.read_page(page_id)?;
        let idx = self.find_victim_locked(&mut state)?;
        {
            let mut body = self.frames[idx].latch.write();
            body.page_id = page_id;
            body.bytes = bytes;
            body.dirty = false;
            body.pin_count = 1;
            body.second_chance = true;
        }
        state.page_to_frame.insert(page_id, idx);
        Ok(PageGuard {
            frame_idx: idx,
            page_id,
            pool: Arc::clone(self),
        })
    }

    /// Allocate a fresh page id, durably logging the new next-page-id
    /// counter before handing out a writable, zeroed frame for it.
    pub fn allocate_new(self: &Arc<Self>, next_page_id: &Mutex<i32>) -> Result<PageGuard> {
        let mut next = next_page_id.lock();
        let n = *next;
        self.log
            .log(NEXT_PAGE_ID_KEY, Some((n + 1).to_string().into_bytes()))?;
        *next = n + 1;
        drop(next);

        let page_id = PageId::new(n);
        let mut state = self.state.write();
        let idx = self.find_victim_locked(&mut state)?;
        {
            let mut body = self.frames[idx].latch.write();
            body.page_id = page_id;
            body.bytes = PageBuf::new();
            body.dirty = true;
            body.pin_count = 1;
            body.second_chance = true;
        }
        state.page_to_frame.insert(page_id, idx);
        Ok(PageGuard {
            frame_idx: idx,
            page_id,
            pool: Arc::clone(self),
        })
    }

    /// Find an overflow page with at least `needed` bytes of remaining
    /// capacity, allocating and initializing a new one if none qualifies.
    pub fn get_overflow_with_capacity(self: &Arc<Self>, needed: usize, next_page_id: &Mutex<i32>) -> Result<PageGuard> {
        let candidates = self.state.read().overflow_pages.clone();
        for page_id in candidates {
            let guard = self.get(page_id)?;
            if overflow::remaining_capacity(&guard.read()) >= needed + 4 {
                return Ok(guard);
            }
        }

        let guard = self.allocate_new(next_page_id)?;
        {
            let mut body = self.frames[guard.frame_idx].latch.write();
            body.bytes = PageBuf::from_bytes(&overflow::init_overflow_page(guard.page_id));
            body.dirty = true;
        }
        self.state.write().overflow_pages.push(guard.page_id);
        Ok(guard)
    }

    /// Write every unpinned dirty frame to disk.
    pub fn flush_dirty(&self) -> Result<()> {
        for frame in &self.frames {
            let mut body = frame.latch.write();
            if body.pin_count == 0 && body.dirty {
                self.disk.write_page(body.page_id, body.bytes.as_bytes(), true)?;
                body.dirty = false;
            }
        }
        Ok(())
    }

    fn find_victim_locked(&self, state: &mut RwLockWriteGuard<'_, PoolState>) -> Result<usize> {
        let capacity = self.frames.len();
        let start = state.eviction_start_idx;
        // Two full sweeps: the first clears any set second-chance bits
        // without evicting, the second is then guaranteed to find a victim
        // if one exists, since no frame's bit can survive past its second
        // visit.
        for step in 0..capacity * 2 {
            let idx = (start + step) % capacity;
            let mut body = self.frames[idx].latch.write();
            if body.pin_count != 0 {
                continue;
            }
            if body.second_chance {
                body.second_chance = false;
                continue;
            }
            if body.dirty {
                self.disk.write_page(body.page_id, body.bytes.as_bytes(), true)?;
            }
            if body.page_id != PageId::INVALID {
                state.page_to_frame.remove(&body.page_id);
            }
            state.eviction_start_idx = (idx + 1) % capacity;
            return Ok(idx);
        }
        Err(StorageError::ResourceExhausted)
    }

    /// Spawn the background flusher thread. Holds only a `Weak` reference
    /// so it exits cleanly once the owning `Db` (and this pool) is dropped.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> thread::JoinHandle<()> {
        *self.flusher_running.lock() = true;
        let weak: Weak<BufferPool> = Arc::downgrade(self);
        thread::Builder::new()
            .name("buffer-flusher".into())
            .spawn(move || loop {
                thread::sleep(interval);
                let Some(pool) = weak.upgrade() else {
                    debug!("buffer-flusher exiting: pool dropped");
                    return;
                };
                if let Err(e) = pool.flush_dirty() {
                    warn!("buffer-flusher: flush_dirty failed: {e}");
                }
            })
            .expect("failed to spawn buffer-flusher thread")
    }
}

/// RAII guard for a pinned frame. Provides shared or exclusive access to
/// its bytes; unpins on drop.
pub struct PageGuard {
    frame_idx: usize,
    page_id: PageId,
    pool: Arc<BufferPool>,
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> FrameReadGuard<'_> {
        FrameReadGuard {
            guard: self.pool.frames[self.frame_idx].latch.read(),
        }
    }

    pub fn write(&self) -> FrameWriteGuard<'_> {
        let mut guard = self.pool.frames[self.frame_idx].latch.write();
        guard.dirty = true;
        FrameWriteGuard { guard }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let mut body = self.pool.frames[self.frame_idx].latch.write();
        body.pin_count = body.pin_count.saturating_sub(1);
    }
}

pub struct FrameReadGuard<'a> {
    guard: RwLockReadGuard<'a, FrameBody>,
}

impl<'a> std::ops::Deref for FrameReadGuard<'a> {
    type Target = PageBuf;
    fn deref(&self) -> &Self::Target {
        &self.guard.bytes
    }
}

pub struct FrameWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, FrameBody>,
}

impl<'a> std::ops::Deref for FrameWriteGuard<'a> {
    type Target = PageBuf;
    fn deref(&self) -> &Self::Target {
        &self.guard.bytes
    }
}

impl<'a> std::ops::DerefMut for FrameWriteGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.bytes
    }
}

/// Adapts a buffer pool into the `OverflowReader`/`OverflowWriter` traits
/// string cells use to read and grow overflow chains.
pub struct PoolOverflow<'a> {
    pub pool: &'a Arc<BufferPool>,
    pub next_page_id: &'a Mutex<i32>,
}

impl<'a> OverflowReader for PoolOverflow<'a> {
    fn read_overflow(&self, page_id: PageId, offset: u32) -> Result<Vec<u8>> {
        let guard = self.pool.get(page_id)?;
        overflow::read_blob(&guard.read(), offset)
    }
}

impl<'a> OverflowWriter for PoolOverflow<'a> {
    fn write_overflow(&mut self, bytes: &[u8]) -> Result<(PageId, u32)> {
        let guard = self.pool.get_overflow_with_capacity(bytes.len(), self.next_page_id)?;
        let page_id = guard.page_id();
        let mut write = guard.write();
        let offset = overflow::append_blob(&mut write, bytes)?;
        Ok((page_id, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::LogManager;
    use tempfile::tempdir;

    fn setup(capacity: usize) -> (Arc<BufferPool>, Mutex<i32>) {
        let dir = tempdir().unwrap();
        let (disk, _root) = DiskManager::create_and_open(&dir.path().join("db")).unwrap();
        let disk = Arc::new(disk);
        let log = Arc::new(LogManager::new(Arc::clone(&disk)));
        let pool = BufferPool::with_capacity(disk, log, capacity);
        (pool, Mutex::new(1))
    }

    #[test]
    fn test_allocate_then_get_roundtrip() {
        let (pool, next) = setup(4);
        let guard = pool.allocate_new(&next).unwrap();
        let page_id = guard.page_id();
        {
            let mut w = guard.write();
            w[0] = 42;
        }
        drop(guard);

        let guard2 = pool.get(page_id).unwrap();
        assert_eq!(guard2.read()[0], 42);
    }

    #[test]
    fn test_eviction_fails_when_all_pinned() {
        let (pool, next) = setup(2);
        let g1 = pool.allocate_new(&next).unwrap();
        let g2 = pool.allocate_new(&next).unwrap();
        let result = pool.allocate_new(&next);
        assert!(matches!(result, Err(StorageError::ResourceExhausted)));
        drop(g1);
        drop(g2);
    }

    #[test]
    fn test_second_chance_eviction_spares_recently_accessed() {
        let (pool, next) = setup(2);
        let g1 = pool.allocate_new(&next).unwrap();
        let p1 = g1.page_id();
        drop(g1);
        let g2 = pool.allocate_new(&next).unwrap();
        drop(g2);

        // p1 has its second-chance bit set from allocation; touching it
        // again keeps it alive through one eviction sweep.
        let g1_again = pool.get(p1).unwrap();
        drop(g1_again);

        let g3 = pool.allocate_new(&next).unwrap();
        assert_ne!(g3.page_id(), p1);
    }

    #[test]
    fn test_flush_dirty_writes_to_disk() {
        let (pool, next) = setup(4);
        let guard = pool.allocate_new(&next).unwrap();
        let page_id = guard.page_id();
        {
            let mut w = guard.write();
            w[0] = 9;
        }
        drop(guard);

        pool.flush_dirty().unwrap();
        let read_back = pool.disk.read_page(page_id).unwrap();
        assert_eq!(read_back[0], 9);
    }

    /// Literal scenario: fill every frame, unpin a subset dirty, force
    /// eviction of those frames via further allocation, then re-fetch them
    /// and check the bytes round-trip and the dirty bit is clear.
    #[test]
    fn test_full_pool_dirty_eviction_round_trips() {
        let (pool, next) = setup(PAGE_BUFFER_SIZE);

        let mut page_ids = Vec::with_capacity(PAGE_BUFFER_SIZE);
        let mut expected: HashMap<PageId, u8> = HashMap::new();
        for i in 0..PAGE_BUFFER_SIZE {
            let guard = pool.allocate_new(&next).unwrap();
            let page_id = guard.page_id();
            let marker = (i % 256) as u8;
            {
                let mut w = guard.write();
                w[0] = marker;
            }
            expected.insert(page_id, marker);
            page_ids.push(page_id);
            // guard drops here, unpinning with dirty=true.
        }

        let evicted = &page_ids[..10];

        // Every frame is now unpinned and dirty; allocating more pages must
        // evict some of the first 10 (writing them to disk first) to make
        // room, since the pool has no free frames left otherwise.
        for _ in 0..10 {
            let guard = pool.allocate_new(&next).unwrap();
            let marker = 0xAAu8;
            {
                let mut w = guard.write();
                w[0] = marker;
            }
            expected.insert(guard.page_id(), marker);
        }

        for &page_id in evicted {
            let guard = pool.get(page_id).unwrap();
            let expected_marker = expected[&page_id];
            {
                let r = guard.read();
                assert_eq!(r[0], expected_marker, "page {page_id} did not round-trip through eviction");
            }
            let dirty = pool.frames[guard.frame_idx].latch.read().dirty;
            assert!(!dirty, "page {page_id} should be clean after eviction re-read");
        }
    }
}
