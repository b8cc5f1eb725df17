//! B+ tree core: a thread-safe ordered map over the buffer manager, with
//! split-on-the-way-down insertion and borrow/merge-on-the-way-up deletion.

use crate::buffer::{BufferPool, PageGuard, PoolOverflow};
use crate::error::{Result, StorageError};
use crate::page::{BPlusPageHeader, InternalPage, LeafPage};
use crate::types::{PageId, PageType, INDEX_ROOT_PAGE_ID_KEY};
use crate::wal::LogManager;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// The ordered map. All key comparisons are byte-lexicographic.
pub struct BTree {
    pool: Arc<BufferPool>,
    log: Arc<LogManager>,
    next_page_id: Arc<Mutex<i32>>,
    root_page_id: RwLock<PageId>,
}

impl BTree {
    pub fn new(pool: Arc<BufferPool>, log: Arc<LogManager>, next_page_id: Arc<Mutex<i32>>) -> Self {
        Self {
            pool,
            log,
            next_page_id,
            root_page_id: RwLock::new(PageId::INVALID),
        }
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Set the root from an existing page id, or allocate a fresh empty
    /// leaf and log it as the new root if none is given.
    pub fn init(&self, existing_root: Option<PageId>) -> Result<()> {
        if let Some(id) = existing_root {
            if id.is_valid() {
                *self.root_page_id.write() = id;
                return Ok(());
            }
        }

        let guard = self.pool.allocate_new(&self.next_page_id)?;
        let root_id = guard.page_id();
        let leaf = LeafPage::new(root_id);
        self.persist_leaf(&guard, &leaf)?;
        drop(guard);

        self.log
            .log(INDEX_ROOT_PAGE_ID_KEY, Some(root_id.value().to_string().into_bytes()))?;
        *self.root_page_id.write() = root_id;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut current = *self.root_page_id.read();
        loop {
            let guard = self.pool.get(current)?;
            match self.read_header(&guard)?.page_type {
                PageType::BPlusLeaf => {
                    let leaf = self.decode_leaf(&guard)?;
                    return match leaf.search(key) {
                        Some(i) => Ok(leaf.values[i].clone()),
                        None => Err(StorageError::NotFound),
                    };
                }
                PageType::BPlusInternal => {
                    let internal = self.decode_internal(&guard)?;
                    current = internal.find_child(key);
                }
                _ => return Err(StorageError::internal("unexpected page type in tree descent")),
            }
        }
    }

    /// Preemptive split on the way down: before descending into any full
    /// child, split it so the (already-latched) parent has room.
    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.split_root_if_full()?;

        let mut current = *self.root_page_id.read();
        loop {
            let guard = self.pool.get(current)?;
            match self.read_header(&guard)?.page_type {
                PageType::BPlusLeaf => {
                    let mut leaf = self.decode_leaf(&guard)?;
                    leaf.insert(key, value);
                    self.persist_leaf(&guard, &leaf)?;
                    return Ok(());
                }
                PageType::BPlusInternal => {
                    let mut internal = self.decode_internal(&guard)?;
                    let child_id = internal.find_child(&key);
                    current = self.split_child_if_full(&guard, &mut internal, child_id, &key)?;
                }
                _ => return Err(StorageError::internal("unexpected page type in tree descent")),
            }
        }
    }

    /// Descend under exclusive access, delete at the leaf, then rebalance
    /// with a sibling on the way back up if the child underflowed.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let root = *self.root_page_id.read();
        self.delete_rec(root, key)
    }

    fn delete_rec(&self, page_id: PageId, key: &[u8]) -> Result<()> {
        let guard = self.pool.get(page_id)?;
        match self.read_header(&guard)?.page_type {
            PageType::BPlusLeaf => {
                let mut leaf = self.decode_leaf(&guard)?;
                let idx = leaf.search(key).ok_or(StorageError::NotFound)?;
                leaf.delete_at(idx);
                self.persist_leaf(&guard, &leaf)?;
                Ok(())
            }
            PageType::BPlusInternal => {
                let mut internal = self.decode_internal(&guard)?;
                let child_id = internal.find_child(key);
                self.delete_rec(child_id, key)?;
                self.rebalance_child_if_needed(&guard, &mut internal, child_id)?;
                Ok(())
            }
            _ => Err(StorageError::internal("unexpected page type in tree descent")),
        }
    }

    // -- root split -----------------------------------------------------

    fn split_root_if_full(&self) -> Result<()> {
        let root_id = *self.root_page_id.read();
        let root_guard = self.pool.get(root_id)?;
        let header = self.read_header(&root_guard)?;

        let is_full = match header.page_type {
            PageType::BPlusLeaf => self.decode_leaf(&root_guard)?.is_full(),
            PageType::BPlusInternal => self.decode_internal(&root_guard)?.is_full(),
            _ => return Err(StorageError::internal("unexpected root page type")),
        };
        if !is_full {
            return Ok(());
        }

        let new_root_guard = self.pool.allocate_new(&self.next_page_id)?;
        let new_root_id = new_root_guard.page_id();
        let mut new_root = InternalPage::with_single_child(new_root_id, root_id);

        match header.page_type {
            PageType::BPlusLeaf => {
                let mut old = self.decode_leaf(&root_guard)?;
                old.header.parent_page_id = new_root_id;
                let sibling_guard = self.pool.allocate_new(&self.next_page_id)?;
                let (mut right, separator) = old.split();
                right.header.page_id = sibling_guard.page_id();
                right.header.parent_page_id = new_root_id;
                old.next_leaf = sibling_guard.page_id();
                self.persist_leaf(&root_guard, &old)?;
                self.persist_leaf(&sibling_guard, &right)?;
                new_root.insert_at(0, separator, sibling_guard.page_id());
            }
            PageType::BPlusInternal => {
                let mut old = self.decode_internal(&root_guard)?;
                old.header.parent_page_id = new_root_id;
                let sibling_guard = self.pool.allocate_new(&self.next_page_id)?;
                let (mut right, separator) = old.split();
                right.header.page_id = sibling_guard.page_id();
                right.header.parent_page_id = new_root_id;
                self.persist_internal(&root_guard, &old)?;
                self.persist_internal(&sibling_guard, &right)?;
                new_root.insert_at(0, separator, sibling_guard.page_id());
            }
            _ => unreachable!(),
        }

        self.persist_internal(&new_root_guard, &new_root)?;
        self.log
            .log(INDEX_ROOT_PAGE_ID_KEY, Some(new_root_id.value().to_string().into_bytes()))?;
        *self.root_page_id.write() = new_root_id;
        Ok(())
    }

    // -- insert-side child split -----------------------------------------

    /// If the child at `child_id` is full, split it through `parent` and
    /// return the id to descend into; otherwise return `child_id` as-is.
    fn split_child_if_full(
        &self,
        parent_guard: &PageGuard,
        parent: &mut InternalPage,
        child_id: PageId,
        key: &[u8],
    ) -> Result<PageId> {
        let child_guard = self.pool.get(child_id)?;
        let parent_id = parent.page_id();

        match self.read_header(&child_guard)?.page_type {
            PageType::BPlusLeaf => {
                let mut left = self.decode_leaf(&child_guard)?;
                if !left.is_full() {
                    return Ok(child_id);
                }
                let sibling_guard = self.pool.allocate_new(&self.next_page_id)?;
                let (mut right, separator) = left.split();
                right.header.page_id = sibling_guard.page_id();
                right.header.parent_page_id = parent_id;
                left.next_leaf = sibling_guard.page_id();
                self.persist_leaf(&child_guard, &left)?;
                self.persist_leaf(&sibling_guard, &right)?;

                let idx = parent
                    .child_index(child_id)
                    .ok_or_else(|| StorageError::internal("child not found in parent during split"))?;
                parent.insert_at(idx, separator.clone(), sibling_guard.page_id());
                self.persist_internal(parent_guard, parent)?;

                Ok(if key <= separator.as_slice() {
                    child_id
                } else {
                    sibling_guard.page_id()
                })
            }
            PageType::BPlusInternal => {
                let mut left = self.decode_internal(&child_guard)?;
                if !left.is_full() {
                    return Ok(child_id);
                }
                let sibling_guard = self.pool.allocate_new(&self.next_page_id)?;
                let (mut right, separator) = left.split();
                right.header.page_id = sibling_guard.page_id();
                right.header.parent_page_id = parent_id;
                left.header.parent_page_id = parent_id;
                self.persist_internal(&child_guard, &left)?;
                self.persist_internal(&sibling_guard, &right)?;

                let idx = parent
                    .child_index(child_id)
                    .ok_or_else(|| StorageError::internal("child not found in parent during split"))?;
                parent.insert_at(idx, separator.clone(), sibling_guard.page_id());
                self.persist_internal(parent_guard, parent)?;

                Ok(if key <= separator.as_slice() {
                    child_id
                } else {
                    sibling_guard.page_id()
                })
            }
            _ => Err(StorageError::internal("unexpected child page type during split")),
        }
    }

    // -- delete-side rebalancing ------------------------------------------

    fn rebalance_child_if_needed(
        &self,
        parent_guard: &PageGuard,
        parent: &mut InternalPage,
        child_id: PageId,
    ) -> Result<()> {
        let child_guard = self.pool.get(child_id)?;
        match self.read_header(&child_guard)?.page_type {
            PageType::BPlusLeaf => {
                let mut child = self.decode_leaf(&child_guard)?;
                if !child.is_underflow() {
                    return Ok(());
                }
                let idx = parent
                    .child_index(child_id)
                    .ok_or_else(|| StorageError::internal("child not found in parent during rebalance"))?;

                if idx > 0 {
                    let left_id = parent.children[idx - 1];
                    let left_guard = self.pool.get(left_id)?;
                    let mut left = self.decode_leaf(&left_guard)?;
                    if left.has_spare_capacity() {
                        let new_sep = child.borrow_from_left(&mut left);
                        self.persist_leaf(&left_guard, &left)?;
                        self.persist_leaf(&child_guard, &child)?;
                        parent.keys[idx - 1] = new_sep;
                    } else {
                        left.merge_with_right(child);
                        self.persist_leaf(&left_guard, &left)?;
                        parent.remove_separator_and_right_child(idx - 1);
                    }
                } else {
                    let right_id = parent.children[idx + 1];
                    let right_guard = self.pool.get(right_id)?;
                    let mut right = self.decode_leaf(&right_guard)?;
                    if right.has_spare_capacity() {
                        let new_sep = child.borrow_from_right(&mut right);
                        self.persist_leaf(&child_guard, &child)?;
                        self.persist_leaf(&right_guard, &right)?;
                        parent.keys[idx] = new_sep;
                    } else {
                        child.merge_with_right(right);
                        self.persist_leaf(&child_guard, &child)?;
                        parent.remove_separator_and_right_child(idx);
                    }
                }
                self.persist_internal(parent_guard, parent)
            }
            PageType::BPlusInternal => {
                let mut child = self.decode_internal(&child_guard)?;
                if !child.is_underflow() {
                    return Ok(());
                }
                let idx = parent
                    .child_index(child_id)
                    .ok_or_else(|| StorageError::internal("child not found in parent during rebalance"))?;

                if idx > 0 {
                    let left_id = parent.children[idx - 1];
                    let left_guard = self.pool.get(left_id)?;
                    let mut left = self.decode_internal(&left_guard)?;
                    if left.has_spare_capacity() {
                        let separator = parent.keys[idx - 1].clone();
                        let new_sep = child.borrow_from_left(&mut left, separator);
                        self.persist_internal(&left_guard, &left)?;
                        self.persist_internal(&child_guard, &child)?;
                        parent.keys[idx - 1] = new_sep;
                    } else {
                        let separator = parent.keys[idx - 1].clone();
                        left.merge_with_right(separator, child);
                        self.persist_internal(&left_guard, &left)?;
                        parent.remove_separator_and_right_child(idx - 1);
                    }
                } else {
                    let right_id = parent.children[idx + 1];
                    let right_guard = self.pool.get(right_id)?;
                    let mut right = self.decode_internal(&right_guard)?;
                    if right.has_spare_capacity() {
                        let separator = parent.keys[idx].clone();
                        let new_sep = child.borrow_from_right(&mut right, separator);
                        self.persist_internal(&child_guard, &child)?;
                        self.persist_internal(&right_guard, &right)?;
                        parent.keys[idx] = new_sep;
                    } else {
                        let separator = parent.keys[idx].clone();
                        child.merge_with_right(separator, right);
                        self.persist_internal(&child_guard, &child)?;
                        parent.remove_separator_and_right_child(idx);
                    }
                }
                self.persist_internal(parent_guard, parent)
            }
            _ => Err(StorageError::internal("unexpected child page type during rebalance")),
        }
    }

    // -- page (de)serialization helpers -----------------------------------

    fn read_header(&self, guard: &PageGuard) -> Result<BPlusPageHeader> {
        let r = guard.read();
        BPlusPageHeader::read(&r).ok_or_else(|| StorageError::invalid_db("tree page header truncated"))
    }

    fn decode_leaf(&self, guard: &PageGuard) -> Result<LeafPage> {
        let overflow = PoolOverflow {
            pool: &self.pool,
            next_page_id: &self.next_page_id,
        };
        let r = guard.read();
        LeafPage::deserialize(&r, &overflow)
    }

    fn decode_internal(&self, guard: &PageGuard) -> Result<InternalPage> {
        let overflow = PoolOverflow {
            pool: &self.pool,
            next_page_id: &self.next_page_id,
        };
        let r = guard.read();
        InternalPage::deserialize(&r, &overflow)
    }

    fn persist_leaf(&self, guard: &PageGuard, leaf: &LeafPage) -> Result<()> {
        let mut overflow = PoolOverflow {
            pool: &self.pool,
            next_page_id: &self.next_page_id,
        };
        let bytes = leaf.serialize(&mut overflow)?;
        guard.write().as_bytes_mut().copy_from_slice(&bytes);
        Ok(())
    }

    fn persist_internal(&self, guard: &PageGuard, internal: &InternalPage) -> Result<()> {
        let mut overflow = PoolOverflow {
            pool: &self.pool,
            next_page_id: &self.next_page_id,
        };
        let bytes = internal.serialize(&mut overflow)?;
        guard.write().as_bytes_mut().copy_from_slice(&bytes);
        Ok(())
    }
}
