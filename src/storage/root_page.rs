//! Root metadata page: always page id 0.
//!
//! Layout (grounded on `original_source/src/storage/root_page.h`, minus the
//! `next_page_id` field — that counter is recovered from the WAL instead of
//! being persisted on this page):
//! ```text
//! Offset  Size  Description
//! 0       4     Page type tag (always Root)
//! 4       4     Page id (always 0)
//! 8       4     Index root page id
//! 12      ...   Zero-padded to PAGE_SIZE
//! ```

use crate::error::{Result, StorageError};
use crate::types::{PageId, PageType, PAGE_SIZE};

#[derive(Debug, Clone, Copy)]
pub struct RootPage {
    pub index_root_page_id: PageId,
}

impl RootPage {
    pub fn new(index_root_page_id: PageId) -> Self {
        Self { index_root_page_id }
    }

    pub fn to_bytes(&self) -> [u8; PAGE_SIZE] {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&(PageType::Root as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&PageId::ROOT.to_bytes());
        buf[8..12].copy_from_slice(&self.index_root_page_id.to_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(StorageError::invalid_db("root page truncated"));
        }
        let page_type = PageType::from_u32(u32::from_le_bytes(bytes[0..4].try_into().unwrap()))
            .ok_or_else(|| StorageError::invalid_db("unrecognized root page type tag"))?;
        if page_type != PageType::Root {
            return Err(StorageError::invalid_db("page 0 is not a root metadata page"));
        }
        let page_id = PageId::from_bytes(bytes[4..8].try_into().unwrap());
        if page_id != PageId::ROOT {
            return Err(StorageError::invalid_db("root page id field must be 0"));
        }
        let index_root_page_id = PageId::from_bytes(bytes[8..12].try_into().unwrap());
        Ok(Self { index_root_page_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let root = RootPage::new(PageId::new(7));
        let bytes = root.to_bytes();
        let restored = RootPage::from_bytes(&bytes).unwrap();
        assert_eq!(restored.index_root_page_id, PageId::new(7));
    }

    #[test]
    fn test_rejects_wrong_type() {
        let mut bytes = [0u8; PAGE_SIZE];
        bytes[0..4].copy_from_slice(&(PageType::BPlusLeaf as u32).to_le_bytes());
        assert!(RootPage::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_rejects_truncated() {
        assert!(RootPage::from_bytes(&[0u8; 8]).is_err());
    }
}
