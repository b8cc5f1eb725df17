//! Overflow pages: append-only storage for the tail bytes of string cells
//! that don't fit inline.
//!
//! Layout (12-byte header + data):
//! ```text
//! Offset  Size  Description
//! 0       4     Page type tag (always Overflow)
//! 4       4     Page id
//! 8       4     Bytes used, including this 12-byte header
//! 12      ...   Sequence of (4-byte length, bytes) blobs
//! ```
//! `offset` values stored in string-cell overflow pointers are relative to
//! the start of the data area (byte 12), not the start of the page.

use crate::error::{Result, StorageError};
use crate::types::{PageId, PageType, OVERFLOW_HEADER_SIZE, PAGE_SIZE};

/// Initialize a fresh, empty overflow page.
pub fn init_overflow_page(page_id: PageId) -> [u8; PAGE_SIZE] {
    let mut buf = [0u8; PAGE_SIZE];
    write_header(&mut buf, page_id, OVERFLOW_HEADER_SIZE as u32);
    buf
}

fn write_header(buf: &mut [u8], page_id: PageId, space_used: u32) {
    buf[0..4].copy_from_slice(&(PageType::Overflow as u32).to_le_bytes());
    buf[4..8].copy_from_slice(&page_id.to_bytes());
    buf[8..12].copy_from_slice(&space_used.to_le_bytes());
}

pub fn page_type(buf: &[u8]) -> Option<PageType> {
    PageType::from_u32(u32::from_le_bytes(buf[0..4].try_into().ok()?))
}

pub fn page_id(buf: &[u8]) -> PageId {
    PageId::from_bytes(buf[4..8].try_into().unwrap())
}

pub fn space_used(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[8..12].try_into().unwrap())
}

/// Bytes still free in the page, including room for one more length prefix.
pub fn remaining_capacity(buf: &[u8]) -> usize {
    PAGE_SIZE.saturating_sub(space_used(buf) as usize)
}

/// Append `data` to the page, returning its data-area offset.
pub fn append_blob(buf: &mut [u8], data: &[u8]) -> Result<u32> {
    let used = space_used(buf) as usize;
    let needed = 4 + data.len();
    if used + needed > PAGE_SIZE {
        return Err(StorageError::internal(
            "overflow page does not have enough remaining capacity",
        ));
    }

    let offset_in_data_area = (used - OVERFLOW_HEADER_SIZE) as u32;
    buf[used..used + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
    buf[used + 4..used + needed].copy_from_slice(data);

    write_header(buf, page_id(buf), (used + needed) as u32);
    Ok(offset_in_data_area)
}

/// Read the length-prefixed blob at data-area `offset`.
pub fn read_blob(buf: &[u8], offset: u32) -> Result<Vec<u8>> {
    let start = OVERFLOW_HEADER_SIZE + offset as usize;
    if start + 4 > PAGE_SIZE {
        return Err(StorageError::corrupt_log("overflow blob offset out of range"));
    }
    let len = u32::from_le_bytes(buf[start..start + 4].try_into().unwrap()) as usize;
    if start + 4 + len > PAGE_SIZE {
        return Err(StorageError::corrupt_log("overflow blob length out of range"));
    }
    Ok(buf[start + 4..start + 4 + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_page_header() {
        let buf = init_overflow_page(PageId::new(3));
        assert_eq!(page_type(&buf), Some(PageType::Overflow));
        assert_eq!(page_id(&buf), PageId::new(3));
        assert_eq!(space_used(&buf) as usize, OVERFLOW_HEADER_SIZE);
        assert_eq!(remaining_capacity(&buf), PAGE_SIZE - OVERFLOW_HEADER_SIZE);
    }

    #[test]
    fn test_append_and_read_blob() {
        let mut buf = init_overflow_page(PageId::new(1));
        let off1 = append_blob(&mut buf, b"hello").unwrap();
        let off2 = append_blob(&mut buf, b"world!!").unwrap();

        assert_eq!(read_blob(&buf, off1).unwrap(), b"hello");
        assert_eq!(read_blob(&buf, off2).unwrap(), b"world!!");
    }

    #[test]
    fn test_append_fails_when_full() {
        let mut buf = init_overflow_page(PageId::new(1));
        let big = vec![0u8; PAGE_SIZE];
        assert!(append_blob(&mut buf, &big).is_err());
    }
}
