//! Fixed-size string cell.
//!
//! Every key and every value in a B+ tree page lives in one of these fixed
//! `CELL_SIZE`-byte slots: a 4-byte length prefix followed by either the
//! whole string inline, or a 52-byte inline prefix plus an 8-byte pointer
//! (page id, offset) into an overflow page for the remaining bytes.

use crate::error::{Result, StorageError};
use crate::types::{PageId, CELL_INLINE_SHORT, CELL_INLINE_WITH_OVERFLOW, CELL_SIZE};

/// Allows a cell to spill its tail into an overflow page.
pub trait OverflowWriter {
    /// Append `bytes` somewhere with spare capacity and return (page id, offset).
    fn write_overflow(&mut self, bytes: &[u8]) -> Result<(PageId, u32)>;
}

/// Allows a cell to read its tail back out of an overflow page.
pub trait OverflowReader {
    /// Read the length-prefixed blob written at (page id, offset).
    fn read_overflow(&self, page_id: PageId, offset: u32) -> Result<Vec<u8>>;
}

/// Encode `value` into a fresh `CELL_SIZE`-byte slot, spilling to overflow
/// storage through `writer` if it doesn't fit inline.
pub fn encode_cell(value: &[u8], writer: &mut dyn OverflowWriter) -> Result<[u8; CELL_SIZE]> {
    let mut buf = [0u8; CELL_SIZE];
    let len = value.len() as u32;
    buf[0..4].copy_from_slice(&len.to_le_bytes());

    if value.len() <= CELL_INLINE_SHORT {
        buf[4..4 + value.len()].copy_from_slice(value);
    } else {
        buf[4..4 + CELL_INLINE_WITH_OVERFLOW].copy_from_slice(&value[..CELL_INLINE_WITH_OVERFLOW]);
        let (overflow_page, overflow_offset) = writer.write_overflow(&value[CELL_INLINE_WITH_OVERFLOW..])?;
        buf[56..60].copy_from_slice(&overflow_page.to_bytes());
        buf[60..64].copy_from_slice(&overflow_offset.to_le_bytes());
    }

    Ok(buf)
}

/// Decode a `CELL_SIZE`-byte slot back into its original bytes, following
/// the overflow pointer through `reader` if the string didn't fit inline.
pub fn decode_cell(buf: &[u8], reader: &dyn OverflowReader) -> Result<Vec<u8>> {
    if buf.len() < CELL_SIZE {
        return Err(StorageError::internal("cell buffer shorter than CELL_SIZE"));
    }

    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;

    if len <= CELL_INLINE_SHORT {
        return Ok(buf[4..4 + len].to_vec());
    }

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&buf[4..4 + CELL_INLINE_WITH_OVERFLOW]);

    let overflow_page = PageId::from_bytes(buf[56..60].try_into().unwrap());
    let overflow_offset = u32::from_le_bytes(buf[60..64].try_into().unwrap());
    let tail = reader.read_overflow(overflow_page, overflow_offset)?;
    out.extend_from_slice(&tail);

    if out.len() != len {
        return Err(StorageError::corrupt_log(format!(
            "cell declared length {len} but reassembled {} bytes",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeOverflow {
        pages: RefCell<Vec<(PageId, u32, Vec<u8>)>>,
        next_page: RefCell<i32>,
    }

    impl FakeOverflow {
        fn new() -> Self {
            Self {
                pages: RefCell::new(Vec::new()),
                next_page: RefCell::new(1),
            }
        }
    }

    impl OverflowWriter for FakeOverflow {
        fn write_overflow(&mut self, bytes: &[u8]) -> Result<(PageId, u32)> {
            let page = PageId::new(*self.next_page.borrow());
            *self.next_page.borrow_mut() += 1;
            let offset = 0;
            self.pages.borrow_mut().push((page, offset, bytes.to_vec()));
            Ok((page, offset))
        }
    }

    impl OverflowReader for FakeOverflow {
        fn read_overflow(&self, page_id: PageId, offset: u32) -> Result<Vec<u8>> {
            for (p, o, bytes) in self.pages.borrow().iter() {
                if *p == page_id && *o == offset {
                    return Ok(bytes.clone());
                }
            }
            Err(StorageError::internal("overflow slot not found"))
        }
    }

    #[test]
    fn test_short_string_roundtrip() {
        let mut ov = FakeOverflow::new();
        let value = b"hello world";
        let cell = encode_cell(value, &mut ov).unwrap();
        let decoded = decode_cell(&cell, &ov).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_empty_string_roundtrip() {
        let mut ov = FakeOverflow::new();
        let cell = encode_cell(b"", &mut ov).unwrap();
        assert_eq!(decode_cell(&cell, &ov).unwrap(), b"");
    }

    #[test]
    fn test_boundary_string_roundtrip() {
        let mut ov = FakeOverflow::new();
        let value = vec![7u8; CELL_INLINE_SHORT];
        let cell = encode_cell(&value, &mut ov).unwrap();
        assert_eq!(decode_cell(&cell, &ov).unwrap(), value);
    }

    #[test]
    fn test_overflowing_string_roundtrip() {
        let mut ov = FakeOverflow::new();
        let value: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let cell = encode_cell(&value, &mut ov).unwrap();
        let decoded = decode_cell(&cell, &ov).unwrap();
        assert_eq!(decoded, value);
    }
}
