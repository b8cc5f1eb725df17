//! Wire format for a single write-ahead log record.
//!
//! Layout (grounded on `original_source/src/storage/log_entry.h`):
//! ```text
//! Offset  Size  Description
//! 0       4     Kind tag (SET = 0, DELETE = 1)
//! 4       8     Log number
//! 12      4     Total record size, including this header
//! 16      4     Key length
//! 20      ..    Key bytes
//! ..      4     Value length (SET only)
//! ..      ..    Value bytes (SET only)
//! ```

use crate::error::{Result, StorageError};

pub const LOG_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordKind {
    Set = 0,
    Delete = 1,
}

impl LogRecordKind {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Set),
            1 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A decoded log record: a `SET` carries a value, a `DELETE` does not.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub log_number: u64,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl LogRecord {
    pub fn kind(&self) -> LogRecordKind {
        if self.value.is_some() {
            LogRecordKind::Set
        } else {
            LogRecordKind::Delete
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        body.extend_from_slice(&self.key);
        if let Some(value) = &self.value {
            body.extend_from_slice(&(value.len() as u32).to_le_bytes());
            body.extend_from_slice(value);
        }

        let total_size = (LOG_HEADER_SIZE + body.len()) as u32;
        let mut out = Vec::with_capacity(total_size as usize);
        out.extend_from_slice(&(self.kind() as u32).to_le_bytes());
        out.extend_from_slice(&self.log_number.to_le_bytes());
        out.extend_from_slice(&total_size.to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LOG_HEADER_SIZE {
            return Err(StorageError::corrupt_log("log record shorter than header"));
        }
        let kind = LogRecordKind::from_u32(u32::from_le_bytes(bytes[0..4].try_into().unwrap()))
            .ok_or_else(|| StorageError::corrupt_log("unknown log record kind"))?;
        let log_number = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let total_size = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        if total_size != bytes.len() {
            return Err(StorageError::corrupt_log("log record size field mismatch"));
        }

        let mut offset = LOG_HEADER_SIZE;
        let key = read_length_prefixed(bytes, &mut offset)?;
        let value = match kind {
            LogRecordKind::Set => Some(read_length_prefixed(bytes, &mut offset)?),
            LogRecordKind::Delete => None,
        };
        if offset != bytes.len() {
            return Err(StorageError::corrupt_log("trailing bytes after log record body"));
        }

        Ok(Self {
            log_number,
            key,
            value,
        })
    }
}

fn read_length_prefixed(bytes: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    if *offset + 4 > bytes.len() {
        return Err(StorageError::corrupt_log("length prefix truncated"));
    }
    let len = u32::from_le_bytes(bytes[*offset..*offset + 4].try_into().unwrap()) as usize;
    *offset += 4;
    if *offset + len > bytes.len() {
        return Err(StorageError::corrupt_log("record body truncated"));
    }
    let data = bytes[*offset..*offset + len].to_vec();
    *offset += len;
    Ok(data)
}
