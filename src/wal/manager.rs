//! Log manager: assigns monotonic log numbers, appends records durably, and
//! replays the log forward for recovery.

use crate::error::Result;
use crate::storage::DiskManager;
use crate::wal::record::LogRecord;
use parking_lot::Mutex;
use std::sync::Arc;

struct LogManagerState {
    next_log_number: u64,
}

/// Sole source of durability: every state-changing event crosses this
/// before it becomes visible elsewhere.
pub struct LogManager {
    disk: Arc<DiskManager>,
    state: Mutex<LogManagerState>,
}

impl LogManager {
    pub fn new(disk: Arc<DiskManager>) -> Self {
        Self {
            disk,
            state: Mutex::new(LogManagerState { next_log_number: 0 }),
        }
    }

    /// Build a record with the next log number, without appending it.
    pub fn prepare(&self, key: &[u8], value: Option<Vec<u8>>) -> LogRecord {
        let mut state = self.state.lock();
        let log_number = state.next_log_number;
        state.next_log_number += 1;
        LogRecord {
            log_number,
            key: key.to_vec(),
            value,
        }
    }

    /// Serialize and durably append a record built by `prepare`.
    pub fn append(&self, record: &LogRecord) -> Result<()> {
        self.disk.append_log(&record.encode())?;
        Ok(())
    }

    /// Prepare and append a record atomically with respect to other callers
    /// of this method, so log numbers observe append order (see the
    /// internal-synchronization note in the component design).
    pub fn log(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<LogRecord> {
        let mut state = self.state.lock();
        let log_number = state.next_log_number;
        let record = LogRecord {
            log_number,
            key: key.to_vec(),
            value,
        };
        self.disk.append_log(&record.encode())?;
        state.next_log_number = log_number + 1;
        Ok(record)
    }

    /// Set once at the end of recovery, to whatever log number comes after
    /// the highest one observed during replay.
    pub fn set_next_log_number(&self, n: u64) {
        self.state.lock().next_log_number = n;
    }

    /// A lazy, single-pass forward scan over every record currently in the
    /// log file, starting at offset 0.
    pub fn iterate_from_start(&self) -> Result<LogIterator<'_>> {
        let end = self.disk.log_file_size()?;
        Ok(LogIterator {
            disk: &self.disk,
            offset: 0,
            end,
        })
    }
}

pub struct LogIterator<'a> {
    disk: &'a Arc<DiskManager>,
    offset: u64,
    end: u64,
}

impl<'a> Iterator for LogIterator<'a> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let bytes = match self.disk.read_log_record(self.offset) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        self.offset += bytes.len() as u64;
        Some(LogRecord::decode(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_numbers_are_monotonic() {
        let dir = tempdir().unwrap();
        let (disk, _root) = DiskManager::create_and_open(&dir.path().join("db")).unwrap();
        let log = LogManager::new(Arc::new(disk));

        let r1 = log.log(b"a", Some(b"1".to_vec())).unwrap();
        let r2 = log.log(b"b", Some(b"2".to_vec())).unwrap();
        let r3 = log.log(b"c", None).unwrap();

        assert_eq!(r1.log_number, 0);
        assert_eq!(r2.log_number, 1);
        assert_eq!(r3.log_number, 2);
    }

    #[test]
    fn test_iterate_from_start_replays_in_order() {
        let dir = tempdir().unwrap();
        let (disk, _root) = DiskManager::create_and_open(&dir.path().join("db")).unwrap();
        let log = LogManager::new(Arc::new(disk));

        log.log(b"a", Some(b"1".to_vec())).unwrap();
        log.log(b"b", None).unwrap();

        let records: Result<Vec<_>> = log.iterate_from_start().unwrap().collect();
        let records = records.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, b"a");
        assert_eq!(records[0].value, Some(b"1".to_vec()));
        assert_eq!(records[1].key, b"b");
        assert_eq!(records[1].value, None);
    }

    #[test]
    fn test_set_next_log_number() {
        let dir = tempdir().unwrap();
        let (disk, _root) = DiskManager::create_and_open(&dir.path().join("db")).unwrap();
        let log = LogManager::new(Arc::new(disk));

        log.set_next_log_number(100);
        let record = log.prepare(b"k", None);
        assert_eq!(record.log_number, 100);
    }
}
