//! Recovery manager: rebuilds in-memory state by replaying the write-ahead
//! log after a restart.

use crate::btree::BTree;
use crate::error::{Result, StorageError};
use crate::types::{PageId, INDEX_ROOT_PAGE_ID_KEY, NEXT_PAGE_ID_KEY};
use crate::wal::{LogManager, LogRecordKind};
use parking_lot::Mutex;
use std::sync::Arc;

/// Summary of a completed recovery pass, reported at `info` level.
#[derive(Debug, Clone, Copy)]
pub struct RecoverySummary {
    pub records_replayed: u64,
    pub next_log_number: u64,
    pub next_page_id: i32,
    pub index_root_page_id: Option<i32>,
}

/// Replays the log to rebuild the index and the allocation counters.
pub struct RecoveryManager;

impl RecoveryManager {
    /// Replay the log from offset 0 into `tree`, then initialize it with
    /// whatever index root page id (if any) the log produced.
    ///
    /// `next_page_id` receives the running allocation counter so the caller
    /// can hand it to the buffer pool before any new page is allocated.
    pub fn recover(
        log: &Arc<LogManager>,
        tree: &BTree,
        next_page_id: &Mutex<i32>,
    ) -> Result<RecoverySummary> {
        let mut records_replayed: u64 = 0;
        let mut next_log_number: u64 = 0;
        let mut index_root_page_id: Option<i32> = None;

        for record in log.iterate_from_start()? {
            let record = record?;
            next_log_number = record.log_number + 1;
            records_replayed += 1;

            match (record.kind(), record.key.as_slice()) {
                (LogRecordKind::Set, NEXT_PAGE_ID_KEY) => {
                    let v = parse_uint(record.value.as_deref())?;
                    *next_page_id.lock() = v;
                    log::trace!("recovery: next_page_id := {v}");
                }
                (LogRecordKind::Set, INDEX_ROOT_PAGE_ID_KEY) => {
                    let v = parse_uint(record.value.as_deref())?;
                    index_root_page_id = Some(v);
                    log::trace!("recovery: index_root_page_id := {v}");
                }
                (LogRecordKind::Set, key) => {
                    let value = record.value.clone().ok_or_else(|| {
                        StorageError::corrupt_log("SET record missing value")
                    })?;
                    tree.insert(key.to_vec(), value)?;
                    log::trace!("recovery: insert key of {} bytes", key.len());
                }
                (LogRecordKind::Delete, key) => {
                    match tree.delete(key) {
                        Ok(()) => {}
                        Err(StorageError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                    log::trace!("recovery: delete key of {} bytes", key.len());
                }
            }
        }

        log.set_next_log_number(next_log_number);
        tree.init(index_root_page_id.map(PageId::new))?;

        let summary = RecoverySummary {
            records_replayed,
            next_log_number,
            next_page_id: *next_page_id.lock(),
            index_root_page_id,
        };
        log::info!(
            "recovery complete: {} records replayed, next_log_number={}, next_page_id={}, index_root_page_id={:?}",
            summary.records_replayed,
            summary.next_log_number,
            summary.next_page_id,
            summary.index_root_page_id,
        );
        Ok(summary)
    }
}

fn parse_uint(value: Option<&[u8]>) -> Result<i32> {
    let bytes = value.ok_or_else(|| StorageError::corrupt_log("SET record missing value"))?;
    let text = std::str::from_utf8(bytes)
        .map_err(|_| StorageError::corrupt_log("counter value is not utf8"))?;
    text.parse::<i32>()
        .map_err(|_| StorageError::corrupt_log("counter value is not an integer"))
}
