//! Disk manager: byte-exact persistence of pages and log records across two
//! files, `<path>.db` and `<path>.log`.
//!
//! Positioned reads/writes use `read_exact_at`/`write_all_at` rather than
//! seek-then-read/write, following the single-call positioned-I/O idiom
//! (grounded on `nfvdat-kv-store/src/disk_manager.rs`). Both files are
//! wrapped in `parking_lot::RwLock`, consistent with the rest of the crate's
//! locking style.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::root_page::RootPage;
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

const LOG_HEADER_SIZE: usize = 16;

pub(crate) fn db_path(prefix: &Path) -> PathBuf {
    let mut p = prefix.as_os_str().to_owned();
    p.push(".db");
    PathBuf::from(p)
}

fn log_path(prefix: &Path) -> PathBuf {
    let mut p = prefix.as_os_str().to_owned();
    p.push(".log");
    PathBuf::from(p)
}

/// Byte-level I/O over the paged database file and the append-only log
/// file. Holds no knowledge of page semantics beyond the root page.
pub struct DiskManager {
    db_file: RwLock<File>,
    log_file: RwLock<File>,
}

impl DiskManager {
    /// Truncate both files, write a fresh root page, and return the manager
    /// plus that root page.
    pub fn create_and_open(prefix: &Path) -> Result<(Self, RootPage)> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(db_path(prefix))?;
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(log_path(prefix))?;

        let root = RootPage::new(PageId::INVALID);
        db_file.write_all_at(&root.to_bytes(), 0)?;
        db_file.sync_data()?;

        Ok((
            Self {
                db_file: RwLock::new(db_file),
                log_file: RwLock::new(log_file),
            },
            root,
        ))
    }

    /// Open both files for an existing database and return its root page.
    pub fn open(prefix: &Path) -> Result<(Self, RootPage)> {
        let db_p = db_path(prefix);
        if !db_p.exists() {
            return Err(StorageError::NotFound);
        }
        let db_file = OpenOptions::new().read(true).write(true).open(&db_p)?;
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path(prefix))?;

        let mut buf = [0u8; PAGE_SIZE];
        db_file.read_exact_at(&mut buf, 0)?;
        let root = RootPage::from_bytes(&buf)?;

        Ok((
            Self {
                db_file: RwLock::new(db_file),
                log_file: RwLock::new(log_file),
            },
            root,
        ))
    }

    pub fn write_root_page(&self, root: &RootPage) -> Result<()> {
        let file = self.db_file.write();
        file.write_all_at(&root.to_bytes(), 0)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        let mut buf = [0u8; PAGE_SIZE];
        let file = self.db_file.read();
        file.read_exact_at(&mut buf, page_id.file_offset(PAGE_SIZE))?;
        Ok(PageBuf::from_bytes(&buf))
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8], flush: bool) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::internal(format!(
                "page data must be {} bytes, got {}",
                PAGE_SIZE,
                data.len()
            )));
        }
        let file = self.db_file.write();
        file.write_all_at(data, page_id.file_offset(PAGE_SIZE))?;
        if flush {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Append `bytes` to the log file and return the offset it was written
    /// at. Always durable before returning.
    pub fn append_log(&self, bytes: &[u8]) -> Result<u64> {
        let file = self.log_file.write();
        let offset = file.metadata()?.len();
        file.write_all_at(bytes, offset)?;
        file.sync_data()?;
        Ok(offset)
    }

    /// Read the record (header + body) starting at `offset`.
    pub fn read_log_record(&self, offset: u64) -> Result<Vec<u8>> {
        let file = self.log_file.read();
        let mut header = [0u8; LOG_HEADER_SIZE];
        file.read_exact_at(&mut header, offset)
            .map_err(|_| StorageError::corrupt_log("log record header truncated"))?;
        let size = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
        if size < LOG_HEADER_SIZE {
            return Err(StorageError::corrupt_log("log record size smaller than header"));
        }
        let mut record = vec![0u8; size];
        record[..LOG_HEADER_SIZE].copy_from_slice(&header);
        file.read_exact_at(&mut record[LOG_HEADER_SIZE..], offset + LOG_HEADER_SIZE as u64)
            .map_err(|_| StorageError::corrupt_log("log record body truncated"))?;
        Ok(record)
    }

    pub fn log_file_size(&self) -> Result<u64> {
        Ok(self.log_file.read().metadata()?.len())
    }

    pub fn db_file_size(&self) -> Result<u64> {
        Ok(self.db_file.read().metadata()?.len())
    }

    pub fn sync(&self) -> Result<()> {
        self.db_file.read().sync_all()?;
        self.log_file.read().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open_writes_root_page() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");

        let (dm, root) = DiskManager::create_and_open(&prefix).unwrap();
        assert_eq!(root.index_root_page_id, PageId::INVALID);
        assert!(db_path(&prefix).exists());
        assert!(log_path(&prefix).exists());
        drop(dm);
    }

    #[test]
    fn test_write_and_read_page_roundtrip() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let (dm, _root) = DiskManager::create_and_open(&prefix).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0..5].copy_from_slice(b"hello");
        dm.write_page(PageId::new(1), &data, true).unwrap();

        let read = dm.read_page(PageId::new(1)).unwrap();
        assert_eq!(&read[0..5], b"hello");
    }

    #[test]
    fn test_append_and_read_log_record() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        let (dm, _root) = DiskManager::create_and_open(&prefix).unwrap();

        let mut record = vec![0u8; 20];
        record[12..16].copy_from_slice(&20u32.to_le_bytes());
        record[16..20].copy_from_slice(b"body");

        let offset = dm.append_log(&record).unwrap();
        assert_eq!(offset, 0);
        let read = dm.read_log_record(offset).unwrap();
        assert_eq!(read, record);
        assert_eq!(dm.log_file_size().unwrap(), 20);
    }

    #[test]
    fn test_reopen_preserves_root_and_pages() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");
        {
            let (dm, mut root) = DiskManager::create_and_open(&prefix).unwrap();
            root.index_root_page_id = PageId::new(5);
            dm.write_root_page(&root).unwrap();
            let data = [7u8; PAGE_SIZE];
            dm.write_page(PageId::new(5), &data, true).unwrap();
        }
        {
            let (dm, root) = DiskManager::open(&prefix).unwrap();
            assert_eq!(root.index_root_page_id, PageId::new(5));
            let page = dm.read_page(PageId::new(5)).unwrap();
            assert_eq!(&page[..], &[7u8; PAGE_SIZE][..]);
        }
    }

    #[test]
    fn test_open_missing_database_is_not_found() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("missing");
        assert!(matches!(DiskManager::open(&prefix), Err(StorageError::NotFound)));
    }
}
