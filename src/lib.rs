//! # toykv-storage
//!
//! Embedded, single-process, persistent key-value store: a paged file with
//! a buffer pool, a write-ahead log for durability and crash recovery, and
//! a B+ tree index with fixed-size cells and overflow pages.
//!
//! ## Architecture
//!
//! - **Storage** (`storage`): disk I/O for the paged database file and the
//!   append-only log file.
//! - **WAL** (`wal`): log record wire format and the log manager that
//!   assigns monotonic log numbers and replays the log.
//! - **Buffer** (`buffer`): fixed-capacity page cache with second-chance
//!   clock eviction and a background flusher thread.
//! - **Page** (`page`): fixed-size B+ tree leaf/internal page layouts.
//! - **B+ tree** (`btree`): the ordered index over the buffer pool.
//! - **Recovery** (`recovery`): rebuilds the index and allocation counters
//!   from the log on startup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use toykv_storage::{Config, Db};
//!
//! let config = Config::new("/tmp/my_database").create_if_not_exists(true);
//! let db = Db::open(config)?;
//!
//! db.set(b"hello", b"world")?;
//! assert_eq!(db.get(b"hello")?, b"world".to_vec());
//! db.delete(b"hello")?;
//! ```

pub mod btree;
pub mod buffer;
pub mod error;
pub mod page;
pub mod recovery;
pub mod storage;
pub mod types;
pub mod wal;

pub use error::{Result, StorageError};
pub use types::{PageId, PAGE_SIZE};

use btree::BTree;
use buffer::BufferPool;
use recovery::RecoveryManager;
use storage::DiskManager;
use types::{FLUSH_WAIT_INTERVAL_MILLISECONDS, INDEX_ROOT_PAGE_ID_KEY, NEXT_PAGE_ID_KEY, PAGE_BUFFER_SIZE};
use wal::LogManager;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Database configuration: path plus the knobs a caller may override.
///
/// `buffer_pool_size` and `flush_wait_interval_millis` exist to let tests
/// use small/fast values; production code should leave them at their
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path prefix; the engine creates `<path>.db` and `<path>.log`.
    pub path: PathBuf,
    /// Create the database if it does not already exist.
    pub create_if_not_exists: bool,
    /// Fail with **already-exists** if the database does already exist.
    pub error_if_exists: bool,
    /// Buffer pool capacity in pages.
    pub buffer_pool_size: usize,
    /// Interval between background flusher passes, in milliseconds.
    pub flush_wait_interval_millis: u64,
}

impl Config {
    /// A config with the production defaults for the given path prefix.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            create_if_not_exists: false,
            error_if_exists: true,
            buffer_pool_size: PAGE_BUFFER_SIZE,
            flush_wait_interval_millis: FLUSH_WAIT_INTERVAL_MILLISECONDS,
        }
    }

    pub fn create_if_not_exists(mut self, v: bool) -> Self {
        self.create_if_not_exists = v;
        self
    }

    pub fn error_if_exists(mut self, v: bool) -> Self {
        self.error_if_exists = v;
        self
    }

    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.buffer_pool_size = size;
        self
    }

    pub fn flush_wait_interval_millis(mut self, millis: u64) -> Self {
        self.flush_wait_interval_millis = millis;
        self
    }

    /// Load a config previously saved with [`Config::to_json_file`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::invalid_argument(format!("invalid config json: {e}")))
    }

    /// Save this config as JSON, for round-tripping settings between runs.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| StorageError::invalid_argument(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn is_reserved_key(key: &[u8]) -> bool {
    key == NEXT_PAGE_ID_KEY || key == INDEX_ROOT_PAGE_ID_KEY
}

/// The embedded key-value store handle.
///
/// Cloning an `Arc<Db>` (not `Db` itself, which is not `Clone`) is the
/// intended way to share one open database across threads; every
/// component it wires together is already internally synchronized.
pub struct Db {
    log: Arc<LogManager>,
    pool: Arc<BufferPool>,
    tree: BTree,
    next_page_id: Arc<Mutex<i32>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Db {
    /// Open or create the database described by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let db_path = storage::disk_manager::db_path(&config.path);
        let exists = db_path.exists();

        if exists && config.error_if_exists {
            return Err(StorageError::AlreadyExists(
                config.path.display().to_string(),
            ));
        }
        if !exists && !config.create_if_not_exists {
            return Err(StorageError::NotFound);
        }

        let (disk, _root) = if exists {
            DiskManager::open(&config.path)?
        } else {
            DiskManager::create_and_open(&config.path)?
        };
        let disk = Arc::new(disk);
        let log = Arc::new(LogManager::new(disk.clone()));
        let pool = BufferPool::with_capacity(disk.clone(), log.clone(), config.buffer_pool_size);
        let next_page_id = Arc::new(Mutex::new(1));
        let tree = BTree::new(pool.clone(), log.clone(), next_page_id.clone());

        let summary = RecoveryManager::recover(&log, &tree, &next_page_id)?;
        log::info!(
            "opened database at {}: {} pages, root={}",
            config.path.display(),
            summary.next_page_id,
            tree.root_page_id(),
        );

        let flusher = pool.spawn_flusher(Duration::from_millis(config.flush_wait_interval_millis));

        Ok(Self {
            log,
            pool,
            tree,
            next_page_id,
            flusher: Mutex::new(Some(flusher)),
            closed: AtomicBool::new(false),
        })
    }

    /// Insert or overwrite `key` with `value`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if is_reserved_key(key) {
            let err = StorageError::invalid_argument("key collides with a reserved engine key");
            log::warn!("{err}");
            return Err(err);
        }
        self.log.log(key, Some(value.to_vec()))?;
        self.tree
            .insert(key.to_vec(), value.to_vec())
            .inspect_err(|e| log::error!("set failed: {e}"))
    }

    /// Fetch the value for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if is_reserved_key(key) {
            let err = StorageError::invalid_argument("key collides with a reserved engine key");
            log::warn!("{err}");
            return Err(err);
        }
        self.tree.get(key).inspect_err(|e| {
            if matches!(e, StorageError::NotFound) {
                log::warn!("get: key not found");
            } else {
                log::error!("get failed: {e}");
            }
        })
    }

    /// Remove `key`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if is_reserved_key(key) {
            let err = StorageError::invalid_argument("key collides with a reserved engine key");
            log::warn!("{err}");
            return Err(err);
        }
        self.log.log(key, None)?;
        self.tree.delete(key).inspect_err(|e| {
            if !matches!(e, StorageError::NotFound) {
                log::error!("delete failed: {e}");
            }
        })
    }

    /// Flush all dirty pages to disk without closing the database.
    pub fn flush(&self) -> Result<()> {
        self.pool.flush_dirty()
    }

    /// Number of pages currently allocated (the next page id minus one).
    pub fn page_count(&self) -> i32 {
        *self.next_page_id.lock() - 1
    }

    /// Flush, stop the background flusher, and leave the `Db` inert.
    ///
    /// Safe to call more than once; subsequent calls are no-ops.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush()?;
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
        log::info!("closed database");
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("error while closing database: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config::new(dir.path().join("db"))
            .create_if_not_exists(true)
            .error_if_exists(false)
            .buffer_pool_size(16)
            .flush_wait_interval_millis(50)
    }

    #[test]
    fn test_basic_operations() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = Db::open(test_config(&dir))?;

        db.set(b"key1", b"value1")?;
        assert_eq!(db.get(b"key1")?, b"value1".to_vec());

        db.set(b"key1", b"value2")?;
        assert_eq!(db.get(b"key1")?, b"value2".to_vec());

        db.delete(b"key1")?;
        assert!(db.get(b"key1").is_err());

        assert!(db.get(b"nonexistent").is_err());
        assert!(db.delete(b"nonexistent").is_err());

        Ok(())
    }

    #[test]
    fn test_open_missing_without_create_fails() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("db")).error_if_exists(false);
        assert!(Db::open(config).is_err());
    }

    #[test]
    fn test_open_existing_with_error_if_exists_fails() {
        let dir = tempdir().unwrap();
        {
            let db = Db::open(test_config(&dir)).unwrap();
            db.set(b"a", b"1").unwrap();
        }
        let config = Config::new(dir.path().join("db")).create_if_not_exists(true);
        assert!(Db::open(config).is_err());
    }

    #[test]
    fn test_reserved_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let db = Db::open(test_config(&dir)).unwrap();
        assert!(db.set(NEXT_PAGE_ID_KEY, b"1").is_err());
        assert!(db.set(INDEX_ROOT_PAGE_ID_KEY, b"1").is_err());
        assert!(db.get(NEXT_PAGE_ID_KEY).is_err());
        assert!(db.delete(NEXT_PAGE_ID_KEY).is_err());
    }

    #[test]
    fn test_recovery_survives_reopen() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("db");

        {
            let config = Config::new(&prefix).create_if_not_exists(true);
            let db = Db::open(config).unwrap();
            for i in 0..50 {
                db.set(format!("key-{i}").as_bytes(), format!("val-{i}").as_bytes())
                    .unwrap();
            }
            db.delete(b"key-0").unwrap();
            db.close().unwrap();
        }

        let config = Config::new(&prefix).error_if_exists(false);
        let db = Db::open(config).unwrap();
        assert!(db.get(b"key-0").is_err());
        for i in 1..50 {
            assert_eq!(
                db.get(format!("key-{i}").as_bytes()).unwrap(),
                format!("val-{i}").as_bytes().to_vec()
            );
        }
    }
}
