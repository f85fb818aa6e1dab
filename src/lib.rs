//! A small page-oriented storage engine: heap files of fixed-size slotted pages, a buffer pool
//! that caches them, and a page-level shared/exclusive lock manager that keeps concurrent
//! transactions apart.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

pub mod aggregate;
pub mod benchmark_framework;
pub mod buffer_pool;
pub mod error;
pub mod heap_file;
pub mod histogram;
pub mod ids;
pub mod iterator;
pub mod lock_manager;
pub mod page;
pub mod transaction;
pub mod tuple;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
use test_utils::TestDir;

pub use buffer_pool::{BufferPool, PageCache, Permissions};
pub use error::{DbError, Result};
pub use heap_file::{HeapFile, HeapFileIterator};
pub use ids::{PageId, RecordId, TableId, TransactionId};
pub use iterator::DbIterator;
pub use lock_manager::{LockConfig, LockManager, LockMode};
pub use page::HeapPage;
pub use transaction::Transaction;
pub use tuple::{Field, FieldType, Tuple, TupleLayout};

// Compile-time fixed page size, selected via Cargo features.
// Exactly one of `page-4k` or `page-8k` should be enabled.
#[cfg(feature = "page-4k")]
pub const PAGE_SIZE: usize = 4096;
#[cfg(all(feature = "page-8k", not(feature = "page-4k")))]
pub const PAGE_SIZE: usize = 8192;

#[cfg(not(any(feature = "page-4k", feature = "page-8k")))]
compile_error!("One of `page-4k` or `page-8k` features must be enabled to select a page size.");
#[cfg(all(feature = "page-4k", feature = "page-8k"))]
compile_error!(
    "Only one of `page-4k` or `page-8k` may be enabled; build with `--no-default-features --features page-8k` for 8k pages."
);

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Buffer pool capacity in pages
    pub num_pages: usize,
    pub lock: LockConfig,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            num_pages: BufferPool::DEFAULT_PAGES,
            lock: LockConfig::default(),
        }
    }
}

/// The database struct
pub struct HeapDb {
    db_directory: PathBuf,
    buffer_pool: Arc<BufferPool>,
}

impl HeapDb {
    pub fn new<P: AsRef<Path>>(path: P, config: DbConfig) -> Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self {
            db_directory: path.as_ref().to_path_buf(),
            buffer_pool: Arc::new(BufferPool::new(config.num_pages, config.lock)),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(config: DbConfig) -> (Self, TestDir) {
        let test_dir = TestDir::new();
        let db = Self::new(test_dir.path(), config).unwrap();
        (db, test_dir)
    }

    pub fn db_directory(&self) -> &Path {
        &self.db_directory
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    /// Open (or create) the table stored in `<db_directory>/<name>` and make it visible to the
    /// buffer pool
    pub fn open_table(&self, name: &str, layout: Arc<TupleLayout>) -> Result<Arc<HeapFile>> {
        let file = Arc::new(HeapFile::open(self.db_directory.join(name), layout)?);
        self.buffer_pool.register_file(Arc::clone(&file));
        Ok(file)
    }

    pub fn new_tx(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.buffer_pool))
    }
}
