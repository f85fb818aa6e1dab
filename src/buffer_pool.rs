//! The page cache that sits between query code and the heap files.
//!
//! Every page handed out by [`PageCache::fetch_page`] is guarded by a page lock taken through the
//! [`LockManager`] first, so a caller never sees a page before it holds the matching lock.
//! The pool never writes a page dirtied by an uncommitted transaction (no steal), which lets an
//! abort simply drop that transaction's dirty pages and re-read them from disk later.

use std::{collections::HashMap, collections::HashSet, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    error::{DbError, Result},
    heap_file::HeapFile,
    ids::{PageId, TableId, TransactionId},
    lock_manager::{LockConfig, LockManager, LockMode},
    page::HeapPage,
    tuple::Tuple,
};

/// The intent a page is requested with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Shared handle to a resident page. Writers take the write guard, and only ever while
/// their transaction holds the page's exclusive lock.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// What a [`HeapFile`] needs from the layer that caches its pages
pub trait PageCache {
    /// Lock the page for the transaction according to `perm`, then return it, loading it if needed
    fn fetch_page(&self, tx_id: TransactionId, page: PageId, perm: Permissions) -> Result<PageRef>;

    /// Give up the transaction's lock on a page before the transaction ends
    fn release_page(&self, tx_id: TransactionId, page: PageId);

    /// Step the transaction's exclusive lock on a page back down to shared
    fn downgrade_page(&self, tx_id: TransactionId, page: PageId);

    /// The mode of the lock the transaction holds on the page, if any
    fn held_mode(&self, tx_id: TransactionId, page: PageId) -> Option<LockMode>;

    /// Put the transaction's lock on a page back to `held_before`, the mode [`held_mode`]
    /// reported before a request that left the page untouched
    ///
    /// [`held_mode`]: PageCache::held_mode
    fn restore_lock(&self, tx_id: TransactionId, page: PageId, held_before: Option<LockMode>) {
        match held_before {
            None => self.release_page(tx_id, page),
            Some(LockMode::Shared) => self.downgrade_page(tx_id, page),
            Some(LockMode::Exclusive) => {}
        }
    }
}

struct Frame {
    page: PageRef,
    dirtied_by: Option<TransactionId>,
}

pub struct BufferPool {
    capacity: usize,
    lock_manager: LockManager,
    tables: RwLock<HashMap<TableId, Arc<HeapFile>>>,
    frames: Mutex<HashMap<PageId, Frame>>,
}

impl BufferPool {
    pub const DEFAULT_PAGES: usize = 50;

    pub fn new(capacity: usize, lock_config: LockConfig) -> Self {
        Self {
            capacity: capacity.max(1),
            lock_manager: LockManager::new(lock_config),
            tables: RwLock::new(HashMap::new()),
            frames: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages currently resident
    pub fn resident(&self) -> usize {
        self.frames.lock().len()
    }

    /// Make a heap file's pages reachable through this pool
    pub fn register_file(&self, file: Arc<HeapFile>) {
        self.tables.write().insert(file.id(), file);
    }

    pub fn table(&self, table: TableId) -> Result<Arc<HeapFile>> {
        self.tables
            .read()
            .get(&table)
            .cloned()
            .ok_or(DbError::UnknownTable(table))
    }

    /// Insert a tuple into a table on behalf of a transaction, marking the touched page dirty
    pub fn insert_tuple(
        &self,
        tx_id: TransactionId,
        table: TableId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let file = self.table(table)?;
        for page in file.insert_tuple(self, tx_id, tuple)? {
            self.mark_dirty(page, tx_id);
        }
        Ok(())
    }

    /// Delete a tuple, located by its record id, on behalf of a transaction
    pub fn delete_tuple(&self, tx_id: TransactionId, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or(DbError::TupleNotFound)?;
        let file = self.table(record_id.page.table)?;
        for page in file.delete_tuple(self, tx_id, tuple)? {
            self.mark_dirty(page, tx_id);
        }
        Ok(())
    }

    fn mark_dirty(&self, page: PageId, tx_id: TransactionId) {
        if let Some(frame) = self.frames.lock().get_mut(&page) {
            frame.dirtied_by = Some(tx_id);
        }
    }

    /// The transaction that dirtied a resident page, if any
    pub fn dirtied_by(&self, page: PageId) -> Option<TransactionId> {
        self.frames.lock().get(&page).and_then(|f| f.dirtied_by)
    }

    /// Evict one page that is clean, unlocked and not referenced outside the pool
    fn evict_page(&self, frames: &mut HashMap<PageId, Frame>) -> Result<()> {
        let victim = frames
            .iter()
            .find(|(page, frame)| {
                frame.dirtied_by.is_none()
                    && Arc::strong_count(&frame.page) == 1
                    && self.lock_manager.lock_mode(**page).is_none()
            })
            .map(|(page, _)| *page)
            .ok_or(DbError::BufferPoolFull)?;
        debug!(page = %victim, "evicting page");
        frames.remove(&victim);
        Ok(())
    }

    fn flush_frame(&self, page: PageId, frame: &mut Frame) -> Result<()> {
        if let Some(tx_id) = frame.dirtied_by {
            let file = self.table(page.table)?;
            file.write_page(&frame.page.read())?;
            debug!(%page, %tx_id, "flushed page");
            frame.dirtied_by = None;
        }
        Ok(())
    }

    /// Write a page back to its file if it is dirty
    pub fn flush_page(&self, page: PageId) -> Result<()> {
        let mut frames = self.frames.lock();
        match frames.get_mut(&page) {
            Some(frame) => self.flush_frame(page, frame),
            None => Ok(()),
        }
    }

    /// Write every dirty page back to disk, whoever dirtied it
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut frames = self.frames.lock();
        for (page, frame) in frames.iter_mut() {
            self.flush_frame(*page, frame)?;
        }
        Ok(())
    }

    /// Drop a page from the pool without writing it
    pub fn discard_page(&self, page: PageId) {
        self.frames.lock().remove(&page);
    }

    fn flush_pages(&self, pages: &HashSet<PageId>, tx_id: TransactionId) -> Result<()> {
        let mut frames = self.frames.lock();
        for page in pages {
            if let Some(frame) = frames.get_mut(page) {
                if frame.dirtied_by == Some(tx_id) {
                    self.flush_frame(*page, frame)?;
                }
            }
        }
        Ok(())
    }

    fn discard_dirty_pages(&self, pages: &HashSet<PageId>, tx_id: TransactionId) {
        let mut frames = self.frames.lock();
        frames.retain(|page, frame| !(pages.contains(page) && frame.dirtied_by == Some(tx_id)));
    }

    /// Finish a transaction: flush its dirty pages on commit or drop them on abort,
    /// then release all of its locks. Locks are released even if the flush fails.
    pub fn transaction_complete(&self, tx_id: TransactionId, commit: bool) -> Result<()> {
        let pages = self.lock_manager.pages_held_by(tx_id);
        let result = if commit {
            self.flush_pages(&pages, tx_id)
        } else {
            Ok(())
        };
        if !commit || result.is_err() {
            self.discard_dirty_pages(&pages, tx_id);
        }
        self.lock_manager.release_all(tx_id);
        debug!(%tx_id, commit, pages = pages.len(), ok = result.is_ok(), "transaction complete");
        result
    }

    /// The pool's frame for a page, reading it from its file if it is not resident
    fn resident_page(&self, page: PageId) -> Result<PageRef> {
        let file = self.table(page.table)?;
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&page) {
            return Ok(Arc::clone(&frame.page));
        }
        if frames.len() >= self.capacity {
            self.evict_page(&mut frames)?;
        }
        let page_ref = Arc::new(RwLock::new(file.read_page(page)?));
        frames.insert(
            page,
            Frame {
                page: Arc::clone(&page_ref),
                dirtied_by: None,
            },
        );
        Ok(page_ref)
    }
}

impl PageCache for BufferPool {
    fn fetch_page(&self, tx_id: TransactionId, page: PageId, perm: Permissions) -> Result<PageRef> {
        let held_before = self.lock_manager.held_mode(page, tx_id);
        self.lock_manager.acquire(page, tx_id, perm.lock_mode())?;

        //  a page that could not be handed out leaves the transaction's locks as they were
        self.resident_page(page).inspect_err(|_| {
            self.restore_lock(tx_id, page, held_before);
        })
    }

    fn release_page(&self, tx_id: TransactionId, page: PageId) {
        self.lock_manager.release(page, tx_id);
    }

    fn downgrade_page(&self, tx_id: TransactionId, page: PageId) {
        self.lock_manager.downgrade(page, tx_id);
    }

    fn held_mode(&self, tx_id: TransactionId, page: PageId) -> Option<LockMode> {
        self.lock_manager.held_mode(page, tx_id)
    }
}
