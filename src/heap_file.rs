//! Unordered tuple storage: a table is a flat file of `PAGE_SIZE` pages with no header or trailer.

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use tracing::debug;
use twox_hash::XxHash64;

use crate::{
    buffer_pool::{PageCache, Permissions},
    error::{DbError, Result},
    ids::{PageId, TableId, TransactionId},
    iterator::DbIterator,
    page::HeapPage,
    tuple::{Tuple, TupleLayout},
    PAGE_SIZE,
};

/// Process-wide assignment of table ids to file paths.
/// The same path always maps to the same id, and two paths never share one.
#[derive(Default)]
struct TableRegistry {
    by_path: HashMap<PathBuf, TableId>,
    taken: HashSet<TableId>,
}

static TABLE_REGISTRY: OnceLock<Mutex<TableRegistry>> = OnceLock::new();

/// Resolve the table id of a canonical path. The first candidate is the path's hash,
/// collisions probe upwards.
fn table_id_for(path: &Path) -> TableId {
    let mut registry = TABLE_REGISTRY.get_or_init(Mutex::default).lock();
    if let Some(id) = registry.by_path.get(path) {
        return *id;
    }
    let mut candidate = XxHash64::oneshot(0, path.to_string_lossy().as_bytes()) as u32;
    while registry.taken.contains(&TableId(candidate)) {
        candidate = candidate.wrapping_add(1);
    }
    let id = TableId(candidate);
    registry.taken.insert(id);
    registry.by_path.insert(path.to_path_buf(), id);
    id
}

/// A table's tuples stored as an array of pages in one file
pub struct HeapFile {
    id: TableId,
    path: PathBuf,
    layout: Arc<TupleLayout>,
    //  reads and writes seek the shared cursor, so every access is one critical section
    file: Mutex<File>,
}

impl HeapFile {
    /// Open the file backing a table, creating it empty if it does not exist
    pub fn open<P: AsRef<Path>>(path: P, layout: Arc<TupleLayout>) -> Result<Self> {
        if HeapPage::slots_per_page(&layout) == 0 {
            return Err(DbError::LayoutMismatch(format!(
                "a tuple of {} bytes does not fit in a {PAGE_SIZE} byte page",
                layout.width()
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;
        let id = table_id_for(&path);
        debug!(table = %id, path = %path.display(), "opened heap file");
        Ok(Self {
            id,
            path,
            layout,
            file: Mutex::new(file),
        })
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &Arc<TupleLayout> {
        &self.layout
    }

    fn pages_in(file: &File) -> Result<usize> {
        Ok(file.metadata()?.len() as usize / PAGE_SIZE)
    }

    /// Number of whole pages in the file
    pub fn page_count(&self) -> Result<usize> {
        Self::pages_in(&self.file.lock())
    }

    /// Read a page straight from disk
    pub fn read_page(&self, page: PageId) -> Result<HeapPage> {
        let mut bytes = HeapPage::empty_page_data();
        {
            let mut file = self.file.lock();
            let page_count = Self::pages_in(&file)?;
            if page.table != self.id || page.page_no >= page_count {
                return Err(DbError::InvalidPageNumber { page, page_count });
            }
            file.seek(SeekFrom::Start((page.page_no * PAGE_SIZE) as u64))?;
            file.read_exact(&mut bytes)?;
        }
        HeapPage::from_bytes(page, Arc::clone(&self.layout), bytes)
    }

    /// Write a page at its offset as one contiguous `PAGE_SIZE` byte range
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let id = page.id();
        if id.table != self.id {
            return Err(DbError::InvalidPageNumber {
                page: id,
                page_count: self.page_count()?,
            });
        }
        let bytes = page.to_bytes();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((id.page_no * PAGE_SIZE) as u64))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Grow the file by exactly one empty page and return its id
    pub fn append_empty_page(&self) -> Result<PageId> {
        let mut file = self.file.lock();
        let page_no = Self::pages_in(&file)?;
        file.seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
        file.write_all(&HeapPage::empty_page_data())?;
        let page = PageId::new(self.id, page_no);
        debug!(%page, "appended empty page");
        Ok(page)
    }

    /// Insert a tuple into the first page with room, growing the file if every page is full.
    /// Returns the pages that were modified, which is exactly the page the tuple landed on.
    pub fn insert_tuple(
        &self,
        cache: &dyn PageCache,
        tx_id: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<Vec<PageId>> {
        //  a tuple that cannot be stored must fail before the file is grown
        self.layout.check(tuple)?;
        let mut next_page = 0;
        loop {
            let page_count = self.page_count()?;
            while next_page < page_count {
                let page = PageId::new(self.id, next_page);
                next_page += 1;
                if self.try_insert(cache, tx_id, page, tuple)? {
                    return Ok(vec![page]);
                }
            }
            //  the new page is picked up on the next pass, unless another transaction fills it first
            self.append_empty_page()?;
        }
    }

    /// Insert into one page if it has an empty slot. The exclusive lock is held across the
    /// emptiness check and the insert. A full page gets back the lock the transaction held on
    /// it before this call: none, shared, or exclusive.
    fn try_insert(
        &self,
        cache: &dyn PageCache,
        tx_id: TransactionId,
        page: PageId,
        tuple: &mut Tuple,
    ) -> Result<bool> {
        let held_before = cache.held_mode(tx_id, page);
        let page_ref = cache.fetch_page(tx_id, page, Permissions::ReadWrite)?;
        let mut guard = page_ref.write();
        if guard.empty_slot_count() == 0 {
            drop(guard);
            cache.restore_lock(tx_id, page, held_before);
            return Ok(false);
        }
        guard.insert(tuple)?;
        Ok(true)
    }

    /// Remove the tuple at its record id. Returns the modified page.
    pub fn delete_tuple(
        &self,
        cache: &dyn PageCache,
        tx_id: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageId>> {
        let record_id = tuple.record_id().ok_or(DbError::TupleNotFound)?;
        if record_id.page.table != self.id || record_id.page.page_no >= self.page_count()? {
            return Err(DbError::TupleNotFound);
        }
        let page_ref = cache.fetch_page(tx_id, record_id.page, Permissions::ReadWrite)?;
        page_ref.write().delete(record_id).map_err(|e| match e {
            DbError::SlotNotOccupied { .. } => DbError::TupleNotFound,
            e => e,
        })?;
        Ok(vec![record_id.page])
    }

    /// A scan over every tuple of the file, reading pages through `cache` under shared locks
    pub fn iterator<'a>(
        &'a self,
        cache: &'a dyn PageCache,
        tx_id: TransactionId,
    ) -> HeapFileIterator<'a> {
        HeapFileIterator {
            file: self,
            cache,
            tx_id,
            open: false,
            next_page: 0,
            buffered: Vec::new().into_iter(),
        }
    }
}

/// Lazy scan of a [`HeapFile`] in page order, then slot order.
///
/// Pages are fetched one at a time and their tuples copied out, so a page's contents are a
/// snapshot taken when the scan reaches it. The page count is re-read whenever the scan moves to
/// the next page, so pages appended after `open` are still visited.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    cache: &'a dyn PageCache,
    tx_id: TransactionId,
    open: bool,
    next_page: usize,
    buffered: std::vec::IntoIter<Tuple>,
}

impl DbIterator for HeapFileIterator<'_> {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.open {
            return Ok(false);
        }
        while self.buffered.as_slice().is_empty() {
            if self.next_page >= self.file.page_count()? {
                return Ok(false);
            }
            let page = PageId::new(self.file.id(), self.next_page);
            let page_ref = self
                .cache
                .fetch_page(self.tx_id, page, Permissions::ReadOnly)?;
            self.next_page += 1;
            self.buffered = page_ref.read().tuples().into_iter();
        }
        Ok(true)
    }

    fn next_tuple(&mut self) -> Result<Tuple> {
        if !self.open {
            return Err(DbError::IteratorNotOpen);
        }
        if !self.has_next()? {
            return Err(DbError::NoSuchElement);
        }
        self.buffered.next().ok_or(DbError::NoSuchElement)
    }

    fn rewind(&mut self) -> Result<()> {
        self.next_page = 0;
        self.buffered = Vec::new().into_iter();
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.next_page = 0;
        self.buffered = Vec::new().into_iter();
    }
}

impl Iterator for HeapFileIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_tuple()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
