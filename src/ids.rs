use std::{
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
};

/// Identifies a table, and with it the heap file backing that table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The page id container that names a specific page number for a specific table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table: TableId,
    pub page_no: usize,
}

impl PageId {
    pub fn new(table: TableId, page_no: usize) -> Self {
        Self { table, page_no }
    }
}

impl Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.table, self.page_no)
    }
}

/// Locates a tuple on disk: the page it lives on and its slot within that page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page: PageId, slot: usize) -> Self {
        Self { page, slot }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.page, self.slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

/// The timestamp oracle which hands out unique ids for each transaction
/// in a monotonically increasing fashion
static TX_ID_GENERATOR: AtomicU64 = AtomicU64::new(1);

impl TransactionId {
    /// Take the next id from the process-wide generator
    pub fn next() -> Self {
        Self(TX_ID_GENERATOR.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}
