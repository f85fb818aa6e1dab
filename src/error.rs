use std::io;

use thiserror::Error;

use crate::{
    ids::{PageId, RecordId, TableId, TransactionId},
    lock_manager::LockMode,
};

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    // storage
    #[error("storage I/O error: {0}")]
    StorageIo(#[from] io::Error),
    #[error("page {page} is out of range for a file of {page_count} pages")]
    InvalidPageNumber { page: PageId, page_count: usize },
    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: PageId, reason: String },

    // page / tuple addressing
    #[error("page {0} has no empty slots")]
    PageFull(PageId),
    #[error("tuple not found")]
    TupleNotFound,
    #[error("slot {slot} on page {page} is not occupied")]
    SlotNotOccupied { page: PageId, slot: usize },
    #[error("record {record} does not live on page {page}")]
    TupleNotOnThisPage { page: PageId, record: RecordId },
    #[error("tuple does not match the table layout: {0}")]
    LayoutMismatch(String),

    // concurrency
    #[error("transaction {txn} timed out waiting for a {mode:?} lock on page {page}")]
    LockTimeout {
        txn: TransactionId,
        page: PageId,
        mode: LockMode,
    },

    // page cache
    #[error("buffer pool is full and no resident page can be evicted")]
    BufferPoolFull,
    #[error("no heap file registered for table {0}")]
    UnknownTable(TableId),

    // iterators
    #[error("iterator used before open")]
    IteratorNotOpen,
    #[error("iterator exhausted")]
    NoSuchElement,

    // aggregation
    #[error("unsupported aggregate: {0}")]
    UnsupportedAggregate(String),
}
