use std::sync::Arc;

use tracing::warn;

use crate::{
    buffer_pool::BufferPool,
    error::Result,
    heap_file::{HeapFile, HeapFileIterator},
    ids::{TableId, TransactionId},
    tuple::Tuple,
};

/// A unit of work against the buffer pool. Locks taken on its behalf are held until it
/// commits or aborts; dropping an unfinished transaction aborts it.
pub struct Transaction {
    tx_id: TransactionId,
    buffer_pool: Arc<BufferPool>,
    finished: bool,
}

impl Transaction {
    pub fn new(buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            tx_id: TransactionId::next(),
            buffer_pool,
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.tx_id
    }

    /// Insert a tuple into a table. On success the tuple carries its new record id.
    pub fn insert(&self, table: TableId, tuple: &mut Tuple) -> Result<()> {
        self.buffer_pool.insert_tuple(self.tx_id, table, tuple)
    }

    pub fn delete(&self, tuple: &Tuple) -> Result<()> {
        self.buffer_pool.delete_tuple(self.tx_id, tuple)
    }

    /// Scan a table under shared page locks held by this transaction
    pub fn scan<'a>(&'a self, file: &'a HeapFile) -> HeapFileIterator<'a> {
        file.iterator(self.buffer_pool.as_ref(), self.tx_id)
    }

    /// Commit this transaction
    /// Its dirty pages are written to disk and all of its locks are released
    pub fn commit(mut self) -> Result<()> {
        self.finish(true)
    }

    /// Abort this transaction
    /// Its dirty pages are dropped from the buffer pool and all of its locks are released
    pub fn abort(mut self) -> Result<()> {
        self.finish(false)
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        self.finished = true;
        self.buffer_pool.transaction_complete(self.tx_id, commit)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.finish(false) {
            warn!(tx_id = %self.tx_id, error = %e, "abort of dropped transaction failed");
        }
    }
}
