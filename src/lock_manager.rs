//! Page-granularity shared/exclusive locking across transactions.
//!
//! The lock table maps a [`PageId`] to its [`PageLock`]. The table mutex only guards lookup and
//! insertion of the per-page entries; each entry carries its own mutex for its mode and holder set,
//! and a condvar that is signalled whenever a holder leaves. A transaction that cannot be granted a
//! lock waits on that condvar, re-checking every `retry_backoff`, until its retry budget runs out.
//! There is no wait-for graph: running out of budget is how a deadlock gets broken, so a timed out
//! caller is expected to abort its transaction.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{
    error::{DbError, Result},
    ids::{PageId, TransactionId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// How long a lock request may wait before it is denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Delay between two attempts at a contended lock
    pub retry_backoff: Duration,
    /// Attempts made after the first one before giving up
    pub max_retries: u32,
}

impl LockConfig {
    /// Upper bound on the time a single request spends waiting
    pub fn timeout(&self) -> Duration {
        self.retry_backoff * self.max_retries
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(50),
            max_retries: 10,
        }
    }
}

/// Mode and holders of one page's lock.
/// `mode == None` iff `holders` is empty, and an exclusive lock has exactly one holder.
#[derive(Debug, Default)]
struct LockState {
    mode: Option<LockMode>,
    holders: HashSet<TransactionId>,
}

impl LockState {
    /// Try to grant `requested` to `tx_id`.
    /// Returns `None` if the request conflicts, otherwise whether `tx_id` became a new holder.
    fn try_grant(&mut self, tx_id: TransactionId, requested: LockMode) -> Option<bool> {
        match (self.mode, requested) {
            (None, _) => {
                debug_assert!(self.holders.is_empty());
                self.mode = Some(requested);
                self.holders.insert(tx_id);
                Some(true)
            }
            (Some(LockMode::Shared), LockMode::Shared) => Some(self.holders.insert(tx_id)),
            (Some(LockMode::Shared), LockMode::Exclusive) => {
                if self.holders.len() == 1 && self.holders.contains(&tx_id) {
                    self.mode = Some(LockMode::Exclusive);
                    Some(false)
                } else {
                    None
                }
            }
            (Some(LockMode::Exclusive), _) => self.holders.contains(&tx_id).then_some(false),
        }
    }

    /// Drop `tx_id` from the holders. Returns whether it was holding the lock.
    fn release(&mut self, tx_id: TransactionId) -> bool {
        let removed = self.holders.remove(&tx_id);
        if self.holders.is_empty() {
            self.mode = None;
        }
        removed
    }
}

#[derive(Debug, Default)]
struct PageLock {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Global struct used by all transactions to keep track of page locks
#[derive(Debug, Default)]
pub struct LockManager {
    config: LockConfig,
    lock_table: Mutex<HashMap<PageId, Arc<PageLock>>>,
    held_pages: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            lock_table: Mutex::new(HashMap::new()),
            held_pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Look up the lock entry for a page, creating it on first use.
    /// The table mutex is released before the caller touches the entry.
    fn page_lock(&self, page: PageId) -> Arc<PageLock> {
        Arc::clone(self.lock_table.lock().entry(page).or_default())
    }

    fn existing_page_lock(&self, page: PageId) -> Option<Arc<PageLock>> {
        self.lock_table.lock().get(&page).cloned()
    }

    pub fn acquire_shared(&self, page: PageId, tx_id: TransactionId) -> Result<()> {
        self.acquire(page, tx_id, LockMode::Shared)
    }

    pub fn acquire_exclusive(&self, page: PageId, tx_id: TransactionId) -> Result<()> {
        self.acquire(page, tx_id, LockMode::Exclusive)
    }

    /// Acquire a lock on `page` in `mode` for a transaction, waiting up to the configured timeout.
    ///
    /// Requests already covered by a held lock return immediately. A sole shared holder is upgraded
    /// in place. On timeout nothing about the page or the transaction's held set has changed.
    pub fn acquire(&self, page: PageId, tx_id: TransactionId, mode: LockMode) -> Result<()> {
        self.held_pages.lock().entry(tx_id).or_default();

        let lock = self.page_lock(page);
        let deadline = Instant::now() + self.config.timeout();
        let mut state = lock.state.lock();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let previous = state.mode;
            if let Some(newly_held) = state.try_grant(tx_id, mode) {
                if newly_held {
                    self.held_pages
                        .lock()
                        .entry(tx_id)
                        .or_default()
                        .insert(page);
                }
                if previous != state.mode || newly_held {
                    debug!(%tx_id, %page, ?mode, ?previous, attempts, "lock granted");
                }
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(%tx_id, %page, ?mode, attempts, "lock request timed out");
                return Err(DbError::LockTimeout {
                    txn: tx_id,
                    page,
                    mode,
                });
            }
            trace!(%tx_id, %page, ?mode, holders = state.holders.len(), "waiting for lock");
            let wake_at = deadline.min(now + self.config.retry_backoff);
            lock.released.wait_until(&mut state, wake_at);
        }
    }

    /// Remove the transaction from the holders of one page. Releasing a lock not held is a no-op.
    pub fn release(&self, page: PageId, tx_id: TransactionId) {
        self.release_page_lock(page, tx_id);
        if let Some(pages) = self.held_pages.lock().get_mut(&tx_id) {
            pages.remove(&page);
        }
    }

    fn release_page_lock(&self, page: PageId, tx_id: TransactionId) {
        let Some(lock) = self.existing_page_lock(page) else {
            return;
        };
        let released = lock.state.lock().release(tx_id);
        if released {
            trace!(%tx_id, %page, "lock released");
            lock.released.notify_all();
        }
    }

    /// Turn the transaction's exclusive lock on a page back into a shared one and wake waiting
    /// readers. Returns false, changing nothing, unless the transaction is the exclusive holder.
    pub fn downgrade(&self, page: PageId, tx_id: TransactionId) -> bool {
        let Some(lock) = self.existing_page_lock(page) else {
            return false;
        };
        let mut state = lock.state.lock();
        if state.mode != Some(LockMode::Exclusive) || !state.holders.contains(&tx_id) {
            return false;
        }
        state.mode = Some(LockMode::Shared);
        drop(state);
        debug!(%tx_id, %page, "lock downgraded");
        lock.released.notify_all();
        true
    }

    /// Release every lock held by the transaction. Called when it commits or aborts.
    pub fn release_all(&self, tx_id: TransactionId) {
        let pages = self
            .held_pages
            .lock()
            .get_mut(&tx_id)
            .map(std::mem::take)
            .unwrap_or_default();
        debug!(%tx_id, count = pages.len(), "releasing all locks");
        for page in pages {
            self.release_page_lock(page, tx_id);
        }
    }

    /// Whether the transaction holds a lock of either mode on the page
    pub fn holds(&self, page: PageId, tx_id: TransactionId) -> bool {
        self.existing_page_lock(page)
            .is_some_and(|lock| lock.state.lock().holders.contains(&tx_id))
    }

    /// The mode of the lock the transaction holds on the page, `None` if it holds none
    pub fn held_mode(&self, page: PageId, tx_id: TransactionId) -> Option<LockMode> {
        let lock = self.existing_page_lock(page)?;
        let state = lock.state.lock();
        if state.holders.contains(&tx_id) {
            state.mode
        } else {
            None
        }
    }

    /// The mode the page is currently locked in, `None` when nobody holds it
    pub fn lock_mode(&self, page: PageId) -> Option<LockMode> {
        self.existing_page_lock(page)
            .and_then(|lock| lock.state.lock().mode)
    }

    /// Snapshot of the pages the transaction currently holds a lock on
    pub fn pages_held_by(&self, tx_id: TransactionId) -> HashSet<PageId> {
        self.held_pages
            .lock()
            .get(&tx_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop lock entries that nobody holds or waits on. Returns how many were removed.
    pub fn collect_garbage(&self) -> usize {
        let mut table = self.lock_table.lock();
        let before = table.len();
        //  a waiter keeps its own Arc, so a count of one means only the table refers to the entry
        table.retain(|_, lock| {
            Arc::strong_count(lock) > 1 || !lock.state.lock().holders.is_empty()
        });
        before - table.len()
    }
}
