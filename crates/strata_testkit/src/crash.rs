//! Crash simulation for the hot store.
//!
//! A crash between two hot-store commits is the interesting failure for the
//! engine: files may already be registered while the rows they replace are
//! still in the hot store. [`CrashableHotStore`] fails commits on demand so
//! tests can stop a freeze, merge or prune at exactly that point.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::crash::CrashableHotStore;
//!
//! let hot = Arc::new(CrashableHotStore::new());
//! hot.crash_after_commits(0);
//! assert!(agg.freeze(range, &cancel).is_err());
//! hot.recover();
//! agg.freeze(range, &cancel).unwrap();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use strata_storage::{
    HotStore, KvIter, MemHotStore, ReadTx, StorageError, StorageResult, WriteTx,
};

/// A hot store wrapper that fails commits after a set number succeed.
///
/// A failed commit discards the transaction, as a crash before fsync would.
/// Once crashed, every commit fails until [`CrashableHotStore::recover`].
pub struct CrashableHotStore {
    inner: MemHotStore,
    armed: AtomicBool,
    remaining: AtomicU64,
    crashed: AtomicBool,
    failed_commits: AtomicU64,
}

impl CrashableHotStore {
    /// Creates a store that never fails.
    pub fn new() -> Self {
        Self {
            inner: MemHotStore::new(),
            armed: AtomicBool::new(false),
            remaining: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            failed_commits: AtomicU64::new(0),
        }
    }

    /// Lets `n` more commits succeed, then fails every following one.
    pub fn crash_after_commits(&self, n: u64) {
        self.remaining.store(n, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Clears the crash state. Commits succeed again.
    pub fn recover(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns true if a commit has failed since the last recover.
    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Total commits failed.
    pub fn failed_commits(&self) -> u64 {
        self.failed_commits.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &MemHotStore {
        &self.inner
    }

    fn admit_commit(&self) -> bool {
        if self.crashed.load(Ordering::SeqCst) {
            return false;
        }
        if !self.armed.load(Ordering::SeqCst) {
            return true;
        }
        let admitted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !admitted {
            self.crashed.store(true, Ordering::SeqCst);
        }
        admitted
    }
}

impl Default for CrashableHotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HotStore for CrashableHotStore {
    fn begin_ro(&self) -> StorageResult<Arc<dyn ReadTx>> {
        self.inner.begin_ro()
    }

    fn begin_rw(&self) -> StorageResult<Box<dyn WriteTx + '_>> {
        Ok(Box::new(CrashableTx {
            inner: self.inner.begin_rw()?,
            store: self,
        }))
    }
}

struct CrashableTx<'a> {
    inner: Box<dyn WriteTx + 'a>,
    store: &'a CrashableHotStore,
}

impl ReadTx for CrashableTx<'_> {
    fn get(&self, table: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(table, key)
    }

    fn range<'b>(
        &'b self,
        table: &str,
        from: &[u8],
        to: Option<&[u8]>,
    ) -> StorageResult<KvIter<'b>> {
        self.inner.range(table, from, to)
    }
}

impl WriteTx for CrashableTx<'_> {
    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.inner.put(table, key, value)
    }

    fn delete(&mut self, table: &str, key: &[u8]) -> StorageResult<()> {
        self.inner.delete(table, key)
    }

    fn delete_range(
        &mut self,
        table: &str,
        from: &[u8],
        to: Option<&[u8]>,
    ) -> StorageResult<u64> {
        self.inner.delete_range(table, from, to)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        if !self.store.admit_commit() {
            self.store.failed_commits.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::CommitFailed("simulated crash".to_string()));
        }
        self.inner.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &CrashableHotStore, key: &[u8]) -> StorageResult<()> {
        let mut tx = store.begin_rw()?;
        tx.put("t", key, b"v")?;
        tx.commit()
    }

    #[test]
    fn commits_succeed_until_budget_runs_out() {
        let store = CrashableHotStore::new();
        store.crash_after_commits(2);

        put(&store, b"a").unwrap();
        put(&store, b"b").unwrap();
        assert!(put(&store, b"c").is_err());
        assert!(store.is_crashed());
        assert!(put(&store, b"d").is_err());
        assert_eq!(store.failed_commits(), 2);
        assert_eq!(store.inner().table_len("t"), 2);
    }

    #[test]
    fn recover_allows_commits_again() {
        let store = CrashableHotStore::new();
        store.crash_after_commits(0);
        assert!(put(&store, b"a").is_err());

        store.recover();
        put(&store, b"a").unwrap();
        assert_eq!(store.inner().table_len("t"), 1);
    }

    #[test]
    fn failed_commit_is_invisible() {
        let store = CrashableHotStore::new();
        store.crash_after_commits(0);
        let _ = put(&store, b"a");

        let tx = store.begin_ro().unwrap();
        assert_eq!(tx.get("t", b"a").unwrap(), None);
    }
}
