//! In-memory hot store.

use crate::error::StorageResult;
use crate::hot::{HotStore, KvIter, ReadTx, WriteTx};
use parking_lot::{Condvar, Mutex, RwLock};
use std::cmp::Ordering as KeyOrder;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;
type Tables = BTreeMap<String, Arc<Table>>;
/// Uncommitted writes of one table; `None` marks a delete.
type Pending = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// A copy-on-write, in-memory [`HotStore`].
///
/// Read transactions hold an `Arc` to the table map that was current when
/// they began, so a snapshot costs one reference count. A write transaction
/// buffers its changes and applies them at commit. A table is copied at
/// commit only while some snapshot still references it; otherwise it is
/// updated in place, so a commit costs its own size, not the table's.
///
/// This store is not durable. It backs tests, tools and ephemeral engines.
///
/// # Example
///
/// ```rust
/// use strata_storage::{HotStore, MemHotStore};
///
/// let store = MemHotStore::new();
/// let before = store.begin_ro().unwrap();
///
/// let mut tx = store.begin_rw().unwrap();
/// tx.put("t", b"k", b"v").unwrap();
/// tx.commit().unwrap();
///
/// assert_eq!(before.get("t", b"k").unwrap(), None);
/// assert_eq!(store.table_len("t"), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemHotStore {
    tables: RwLock<Arc<Tables>>,
    writer_busy: Mutex<bool>,
    writer_released: Condvar,
    commits: AtomicU64,
}

impl MemHotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in `table` as of the last commit.
    #[must_use]
    pub fn table_len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.len())
    }

    /// Names of all non-empty tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .iter()
            .filter(|(_, t)| !t.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }
}

impl HotStore for MemHotStore {
    fn begin_ro(&self) -> StorageResult<Arc<dyn ReadTx>> {
        Ok(Arc::new(MemSnapshot {
            tables: Arc::clone(&self.tables.read()),
        }))
    }

    fn begin_rw(&self) -> StorageResult<Box<dyn WriteTx + '_>> {
        let permit = WriterPermit::acquire(self);
        let base = Arc::clone(&self.tables.read());
        Ok(Box::new(MemWriteTx {
            permit,
            base,
            pending: BTreeMap::new(),
        }))
    }
}

fn table_get(tables: &Tables, table: &str, key: &[u8]) -> Option<Vec<u8>> {
    tables.get(table).and_then(|t| t.get(key).cloned())
}

fn bounds<'b>(from: &'b [u8], to: Option<&'b [u8]>) -> Option<(Bound<&'b [u8]>, Bound<&'b [u8]>)> {
    if to.is_some_and(|to| to <= from) {
        return None;
    }
    Some((Bound::Included(from), to.map_or(Bound::Unbounded, Bound::Excluded)))
}

fn table_range<'a>(tables: &'a Tables, table: &str, from: &[u8], to: Option<&[u8]>) -> KvIter<'a> {
    let (Some(t), Some(range)) = (tables.get(table), bounds(from, to)) else {
        return Box::new(std::iter::empty());
    };
    Box::new(t.range::<[u8], _>(range).map(|(k, v)| (k.clone(), v.clone())))
}

/// Committed rows overlaid with a write transaction's pending changes.
struct Overlay<'a> {
    base: Peekable<KvIter<'a>>,
    pending: Peekable<std::collections::btree_map::Range<'a, Vec<u8>, Option<Vec<u8>>>>,
}

impl Iterator for Overlay<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let order = match (self.base.peek(), self.pending.peek()) {
                (None, None) => return None,
                (Some(_), None) => KeyOrder::Less,
                (None, Some(_)) => KeyOrder::Greater,
                (Some((b, _)), Some((p, _))) => b.as_slice().cmp(p.as_slice()),
            };
            if order == KeyOrder::Less {
                return self.base.next();
            }
            if order == KeyOrder::Equal {
                self.base.next();
            }
            if let Some((k, Some(v))) = self.pending.next() {
                return Some((k.clone(), v.clone()));
            }
        }
    }
}

#[derive(Debug)]
struct MemSnapshot {
    tables: Arc<Tables>,
}

impl ReadTx for MemSnapshot {
    fn get(&self, table: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(table_get(&self.tables, table, key))
    }

    fn range<'a>(&'a self, table: &str, from: &[u8], to: Option<&[u8]>) -> StorageResult<KvIter<'a>> {
        Ok(table_range(&self.tables, table, from, to))
    }
}

/// Exclusive right to be the store's writer, released on drop.
struct WriterPermit<'a> {
    store: &'a MemHotStore,
}

impl<'a> WriterPermit<'a> {
    fn acquire(store: &'a MemHotStore) -> Self {
        let mut busy = store.writer_busy.lock();
        while *busy {
            store.writer_released.wait(&mut busy);
        }
        *busy = true;
        Self { store }
    }
}

impl Drop for WriterPermit<'_> {
    fn drop(&mut self) {
        *self.store.writer_busy.lock() = false;
        self.store.writer_released.notify_one();
    }
}

struct MemWriteTx<'a> {
    permit: WriterPermit<'a>,
    base: Arc<Tables>,
    pending: BTreeMap<String, Pending>,
}

impl MemWriteTx<'_> {
    fn pending_mut(&mut self, table: &str) -> &mut Pending {
        self.pending.entry(table.to_string()).or_default()
    }
}

impl ReadTx for MemWriteTx<'_> {
    fn get(&self, table: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.pending.get(table).and_then(|p| p.get(key)) {
            Some(change) => Ok(change.clone()),
            None => Ok(table_get(&self.base, table, key)),
        }
    }

    fn range<'a>(&'a self, table: &str, from: &[u8], to: Option<&[u8]>) -> StorageResult<KvIter<'a>> {
        let base = table_range(&self.base, table, from, to);
        let (Some(pending), Some(range)) = (self.pending.get(table), bounds(from, to)) else {
            return Ok(base);
        };
        Ok(Box::new(Overlay {
            base: base.peekable(),
            pending: pending.range::<[u8], _>(range).peekable(),
        }))
    }
}

impl WriteTx for MemWriteTx<'_> {
    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.pending_mut(table).insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, table: &str, key: &[u8]) -> StorageResult<()> {
        self.pending_mut(table).insert(key.to_vec(), None);
        Ok(())
    }

    fn delete_range(&mut self, table: &str, from: &[u8], to: Option<&[u8]>) -> StorageResult<u64> {
        let doomed: Vec<Vec<u8>> = self.range(table, from, to)?.map(|(k, _)| k).collect();
        let pending = self.pending_mut(table);
        for key in &doomed {
            pending.insert(key.clone(), None);
        }
        Ok(doomed.len() as u64)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemWriteTx {
            permit,
            base,
            pending,
        } = *self;
        // The writer permit guarantees `base` is still the current map.
        drop(base);
        if !pending.is_empty() {
            let mut current = permit.store.tables.write();
            let tables = Arc::make_mut(&mut current);
            for (name, changes) in pending {
                let table = Arc::make_mut(tables.entry(name).or_default());
                for (key, change) in changes {
                    match change {
                        Some(value) => table.insert(key, value),
                        None => table.remove(&key),
                    };
                }
            }
        }
        permit.store.commits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
