//! Hot-store traits.

use crate::error::StorageResult;
use std::sync::Arc;

/// Ordered iterator over `(key, value)` pairs of one table.
pub type KvIter<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

/// A transactional, ordered key-value store with named tables.
///
/// # Invariants
///
/// - A read transaction sees exactly the state of the last commit that
///   finished before it began
/// - At most one read-write transaction exists at a time; `begin_rw`
///   blocks until the previous one is committed or dropped
/// - Dropping a read-write transaction without committing discards it
pub trait HotStore: Send + Sync {
    /// Opens a snapshot-isolated read transaction.
    fn begin_ro(&self) -> StorageResult<Arc<dyn ReadTx>>;

    /// Opens the read-write transaction.
    fn begin_rw(&self) -> StorageResult<Box<dyn WriteTx + '_>>;
}

/// Read operations shared by both transaction kinds.
pub trait ReadTx: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, table: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Iterates keys in `[from, to)` in ascending byte order.
    ///
    /// `to = None` means unbounded. A missing table yields nothing.
    fn range<'a>(&'a self, table: &str, from: &[u8], to: Option<&[u8]>)
        -> StorageResult<KvIter<'a>>;

    /// Returns the first entry at or after `from`, if it is before `to`.
    fn first(
        &self,
        table: &str,
        from: &[u8],
        to: Option<&[u8]>,
    ) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.range(table, from, to)?.next())
    }
}

/// The single read-write transaction of a [`HotStore`].
///
/// Reads through a `WriteTx` observe its own uncommitted writes.
pub trait WriteTx: ReadTx {
    /// Inserts or replaces a value.
    fn put(&mut self, table: &str, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Removes a key. Removing an absent key is not an error.
    fn delete(&mut self, table: &str, key: &[u8]) -> StorageResult<()>;

    /// Removes every key in `[from, to)`. Returns the number removed.
    fn delete_range(&mut self, table: &str, from: &[u8], to: Option<&[u8]>)
        -> StorageResult<u64>;

    /// Makes all writes durable and visible to new read transactions.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}
