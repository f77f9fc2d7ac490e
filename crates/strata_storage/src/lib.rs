//! # Strata Storage
//!
//! The hot-store contract consumed by the strata engine.
//!
//! The hot store is the live transactional key-value database that receives
//! writes before they are frozen into segment files. The engine does not
//! care how it is implemented; it only needs:
//!
//! - Named tables of byte keys kept in byte order
//! - Snapshot-isolated read transactions
//! - A single read-write transaction at a time that sees its own writes
//! - Range deletion and durable commit
//!
//! ## Available Stores
//!
//! - [`MemHotStore`] - Copy-on-write in-memory store for tests and tools
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{HotStore, MemHotStore};
//!
//! let store = MemHotStore::new();
//! let mut tx = store.begin_rw().unwrap();
//! tx.put("accounts", b"alice", b"100").unwrap();
//! tx.commit().unwrap();
//!
//! let snapshot = store.begin_ro().unwrap();
//! assert_eq!(snapshot.get("accounts", b"alice").unwrap(), Some(b"100".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod hot;
mod memory;

pub use error::{StorageError, StorageResult};
pub use hot::{HotStore, KvIter, ReadTx, WriteTx};
pub use memory::MemHotStore;
