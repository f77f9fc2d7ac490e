//! # Strata Core
//!
//! Snapshot aggregation engine: turns the unfrozen tail of per-domain
//! change history into immutable, indexed files and keeps them merged,
//! indexed and pruned.
//!
//! This crate provides:
//! - [`BtreeIndex`]: sparse point-lookup index over a segment
//! - [`TxNumList`]: per-key TxNum lists with random access
//! - [`Domain`]: one key space's chain of file sets plus its hot tail
//! - [`Aggregator`]: freeze, merge, prune, index builds, commitment
//! - [`Context`] and [`AggregatorView`]: consistent read snapshots
//! - [`RetireScheduler`]: when to freeze, and the pipeline after it
//!
//! ## Time axis
//!
//! Every change carries a TxNum. TxNums are bucketed into steps of
//! [`AggregatorConfig::step_size`]; files cover whole step ranges. Per
//! domain the registered ranges are contiguous, and together with the hot
//! tail they cover everything from the pruned boundary to now.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregator;
mod btree;
mod commitment;
mod config;
mod context;
mod dir;
mod domain;
mod error;
mod hot;
mod inverted;
mod manifest;
mod merge;
mod retire;
mod segment;
mod txnums;
mod types;

pub use aggregator::{Aggregator, FreezeStats, PruneStats};
pub use btree::{BtreeIndex, Cursor, BTREE_MAGIC, BTREE_VERSION};
pub use commitment::{CommitmentCalculator, CommitmentInput};
pub use config::{AggregatorConfig, DomainConfig, RetireConfig, DEFAULT_DOMAINS};
pub use context::{AggregatorView, Context, KeyTrace};
pub use dir::{file_name, parse_file_name, DataDir, FileKind, SnapshotFile};
pub use domain::{Domain, IndexRange};
pub use error::{CoreError, CoreResult};
pub use hot::{keys_table, vals_table, HotWriter};
pub use inverted::{encode_tx_list, TxNumList, TxNumRange};
pub use manifest::{CommitmentRecord, Manifest, MANIFEST_MAGIC, MANIFEST_VERSION};
pub use merge::{find_merge_range, MergeStats};
pub use retire::{can_retire, BlockFreezer, RetireHandle, RetireOutcome, RetireScheduler};
pub use segment::{FileInfo, SegmentData, SegmentFiles, WriteOptions};
pub use txnums::{TxNums, TXNUMS_TABLE};
pub use types::{Order, Step, StepRange, TxNum};

pub use strata_codec::CancelToken;
