//! Test fixtures and aggregator helpers.
//!
//! Provides an aggregator over a temporary data directory and an
//! in-memory hot store, plus helpers to write changes and blocks.

use std::path::Path;
use std::sync::Arc;
use strata_core::{
    vals_table, Aggregator, AggregatorConfig, CoreResult, DomainConfig, TxNum,
};
use strata_storage::{HotStore, MemHotStore};
use tempfile::TempDir;

/// Step size used by [`test_config`].
pub const TEST_STEP: u64 = 10;

/// Small-step configuration with two domains: `accounts` (prunable) and
/// `storage`. Commitment is not required before pruning.
pub fn test_config() -> AggregatorConfig {
    AggregatorConfig::default()
        .step_size(TEST_STEP)
        .max_merge_steps(64)
        .prune_batch(4)
        .require_commitment_before_prune(false)
        .domains(vec![
            DomainConfig::new("accounts").btree_m(4).prunable(true),
            DomainConfig::new("storage").btree_m(4),
        ])
}

/// One change to write through a [`strata_core::HotWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Domain name.
    pub domain: String,
    /// Key.
    pub key: Vec<u8>,
    /// New value, `None` for a delete.
    pub value: Option<Vec<u8>>,
    /// TxNum of the change.
    pub tx_num: TxNum,
}

impl Change {
    /// A put.
    pub fn put(domain: &str, key: &[u8], value: &[u8], tx_num: TxNum) -> Self {
        Self {
            domain: domain.to_string(),
            key: key.to_vec(),
            value: Some(value.to_vec()),
            tx_num,
        }
    }

    /// A delete.
    pub fn delete(domain: &str, key: &[u8], tx_num: TxNum) -> Self {
        Self {
            domain: domain.to_string(),
            key: key.to_vec(),
            value: None,
            tx_num,
        }
    }
}

/// An aggregator with automatic cleanup.
pub struct TestAggregator {
    /// The aggregator instance.
    pub agg: Arc<Aggregator>,
    /// The hot store behind it.
    pub hot: Arc<dyn HotStore>,
    config: AggregatorConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    dir: TempDir,
}

impl TestAggregator {
    /// Opens an aggregator with [`test_config`] over a fresh
    /// [`MemHotStore`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Opens an aggregator with `config` over a fresh [`MemHotStore`].
    pub fn with_config(config: AggregatorConfig) -> Self {
        Self::with_hot(Arc::new(MemHotStore::new()), config)
    }

    /// Opens an aggregator with `config` over `hot`.
    pub fn with_hot(hot: Arc<dyn HotStore>, config: AggregatorConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let agg = Aggregator::open(dir.path(), Arc::clone(&hot), config.clone())
            .expect("Failed to open aggregator");
        Self {
            agg: Arc::new(agg),
            hot,
            config,
            dir,
        }
    }

    /// Data directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration the aggregator was opened with.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Closes the aggregator and opens a new one over the same directory
    /// and hot store, as after a restart. Panics if another handle to the
    /// aggregator is still alive.
    pub fn reopen(self) -> Self {
        let Self {
            agg,
            hot,
            config,
            dir,
        } = self;
        let agg = Arc::try_unwrap(agg).expect("aggregator still shared");
        agg.close().expect("Failed to close aggregator");
        drop(agg);
        let agg = Aggregator::open(dir.path(), Arc::clone(&hot), config.clone())
            .expect("Failed to reopen aggregator");
        Self {
            agg: Arc::new(agg),
            hot,
            config,
            dir,
        }
    }

    /// Writes `changes` in one hot transaction.
    pub fn write(&self, changes: &[Change]) -> CoreResult<()> {
        let mut w = self.agg.hot_writer()?;
        for c in changes {
            match &c.value {
                Some(v) => w.put(&c.domain, &c.key, v, c.tx_num)?,
                None => w.delete(&c.domain, &c.key, c.tx_num)?,
            }
        }
        w.commit()
    }

    /// Records blocks `0..count`, block `b` owning TxNums
    /// `[b * txs_per_block, (b + 1) * txs_per_block)`.
    pub fn write_blocks(&self, count: u64, txs_per_block: u64) -> CoreResult<()> {
        let mut w = self.agg.hot_writer()?;
        for b in 0..count {
            w.append_block(b, (b + 1) * txs_per_block - 1)?;
        }
        w.commit()
    }

    /// Number of value rows left in the hot store for `domain`.
    pub fn hot_rows(&self, domain: &str) -> usize {
        let tx = self.hot.begin_ro().expect("Failed to begin read");
        let count = tx
            .range(&vals_table(domain), &[], None)
            .expect("Failed to read hot rows")
            .count();
        count
    }

    /// Snapshot file names on disk, sorted.
    pub fn snapshot_files(&self) -> Vec<String> {
        snapshot_files(self.dir.path())
    }
}

impl Default for TestAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestAggregator {
    type Target = Aggregator;

    fn deref(&self) -> &Self::Target {
        &self.agg
    }
}

/// Snapshot file names under `datadir`, sorted. Temp files included.
pub fn snapshot_files(datadir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(datadir.join("snapshots")) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Runs a test with a temporary aggregator.
///
/// # Example
///
/// ```rust,ignore
/// use strata_testkit::with_temp_aggregator;
///
/// #[test]
/// fn my_test() {
///     with_temp_aggregator(|t| {
///         assert_eq!(t.end_tx_num_frozen(), 0);
///     });
/// }
/// ```
pub fn with_temp_aggregator<F, R>(f: F) -> R
where
    F: FnOnce(&TestAggregator) -> R,
{
    let t = TestAggregator::new();
    f(&t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::CancelToken;

    #[test]
    fn reopen_keeps_frozen_files() {
        let t = TestAggregator::new();
        t.write(&[Change::put("accounts", b"a", b"1", 3)]).unwrap();
        t.build_files(TEST_STEP, &CancelToken::new()).unwrap();
        let before = t.snapshot_files();

        let t = t.reopen();
        assert_eq!(t.end_tx_num_frozen(), TEST_STEP);
        assert_eq!(t.snapshot_files(), before);
    }

    #[test]
    fn hot_rows_counts_changes() {
        with_temp_aggregator(|t| {
            t.write(&[
                Change::put("accounts", b"a", b"1", 1),
                Change::put("accounts", b"a", b"2", 2),
                Change::delete("accounts", b"b", 3),
            ])
            .unwrap();
            assert_eq!(t.hot_rows("accounts"), 3);
            assert_eq!(t.hot_rows("storage"), 0);
        });
    }
}
