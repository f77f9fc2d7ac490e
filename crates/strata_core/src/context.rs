//! Read views over one generation of file sets.

use crate::dir::FileKind;
use crate::domain::{Domain, IndexRange};
use crate::error::{CoreError, CoreResult};
use crate::hot;
use crate::segment::FileInfo;
use crate::types::{decode_latest, Order, StepRange, TxNum};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_codec::CancelToken;
use strata_storage::ReadTx;
use tracing::info;

/// Immutable snapshot of every domain's file chain.
///
/// Cheap to clone. File sets superseded after the context was taken stay
/// readable until the last context referencing them is dropped.
#[derive(Debug, Clone)]
pub struct Context {
    domains: Arc<Vec<Arc<Domain>>>,
    step_size: u64,
}

/// Where a key appears, as reported by [`Context::debug_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTrace {
    /// File set range, or `None` for the hot tail.
    pub range: Option<StepRange>,
    /// Newest change in this source: `(txNum, value-or-tombstone)`.
    pub latest: Option<(TxNum, Option<Vec<u8>>)>,
    /// Every TxNum in this source at which the key changed.
    pub tx_nums: Vec<TxNum>,
}

impl Context {
    pub(crate) fn new(domains: Arc<Vec<Arc<Domain>>>, step_size: u64) -> Self {
        Self { domains, step_size }
    }

    /// TxNums per step.
    #[must_use]
    pub fn step_size(&self) -> u64 {
        self.step_size
    }

    /// Every domain in this generation.
    #[must_use]
    pub fn domains(&self) -> &[Arc<Domain>] {
        &self.domains
    }

    /// Looks up a domain by name.
    pub fn domain(&self, name: &str) -> CoreResult<&Domain> {
        self.domains
            .iter()
            .find(|d| d.name() == name)
            .map(|d| &**d)
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown domain: {name}")))
    }

    /// First TxNum not covered by every domain's files.
    #[must_use]
    pub fn frozen_tx_num(&self) -> TxNum {
        self.domains
            .iter()
            .map(|d| d.end_step())
            .min()
            .unwrap_or(0)
            * self.step_size
    }

    /// Newest value of `key` with the TxNum that wrote it.
    pub fn get_latest(
        &self,
        tx: &dyn ReadTx,
        domain: &str,
        key: &[u8],
    ) -> CoreResult<Option<(Vec<u8>, TxNum)>> {
        self.domain(domain)?.get_latest(tx, key, self.step_size)
    }

    /// Value of `key` visible at the start of `tx_num`.
    pub fn get_as_of(
        &self,
        tx: &dyn ReadTx,
        domain: &str,
        key: &[u8],
        tx_num: TxNum,
    ) -> CoreResult<Option<Vec<u8>>> {
        self.domain(domain)?.get_as_of(tx, key, tx_num, self.step_size)
    }

    /// TxNums in `[from, to)` at which `key` changed.
    #[allow(clippy::too_many_arguments)]
    pub fn index_range<'a>(
        &'a self,
        tx: &'a dyn ReadTx,
        domain: &str,
        key: &[u8],
        from: Option<TxNum>,
        to: Option<TxNum>,
        order: Order,
        limit: Option<usize>,
    ) -> CoreResult<IndexRange<'a>> {
        self.domain(domain)?
            .index_range(tx, key, from, to, order, limit, self.step_size)
    }

    /// Every live key of `domain` with its value at the start of `before`.
    ///
    /// `before` must not be below the domain's frozen end, since older
    /// states are not kept in full.
    pub fn state_as_of(
        &self,
        tx: &dyn ReadTx,
        domain: &str,
        before: TxNum,
        cancel: &CancelToken,
    ) -> CoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let d = self.domain(domain)?;
        let frozen = d.end_step() * self.step_size;
        if before < frozen {
            return Err(CoreError::invalid_operation(format!(
                "{domain}: state at {before} is below the frozen end {frozen}"
            )));
        }

        let mut state = BTreeMap::new();
        let mut apply = |key: &[u8], latest: &[u8]| -> CoreResult<()> {
            match decode_latest(latest)?.1 {
                Some(value) => state.insert(key.to_vec(), value),
                None => state.remove(key),
            };
            Ok(())
        };
        for files in d.files() {
            files.for_each(FileKind::Kv, cancel, |k, v| apply(k, v).map(|()| true))?;
        }
        let tail = hot::collate(tx, domain, frozen, before, cancel)?;
        for (k, v) in &tail.latest {
            apply(k, v)?;
        }
        Ok(state)
    }

    /// Summary of every registered file set.
    #[must_use]
    pub fn files(&self) -> Vec<FileInfo> {
        self.domains
            .iter()
            .flat_map(|d| d.files().iter().map(|f| f.info()))
            .collect()
    }

    /// Logs one line per domain.
    pub fn log_stats(&self) {
        for d in self.domains.iter() {
            let keys: u64 = d.files().iter().map(|f| f.key_count()).sum();
            let size: u64 = d.files().iter().map(|f| f.size()).sum();
            info!(
                domain = d.name(),
                files = d.files().len(),
                first_step = d.first_step(),
                end_step = d.end_step(),
                pruned_to = d.pruned_to(),
                keys,
                size,
                "domain stats"
            );
        }
    }

    /// Lists every source that mentions `key`, newest last, hot tail at the
    /// end.
    pub fn debug_key(&self, tx: &dyn ReadTx, domain: &str, key: &[u8]) -> CoreResult<Vec<KeyTrace>> {
        let d = self.domain(domain)?;
        let mut out = Vec::new();
        for files in d.files() {
            let latest = match files.get_latest(key) {
                Ok(latest) => latest,
                Err(e) if e.is_index_stale() => None,
                Err(e) => return Err(e),
            };
            let tx_nums = files.tx_list(key)?.map(|l| l.to_vec()).unwrap_or_default();
            if latest.is_some() || !tx_nums.is_empty() {
                out.push(KeyTrace {
                    range: Some(files.range()),
                    latest,
                    tx_nums,
                });
            }
        }
        let latest = hot::latest(tx, domain, key, 0)?;
        let tx_nums = hot::tx_nums(tx, domain, key, 0, TxNum::MAX)?;
        if latest.is_some() {
            out.push(KeyTrace {
                range: None,
                latest,
                tx_nums,
            });
        }
        Ok(out)
    }

    /// Releases this generation. Superseded files are deleted once no
    /// context holds them.
    pub fn close(self) {}
}

/// A hot-store snapshot paired with a [`Context`].
///
/// Obtained from [`Aggregator::begin_view`](crate::Aggregator::begin_view),
/// which takes the hot snapshot first. A concurrent freeze can then only
/// make rows appear in both halves, never in neither.
pub struct AggregatorView {
    tx: Arc<dyn ReadTx>,
    ctx: Context,
}

impl AggregatorView {
    pub(crate) fn new(tx: Arc<dyn ReadTx>, ctx: Context) -> Self {
        Self { tx, ctx }
    }

    /// The file-set half.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The hot half.
    #[must_use]
    pub fn tx(&self) -> &dyn ReadTx {
        self.tx.as_ref()
    }

    /// See [`Context::get_latest`].
    pub fn get_latest(&self, domain: &str, key: &[u8]) -> CoreResult<Option<(Vec<u8>, TxNum)>> {
        self.ctx.get_latest(self.tx(), domain, key)
    }

    /// See [`Context::get_as_of`].
    pub fn get_as_of(&self, domain: &str, key: &[u8], tx_num: TxNum) -> CoreResult<Option<Vec<u8>>> {
        self.ctx.get_as_of(self.tx(), domain, key, tx_num)
    }

    /// See [`Context::index_range`].
    pub fn index_range(
        &self,
        domain: &str,
        key: &[u8],
        from: Option<TxNum>,
        to: Option<TxNum>,
        order: Order,
        limit: Option<usize>,
    ) -> CoreResult<IndexRange<'_>> {
        self.ctx
            .index_range(self.tx(), domain, key, from, to, order, limit)
    }

    /// See [`Context::state_as_of`].
    pub fn state_as_of(
        &self,
        domain: &str,
        before: TxNum,
        cancel: &CancelToken,
    ) -> CoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.ctx.state_as_of(self.tx(), domain, before, cancel)
    }

    /// See [`Context::debug_key`].
    pub fn debug_key(&self, domain: &str, key: &[u8]) -> CoreResult<Vec<KeyTrace>> {
        self.ctx.debug_key(self.tx(), domain, key)
    }

    /// Releases both halves.
    pub fn close(self) {}
}

impl std::fmt::Debug for AggregatorView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorView")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
