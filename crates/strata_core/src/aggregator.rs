//! The aggregator: owns every domain and runs the maintenance pipeline.
//!
//! ## Concurrency
//!
//! The current generation is an `Arc<Vec<Arc<Domain>>>` behind a short
//! lock. Readers clone the `Arc` and never block maintenance. Freeze,
//! merge, prune, index builds and commitment persistence are serialized
//! by a maintenance mutex; each builds its new files outside the
//! generation lock and swaps the generation once at the end.
//!
//! ## Crash safety
//!
//! - A set is registered only once its `kv` file exists, and `kv` is
//!   written last
//! - Hot rows are deleted only after the set covering them is registered.
//!   Readers ignore hot rows below a domain's frozen end, and every freeze
//!   and every open deletes them, so an interrupted cleanup is finished
//!   by the next one
//! - Superseded sets are deleted when their last reader drops them
//! - The manifest records a new pruned boundary before the pruned files
//!   are dropped, so a restart deletes leftovers instead of serving them

use crate::commitment::{CommitmentCalculator, CommitmentInput};
use crate::config::AggregatorConfig;
use crate::context::{AggregatorView, Context};
use crate::dir::{DataDir, FileKind, SnapshotFile};
use crate::domain::Domain;
use crate::error::{CoreError, CoreResult};
use crate::hot::{self, HotWriter};
use crate::manifest::{CommitmentRecord, Manifest};
use crate::merge::{find_merge_range, merge_data, MergeStats};
use crate::segment::{remove_set, FileInfo, SegmentFiles, WriteOptions};
use crate::types::{Step, StepRange, TxNum};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_codec::{try_map, CancelToken};
use strata_storage::HotStore;
use tracing::{debug, info, warn};

/// Hot rows deleted per write transaction.
const HOT_DELETE_BATCH: usize = 4096;

type Generation = Arc<Vec<Arc<Domain>>>;

/// What a freeze did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeStats {
    /// Domains whose set was written from hot rows.
    pub written: Vec<String>,
    /// Domains whose set was found complete on disk and registered as is.
    pub reused: Vec<String>,
    /// Domains that already covered the range.
    pub skipped: Vec<String>,
    /// Hot rows deleted after registration.
    pub hot_rows_removed: u64,
}

/// What a prune call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Horizon actually applied, after the commitment bound.
    pub horizon: Step,
    /// File sets dropped.
    pub files_removed: usize,
    /// Hot rows deleted.
    pub hot_rows_removed: u64,
    /// True if nothing below the horizon is left to prune.
    pub done: bool,
}

impl PruneStats {
    fn absorb(&mut self, other: &PruneStats) {
        self.horizon = other.horizon;
        self.files_removed += other.files_removed;
        self.hot_rows_removed += other.hot_rows_removed;
        self.done = other.done;
    }
}

/// Snapshot aggregation engine over one data directory.
///
/// ```
/// use std::sync::Arc;
/// use strata_core::{Aggregator, AggregatorConfig, CancelToken};
/// use strata_storage::MemHotStore;
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = AggregatorConfig::default().step_size(10);
/// let agg = Aggregator::open(dir.path(), Arc::new(MemHotStore::new()), config).unwrap();
///
/// let mut w = agg.hot_writer().unwrap();
/// w.put("accounts", b"alice", b"100", 3).unwrap();
/// w.commit().unwrap();
///
/// agg.build_files(10, &CancelToken::new()).unwrap();
/// let view = agg.begin_view().unwrap();
/// assert_eq!(view.get_latest("accounts", b"alice").unwrap(), Some((b"100".to_vec(), 3)));
/// ```
pub struct Aggregator {
    dir: DataDir,
    hot: Arc<dyn HotStore>,
    config: AggregatorConfig,
    domains: RwLock<Generation>,
    manifest: Mutex<Manifest>,
    maintenance: Mutex<()>,
    is_open: RwLock<bool>,
}

impl Aggregator {
    /// Opens a data directory.
    ///
    /// Takes the directory lock, removes temp files and partial sets, loads
    /// the manifest and registers the files found on disk.
    pub fn open(path: &Path, hot: Arc<dyn HotStore>, config: AggregatorConfig) -> CoreResult<Self> {
        validate_config(&config)?;
        let started = Instant::now();

        let dir = DataDir::open(path, true)?;
        let temps = dir.remove_temp_files()?;
        let manifest = dir.load_manifest()?.unwrap_or_default();
        let domains: Vec<Arc<Domain>> = config
            .domains
            .iter()
            .map(|c| Arc::new(Domain::new(c.clone(), manifest.pruned_to(&c.name))))
            .collect();

        let agg = Self {
            dir,
            hot,
            config,
            domains: RwLock::new(Arc::new(domains)),
            manifest: Mutex::new(manifest),
            maintenance: Mutex::new(()),
            is_open: RwLock::new(true),
        };
        agg.open_folder()?;
        let leftovers = match agg.delete_frozen_hot_rows() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not delete hot rows below the frozen end");
                0
            }
        };

        info!(
            path = %path.display(),
            domains = agg.config.domains.len(),
            files = agg.files().len(),
            frozen_tx = agg.end_tx_num_frozen(),
            temps_removed = temps,
            hot_leftovers_removed = leftovers,
            took = ?started.elapsed(),
            "opened aggregator"
        );
        Ok(agg)
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Registers the file sets found on disk. Only valid while nothing is
    /// registered; use [`Aggregator::reopen_folder`] afterwards.
    pub fn open_folder(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let _m = self.maintenance.lock();
        let current = self.generation();
        if current.iter().any(|d| !d.files().is_empty()) {
            return Err(CoreError::invalid_operation(
                "file sets already registered; use reopen_folder",
            ));
        }
        let (next, _) = self.discover(&current)?;
        self.swap(&current, next)
    }

    /// Re-scans the data directory. Sets still on disk keep their open
    /// handles; sets no longer part of a chain are retired.
    pub fn reopen_folder(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let _m = self.maintenance.lock();
        let current = self.generation();
        let (next, superseded) = self.discover(&current)?;
        self.swap(&current, next)?;
        for files in superseded {
            files.mark_garbage();
        }
        Ok(())
    }

    fn discover(&self, current: &[Arc<Domain>]) -> CoreResult<(Vec<Arc<Domain>>, Vec<Arc<SegmentFiles>>)> {
        let scanned = self.dir.scan()?;
        let manifest = self.manifest.lock().clone();
        let known: HashSet<&str> = self.config.domains.iter().map(|d| d.name.as_str()).collect();
        for file in scanned.iter().filter(|f| !known.contains(f.domain.as_str())) {
            debug!(file = %file.file_name(), "ignoring file of unconfigured domain");
        }

        let mut next = Vec::with_capacity(current.len());
        let mut superseded = Vec::new();
        for domain in current {
            let name = domain.name();
            let pruned_to = manifest.pruned_to(name);
            let registered = |range: StepRange| domain.files().iter().find(|f| f.range() == range);

            let mut kinds: BTreeMap<StepRange, Vec<FileKind>> = BTreeMap::new();
            for file in scanned.iter().filter(|f| f.domain == name) {
                kinds.entry(file.range).or_default().push(file.kind);
            }

            let mut doomed: Vec<(StepRange, &str)> = Vec::new();
            let mut complete = Vec::new();
            for (&range, present) in &kinds {
                if !present.contains(&FileKind::Kv) {
                    doomed.push((range, "partial write"));
                } else if range.to <= pruned_to {
                    doomed.push((range, "below pruned boundary"));
                } else {
                    complete.push(range);
                }
            }

            // Widest range first at each start, so merge outputs win.
            complete.sort_by(|a, b| a.from.cmp(&b.from).then(b.to.cmp(&a.to)));
            let mut kept: Vec<StepRange> = Vec::new();
            for range in complete {
                if kept.iter().any(|k| k.contains(&range)) {
                    doomed.push((range, "subsumed by a merged set"));
                } else if kept.last().is_some_and(|last| range.from < last.to) {
                    warn!(domain = name, range = %range, "overlapping file set left unregistered");
                } else {
                    kept.push(range);
                }
            }

            let mut chain: Vec<Arc<SegmentFiles>> = Vec::new();
            for range in kept {
                if let Some(prev) = chain.last() {
                    if prev.range().to != range.from {
                        warn!(
                            domain = name,
                            after = %prev.range(),
                            next = %range,
                            "gap in file sets; later sets left unregistered"
                        );
                        break;
                    }
                }
                if let Some(files) = registered(range) {
                    chain.push(Arc::clone(files));
                    continue;
                }
                match SegmentFiles::open(self.dir.snapshots_dir(), name, range) {
                    Ok(files) => {
                        let missing = files.missing_indices(false);
                        if !missing.is_empty() {
                            warn!(domain = name, range = %range, ?missing, "file set needs index rebuild");
                        }
                        chain.push(Arc::new(files));
                    }
                    Err(CoreError::PartialWrite { path }) => {
                        warn!(domain = name, range = %range, file = %path.display(), "removing incomplete file set");
                        remove_set(self.dir.snapshots_dir(), name, range);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            for (range, reason) in doomed {
                if registered(range).is_some() {
                    continue;
                }
                warn!(domain = name, range = %range, reason, "removing file set");
                let files: Vec<SnapshotFile> = kinds[&range]
                    .iter()
                    .map(|&kind| SnapshotFile {
                        domain: name.to_string(),
                        range,
                        kind,
                    })
                    .collect();
                self.dir.delete_files(&files)?;
            }

            for files in domain.files() {
                if !chain.iter().any(|c| Arc::ptr_eq(c, files)) {
                    superseded.push(Arc::clone(files));
                }
            }
            let rebuilt = domain.with_pruned(chain, pruned_to);
            rebuilt.check_coverage()?;
            next.push(Arc::new(rebuilt));
        }
        Ok((next, superseded))
    }

    // ========================================================================
    // Generations
    // ========================================================================

    fn generation(&self) -> Generation {
        Arc::clone(&self.domains.read())
    }

    fn swap(&self, expected: &Generation, next: Vec<Arc<Domain>>) -> CoreResult<()> {
        let mut guard = self.domains.write();
        if !Arc::ptr_eq(&guard, expected) {
            return Err(CoreError::conflict("domain list changed during maintenance"));
        }
        *guard = Arc::new(next);
        Ok(())
    }

    /// Takes an immutable snapshot of every domain's file chain.
    pub fn make_context(&self) -> CoreResult<Context> {
        self.ensure_open()?;
        Ok(Context::new(self.generation(), self.config.step_size))
    }

    /// Opens a hot snapshot and then a context.
    pub fn begin_view(&self) -> CoreResult<AggregatorView> {
        self.ensure_open()?;
        let tx = self.hot.begin_ro()?;
        let ctx = self.make_context()?;
        Ok(AggregatorView::new(tx, ctx))
    }

    /// Starts a hot write transaction. Writes below
    /// [`Aggregator::end_tx_num_frozen`] are rejected.
    pub fn hot_writer(&self) -> CoreResult<HotWriter<'_>> {
        self.ensure_open()?;
        let names = self.config.domains.iter().map(|d| d.name.clone()).collect();
        Ok(HotWriter::new(self.hot.begin_rw()?, names, self.end_tx_num_frozen()))
    }

    /// First TxNum not yet frozen in every domain.
    #[must_use]
    pub fn end_tx_num_frozen(&self) -> TxNum {
        Context::new(self.generation(), self.config.step_size).frozen_tx_num()
    }

    /// Summary of every registered file set.
    #[must_use]
    pub fn files(&self) -> Vec<FileInfo> {
        Context::new(self.generation(), self.config.step_size).files()
    }

    /// Returns true if some set lacks its `bt` index.
    #[must_use]
    pub fn needs_index_rebuild(&self) -> bool {
        self.generation().iter().any(|d| d.needs_index_rebuild())
    }

    /// Last persisted commitment.
    #[must_use]
    pub fn last_commitment(&self) -> Option<CommitmentRecord> {
        self.manifest.lock().commitment.clone()
    }

    /// Engine settings.
    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Root of the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The hot store.
    #[must_use]
    pub fn hot(&self) -> &Arc<dyn HotStore> {
        &self.hot
    }

    fn write_options(&self, domain: &Domain) -> WriteOptions {
        WriteOptions {
            codec: self.config.codec.clone(),
            btree_m: domain.config().btree_m,
            optional_indices: self.config.build_optional_indices,
            index_workers: self.config.index_workers,
        }
    }

    // ========================================================================
    // Freeze
    // ========================================================================

    /// Moves `range` from the hot store into one new set per domain.
    ///
    /// `range` must start at the first unfrozen step. Re-running a freeze
    /// whose sets are already registered or already on disk writes nothing
    /// and only finishes deleting the hot rows.
    pub fn freeze(&self, range: StepRange, cancel: &CancelToken) -> CoreResult<FreezeStats> {
        self.ensure_open()?;
        let _m = self.maintenance.lock();
        let started = Instant::now();
        let step = self.config.step_size;
        let current = self.generation();
        let mut stats = FreezeStats::default();

        let mut todo = Vec::new();
        for (i, d) in current.iter().enumerate() {
            let end = d.end_step();
            if range.to <= end {
                stats.skipped.push(d.name().to_string());
            } else if range.from == end {
                todo.push(i);
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "{}: cannot freeze {range}, first unfrozen step is {end}",
                    d.name()
                )));
            }
        }

        let (from_tx, to_tx) = (range.from_tx(step), range.to_tx(step));
        let snapshots = self.dir.snapshots_dir();
        let ro = self.hot.begin_ro()?;
        let built = try_map(todo, self.config.compress_workers, |i| {
            let d = &current[i];
            let opts = self.write_options(d);
            if self.dir.file_path(d.name(), range, FileKind::Kv).exists() {
                match SegmentFiles::open(snapshots, d.name(), range) {
                    Ok(files) => {
                        let missing = files.missing_indices(opts.optional_indices);
                        if !missing.is_empty() {
                            files.build_indices(&missing, opts.btree_m, opts.index_workers, cancel)?;
                        }
                        debug!(domain = d.name(), range = %range, "reusing file set found on disk");
                        return Ok((i, Arc::new(files), true));
                    }
                    Err(CoreError::PartialWrite { .. }) => remove_set(snapshots, d.name(), range),
                    Err(e) => return Err(e),
                }
            }
            let data = hot::collate(ro.as_ref(), d.name(), from_tx, to_tx, cancel)?;
            let files = SegmentFiles::write(snapshots, d.name(), range, &data, &opts, cancel)?;
            Ok::<_, CoreError>((i, Arc::new(files), false))
        })?;
        drop(ro);
        cancel.check()?;

        let mut next: Vec<Arc<Domain>> = current.to_vec();
        for (i, files, reused) in built {
            let d = &next[i];
            if reused {
                stats.reused.push(d.name().to_string());
            } else {
                stats.written.push(d.name().to_string());
            }
            let mut chain = d.files().to_vec();
            chain.push(files);
            next[i] = Arc::new(d.with_files(chain));
        }
        self.swap(&current, next)?;

        let removed = self.delete_frozen_hot_rows()?;
        stats.hot_rows_removed = removed;

        info!(
            range = %range,
            written = stats.written.len(),
            reused = stats.reused.len(),
            skipped = stats.skipped.len(),
            hot_rows_removed = removed,
            took = ?started.elapsed(),
            "froze step range"
        );
        Ok(stats)
    }

    /// Freezes every complete step below `to_tx_num`, one step at a time.
    /// Returns the ranges frozen.
    pub fn build_files(&self, to_tx_num: TxNum, cancel: &CancelToken) -> CoreResult<Vec<StepRange>> {
        let target = to_tx_num / self.config.step_size;
        let mut frozen = Vec::new();
        loop {
            let start = self.end_tx_num_frozen() / self.config.step_size;
            if start >= target {
                break;
            }
            let range = StepRange::new(start, start + 1)?;
            self.freeze(range, cancel)?;
            frozen.push(range);
        }
        Ok(frozen)
    }

    /// Deletes every hot row below each domain's frozen end, including rows
    /// left behind by an earlier freeze whose cleanup did not commit.
    fn delete_frozen_hot_rows(&self) -> CoreResult<u64> {
        let step = self.config.step_size;
        let mut total = 0;
        for d in self.generation().iter() {
            let names = [d.name().to_string()];
            let (removed, _) = self.delete_hot_rows(&names, 0, d.hot_floor(step), None)?;
            total += removed;
        }
        Ok(total)
    }

    /// Deletes hot rows of `names` in `[from, to)`, committing every batch.
    /// Returns the count and whether the range is now empty.
    fn delete_hot_rows(
        &self,
        names: &[String],
        from: TxNum,
        to: TxNum,
        budget: Option<u64>,
    ) -> CoreResult<(u64, bool)> {
        let mut total = 0u64;
        if from >= to {
            return Ok((0, true));
        }
        loop {
            let mut tx = self.hot.begin_rw()?;
            let mut round = 0u64;
            for name in names {
                let left = budget.map_or(u64::MAX, |b| b.saturating_sub(total + round));
                let limit = usize::try_from(left).unwrap_or(usize::MAX).min(HOT_DELETE_BATCH);
                if limit == 0 {
                    break;
                }
                round += hot::prune(tx.as_mut(), name, from, to, limit)?;
            }
            tx.commit()?;
            total += round;
            if round == 0 {
                return Ok((total, true));
            }
            if budget.is_some_and(|b| total >= b) {
                return Ok((total, false));
            }
        }
    }

    // ========================================================================
    // Indices
    // ========================================================================

    /// Builds every missing `bt` index. Returns the number built.
    pub fn build_missed_indices(&self, cancel: &CancelToken) -> CoreResult<usize> {
        self.build_indices(false, cancel)
    }

    /// Builds every missing `bt`, `vi` and `efi` index.
    pub fn build_optional_missed_indices(&self, cancel: &CancelToken) -> CoreResult<usize> {
        self.build_indices(true, cancel)
    }

    fn build_indices(&self, optional: bool, cancel: &CancelToken) -> CoreResult<usize> {
        self.ensure_open()?;
        let _m = self.maintenance.lock();
        let started = Instant::now();
        let current = self.generation();

        let mut work = Vec::new();
        for d in current.iter() {
            for files in d.files() {
                let missing = files.missing_indices(optional);
                if !missing.is_empty() {
                    work.push((Arc::clone(files), d.config().btree_m, missing));
                }
            }
        }
        let count = work.iter().map(|(_, _, kinds)| kinds.len()).sum();
        if count == 0 {
            return Ok(0);
        }
        try_map(work, self.config.index_workers, |(files, m, kinds)| {
            files.build_indices(&kinds, m, 1, cancel)
        })?;
        info!(indices = count, optional, took = ?started.elapsed(), "built missing indices");
        Ok(count)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Performs at most one merge per domain. Returns what was merged.
    pub fn merge_once(&self, cancel: &CancelToken) -> CoreResult<Vec<MergeStats>> {
        self.ensure_open()?;
        let _m = self.maintenance.lock();
        let started = Instant::now();
        let current = self.generation();

        let plans: Vec<_> = current
            .iter()
            .enumerate()
            .filter_map(|(i, d)| {
                find_merge_range(&d.ranges(), self.config.merge_fanout, self.config.max_merge_steps)
                    .map(|run| (i, run))
            })
            .collect();
        if plans.is_empty() {
            return Ok(Vec::new());
        }

        let snapshots = self.dir.snapshots_dir();
        let merged = try_map(plans, self.config.compress_workers, |(i, run)| {
            let d = &current[i];
            let inputs = &d.files()[run.clone()];
            let (Some(first), Some(last)) = (inputs.first(), inputs.last()) else {
                return Err(CoreError::invalid_operation("empty merge run"));
            };
            let range = StepRange::new(first.range().from, last.range().to)?;
            let drop_tombstones = range.from == d.first_step();
            let (data, dropped) = merge_data(inputs, drop_tombstones, cancel)?;
            let files = SegmentFiles::write(snapshots, d.name(), range, &data, &self.write_options(d), cancel)?;
            let stats = MergeStats {
                domain: d.name().to_string(),
                range,
                inputs: inputs.len(),
                keys: data.latest.len(),
                tombstones_dropped: dropped,
            };
            Ok((i, run, Arc::new(files), stats))
        })?;
        cancel.check()?;

        let mut next: Vec<Arc<Domain>> = current.to_vec();
        let mut garbage = Vec::new();
        let mut out = Vec::with_capacity(merged.len());
        for (i, run, files, stats) in merged {
            let d = &next[i];
            let mut chain = d.files().to_vec();
            garbage.extend(chain.splice(run, [files]));
            next[i] = Arc::new(d.with_files(chain));
            out.push(stats);
        }
        self.swap(&current, next)?;
        for files in garbage {
            files.mark_garbage();
        }

        for s in &out {
            info!(
                domain = %s.domain,
                range = %s.range,
                inputs = s.inputs,
                keys = s.keys,
                tombstones_dropped = s.tombstones_dropped,
                took = ?started.elapsed(),
                "merged file sets"
            );
        }
        Ok(out)
    }

    /// Merges until no domain has a candidate. Returns the merge count.
    pub fn merge_loop(&self, cancel: &CancelToken) -> CoreResult<usize> {
        let mut total = 0;
        loop {
            let merged = self.merge_once(cancel)?;
            if merged.is_empty() {
                return Ok(total);
            }
            total += merged.len();
        }
    }

    // ========================================================================
    // Prune
    // ========================================================================

    fn effective_horizon(&self, horizon: Step) -> Step {
        if !self.config.require_commitment_before_prune {
            return horizon;
        }
        match &self.manifest.lock().commitment {
            Some(c) => horizon.min(c.tx_num / self.config.step_size),
            None => 0,
        }
    }

    /// Returns true if a prune at `horizon` would drop at least one set.
    #[must_use]
    pub fn can_prune(&self, horizon: Step) -> bool {
        let effective = self.effective_horizon(horizon);
        self.generation().iter().any(|d| {
            d.config().prunable && d.files().first().is_some_and(|f| f.range().to <= effective)
        })
    }

    /// Drops up to `prune_batch` sets per prunable domain lying wholly
    /// below `horizon`, and a bounded number of leftover hot rows.
    pub fn prune(&self, horizon: Step, cancel: &CancelToken) -> CoreResult<PruneStats> {
        self.ensure_open()?;
        let _m = self.maintenance.lock();
        let started = Instant::now();
        let effective = self.effective_horizon(horizon);
        let step = self.config.step_size;
        let current = self.generation();

        let mut manifest = self.manifest.lock().clone();
        let mut next: Vec<Arc<Domain>> = current.to_vec();
        let mut garbage = Vec::new();
        let mut names = Vec::new();
        let mut more = false;
        let mut hot_to = TxNum::MAX;
        for (i, d) in current.iter().enumerate() {
            if !d.config().prunable {
                continue;
            }
            names.push(d.name().to_string());
            hot_to = hot_to.min(d.end_step().min(effective) * step);

            let eligible = d.files().iter().take_while(|f| f.range().to <= effective).count();
            let n = eligible.min(self.config.prune_batch);
            more |= eligible > n;
            if n == 0 {
                continue;
            }
            let pruned_to = d.files()[n - 1].range().to;
            manifest.pruned_to.insert(d.name().to_string(), pruned_to);
            garbage.extend(d.files()[..n].iter().cloned());
            next[i] = Arc::new(d.with_pruned(d.files()[n..].to_vec(), pruned_to));
        }
        cancel.check()?;

        let files_removed = garbage.len();
        if files_removed > 0 {
            self.dir.save_manifest(&manifest)?;
            *self.manifest.lock() = manifest;
            self.swap(&current, next)?;
            for files in garbage {
                files.mark_garbage();
            }
        }

        let budget = (self.config.prune_batch as u64).saturating_mul(1024);
        let (hot_rows_removed, hot_done) = if names.is_empty() || hot_to == TxNum::MAX {
            (0, true)
        } else {
            self.delete_hot_rows(&names, 0, hot_to, Some(budget))?
        };

        let stats = PruneStats {
            horizon: effective,
            files_removed,
            hot_rows_removed,
            done: !more && hot_done,
        };
        if files_removed > 0 || hot_rows_removed > 0 {
            info!(
                requested = horizon,
                horizon = effective,
                files_removed,
                hot_rows_removed,
                done = stats.done,
                took = ?started.elapsed(),
                "pruned"
            );
        }
        Ok(stats)
    }

    /// Calls [`Aggregator::prune`] until done or `timeout` elapses.
    /// Running out of time is not an error; `done` is then false.
    pub fn prune_with_timeout(
        &self,
        horizon: Step,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> CoreResult<PruneStats> {
        let token = cancel.with_timeout(timeout);
        let mut total = PruneStats::default();
        loop {
            if token.is_expired() {
                total.done = false;
                return Ok(total);
            }
            let stats = match self.prune(horizon, &token) {
                Ok(stats) => stats,
                Err(CoreError::Cancelled) if token.is_expired() && !cancel.is_cancelled() => {
                    total.done = false;
                    return Ok(total);
                }
                Err(e) => return Err(e),
            };
            total.absorb(&stats);
            if stats.done || (stats.files_removed == 0 && stats.hot_rows_removed == 0) {
                return Ok(total);
            }
        }
    }

    // ========================================================================
    // Commitment
    // ========================================================================

    /// Computes the commitment at `tx_num` and persists it in the manifest.
    pub fn compute_commitment(
        &self,
        calculator: &dyn CommitmentCalculator,
        tx_num: TxNum,
        cancel: &CancelToken,
    ) -> CoreResult<Vec<u8>> {
        self.ensure_open()?;
        let started = Instant::now();
        let view = self.begin_view()?;
        let root = calculator.compute(&CommitmentInput::new(&view, tx_num, cancel))?;
        drop(view);
        cancel.check()?;

        let _m = self.maintenance.lock();
        let mut manifest = self.manifest.lock();
        let mut updated = manifest.clone();
        updated.commitment = Some(CommitmentRecord {
            tx_num,
            root: root.clone(),
        });
        self.dir.save_manifest(&updated)?;
        *manifest = updated;
        info!(tx_num, root_len = root.len(), took = ?started.elapsed(), "persisted commitment");
        Ok(root)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Closes the aggregator. Waits for running maintenance and saves the
    /// manifest. Open views stay readable.
    pub fn close(&self) -> CoreResult<()> {
        let _m = self.maintenance.lock();
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        self.dir.save_manifest(&self.manifest.lock())?;
        *is_open = false;
        info!(path = %self.dir.path().display(), "closed aggregator");
        Ok(())
    }

    /// Checks if the aggregator is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }
}

fn validate_config(config: &AggregatorConfig) -> CoreResult<()> {
    if config.step_size == 0 {
        return Err(CoreError::invalid_operation("step_size must be positive"));
    }
    if config.merge_fanout < 2 {
        return Err(CoreError::invalid_operation("merge_fanout must be at least 2"));
    }
    if config.domains.is_empty() {
        return Err(CoreError::invalid_operation("at least one domain is required"));
    }
    let mut seen = HashSet::new();
    for d in &config.domains {
        if d.name.is_empty() || d.name.contains(['.', '/', '\\']) {
            return Err(CoreError::invalid_operation(format!("invalid domain name {:?}", d.name)));
        }
        if !seen.insert(d.name.as_str()) {
            return Err(CoreError::invalid_operation(format!("duplicate domain {:?}", d.name)));
        }
    }
    Ok(())
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("path", &self.dir.path())
            .field("is_open", &self.is_open())
            .field("frozen_tx", &self.end_tx_num_frozen())
            .finish_non_exhaustive()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use crate::types::Order;
    use strata_storage::MemHotStore;

    const STEP: u64 = 10;

    fn config() -> AggregatorConfig {
        AggregatorConfig::default()
            .step_size(STEP)
            .prune_batch(2)
            .domains(vec![
                DomainConfig::new("accounts").btree_m(4).prunable(true),
                DomainConfig::new("storage").btree_m(4),
            ])
    }

    fn open(path: &Path, hot: &Arc<MemHotStore>) -> Aggregator {
        Aggregator::open(path, Arc::clone(hot) as Arc<dyn HotStore>, config()).unwrap()
    }

    fn write(agg: &Aggregator, changes: &[(&str, &[u8], Option<&[u8]>, TxNum)]) {
        let mut w = agg.hot_writer().unwrap();
        for &(domain, key, value, tx) in changes {
            match value {
                Some(v) => w.put(domain, key, v, tx).unwrap(),
                None => w.delete(domain, key, tx).unwrap(),
            }
        }
        w.commit().unwrap();
    }

    fn snapshot_names(path: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(path.join("snapshots"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// One change per step for `alice`, plus a delete of `bob` in step 2.
    fn populate(agg: &Aggregator, steps: u64) {
        for s in 0..steps {
            let value = format!("v{s}");
            write(agg, &[("accounts", b"alice", Some(value.as_bytes()), s * STEP + 1)]);
        }
        write(
            agg,
            &[
                ("accounts", b"bob", Some(b"b0"), 2),
                ("storage", b"slot", Some(b"s0"), 3),
            ],
        );
        if steps > 2 {
            write(agg, &[("accounts", b"bob", None, 2 * STEP + 5)]);
        }
    }

    struct KeyCount;

    impl CommitmentCalculator for KeyCount {
        fn compute(&self, input: &CommitmentInput<'_>) -> CoreResult<Vec<u8>> {
            let mut n = 0u64;
            for domain in input.domain_names() {
                n += input.state(domain)?.len() as u64;
            }
            Ok(n.to_be_bytes().to_vec())
        }
    }

    #[test]
    fn freeze_moves_hot_rows_into_sets() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        populate(&agg, 3);
        let before = hot.table_len("accounts.vals");
        assert_eq!(before, 5);

        let frozen = agg.build_files(2 * STEP, &CancelToken::new()).unwrap();
        assert_eq!(frozen.len(), 2);
        assert_eq!(agg.end_tx_num_frozen(), 2 * STEP);
        assert_eq!(hot.table_len("accounts.vals"), 2);
        assert_eq!(hot.table_len("accounts.keys"), 2);

        let view = agg.begin_view().unwrap();
        assert_eq!(view.get_latest("accounts", b"alice").unwrap(), Some((b"v2".to_vec(), 21)));
        assert_eq!(view.get_latest("accounts", b"bob").unwrap(), None);
        assert_eq!(view.get_as_of("accounts", b"alice", 12).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(view.get_as_of("accounts", b"bob", 25).unwrap(), Some(b"b0".to_vec()));
        assert_eq!(view.get_latest("storage", b"slot").unwrap(), Some((b"s0".to_vec(), 3)));
        let txs: Vec<_> = view
            .index_range("accounts", b"alice", None, None, Order::Asc, None)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(txs, vec![1, 11, 21]);
    }

    #[test]
    fn freeze_requires_first_unfrozen_step() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        let err = agg
            .freeze(StepRange::new(1, 2).unwrap(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn repeated_freeze_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        populate(&agg, 1);
        let range = StepRange::new(0, 1).unwrap();
        let first = agg.freeze(range, &CancelToken::new()).unwrap();
        assert_eq!(first.written.len(), 2);
        let files = snapshot_names(dir.path());

        let second = agg.freeze(range, &CancelToken::new()).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.skipped.len(), 2);
        assert_eq!(snapshot_names(dir.path()), files);
        assert_eq!(agg.files().len(), 2);
    }

    #[test]
    fn hot_writes_below_frozen_end_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        populate(&agg, 1);
        agg.build_files(STEP, &CancelToken::new()).unwrap();
        let mut w = agg.hot_writer().unwrap();
        assert!(w.put("accounts", b"late", b"x", STEP - 1).is_err());
        w.put("accounts", b"late", b"x", STEP).unwrap();
    }

    #[test]
    fn merge_keeps_reads_and_defers_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        populate(&agg, 4);
        let cancel = CancelToken::new();
        agg.build_files(4 * STEP, &cancel).unwrap();
        let old = dir.path().join("snapshots").join("v1-accounts.0-1.kv");
        assert!(old.exists());

        let held = agg.begin_view().unwrap();
        assert_eq!(agg.merge_loop(&cancel).unwrap(), 6);
        let ranges: Vec<_> = agg.files().iter().map(|f| f.range.to_string()).collect();
        assert_eq!(ranges, vec!["0-4", "0-4"]);

        // The held view still reads the superseded sets.
        assert!(old.exists());
        assert_eq!(held.get_latest("accounts", b"alice").unwrap(), Some((b"v3".to_vec(), 31)));
        drop(held);
        assert!(!old.exists());

        let view = agg.begin_view().unwrap();
        assert_eq!(view.get_latest("accounts", b"alice").unwrap(), Some((b"v3".to_vec(), 31)));
        assert_eq!(view.get_latest("accounts", b"bob").unwrap(), None);
        assert_eq!(view.get_as_of("accounts", b"alice", 12).unwrap(), Some(b"v1".to_vec()));
        assert_eq!(view.get_as_of("accounts", b"bob", 25).unwrap(), Some(b"b0".to_vec()));
        assert_eq!(view.get_as_of("accounts", b"bob", 26).unwrap(), None);

        // The merged range starts at the first step, so the tombstone is gone.
        let trace = view.debug_key("accounts", b"bob").unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].latest, None);
        assert_eq!(trace[0].tx_nums, vec![2, 25]);
    }

    #[test]
    fn prune_waits_for_commitment() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        populate(&agg, 4);
        let cancel = CancelToken::new();
        agg.build_files(4 * STEP, &cancel).unwrap();

        assert!(!agg.can_prune(2));
        let stats = agg.prune(2, &cancel).unwrap();
        assert_eq!(stats.files_removed, 0);
        assert_eq!(stats.horizon, 0);

        let root = agg.compute_commitment(&KeyCount, 4 * STEP, &cancel).unwrap();
        assert_eq!(root, 2u64.to_be_bytes().to_vec());
        assert_eq!(agg.last_commitment().unwrap().tx_num, 4 * STEP);

        assert!(agg.can_prune(2));
        let stats = agg.prune(2, &cancel).unwrap();
        assert_eq!(stats.files_removed, 2);
        assert!(stats.done);

        let view = agg.begin_view().unwrap();
        let d = view.context().domain("accounts").unwrap();
        assert_eq!(d.pruned_to(), 2);
        assert_eq!(view.context().domain("storage").unwrap().files().len(), 4);
        assert!(matches!(
            view.get_as_of("accounts", b"alice", 5),
            Err(CoreError::RetentionViolation { .. })
        ));
        assert_eq!(view.get_as_of("accounts", b"alice", 25).unwrap(), Some(b"v2".to_vec()));
        drop(view);

        // The boundary survives a restart.
        drop(agg);
        let agg = open(dir.path(), &hot);
        let ctx = agg.make_context().unwrap();
        assert_eq!(ctx.domain("accounts").unwrap().pruned_to(), 2);
        assert_eq!(ctx.domain("accounts").unwrap().first_step(), 2);
    }

    #[test]
    fn prune_with_timeout_respects_batches() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        populate(&agg, 6);
        let cancel = CancelToken::new();
        agg.build_files(6 * STEP, &cancel).unwrap();
        agg.compute_commitment(&KeyCount, 6 * STEP, &cancel).unwrap();

        let stats = agg.prune(5, &cancel).unwrap();
        assert_eq!(stats.files_removed, 2);
        assert!(!stats.done);
        let stats = agg
            .prune_with_timeout(5, Duration::from_secs(30), &cancel)
            .unwrap();
        assert_eq!(stats.files_removed, 3);
        assert!(stats.done);
    }

    #[test]
    fn reopen_cleans_partial_and_subsumed_sets() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        {
            let agg = open(dir.path(), &hot);
            populate(&agg, 2);
            let cancel = CancelToken::new();
            agg.build_files(2 * STEP, &cancel).unwrap();
            agg.merge_loop(&cancel).unwrap();
        }
        let snapshots = dir.path().join("snapshots");
        // Leftovers of a merge whose inputs were never deleted, and of an
        // interrupted freeze.
        for ext in ["ef", "v", "kv"] {
            std::fs::copy(
                snapshots.join(format!("v1-accounts.0-2.{ext}")),
                snapshots.join(format!("v1-accounts.0-1.{ext}")),
            )
            .unwrap();
        }
        std::fs::write(snapshots.join("v1-accounts.2-3.ef"), b"partial").unwrap();
        std::fs::write(snapshots.join("v1-accounts.2-3.v.tmp"), b"partial").unwrap();

        let agg = open(dir.path(), &hot);
        let names = snapshot_names(dir.path());
        assert!(!names.iter().any(|n| n.contains(".0-1.") || n.contains(".2-3.")));
        let view = agg.begin_view().unwrap();
        assert_eq!(view.get_latest("accounts", b"alice").unwrap(), Some((b"v1".to_vec(), 11)));
    }

    #[test]
    fn missing_index_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        {
            let agg = open(dir.path(), &hot);
            populate(&agg, 1);
            agg.build_files(STEP, &CancelToken::new()).unwrap();
        }
        std::fs::remove_file(dir.path().join("snapshots").join("v1-accounts.0-1.bt")).unwrap();

        let agg = open(dir.path(), &hot);
        assert!(agg.needs_index_rebuild());
        let view = agg.begin_view().unwrap();
        assert!(view.get_latest("accounts", b"alice").unwrap_err().is_index_stale());

        assert_eq!(agg.build_missed_indices(&CancelToken::new()).unwrap(), 1);
        assert!(!agg.needs_index_rebuild());
        assert_eq!(view.get_latest("accounts", b"alice").unwrap(), Some((b"v0".to_vec(), 1)));
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let _agg = open(dir.path(), &hot);
        let err = Aggregator::open(dir.path(), hot as Arc<dyn HotStore>, config()).unwrap_err();
        assert!(matches!(err, CoreError::DataDirLocked));
    }

    #[test]
    fn closed_aggregator_rejects_work() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemHotStore::new());
        let agg = open(dir.path(), &hot);
        agg.close().unwrap();
        assert!(!agg.is_open());
        assert!(matches!(agg.begin_view(), Err(CoreError::Closed)));
        assert!(matches!(agg.merge_loop(&CancelToken::new()), Err(CoreError::Closed)));
        agg.close().unwrap();
    }

    #[test]
    fn rejects_bad_config() {
        let dir = tempfile::tempdir().unwrap();
        let hot: Arc<dyn HotStore> = Arc::new(MemHotStore::new());
        for bad in [
            config().step_size(0),
            config().merge_fanout(1),
            config().domains(vec![DomainConfig::new("a"), DomainConfig::new("a")]),
            config().domains(vec![DomainConfig::new("a.b")]),
        ] {
            assert!(Aggregator::open(dir.path(), Arc::clone(&hot), bad).is_err());
        }
    }
}
