//! Retirement: deciding when executed blocks become immutable files, and
//! driving the aggregator pipeline after them.
//!
//! One [`RetireScheduler::tick`] runs, in order:
//!
//! 1. [`can_retire`] on execution progress and the frozen block count
//! 2. block freezing through the [`BlockFreezer`] collaborator
//! 3. [`Aggregator::build_files`] up to the last TxNum of the frozen blocks
//! 4. [`Aggregator::merge_loop`]
//! 5. [`Aggregator::build_missed_indices`]
//! 6. [`Aggregator::prune`], when a retention is configured
//!
//! A failing stage is logged and recorded in the [`RetireOutcome`]; later
//! stages that do not depend on it still run, and the next tick retries.

use crate::aggregator::{Aggregator, PruneStats};
use crate::config::RetireConfig;
use crate::error::{CoreError, CoreResult};
use crate::txnums::TxNums;
use crate::types::StepRange;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use strata_codec::CancelToken;
use tracing::{debug, info, warn};

/// Block ranges are retired in jumps of these multiples of `min_batch`,
/// largest first, picked by how `from` is aligned.
const JUMP_LADDER: [u64; 4] = [500, 100, 10, 1];

/// Decides whether enough immutable blocks have accumulated past the frozen
/// boundary. Returns the block range `[from, to)` to freeze.
///
/// `frozen` is the number of blocks already frozen. Blocks within
/// `immutability_threshold` of `forward` are never retired.
#[must_use]
pub fn can_retire(forward: u64, frozen: u64, config: &RetireConfig) -> Option<(u64, u64)> {
    let batch = config.min_batch.max(1);
    let limit = forward.checked_sub(config.immutability_threshold)?;
    if limit <= frozen {
        return None;
    }
    let from = frozen / batch * batch;
    let to = limit / batch * batch;

    let max_jump = JUMP_LADDER
        .iter()
        .map(|m| m.saturating_mul(batch))
        .find(|&j| from % j == 0)
        .unwrap_or(batch);
    let available = max_jump.min(to.saturating_sub(from));
    let jump = JUMP_LADDER
        .iter()
        .map(|m| m.saturating_mul(batch))
        .find(|&j| available >= j)?;
    Some((from, from + jump))
}

/// Freezes blocks into block files. Implemented outside the engine.
pub trait BlockFreezer: Send + Sync {
    /// Number of blocks already frozen.
    fn frozen_blocks(&self) -> u64;

    /// Freezes blocks `[from, to)`. Must tolerate `from` below
    /// [`BlockFreezer::frozen_blocks`].
    fn retire_blocks(&self, from: u64, to: u64, cancel: &CancelToken) -> CoreResult<()>;
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct RetireOutcome {
    /// Block range frozen.
    pub retired: Option<(u64, u64)>,
    /// Step ranges frozen.
    pub frozen: Vec<StepRange>,
    /// Merges performed.
    pub merged: usize,
    /// Indices built.
    pub indices_built: usize,
    /// Prune result, when a retention is configured.
    pub pruned: Option<PruneStats>,
    /// One message per failed stage.
    pub errors: Vec<String>,
}

impl RetireOutcome {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn record<T>(&mut self, stage: &str, result: CoreResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(stage, error = %e, "retire stage failed");
                self.errors.push(format!("{stage}: {e}"));
                None
            }
        }
    }
}

/// Runs the retirement pipeline against one aggregator.
pub struct RetireScheduler {
    agg: Arc<Aggregator>,
    freezer: Arc<dyn BlockFreezer>,
    config: RetireConfig,
    running: AtomicBool,
}

impl RetireScheduler {
    /// Creates a scheduler.
    pub fn new(agg: Arc<Aggregator>, freezer: Arc<dyn BlockFreezer>, config: RetireConfig) -> Self {
        Self {
            agg,
            freezer,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &RetireConfig {
        &self.config
    }

    /// Runs one pass of the pipeline for execution progress `forward`.
    /// A tick started while another is running returns immediately.
    pub fn tick(&self, forward: u64, cancel: &CancelToken) -> RetireOutcome {
        let mut out = RetireOutcome::default();
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("retire tick already running");
            return out;
        }
        let started = Instant::now();
        self.run(forward, cancel, &mut out);
        self.running.store(false, Ordering::Release);

        if out.retired.is_some() || !out.frozen.is_empty() || out.merged > 0 || !out.is_ok() {
            info!(
                forward,
                retired = ?out.retired,
                frozen_steps = out.frozen.len(),
                merged = out.merged,
                indices_built = out.indices_built,
                errors = out.errors.len(),
                took = ?started.elapsed(),
                "retire tick"
            );
        }
        out
    }

    fn run(&self, forward: u64, cancel: &CancelToken, out: &mut RetireOutcome) {
        if let Some((from, to)) = can_retire(forward, self.freezer.frozen_blocks(), &self.config) {
            if out
                .record("retire_blocks", self.freezer.retire_blocks(from, to, cancel))
                .is_some()
            {
                out.retired = Some((from, to));
            }
        }
        if cancel.is_cancelled() {
            return;
        }

        if let Some(Some(to_tx)) = out.record("frozen_tx", self.frozen_blocks_end_tx()) {
            if let Some(frozen) = out.record("build_files", self.agg.build_files(to_tx, cancel)) {
                out.frozen = frozen;
            }
        }
        if cancel.is_cancelled() {
            return;
        }

        out.merged = out.record("merge", self.agg.merge_loop(cancel)).unwrap_or(0);
        let indices = if self.agg.config().build_optional_indices {
            self.agg.build_optional_missed_indices(cancel)
        } else {
            self.agg.build_missed_indices(cancel)
        };
        out.indices_built = out.record("build_indices", indices).unwrap_or(0);
        if cancel.is_cancelled() {
            return;
        }

        if let Some(retention) = self.config.retention_steps {
            let end_step = self.agg.end_tx_num_frozen() / self.agg.config().step_size;
            let horizon = end_step.saturating_sub(retention);
            out.pruned = out.record("prune", self.agg.prune(horizon, cancel));
        }
    }

    /// First TxNum after the last frozen block, if the block is known.
    fn frozen_blocks_end_tx(&self) -> CoreResult<Option<u64>> {
        let Some(last) = self.freezer.frozen_blocks().checked_sub(1) else {
            return Ok(None);
        };
        let tx = self.agg.hot().begin_ro()?;
        Ok(TxNums::max(tx.as_ref(), last)?.map(|max| max + 1))
    }

    /// Runs [`RetireScheduler::tick`] every `interval` on a background
    /// thread, with `progress` supplying execution progress.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        progress: impl Fn() -> u64 + Send + 'static,
    ) -> CoreResult<RetireHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("strata-retire".to_string())
            .spawn(move || loop {
                self.tick(progress(), &token);
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(CoreError::Io)?;
        Ok(RetireHandle {
            stop_tx: Some(stop_tx),
            cancel,
            thread: Some(thread),
        })
    }
}

impl std::fmt::Debug for RetireScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetireScheduler")
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Stops a spawned scheduler when dropped.
#[derive(Debug)]
pub struct RetireHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl RetireHandle {
    /// Cancels the running tick, if any, and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("retire thread panicked");
            }
        }
    }
}

impl Drop for RetireHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
