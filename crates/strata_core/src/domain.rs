//! A named key space: its frozen file chain plus the hot tail.
//!
//! A [`Domain`] value is immutable. Freezing, merging and pruning build a
//! new value and swap it into the aggregator's current generation, so a
//! reader holding one sees a fixed chain of file sets for its whole life.

use crate::config::DomainConfig;
use crate::error::{CoreError, CoreResult};
use crate::hot;
use crate::inverted::TxNumList;
use crate::segment::SegmentFiles;
use crate::types::{Order, Step, StepRange, TxNum};
use std::collections::VecDeque;
use std::sync::Arc;
use strata_storage::ReadTx;

/// Frozen state of one domain.
#[derive(Debug, Clone)]
pub struct Domain {
    config: DomainConfig,
    files: Vec<Arc<SegmentFiles>>,
    pruned_to: Step,
}

impl Domain {
    /// Creates a domain with no files.
    #[must_use]
    pub fn new(config: DomainConfig, pruned_to: Step) -> Self {
        Self {
            config,
            files: Vec::new(),
            pruned_to,
        }
    }

    /// Domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Per-domain settings.
    #[must_use]
    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    /// Registered file sets, oldest first.
    #[must_use]
    pub fn files(&self) -> &[Arc<SegmentFiles>] {
        &self.files
    }

    /// Steps below this have been discarded.
    #[must_use]
    pub fn pruned_to(&self) -> Step {
        self.pruned_to
    }

    /// First step not covered by a file set.
    #[must_use]
    pub fn end_step(&self) -> Step {
        self.files.last().map_or(self.pruned_to, |f| f.range().to)
    }

    /// First step covered by a file set, or [`Domain::end_step`] when there
    /// are none.
    #[must_use]
    pub fn first_step(&self) -> Step {
        self.files.first().map_or(self.end_step(), |f| f.range().from)
    }

    /// Ranges of the registered sets.
    #[must_use]
    pub fn ranges(&self) -> Vec<StepRange> {
        self.files.iter().map(|f| f.range()).collect()
    }

    /// First TxNum served by the hot tail. Hot rows below it are already
    /// in a file set.
    #[must_use]
    pub fn hot_floor(&self, step_size: u64) -> TxNum {
        self.end_step() * step_size
    }

    /// Returns true if the registered chain fully covers `range`.
    #[must_use]
    pub fn covers(&self, range: StepRange) -> bool {
        !self.files.is_empty() && self.first_step() <= range.from && range.to <= self.end_step()
    }

    /// Returns true if some set lacks its `bt` index. Point lookups fail
    /// with `IndexStale` until the index is rebuilt.
    #[must_use]
    pub fn needs_index_rebuild(&self) -> bool {
        self.files.iter().any(|f| !f.missing_indices(false).is_empty())
    }

    pub(crate) fn with_files(&self, files: Vec<Arc<SegmentFiles>>) -> Self {
        Self {
            config: self.config.clone(),
            files,
            pruned_to: self.pruned_to,
        }
    }

    pub(crate) fn with_pruned(&self, files: Vec<Arc<SegmentFiles>>, pruned_to: Step) -> Self {
        Self {
            config: self.config.clone(),
            files,
            pruned_to,
        }
    }

    /// Checks that the chain is sorted and gap-free.
    pub fn check_coverage(&self) -> CoreResult<()> {
        for pair in self.files.windows(2) {
            let (a, b) = (pair[0].range(), pair[1].range());
            if a.to != b.from {
                return Err(CoreError::InvalidOperation {
                    message: format!("{}: {a} is not followed by {b}", self.name()),
                });
            }
        }
        match self.files.first() {
            Some(f) if f.range().from < self.pruned_to => Err(CoreError::InvalidOperation {
                message: format!(
                    "{}: {} starts below pruned step {}",
                    self.name(),
                    f.range(),
                    self.pruned_to
                ),
            }),
            _ => Ok(()),
        }
    }

    /// Newest value of `key`: hot tail first, then sets newest to oldest.
    /// A tombstone reads as `None`.
    pub fn get_latest(
        &self,
        tx: &dyn ReadTx,
        key: &[u8],
        step_size: u64,
    ) -> CoreResult<Option<(Vec<u8>, TxNum)>> {
        if let Some((tx_num, value)) = hot::latest(tx, self.name(), key, self.hot_floor(step_size))? {
            return Ok(value.map(|v| (v, tx_num)));
        }
        for files in self.files.iter().rev() {
            if let Some((tx_num, value)) = files.get_latest(key)? {
                return Ok(value.map(|v| (v, tx_num)));
            }
        }
        Ok(None)
    }

    /// Value of `key` as of the start of `tx_num`: the newest change with a
    /// strictly smaller TxNum.
    ///
    /// # Errors
    ///
    /// `RetentionViolation` if `tx_num` is below the retained history, or
    /// if no change is retained and older history was pruned, since the
    /// answer is then unknown.
    pub fn get_as_of(
        &self,
        tx: &dyn ReadTx,
        key: &[u8],
        tx_num: TxNum,
        step_size: u64,
    ) -> CoreResult<Option<Vec<u8>>> {
        let boundary = self.pruned_to * step_size;
        if tx_num < boundary {
            return Err(self.retention_violation(tx_num, step_size));
        }
        let floor = self.hot_floor(step_size);
        if let Some((_, value)) = hot::latest_before(tx, self.name(), key, floor, tx_num)? {
            return Ok(value);
        }
        for files in self.files.iter().rev() {
            if files.range().from_tx(step_size) >= tx_num {
                continue;
            }
            let Some(changed_at) = files.tx_list(key)?.and_then(|l| l.last_before(tx_num)) else {
                continue;
            };
            return match files.history_value(key, changed_at)? {
                Some(value) => Ok(value),
                None => Err(CoreError::corrupt_segment(
                    files.path(crate::dir::FileKind::History),
                    format!("no history entry for change at {changed_at}"),
                )),
            };
        }
        if self.pruned_to > 0 {
            return Err(self.retention_violation(tx_num, step_size));
        }
        Ok(None)
    }

    /// TxNums in `[from, to)` at which `key` changed, in `order`.
    ///
    /// `from` defaults to the retention boundary. An explicit `from` below
    /// it is a `RetentionViolation`.
    #[allow(clippy::too_many_arguments)]
    pub fn index_range<'a>(
        &'a self,
        tx: &'a dyn ReadTx,
        key: &[u8],
        from: Option<TxNum>,
        to: Option<TxNum>,
        order: Order,
        limit: Option<usize>,
        step_size: u64,
    ) -> CoreResult<IndexRange<'a>> {
        let boundary = self.pruned_to * step_size;
        let from = match from {
            Some(f) if f < boundary => return Err(self.retention_violation(f, step_size)),
            Some(f) => f,
            None => boundary,
        };
        let to = to.unwrap_or(TxNum::MAX);

        let mut segments: VecDeque<&'a Arc<SegmentFiles>> = self
            .files
            .iter()
            .filter(|f| {
                let r = f.range();
                r.from_tx(step_size) < to && from < r.to_tx(step_size)
            })
            .collect();
        if order == Order::Desc {
            segments = segments.into_iter().rev().collect();
        }

        Ok(IndexRange {
            domain: self,
            tx,
            key: key.to_vec(),
            from,
            to,
            order,
            remaining: limit,
            segments,
            hot_floor: self.hot_floor(step_size),
            hot_pending: true,
            current: None,
            last: None,
            done: from >= to || limit == Some(0),
        })
    }

    fn retention_violation(&self, requested: TxNum, step_size: u64) -> CoreError {
        CoreError::RetentionViolation {
            domain: self.name().to_string(),
            requested,
            pruned_to: self.pruned_to * step_size,
        }
    }
}

enum Source {
    List(TxNumList),
    Hot(Vec<TxNum>),
}

impl Source {
    fn len(&self) -> usize {
        match self {
            Self::List(l) => l.len(),
            Self::Hot(v) => v.len(),
        }
    }

    fn get(&self, i: usize) -> Option<TxNum> {
        match self {
            Self::List(l) => l.get(i),
            Self::Hot(v) => v.get(i).copied(),
        }
    }

    fn lower_bound(&self, tx: TxNum) -> usize {
        match self {
            Self::List(l) => l.lower_bound(tx),
            Self::Hot(v) => v.partition_point(|&t| t < tx),
        }
    }
}

/// Cursor over one source, restricted to `[lo, hi)` positions.
struct Window {
    source: Source,
    lo: usize,
    hi: usize,
}

/// Lazy iterator returned by [`Domain::index_range`].
///
/// Sources are visited one at a time in `order` (file sets, then the hot
/// tail, reversed for descending order), so a small limit touches only the
/// sources it needs. Output is strictly monotonic. A change present both in
/// a set and in not-yet-deleted hot rows is yielded once.
pub struct IndexRange<'a> {
    domain: &'a Domain,
    tx: &'a dyn ReadTx,
    key: Vec<u8>,
    from: TxNum,
    to: TxNum,
    order: Order,
    remaining: Option<usize>,
    segments: VecDeque<&'a Arc<SegmentFiles>>,
    hot_floor: TxNum,
    hot_pending: bool,
    current: Option<Window>,
    last: Option<TxNum>,
    done: bool,
}

impl IndexRange<'_> {
    fn window(&self, source: Source) -> Window {
        let lo = source.lower_bound(self.from);
        let hi = source.lower_bound(self.to).max(lo);
        Window { source, lo, hi }
    }

    fn next_source(&mut self) -> CoreResult<Option<Source>> {
        let hot_first = self.order == Order::Desc;
        if hot_first && self.hot_pending {
            self.hot_pending = false;
            return self.hot_source().map(Some);
        }
        if let Some(files) = self.segments.pop_front() {
            let list = files.tx_list(&self.key)?;
            return Ok(Some(match list {
                Some(l) => Source::List(l),
                None => Source::Hot(Vec::new()),
            }));
        }
        if self.hot_pending {
            self.hot_pending = false;
            return self.hot_source().map(Some);
        }
        Ok(None)
    }

    fn hot_source(&self) -> CoreResult<Source> {
        let from = self.from.max(self.hot_floor);
        hot::tx_nums(self.tx, self.domain.name(), &self.key, from, self.to).map(Source::Hot)
    }

    fn advance(&mut self) -> CoreResult<Option<TxNum>> {
        loop {
            if let Some(w) = self.current.as_mut() {
                let next = if w.lo < w.hi {
                    match self.order {
                        Order::Asc => {
                            w.lo += 1;
                            w.source.get(w.lo - 1)
                        }
                        Order::Desc => {
                            w.hi -= 1;
                            w.source.get(w.hi)
                        }
                    }
                } else {
                    None
                };
                match next {
                    Some(t) => {
                        let fresh = match (self.order, self.last) {
                            (_, None) => true,
                            (Order::Asc, Some(last)) => t > last,
                            (Order::Desc, Some(last)) => t < last,
                        };
                        if fresh {
                            self.last = Some(t);
                            return Ok(Some(t));
                        }
                        continue;
                    }
                    None => self.current = None,
                }
            }
            match self.next_source()? {
                Some(source) if source.len() > 0 => self.current = Some(self.window(source)),
                Some(_) => {}
                None => return Ok(None),
            }
        }
    }
}

impl Iterator for IndexRange<'_> {
    type Item = CoreResult<TxNum>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(t)) => {
                if let Some(n) = self.remaining.as_mut() {
                    *n -= 1;
                    if *n == 0 {
                        self.done = true;
                    }
                }
                Some(Ok(t))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for IndexRange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRange")
            .field("domain", &self.domain.name())
            .field("from", &self.from)
            .field("to", &self.to)
            .field("order", &self.order)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}
