//! Merging adjacent file sets.
//!
//! ## Policy
//!
//! Tiered with fanout `K`: a run of `K` adjacent sets that all span `s`
//! steps, whose union starts at a multiple of `s·K` and spans at most the
//! configured maximum, is merged into one set spanning `s·K`. The smallest
//! tier is merged first, so freezing one step at a time produces spans
//! 1, 2, 4, ... aligned like a binary counter and a merge never leaves a
//! gap or an overlap behind.
//!
//! ## Invariants
//!
//! - Merging never changes what a reader sees
//! - The newest value of each key wins
//! - A tombstone is dropped only when the merged range starts at the
//!   domain's first retained step, because nothing older remains to shadow
//! - History and TxNum lists are concatenated, never deduplicated away

use crate::dir::FileKind;
use crate::error::CoreResult;
use crate::segment::{SegmentData, SegmentFiles};
use crate::types::{decode_latest, StepRange, TxNum};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use strata_codec::CancelToken;

/// Picks the next run of sets to merge, as an index range into `ranges`.
///
/// `ranges` must be sorted and contiguous.
#[must_use]
pub fn find_merge_range(ranges: &[StepRange], fanout: u64, max_steps: u64) -> Option<Range<usize>> {
    let k = fanout.max(2);
    let width = usize::try_from(k).ok()?;
    if ranges.len() < width {
        return None;
    }

    let mut best: Option<(u64, usize)> = None;
    for (i, window) in ranges.windows(width).enumerate() {
        let span = window[0].span();
        let Some(merged) = span.checked_mul(k) else {
            continue;
        };
        let eligible = merged <= max_steps
            && window[0].from % merged == 0
            && window.iter().all(|r| r.span() == span)
            && window.windows(2).all(|p| p[0].to == p[1].from);
        if eligible && best.map_or(true, |(s, _)| span < s) {
            best = Some((span, i));
        }
    }
    best.map(|(_, i)| i..i + width)
}

/// What a merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStats {
    /// Domain merged.
    pub domain: String,
    /// Range of the new set.
    pub range: StepRange,
    /// Number of sets replaced.
    pub inputs: usize,
    /// Keys in the new `kv`.
    pub keys: usize,
    /// Tombstones not carried into the new `kv`.
    pub tombstones_dropped: usize,
}

/// Reads `inputs` (oldest first) and produces the contents of their union.
pub fn merge_data(
    inputs: &[Arc<SegmentFiles>],
    drop_tombstones: bool,
    cancel: &CancelToken,
) -> CoreResult<(SegmentData, usize)> {
    let mut latest: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut inverted: BTreeMap<Vec<u8>, Vec<TxNum>> = BTreeMap::new();
    let mut history = Vec::new();

    for files in inputs {
        files.for_each(FileKind::Kv, cancel, |k, v| {
            latest.insert(k.to_vec(), v.to_vec());
            Ok(true)
        })?;
        files.for_each(FileKind::History, cancel, |k, v| {
            history.push((k.to_vec(), v.to_vec()));
            Ok(true)
        })?;
        files.for_each(FileKind::Inverted, cancel, |k, v| {
            let list = crate::inverted::TxNumList::decode(v.to_vec())?;
            inverted.entry(k.to_vec()).or_default().extend(list.to_vec());
            Ok(true)
        })?;
    }
    cancel.check()?;

    let mut dropped = 0;
    if drop_tombstones {
        let mut kept = BTreeMap::new();
        for (k, v) in latest {
            if decode_latest(&v)?.1.is_some() {
                kept.insert(k, v);
            } else {
                dropped += 1;
            }
        }
        latest = kept;
    }
    history.sort_by(|a, b| a.0.cmp(&b.0));

    Ok((
        SegmentData {
            latest: latest.into_iter().collect(),
            history,
            inverted: inverted.into_iter().collect(),
        },
        dropped,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(spans: &[(u64, u64)]) -> Vec<StepRange> {
        spans.iter().map(|&(f, t)| StepRange::new(f, t).unwrap()).collect()
    }

    #[test]
    fn merges_pairs_of_single_steps() {
        let r = ranges(&[(0, 1), (1, 2)]);
        assert_eq!(find_merge_range(&r, 2, 64), Some(0..2));
    }

    #[test]
    fn respects_alignment() {
        // [1,2)+[2,3) would start at 1, not a multiple of 2.
        let r = ranges(&[(0, 2), (2, 3), (3, 4)]);
        assert_eq!(find_merge_range(&r, 2, 64), Some(1..3));
        let r = ranges(&[(0, 1), (1, 2), (2, 3)]);
        assert_eq!(find_merge_range(&r, 2, 64), Some(0..2));
        let r = ranges(&[(0, 2), (2, 3)]);
        assert_eq!(find_merge_range(&r, 2, 64), None);
    }

    #[test]
    fn smallest_tier_first() {
        let r = ranges(&[(0, 2), (2, 4), (4, 5), (5, 6)]);
        assert_eq!(find_merge_range(&r, 2, 64), Some(2..4));
    }

    #[test]
    fn respects_max_steps_and_fanout() {
        let r = ranges(&[(0, 32), (32, 64)]);
        assert_eq!(find_merge_range(&r, 2, 64), Some(0..2));
        assert_eq!(find_merge_range(&r, 2, 32), None);

        let r = ranges(&[(0, 1), (1, 2), (2, 3)]);
        assert_eq!(find_merge_range(&r, 3, 64), Some(0..3));
        assert_eq!(find_merge_range(&r[..2], 3, 64), None);
    }

    #[test]
    fn binary_counter_shape() {
        // Freezing one step at a time and merging eagerly keeps spans aligned.
        let mut r: Vec<StepRange> = Vec::new();
        for step in 0..13 {
            r.push(StepRange::new(step, step + 1).unwrap());
            while let Some(run) = find_merge_range(&r, 2, 64) {
                let merged = StepRange::new(r[run.start].from, r[run.end - 1].to).unwrap();
                r.splice(run, [merged]);
            }
        }
        assert_eq!(r, ranges(&[(0, 8), (8, 12), (12, 13)]));
    }
}
