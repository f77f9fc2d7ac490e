//! Row layout of the unfrozen tail in the hot store.
//!
//! Each domain owns two tables:
//!
//! - `<domain>.vals`: `uvarint(len) ‖ key ‖ !txNum` → `flag ‖ value`.
//!   Inverting the TxNum makes the newest change of a key sort first.
//! - `<domain>.keys`: `txNum ‖ key` → empty, for walking a TxNum range.
//!
//! All integers are big-endian so byte order matches numeric order.

use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentData;
use crate::txnums::TxNums;
use crate::types::{decode_value, encode_latest, encode_value, prefix_successor, read_be_u64, TxNum};
use std::collections::BTreeMap;
use strata_codec::{put_uvarint, read_uvarint, CancelToken};
use strata_storage::{ReadTx, WriteTx};

/// Name of the value table of `domain`.
#[must_use]
pub fn vals_table(domain: &str) -> String {
    format!("{domain}.vals")
}

/// Name of the TxNum-ordered key table of `domain`.
#[must_use]
pub fn keys_table(domain: &str) -> String {
    format!("{domain}.keys")
}

fn key_prefix(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 10);
    put_uvarint(&mut out, key.len() as u64);
    out.extend_from_slice(key);
    out
}

fn vals_key(key: &[u8], tx_num: TxNum) -> Vec<u8> {
    let mut out = key_prefix(key);
    out.extend_from_slice(&(!tx_num).to_be_bytes());
    out
}

fn parse_vals_key(raw: &[u8]) -> CoreResult<(&[u8], TxNum)> {
    let mut pos = 0;
    let len = read_uvarint(raw, &mut pos)
        .map_err(|_| CoreError::invalid_format("bad hot value key"))? as usize;
    if pos + len + 8 != raw.len() {
        return Err(CoreError::invalid_format("bad hot value key length"));
    }
    Ok((&raw[pos..pos + len], !read_be_u64(&raw[pos + len..])))
}

fn keys_key(tx_num: TxNum, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + key.len());
    out.extend_from_slice(&tx_num.to_be_bytes());
    out.extend_from_slice(key);
    out
}

/// Newest hot change of `key` with TxNum in `[from, before)`:
/// `(txNum, value-or-tombstone)`.
///
/// Rows below `from` are leftovers of an interrupted freeze and are
/// ignored; the file sets hold the same changes.
pub fn latest_before(
    tx: &dyn ReadTx,
    domain: &str,
    key: &[u8],
    from: TxNum,
    before: TxNum,
) -> CoreResult<Option<(TxNum, Option<Vec<u8>>)>> {
    let Some(newest_allowed) = before.checked_sub(1) else {
        return Ok(None);
    };
    if newest_allowed < from {
        return Ok(None);
    }
    let prefix = key_prefix(key);
    let upper = prefix_successor(&prefix);
    let seek = vals_key(key, newest_allowed);
    let Some((raw, value)) = tx.first(&vals_table(domain), &seek, upper.as_deref())? else {
        return Ok(None);
    };
    let (_, tx_num) = parse_vals_key(&raw)?;
    if tx_num < from {
        return Ok(None);
    }
    Ok(Some((tx_num, decode_value(&value)?)))
}

/// Newest hot change of `key` at or above `from`.
pub fn latest(
    tx: &dyn ReadTx,
    domain: &str,
    key: &[u8],
    from: TxNum,
) -> CoreResult<Option<(TxNum, Option<Vec<u8>>)>> {
    latest_before(tx, domain, key, from, TxNum::MAX)
}

/// Hot TxNums at which `key` changed, within `[from, to)`, ascending.
pub fn tx_nums(
    tx: &dyn ReadTx,
    domain: &str,
    key: &[u8],
    from: TxNum,
    to: TxNum,
) -> CoreResult<Vec<TxNum>> {
    if from >= to {
        return Ok(Vec::new());
    }
    let lower = vals_key(key, to - 1);
    let upper = vals_key(key, from);
    let table = vals_table(domain);
    let mut out = Vec::new();
    // The upper bound is exclusive, so the change at `from` is fetched separately.
    for (raw, _) in tx.range(&table, &lower, Some(&upper))? {
        out.push(parse_vals_key(&raw)?.1);
    }
    if tx.get(&table, &upper)?.is_some() {
        out.push(from);
    }
    out.reverse();
    Ok(out)
}

/// Reads every hot change of `domain` in `[from, to)` into sorted
/// segment contents.
pub fn collate(
    tx: &dyn ReadTx,
    domain: &str,
    from: TxNum,
    to: TxNum,
    cancel: &CancelToken,
) -> CoreResult<SegmentData> {
    let vals = vals_table(domain);
    let mut latest: BTreeMap<Vec<u8>, (TxNum, Option<Vec<u8>>)> = BTreeMap::new();
    let mut inverted: BTreeMap<Vec<u8>, Vec<TxNum>> = BTreeMap::new();
    let mut history = Vec::new();

    let lower = from.to_be_bytes();
    let upper = to.to_be_bytes();
    for (n, (raw, _)) in tx.range(&keys_table(domain), &lower, Some(&upper))?.enumerate() {
        if n % 4096 == 0 {
            cancel.check()?;
        }
        if raw.len() < 8 {
            return Err(CoreError::invalid_format("bad hot key-table row"));
        }
        let (tx_bytes, key) = raw.split_at(8);
        let tx_num = read_be_u64(tx_bytes);
        let encoded = tx.get(&vals, &vals_key(key, tx_num))?.ok_or_else(|| {
            CoreError::invalid_format(format!("{domain}: key-table row at tx {tx_num} has no value"))
        })?;
        let value = decode_value(&encoded)?;

        let mut composite = key.to_vec();
        composite.extend_from_slice(&tx_num.to_be_bytes());
        history.push((composite, encoded));
        inverted.entry(key.to_vec()).or_default().push(tx_num);
        latest.insert(key.to_vec(), (tx_num, value));
    }
    history.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(SegmentData {
        latest: latest
            .into_iter()
            .map(|(k, (tx_num, v))| (k, encode_latest(tx_num, v.as_deref())))
            .collect(),
        history,
        inverted: inverted.into_iter().collect(),
    })
}

/// Deletes up to `limit` hot changes of `domain` in `[from, to)`, oldest
/// first. Returns the number deleted.
pub fn prune(
    tx: &mut (dyn WriteTx + '_),
    domain: &str,
    from: TxNum,
    to: TxNum,
    limit: usize,
) -> CoreResult<u64> {
    let keys = keys_table(domain);
    let doomed: Vec<Vec<u8>> = tx
        .range(&keys, &from.to_be_bytes(), Some(&to.to_be_bytes()))?
        .take(limit)
        .map(|(k, _)| k)
        .collect();
    let vals = vals_table(domain);
    for raw in &doomed {
        if raw.len() < 8 {
            return Err(CoreError::invalid_format("bad hot key-table row"));
        }
        let (tx_bytes, key) = raw.split_at(8);
        tx.delete(&vals, &vals_key(key, read_be_u64(tx_bytes)))?;
        tx.delete(&keys, raw)?;
    }
    Ok(doomed.len() as u64)
}

/// Writes changes into the hot store.
///
/// Obtained from [`Aggregator::hot_writer`](crate::Aggregator::hot_writer).
/// Nothing is visible to readers until [`HotWriter::commit`].
pub struct HotWriter<'a> {
    tx: Box<dyn WriteTx + 'a>,
    domains: Vec<String>,
    min_tx_num: TxNum,
    changes: u64,
}

impl<'a> HotWriter<'a> {
    pub(crate) fn new(tx: Box<dyn WriteTx + 'a>, domains: Vec<String>, min_tx_num: TxNum) -> Self {
        Self {
            tx,
            domains,
            min_tx_num,
            changes: 0,
        }
    }

    fn check(&self, domain: &str, tx_num: TxNum) -> CoreResult<()> {
        if !self.domains.iter().any(|d| d == domain) {
            return Err(CoreError::invalid_operation(format!("unknown domain {domain:?}")));
        }
        if tx_num < self.min_tx_num {
            return Err(CoreError::invalid_operation(format!(
                "tx {tx_num} is already frozen (frozen up to {})",
                self.min_tx_num
            )));
        }
        Ok(())
    }

    fn write(&mut self, domain: &str, key: &[u8], value: Option<&[u8]>, tx_num: TxNum) -> CoreResult<()> {
        self.check(domain, tx_num)?;
        let mut encoded = Vec::with_capacity(1 + value.map_or(0, <[u8]>::len));
        encode_value(value, &mut encoded);
        self.tx.put(&vals_table(domain), &vals_key(key, tx_num), &encoded)?;
        self.tx.put(&keys_table(domain), &keys_key(tx_num, key), &[])?;
        self.changes += 1;
        Ok(())
    }

    /// Sets `key` to `value` at `tx_num`.
    pub fn put(&mut self, domain: &str, key: &[u8], value: &[u8], tx_num: TxNum) -> CoreResult<()> {
        self.write(domain, key, Some(value), tx_num)
    }

    /// Deletes `key` at `tx_num`.
    pub fn delete(&mut self, domain: &str, key: &[u8], tx_num: TxNum) -> CoreResult<()> {
        self.write(domain, key, None, tx_num)
    }

    /// Records the last TxNum of `block`.
    pub fn append_block(&mut self, block: u64, max_tx_num: TxNum) -> CoreResult<()> {
        TxNums::append(self.tx.as_mut(), block, max_tx_num)
    }

    /// Number of changes written so far.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.changes
    }

    /// Commits all changes durably.
    pub fn commit(self) -> CoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for HotWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotWriter")
            .field("min_tx_num", &self.min_tx_num)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}
