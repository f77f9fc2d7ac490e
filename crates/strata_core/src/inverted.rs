//! TxNum lists: the values of the inverted index.
//!
//! A list is stored as
//!
//! ```text
//! | uvarint count | uvarint base | width u8 | count × width-byte BE (tx - base) |
//! ```
//!
//! Fixed-width deltas give O(1) access to any element, so a range query can
//! binary-search its start and walk in either direction, stopping as soon
//! as a limit is reached without decoding the rest.

use crate::error::{CoreError, CoreResult};
use crate::types::{Order, TxNum};
use strata_codec::{put_uvarint, read_uvarint};

/// Encodes a strictly ascending list of TxNums.
///
/// # Errors
///
/// Returns `InvalidOperation` if `txs` is not strictly ascending.
pub fn encode_tx_list(txs: &[TxNum]) -> CoreResult<Vec<u8>> {
    if txs.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CoreError::invalid_operation(
            "tx list must be strictly ascending",
        ));
    }
    let base = txs.first().copied().unwrap_or(0);
    let max_delta = txs.last().map_or(0, |&t| t - base);
    let width = (8 - max_delta.leading_zeros() as usize / 8) as u8;

    let mut out = Vec::with_capacity(12 + txs.len() * width as usize);
    put_uvarint(&mut out, txs.len() as u64);
    put_uvarint(&mut out, base);
    out.push(width);
    for &tx in txs {
        let delta = (tx - base).to_be_bytes();
        out.extend_from_slice(&delta[8 - width as usize..]);
    }
    Ok(out)
}

/// A decoded view over an encoded TxNum list.
#[derive(Debug, Clone)]
pub struct TxNumList {
    data: Vec<u8>,
    start: usize,
    count: usize,
    base: TxNum,
    width: usize,
}

impl TxNumList {
    /// Validates an encoded list.
    pub fn decode(data: Vec<u8>) -> CoreResult<Self> {
        let mut pos = 0;
        let bad = |msg: &str| CoreError::invalid_format(format!("tx list: {msg}"));
        let count = read_uvarint(&data, &mut pos).map_err(|_| bad("bad count"))? as usize;
        let base = read_uvarint(&data, &mut pos).map_err(|_| bad("bad base"))?;
        let width = *data.get(pos).ok_or_else(|| bad("missing width"))? as usize;
        pos += 1;
        if width > 8 {
            return Err(bad("width above 8"));
        }
        if count.checked_mul(width).and_then(|n| n.checked_add(pos)) != Some(data.len()) {
            return Err(bad("length mismatch"));
        }
        Ok(Self {
            data,
            start: pos,
            count,
            base,
            width,
        })
    }

    /// Number of TxNums.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The `i`-th TxNum. Panics-free: out of range returns `None`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<TxNum> {
        if i >= self.count {
            return None;
        }
        let at = self.start + i * self.width;
        let mut buf = [0u8; 8];
        buf[8 - self.width..].copy_from_slice(&self.data[at..at + self.width]);
        Some(self.base + u64::from_be_bytes(buf))
    }

    /// Index of the first TxNum `>= tx`.
    #[must_use]
    pub fn lower_bound(&self, tx: TxNum) -> usize {
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid).is_some_and(|t| t < tx) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Newest TxNum strictly below `tx`.
    #[must_use]
    pub fn last_before(&self, tx: TxNum) -> Option<TxNum> {
        self.lower_bound(tx).checked_sub(1).and_then(|i| self.get(i))
    }

    /// Iterates TxNums in `[from, to)` in the given order.
    #[must_use]
    pub fn range(&self, from: TxNum, to: TxNum, order: Order) -> TxNumRange<'_> {
        let lo = self.lower_bound(from);
        let hi = self.lower_bound(to).max(lo);
        TxNumRange {
            list: self,
            lo,
            hi,
            order,
        }
    }

    /// All TxNums, ascending.
    #[must_use]
    pub fn to_vec(&self) -> Vec<TxNum> {
        (0..self.count).filter_map(|i| self.get(i)).collect()
    }
}

/// Iterator over a window of a [`TxNumList`].
#[derive(Debug, Clone)]
pub struct TxNumRange<'a> {
    list: &'a TxNumList,
    lo: usize,
    hi: usize,
    order: Order,
}

impl Iterator for TxNumRange<'_> {
    type Item = TxNum;

    fn next(&mut self) -> Option<TxNum> {
        if self.lo >= self.hi {
            return None;
        }
        match self.order {
            Order::Asc => {
                self.lo += 1;
                self.list.get(self.lo - 1)
            }
            Order::Desc => {
                self.hi -= 1;
                self.list.get(self.hi)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.hi.saturating_sub(self.lo);
        (n, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn list(txs: &[TxNum]) -> TxNumList {
        TxNumList::decode(encode_tx_list(txs).unwrap()).unwrap()
    }

    #[test]
    fn empty_and_single() {
        let empty = list(&[]);
        assert!(empty.is_empty());
        assert_eq!(empty.get(0), None);
        assert_eq!(empty.range(0, 100, Order::Asc).count(), 0);

        let one = list(&[7]);
        assert_eq!(one.to_vec(), vec![7]);
        assert_eq!(one.last_before(7), None);
        assert_eq!(one.last_before(8), Some(7));
    }

    #[test]
    fn widths_grow_with_spread() {
        assert_eq!(encode_tx_list(&[5, 6]).unwrap()[2], 1);
        assert_eq!(encode_tx_list(&[0, 300]).unwrap()[2], 2);
        assert_eq!(encode_tx_list(&[1 << 40]).unwrap().last(), Some(&0));
        let big = list(&[1, u64::MAX]);
        assert_eq!(big.to_vec(), vec![1, u64::MAX]);
    }

    #[test]
    fn unsorted_input_is_rejected() {
        assert!(encode_tx_list(&[3, 2]).is_err());
        assert!(encode_tx_list(&[3, 3]).is_err());
    }

    #[test]
    fn damaged_list_is_rejected() {
        let mut data = encode_tx_list(&[1, 2, 3]).unwrap();
        data.pop();
        assert!(TxNumList::decode(data).is_err());
        assert!(TxNumList::decode(vec![1, 0, 9]).is_err());
        assert!(TxNumList::decode(Vec::new()).is_err());
    }

    #[test]
    fn range_both_orders() {
        let l = list(&[10, 20, 30, 40, 50]);
        assert_eq!(l.range(20, 50, Order::Asc).collect::<Vec<_>>(), vec![20, 30, 40]);
        assert_eq!(l.range(20, 50, Order::Desc).collect::<Vec<_>>(), vec![40, 30, 20]);
        assert_eq!(l.range(21, 22, Order::Asc).count(), 0);
        assert_eq!(l.range(50, 10, Order::Desc).count(), 0);
    }

    proptest! {
        #[test]
        fn range_matches_filter(
            txs in prop::collection::btree_set(0u64..10_000, 0..200),
            from in 0u64..10_000,
            len in 0u64..5_000,
            limit in 0usize..50,
        ) {
            let txs: Vec<_> = txs.into_iter().collect();
            let l = list(&txs);
            prop_assert_eq!(l.to_vec(), txs.clone());

            let to = from + len;
            let expected: Vec<_> = txs.iter().copied().filter(|&t| t >= from && t < to).collect();
            let asc: Vec<_> = l.range(from, to, Order::Asc).take(limit).collect();
            let desc: Vec<_> = l.range(from, to, Order::Desc).take(limit).collect();

            prop_assert_eq!(&asc[..], &expected[..asc.len()]);
            prop_assert_eq!(asc.len(), expected.len().min(limit));
            let mut rev = expected.clone();
            rev.reverse();
            prop_assert_eq!(&desc[..], &rev[..desc.len()]);
            prop_assert_eq!(desc.len(), expected.len().min(limit));
        }
    }
}
