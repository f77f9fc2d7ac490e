//! Block number to TxNum side index.
//!
//! Table `txnums` maps `block BE` to the last TxNum of that block. Blocks
//! occupy contiguous TxNum ranges, so the first TxNum of block `b` is one
//! past the last TxNum of block `b - 1`.

use crate::error::{CoreError, CoreResult};
use crate::types::{read_be_u64, TxNum};
use strata_storage::{ReadTx, WriteTx};

/// Table holding the block to TxNum mapping.
pub const TXNUMS_TABLE: &str = "txnums";

/// Accessors for the block to TxNum side index.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxNums;

impl TxNums {
    /// Records the last TxNum of `block`. Blocks must be appended in order
    /// with increasing TxNums.
    pub fn append(tx: &mut (dyn WriteTx + '_), block: u64, max_tx_num: TxNum) -> CoreResult<()> {
        if let Some((last_block, last_max)) = Self::last(&*tx)? {
            if block != last_block + 1 || max_tx_num <= last_max {
                return Err(CoreError::invalid_operation(format!(
                    "block {block} (max tx {max_tx_num}) does not follow block {last_block} (max tx {last_max})"
                )));
            }
        }
        tx.put(TXNUMS_TABLE, &block.to_be_bytes(), &max_tx_num.to_be_bytes())?;
        Ok(())
    }

    /// Last recorded block and its max TxNum.
    pub fn last<T: ReadTx + ?Sized>(tx: &T) -> CoreResult<Option<(u64, TxNum)>> {
        Ok(tx
            .range(TXNUMS_TABLE, &[], None)?
            .last()
            .map(|(k, v)| (read_be_u64(&k), read_be_u64(&v))))
    }

    /// Last TxNum of `block`.
    pub fn max<T: ReadTx + ?Sized>(tx: &T, block: u64) -> CoreResult<Option<TxNum>> {
        Ok(tx
            .get(TXNUMS_TABLE, &block.to_be_bytes())?
            .map(|v| read_be_u64(&v)))
    }

    /// First TxNum of `block`.
    pub fn min<T: ReadTx + ?Sized>(tx: &T, block: u64) -> CoreResult<Option<TxNum>> {
        if Self::max(tx, block)?.is_none() {
            return Ok(None);
        }
        match block.checked_sub(1) {
            None => Ok(Some(0)),
            Some(prev) => Ok(Self::max(tx, prev)?.map(|m| m + 1)),
        }
    }

    /// Block containing `tx_num`, if recorded.
    pub fn find_block_num<T: ReadTx + ?Sized>(tx: &T, tx_num: TxNum) -> CoreResult<Option<u64>> {
        let Some((last_block, last_max)) = Self::last(tx)? else {
            return Ok(None);
        };
        if tx_num > last_max {
            return Ok(None);
        }
        let (mut lo, mut hi) = (0u64, last_block);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match Self::max(tx, mid)? {
                Some(max) if max < tx_num => lo = mid + 1,
                Some(_) => hi = mid,
                None => lo = mid + 1,
            }
        }
        Ok(Some(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::{HotStore, MemHotStore};

    fn store_with_blocks(maxes: &[TxNum]) -> MemHotStore {
        let store = MemHotStore::new();
        let mut tx = store.begin_rw().unwrap();
        for (block, &max) in maxes.iter().enumerate() {
            TxNums::append(tx.as_mut(), block as u64, max).unwrap();
        }
        tx.commit().unwrap();
        store
    }

    #[test]
    fn min_max_lookup() {
        let store = store_with_blocks(&[9, 19, 20, 35]);
        let ro = store.begin_ro().unwrap();
        let ro = ro.as_ref();
        assert_eq!(TxNums::max(ro, 0).unwrap(), Some(9));
        assert_eq!(TxNums::min(ro, 0).unwrap(), Some(0));
        assert_eq!(TxNums::min(ro, 2).unwrap(), Some(20));
        assert_eq!(TxNums::min(ro, 3).unwrap(), Some(21));
        assert_eq!(TxNums::max(ro, 4).unwrap(), None);
        assert_eq!(TxNums::last(ro).unwrap(), Some((3, 35)));
    }

    #[test]
    fn find_block() {
        let store = store_with_blocks(&[9, 19, 20, 35]);
        let ro = store.begin_ro().unwrap();
        let ro = ro.as_ref();
        assert_eq!(TxNums::find_block_num(ro, 0).unwrap(), Some(0));
        assert_eq!(TxNums::find_block_num(ro, 9).unwrap(), Some(0));
        assert_eq!(TxNums::find_block_num(ro, 10).unwrap(), Some(1));
        assert_eq!(TxNums::find_block_num(ro, 20).unwrap(), Some(2));
        assert_eq!(TxNums::find_block_num(ro, 35).unwrap(), Some(3));
        assert_eq!(TxNums::find_block_num(ro, 36).unwrap(), None);
    }

    #[test]
    fn append_must_be_ordered() {
        let store = store_with_blocks(&[9]);
        let mut tx = store.begin_rw().unwrap();
        assert!(TxNums::append(tx.as_mut(), 2, 20).is_err());
        assert!(TxNums::append(tx.as_mut(), 1, 9).is_err());
        TxNums::append(tx.as_mut(), 1, 10).unwrap();
    }
}
