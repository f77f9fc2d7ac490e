//! Stand-ins for the engine's external collaborators.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strata_core::{BlockFreezer, CancelToken, CommitmentCalculator, CommitmentInput, CoreError, CoreResult};

/// Commitment over the full state: SHA-256 of every domain's live
/// `(key, value)` pairs, each length-prefixed, in key order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestCommitment;

impl CommitmentCalculator for DigestCommitment {
    fn compute(&self, input: &CommitmentInput<'_>) -> CoreResult<Vec<u8>> {
        let mut hasher = Sha256::new();
        for domain in input.domain_names() {
            input.cancel().check()?;
            hasher.update((domain.len() as u64).to_be_bytes());
            hasher.update(domain.as_bytes());
            for (key, value) in input.state(domain)? {
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(&key);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(&value);
            }
        }
        Ok(hasher.finalize().to_vec())
    }
}

/// Block freezer that only counts. Records every call.
#[derive(Debug, Default)]
pub struct MemBlockFreezer {
    frozen: AtomicU64,
    fail_next: AtomicBool,
    calls: Mutex<Vec<(u64, u64)>>,
}

impl MemBlockFreezer {
    /// Creates a freezer with nothing frozen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `retire_blocks` call fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Every `(from, to)` passed to `retire_blocks`, successful or not.
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().clone()
    }
}

impl BlockFreezer for MemBlockFreezer {
    fn frozen_blocks(&self) -> u64 {
        self.frozen.load(Ordering::SeqCst)
    }

    fn retire_blocks(&self, from: u64, to: u64, cancel: &CancelToken) -> CoreResult<()> {
        self.calls.lock().push((from, to));
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::invalid_operation("block freezer failed"));
        }
        self.frozen.fetch_max(to, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freezer_advances_and_records() {
        let f = MemBlockFreezer::new();
        let cancel = CancelToken::new();
        f.retire_blocks(0, 10, &cancel).unwrap();
        f.fail_next();
        assert!(f.retire_blocks(10, 20, &cancel).is_err());
        f.retire_blocks(5, 20, &cancel).unwrap();

        assert_eq!(f.frozen_blocks(), 20);
        assert_eq!(f.calls(), vec![(0, 10), (10, 20), (5, 20)]);
    }
}
