//! Pluggable state commitment.
//!
//! The engine does not know how a state root is computed. It hands a
//! [`CommitmentInput`] to a [`CommitmentCalculator`] and persists the
//! returned root with its TxNum in the manifest. With
//! `require_commitment_before_prune` set, pruning never advances past the
//! step holding the last persisted commitment.

use crate::context::AggregatorView;
use crate::error::CoreResult;
use crate::types::TxNum;
use std::collections::BTreeMap;
use strata_codec::CancelToken;

/// Computes a commitment root over the state at one TxNum.
pub trait CommitmentCalculator: Send + Sync {
    /// Returns the root for `input`. The bytes are opaque to the engine.
    fn compute(&self, input: &CommitmentInput<'_>) -> CoreResult<Vec<u8>>;
}

/// The state a calculator sees: every domain as of the start of
/// [`CommitmentInput::tx_num`].
pub struct CommitmentInput<'a> {
    view: &'a AggregatorView,
    tx_num: TxNum,
    cancel: &'a CancelToken,
}

impl<'a> CommitmentInput<'a> {
    pub(crate) fn new(view: &'a AggregatorView, tx_num: TxNum, cancel: &'a CancelToken) -> Self {
        Self {
            view,
            tx_num,
            cancel,
        }
    }

    /// TxNum the commitment is for.
    #[must_use]
    pub fn tx_num(&self) -> TxNum {
        self.tx_num
    }

    /// Domain names in configuration order.
    #[must_use]
    pub fn domain_names(&self) -> Vec<&str> {
        self.view
            .context()
            .domains()
            .iter()
            .map(|d| d.name())
            .collect()
    }

    /// Every live key of `domain` with its value.
    pub fn state(&self, domain: &str) -> CoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.view.state_as_of(domain, self.tx_num, self.cancel)
    }

    /// Value of one key.
    pub fn get(&self, domain: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.view.get_as_of(domain, key, self.tx_num)
    }

    /// Cancellation token of the surrounding operation.
    #[must_use]
    pub fn cancel(&self) -> &CancelToken {
        self.cancel
    }
}

impl std::fmt::Debug for CommitmentInput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitmentInput")
            .field("tx_num", &self.tx_num)
            .finish_non_exhaustive()
    }
}
