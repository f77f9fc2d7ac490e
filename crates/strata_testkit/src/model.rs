//! Reference model of domain history.
//!
//! Keeps every change in plain maps and answers the same questions the
//! engine does, so tests can compare reads after any sequence of freeze,
//! merge and prune.

use crate::fixtures::Change;
use std::collections::BTreeMap;
use strata_core::{Order, TxNum};

type History = BTreeMap<TxNum, Option<Vec<u8>>>;

/// Every change ever written, per `(domain, key)`.
#[derive(Debug, Clone, Default)]
pub struct Model {
    keys: BTreeMap<(String, Vec<u8>), History>,
}

impl Model {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `changes`. A second change of a key at the same TxNum
    /// replaces the first.
    pub fn apply(&mut self, changes: &[Change]) {
        for c in changes {
            self.keys
                .entry((c.domain.clone(), c.key.clone()))
                .or_default()
                .insert(c.tx_num, c.value.clone());
        }
    }

    fn history(&self, domain: &str, key: &[u8]) -> Option<&History> {
        self.keys.get(&(domain.to_string(), key.to_vec()))
    }

    /// Newest value with its TxNum. A delete reads as `None`.
    pub fn latest(&self, domain: &str, key: &[u8]) -> Option<(Vec<u8>, TxNum)> {
        let (&tx, value) = self.history(domain, key)?.iter().next_back()?;
        value.clone().map(|v| (v, tx))
    }

    /// TxNum of the newest change, delete included.
    pub fn last_change(&self, domain: &str, key: &[u8]) -> Option<TxNum> {
        self.history(domain, key)?.keys().next_back().copied()
    }

    /// Value at the start of `tx_num`.
    pub fn as_of(&self, domain: &str, key: &[u8], tx_num: TxNum) -> Option<Vec<u8>> {
        self.history(domain, key)?
            .range(..tx_num)
            .next_back()
            .and_then(|(_, v)| v.clone())
    }

    /// TxNums in `[from, to)` at which `key` changed.
    pub fn tx_nums(&self, domain: &str, key: &[u8], from: TxNum, to: TxNum, order: Order) -> Vec<TxNum> {
        let Some(h) = self.history(domain, key) else {
            return Vec::new();
        };
        if from >= to {
            return Vec::new();
        }
        let mut out: Vec<TxNum> = h.range(from..to).map(|(&tx, _)| tx).collect();
        if order == Order::Desc {
            out.reverse();
        }
        out
    }

    /// Every live key of `domain` at the start of `before`.
    pub fn state_as_of(&self, domain: &str, before: TxNum) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.keys
            .iter()
            .filter(|((d, _), _)| d == domain)
            .filter_map(|((_, key), h)| {
                let (_, value) = h.range(..before).next_back()?;
                value.clone().map(|v| (key.clone(), v))
            })
            .collect()
    }

    /// Every key ever written to `domain`.
    pub fn keys(&self, domain: &str) -> Vec<Vec<u8>> {
        self.keys
            .keys()
            .filter(|(d, _)| d == domain)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Largest TxNum recorded, if any.
    pub fn max_tx_num(&self) -> Option<TxNum> {
        self.keys.values().filter_map(|h| h.keys().next_back().copied()).max()
    }
}
