//! Property-based test generators using proptest.
//!
//! Provides strategies for generating words, keys and change histories
//! that keep the engine's ordering rules.

use crate::fixtures::Change;
use proptest::prelude::*;
use strata_core::TxNum;

/// Strategy for segment words: short strings over a small alphabet, so
/// the dictionary finds repeats, with the occasional empty word.
pub fn word_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        1 => Just(Vec::new()),
        6 => prop::collection::vec(prop::sample::select(b"abcdefgh".to_vec()), 1..48),
        2 => prop::collection::vec(any::<u8>(), 1..96),
    ]
}

/// Strategy for a list of segment words.
pub fn words_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(word_strategy(), 0..max)
}

/// Strategy for keys drawn from a pool of `pool` distinct keys, so
/// histories revisit the same keys.
pub fn key_strategy(pool: u8) -> impl Strategy<Value = Vec<u8>> {
    (0..pool.max(1)).prop_map(|i| vec![b'k', i])
}

/// Strategy for values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..24)
}

/// Strategy for a history of at most one change per TxNum in
/// `[0, max_tx)`, spread over `domains`, in TxNum order. About one change
/// in eight is a delete.
pub fn history_strategy(
    domains: &'static [&'static str],
    key_pool: u8,
    max_tx: TxNum,
) -> impl Strategy<Value = Vec<Change>> {
    let change = (
        prop::sample::select(domains),
        key_strategy(key_pool),
        prop::option::weighted(0.875, value_strategy()),
    );
    prop::collection::vec(prop::option::of(change), max_tx as usize).prop_map(|slots| {
        slots
            .into_iter()
            .enumerate()
            .filter_map(|(tx, slot)| {
                let (domain, key, value) = slot?;
                Some(Change {
                    domain: domain.to_string(),
                    key,
                    value,
                    tx_num: tx as TxNum,
                })
            })
            .collect()
    })
}

/// One maintenance action in a generated schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Freeze every complete step written so far.
    BuildFiles,
    /// Run the merge loop.
    Merge,
    /// Prune up to this many steps behind the frozen end.
    Prune(u64),
    /// Build every missing index.
    BuildIndices,
}

/// Strategy for a maintenance action.
pub fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => Just(Action::BuildFiles),
        3 => Just(Action::Merge),
        1 => (0u64..4).prop_map(Action::Prune),
        1 => Just(Action::BuildIndices),
    ]
}
