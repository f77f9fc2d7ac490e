//! Pattern dictionary construction and greedy word encoding.
//!
//! Candidate patterns are substrings whose lengths sit on a geometric ladder
//! between the configured minimum and maximum. Each candidate is scored
//! `occurrences × length`; those at or above the minimum score form the
//! dictionary, best first. Encoding replaces the longest dictionary match at
//! each position and keeps everything else literal.

use crate::compress::CompressorConfig;
use crate::varint::put_uvarint;
use crate::workers::map_chunks;
use std::collections::HashMap;

/// Returns the candidate pattern lengths between `min` and `max`, inclusive.
pub(crate) fn length_ladder(min: usize, max: usize) -> Vec<usize> {
    let min = min.max(1);
    let mut lengths = Vec::new();
    let mut len = min;
    while len < max {
        lengths.push(len);
        len = (len * 3 / 2).max(len + 1);
    }
    if max >= min {
        lengths.push(max);
    }
    lengths
}

/// A frozen set of patterns plus the lookup used while encoding.
#[derive(Debug, Default)]
pub(crate) struct Dictionary {
    patterns: Vec<Vec<u8>>,
    lookup: HashMap<Vec<u8>, u32>,
    /// Distinct pattern lengths, longest first.
    lengths: Vec<usize>,
}

impl Dictionary {
    /// Scans `words` and keeps the best-scoring substrings.
    pub(crate) fn build(words: &[Vec<u8>], config: &CompressorConfig) -> Self {
        let ladder = length_ladder(config.min_pattern_len, config.max_pattern_len);
        if ladder.is_empty() || config.max_patterns == 0 {
            return Self::default();
        }

        let partials = map_chunks(words, config.workers, |chunk| {
            let mut counts: HashMap<&[u8], u64> = HashMap::new();
            for word in chunk {
                for &len in &ladder {
                    if len > word.len() {
                        break;
                    }
                    for window in word.windows(len) {
                        *counts.entry(window).or_insert(0) += 1;
                    }
                }
            }
            counts
        });

        let mut counts: HashMap<&[u8], u64> = HashMap::new();
        for partial in partials {
            for (pattern, n) in partial {
                *counts.entry(pattern).or_insert(0) += n;
            }
        }

        let mut scored: Vec<(u64, &[u8])> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(p, n)| (n.saturating_mul(p.len() as u64), p))
            .filter(|(score, _)| *score >= config.min_pattern_score)
            .collect();
        scored.sort_unstable_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.len().cmp(&a.1.len()))
                .then_with(|| a.1.cmp(b.1))
        });
        scored.truncate(config.max_patterns);

        Self::from_patterns(scored.into_iter().map(|(_, p)| p.to_vec()).collect())
    }

    /// Builds a dictionary from an explicit pattern list.
    pub(crate) fn from_patterns(patterns: Vec<Vec<u8>>) -> Self {
        let mut lookup = HashMap::with_capacity(patterns.len());
        let mut lengths = Vec::new();
        for (id, pattern) in patterns.iter().enumerate() {
            if pattern.is_empty() {
                continue;
            }
            lookup.entry(pattern.clone()).or_insert(id as u32);
            lengths.push(pattern.len());
        }
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        lengths.dedup();
        Self {
            patterns,
            lookup,
            lengths,
        }
    }

    pub(crate) fn patterns(&self) -> &[Vec<u8>] {
        &self.patterns
    }

    /// Appends the encoded form of `word` to `out`.
    pub(crate) fn encode_word(&self, word: &[u8], out: &mut Vec<u8>) {
        let mut ops = Vec::with_capacity(word.len() + 4);
        let mut literal_start = 0;
        let mut pos = 0;

        while pos < word.len() {
            let found = self.lengths.iter().find_map(|&len| {
                let end = pos + len;
                if end > word.len() {
                    return None;
                }
                self.lookup.get(&word[pos..end]).map(|&id| (id, len))
            });

            match found {
                Some((id, len)) => {
                    flush_literal(&mut ops, &word[literal_start..pos]);
                    put_uvarint(&mut ops, (u64::from(id) << 1) | 1);
                    pos += len;
                    literal_start = pos;
                }
                None => pos += 1,
            }
        }
        flush_literal(&mut ops, &word[literal_start..]);

        put_uvarint(out, word.len() as u64);
        put_uvarint(out, ops.len() as u64);
        out.extend_from_slice(&ops);
    }
}

fn flush_literal(ops: &mut Vec<u8>, literal: &[u8]) {
    if literal.is_empty() {
        return;
    }
    put_uvarint(ops, (literal.len() as u64) << 1);
    ops.extend_from_slice(literal);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_bounds() {
        let ladder = length_ladder(4, 16);
        assert_eq!(ladder.first(), Some(&4));
        assert_eq!(ladder.last(), Some(&16));
        assert!(ladder.windows(2).all(|w| w[0] < w[1]));

        assert!(length_ladder(8, 4).is_empty());
        assert_eq!(length_ladder(5, 5), vec![5]);
    }

    #[test]
    fn frequent_substring_is_selected() {
        let words: Vec<Vec<u8>> = (0..200)
            .map(|i| format!("account-prefix-{i:04}").into_bytes())
            .collect();
        let config = CompressorConfig::default().min_pattern_score(64);

        let dict = Dictionary::build(&words, &config);
        assert!(!dict.patterns().is_empty());
        assert!(dict
            .patterns()
            .iter()
            .any(|p| p.windows(7).any(|w| w == b"account")));
    }

    #[test]
    fn unique_input_yields_no_patterns() {
        let words = vec![b"abcdefgh".to_vec()];
        let dict = Dictionary::build(&words, &CompressorConfig::default());
        assert!(dict.patterns().is_empty());
    }

    #[test]
    fn longest_match_wins() {
        let dict = Dictionary::from_patterns(vec![b"abc".to_vec(), b"abcdef".to_vec()]);
        let mut out = Vec::new();
        dict.encode_word(b"abcdefabc", &mut out);
        // decoded_len 9, ops: pattern 1, pattern 0
        assert_eq!(out, vec![9, 2, 0x03, 0x01]);
    }
}
