//! Benchmark utilities.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use strata_codec::{CancelToken, Compressor, CompressorConfig, Decompressor};

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` words that look like state values: a shared prefix
/// from a small set, then a random tail. Seeded, so runs compare.
pub fn state_like_words(count: usize, tail: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(7);
    let prefixes: Vec<Vec<u8>> = (0..16).map(|i| format!("account/{i:04}/balance=").into_bytes()).collect();
    (0..count)
        .map(|_| {
            let mut w = prefixes[rng.gen_range(0..prefixes.len())].clone();
            w.extend((0..tail).map(|_| rng.gen::<u8>()));
            w
        })
        .collect()
}

/// Generate `count` sorted, distinct 8-byte keys.
pub fn sorted_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count as u64).map(|i| (i * 3).to_be_bytes().to_vec()).collect()
}

/// Writes `words` as a segment at `path` and opens it.
pub fn build_segment(path: &Path, words: &[Vec<u8>], config: CompressorConfig) -> Decompressor {
    let mut c = Compressor::new(path, config);
    for w in words {
        c.add_word(w);
    }
    c.compress(&CancelToken::new()).expect("Failed to compress");
    Decompressor::open(path).expect("Failed to open segment")
}
