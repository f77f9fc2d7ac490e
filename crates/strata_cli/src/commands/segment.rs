//! Segment-level commands: compress, uncompress, decompress-speed, diff.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Instant;
use strata_codec::{
    compress_from, uncompress_to, CancelToken, CompressStats, CompressorConfig, Decompressor,
};

/// Builds a segment at `path` from an interchange stream.
pub fn compress<R: Read>(
    path: &Path,
    input: R,
    workers: usize,
    min_pattern_score: Option<u64>,
    offsets: bool,
) -> Result<CompressStats, Box<dyn std::error::Error>> {
    let mut config = CompressorConfig::default()
        .workers(workers.max(1))
        .with_offsets(offsets);
    if let Some(score) = min_pattern_score {
        config = config.min_pattern_score(score);
    }
    Ok(compress_from(input, path, config, &CancelToken::new())?)
}

/// Writes every word of the segment at `path` to `out`.
pub fn uncompress<W: Write>(path: &Path, mut out: W) -> Result<u64, Box<dyn std::error::Error>> {
    let segment = Decompressor::open(path)?;
    Ok(uncompress_to(&segment, &mut out, &CancelToken::new())?)
}

/// Reads every word of a segment and reports the time taken.
pub fn decompress_speed(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let segment = Decompressor::open(path)?;
    let _read_ahead = segment.enable_read_ahead();

    let start = Instant::now();
    let mut getter = segment.make_getter();
    let mut word = Vec::new();
    let mut bytes = 0u64;
    while getter.has_next() {
        getter.next(&mut word)?;
        bytes += word.len() as u64;
    }
    let took = start.elapsed();

    println!("File: {}", segment.file_name());
    println!("Words: {}", segment.word_count());
    println!("Patterns: {}", segment.pattern_count());
    println!("Bytes: {} -> {}", segment.size(), bytes);
    println!("Took: {took:?}");
    Ok(())
}

/// Compares two segments word by word. Prints the first difference and
/// returns whether they are equal.
pub fn diff(src: &Path, dst: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let a = Decompressor::open(src)?;
    let b = Decompressor::open(dst)?;
    let mut ga = a.make_getter();
    let mut gb = b.make_getter();
    let (mut wa, mut wb) = (Vec::new(), Vec::new());

    let mut i = 0u64;
    loop {
        match (ga.has_next(), gb.has_next()) {
            (false, false) => break,
            (true, false) | (false, true) => {
                println!(
                    "Word counts differ: {} has {}, {} has {}",
                    src.display(),
                    a.word_count(),
                    dst.display(),
                    b.word_count()
                );
                return Ok(false);
            }
            (true, true) => {
                ga.next(&mut wa)?;
                gb.next(&mut wb)?;
                if wa != wb {
                    println!("Word {i} differs:");
                    println!("  src: {}", hex::encode(&wa));
                    println!("  dst: {}", hex::encode(&wb));
                    return Ok(false);
                }
            }
        }
        i += 1;
    }

    println!("Segments are equal ({i} words)");
    Ok(true)
}
