//! Segment compressor.

use crate::atomic_file::write_atomic;
use crate::cancel::CancelToken;
use crate::error::CodecResult;
use crate::format::{FLAG_OFFSETS, SEGMENT_MAGIC, SEGMENT_VERSION};
use crate::patterns::Dictionary;
use crate::varint::put_uvarint;
use crate::workers::map_chunks;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Default minimum `occurrences × length` score for a dictionary pattern.
pub const MIN_PATTERN_SCORE: u64 = 1024;

/// Tuning knobs for [`Compressor`].
#[derive(Debug, Clone)]
pub struct CompressorConfig {
    /// Minimum `occurrences × length` score for a pattern to be kept.
    pub min_pattern_score: u64,
    /// Shortest candidate pattern.
    pub min_pattern_len: usize,
    /// Longest candidate pattern.
    pub max_pattern_len: usize,
    /// Upper bound on dictionary size.
    pub max_patterns: usize,
    /// Threads used for pattern counting and word encoding.
    pub workers: usize,
    /// Whether to append a word offset table after the body.
    pub with_offsets: bool,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            min_pattern_score: MIN_PATTERN_SCORE,
            min_pattern_len: 5,
            max_pattern_len: 128,
            max_patterns: 64 * 1024,
            workers: 1,
            with_offsets: false,
        }
    }
}

impl CompressorConfig {
    /// Sets the minimum pattern score.
    #[must_use]
    pub const fn min_pattern_score(mut self, score: u64) -> Self {
        self.min_pattern_score = score;
        self
    }

    /// Sets the candidate pattern length range.
    #[must_use]
    pub const fn pattern_len(mut self, min: usize, max: usize) -> Self {
        self.min_pattern_len = min;
        self.max_pattern_len = max;
        self
    }

    /// Sets the dictionary size limit.
    #[must_use]
    pub const fn max_patterns(mut self, n: usize) -> Self {
        self.max_patterns = n;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enables the trailing word offset table.
    #[must_use]
    pub const fn with_offsets(mut self, value: bool) -> Self {
        self.with_offsets = value;
        self
    }
}

/// Summary of a finished compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressStats {
    /// Number of words written.
    pub words: u64,
    /// Number of dictionary patterns.
    pub patterns: usize,
    /// Total bytes across all input words.
    pub input_bytes: u64,
    /// Size of the written file.
    pub output_bytes: u64,
}

/// Collects words and writes them as one immutable segment file.
///
/// Words are buffered in memory until [`Compressor::compress`] builds the
/// pattern dictionary over all of them and writes the file through a
/// temporary path, so a failed or cancelled compression never leaves a file
/// under the final name.
///
/// ```
/// use strata_codec::{CancelToken, Compressor, CompressorConfig, Decompressor};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("words.seg");
///
/// let mut c = Compressor::new(&path, CompressorConfig::default());
/// c.add_word(b"hello");
/// c.add_word(b"world");
/// c.compress(&CancelToken::new()).unwrap();
///
/// let d = Decompressor::open(&path).unwrap();
/// let mut g = d.make_getter();
/// assert_eq!(g.next_word().unwrap(), b"hello");
/// ```
#[derive(Debug)]
pub struct Compressor {
    path: PathBuf,
    config: CompressorConfig,
    words: Vec<Vec<u8>>,
    input_bytes: u64,
}

impl Compressor {
    /// Creates a compressor that will write to `path`.
    pub fn new(path: impl AsRef<Path>, config: CompressorConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            words: Vec::new(),
            input_bytes: 0,
        }
    }

    /// Appends one word.
    pub fn add_word(&mut self, word: &[u8]) {
        self.input_bytes += word.len() as u64;
        self.words.push(word.to_vec());
    }

    /// Number of words added so far.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Destination path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Builds the dictionary, encodes every word and writes the file.
    pub fn compress(self, cancel: &CancelToken) -> CodecResult<CompressStats> {
        let started = Instant::now();
        cancel.check()?;

        let dict = Dictionary::build(&self.words, &self.config);
        cancel.check()?;

        let data = self.encode(&dict);
        cancel.check()?;

        write_atomic(&self.path, &data)?;

        let stats = CompressStats {
            words: self.words.len() as u64,
            patterns: dict.patterns().len(),
            input_bytes: self.input_bytes,
            output_bytes: data.len() as u64,
        };
        debug!(
            file = %self.path.display(),
            words = stats.words,
            patterns = stats.patterns,
            input_bytes = stats.input_bytes,
            output_bytes = stats.output_bytes,
            took = ?started.elapsed(),
            "compressed segment"
        );
        Ok(stats)
    }

    fn encode(&self, dict: &Dictionary) -> Vec<u8> {
        let parts = map_chunks(&self.words, self.config.workers, |chunk| {
            let mut body = Vec::new();
            let mut offsets = Vec::with_capacity(chunk.len());
            for word in chunk {
                offsets.push(body.len() as u64);
                dict.encode_word(word, &mut body);
            }
            (body, offsets)
        });

        let body_len: usize = parts.iter().map(|(b, _)| b.len()).sum();
        let mut buf = Vec::with_capacity(64 + body_len);

        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
        let flags = if self.config.with_offsets { FLAG_OFFSETS } else { 0 };
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&(self.words.len() as u64).to_le_bytes());

        buf.extend_from_slice(&(dict.patterns().len() as u32).to_le_bytes());
        for pattern in dict.patterns() {
            put_uvarint(&mut buf, pattern.len() as u64);
            buf.extend_from_slice(pattern);
        }

        buf.extend_from_slice(&(body_len as u64).to_le_bytes());
        let mut offsets = Vec::new();
        let mut chunk_start = 0u64;
        for (body, chunk_offsets) in &parts {
            buf.extend_from_slice(body);
            if self.config.with_offsets {
                offsets.extend(chunk_offsets.iter().map(|o| o + chunk_start));
            }
            chunk_start += body.len() as u64;
        }
        for offset in offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }
}
