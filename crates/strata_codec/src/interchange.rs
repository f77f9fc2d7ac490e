//! Plain word stream used to move segment contents in and out of the
//! compressed format.
//!
//! The stream is a sequence of `uvarint len ‖ bytes` records with no header.

use crate::cancel::CancelToken;
use crate::compress::{CompressStats, Compressor, CompressorConfig};
use crate::decompress::Decompressor;
use crate::error::{CodecError, CodecResult};
use crate::varint::{put_uvarint, read_uvarint_from};
use std::io::{self, Read, Write};
use std::path::Path;

/// Writes one word as an interchange record.
pub fn write_interchange<W: Write>(out: &mut W, word: &[u8]) -> io::Result<()> {
    let mut header = Vec::with_capacity(10);
    put_uvarint(&mut header, word.len() as u64);
    out.write_all(&header)?;
    out.write_all(word)
}

/// Iterator over the words of an interchange stream.
#[derive(Debug)]
pub struct InterchangeReader<R> {
    inner: R,
    done: bool,
}

impl<R: Read> InterchangeReader<R> {
    /// Wraps a reader.
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_word(&mut self) -> CodecResult<Option<Vec<u8>>> {
        let Some(len) = read_uvarint_from(&mut self.inner)? else {
            return Ok(None);
        };
        let len = usize::try_from(len)
            .map_err(|_| CodecError::corrupt("interchange word too large"))?;
        let mut word = vec![0u8; len];
        self.inner.read_exact(&mut word).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                CodecError::corrupt("truncated interchange word")
            } else {
                CodecError::Io(e)
            }
        })?;
        Ok(Some(word))
    }
}

impl<R: Read> Iterator for InterchangeReader<R> {
    type Item = CodecResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_word() {
            Ok(Some(word)) => Some(Ok(word)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Streams every word of a segment to `out`. Returns the number of words.
pub fn uncompress_to<W: Write>(
    segment: &Decompressor,
    out: &mut W,
    cancel: &CancelToken,
) -> CodecResult<u64> {
    let _read_ahead = segment.enable_read_ahead();
    let mut getter = segment.make_getter();
    let mut word = Vec::new();
    let mut n = 0u64;
    while getter.has_next() {
        if n % 4096 == 0 {
            cancel.check()?;
        }
        getter.next(&mut word)?;
        write_interchange(out, &word)?;
        n += 1;
    }
    out.flush()?;
    Ok(n)
}

/// Compresses an interchange stream into a segment at `path`.
pub fn compress_from<R: Read>(
    input: R,
    path: &Path,
    config: CompressorConfig,
    cancel: &CancelToken,
) -> CodecResult<CompressStats> {
    let mut compressor = Compressor::new(path, config);
    for word in InterchangeReader::new(input) {
        compressor.add_word(&word?);
    }
    compressor.compress(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reads_written_words() {
        let mut buf = Vec::new();
        write_interchange(&mut buf, b"alpha").unwrap();
        write_interchange(&mut buf, b"").unwrap();
        write_interchange(&mut buf, &[7u8; 300]).unwrap();

        let words: Vec<_> = InterchangeReader::new(buf.as_slice())
            .collect::<CodecResult<_>>()
            .unwrap();
        assert_eq!(words, vec![b"alpha".to_vec(), Vec::new(), vec![7u8; 300]]);
    }

    #[test]
    fn truncated_word_is_corrupt() {
        let mut buf = Vec::new();
        write_interchange(&mut buf, b"abcdef").unwrap();
        buf.truncate(4);

        let mut reader = InterchangeReader::new(buf.as_slice());
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.is_corruption());
        assert!(reader.next().is_none());
    }

    #[test]
    fn segment_through_interchange_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.seg");
        let second = dir.path().join("b.seg");
        let words: Vec<Vec<u8>> = (0..200u32)
            .map(|i| format!("account-{:04}-balance", i % 37).into_bytes())
            .collect();

        let mut c = Compressor::new(&first, CompressorConfig::default().min_pattern_score(16));
        for w in &words {
            c.add_word(w);
        }
        c.compress(&CancelToken::new()).unwrap();

        let d = Decompressor::open(&first).unwrap();
        let mut stream = Vec::new();
        let n = uncompress_to(&d, &mut stream, &CancelToken::new()).unwrap();
        assert_eq!(n, 200);
        assert!(!d.read_ahead_active());

        compress_from(
            stream.as_slice(),
            &second,
            CompressorConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let d2 = Decompressor::open(&second).unwrap();
        let mut g = d2.make_getter();
        for w in &words {
            assert_eq!(&g.next_word().unwrap(), w);
        }
        assert!(!g.has_next());
    }
}
