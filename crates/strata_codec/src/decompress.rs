//! Segment decompressor and sequential getter.
//!
//! Only the header, the pattern dictionary and the optional offset table are
//! held in memory. Word bodies are read on demand with positioned reads into
//! a per-getter window. The window is small for point lookups and grows to
//! [`READ_AHEAD_CHUNK`] while a read-ahead guard is held.

use crate::error::{CodecError, CodecResult};
use crate::format::{
    read_u16, read_u32, read_u64, CRC_SIZE, FIXED_HEADER_SIZE, FLAG_OFFSETS, SEGMENT_MAGIC,
    SEGMENT_VERSION,
};
use crate::varint::{read_uvarint, read_uvarint_from, MAX_VARINT_LEN};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Bytes fetched per body read when no read-ahead guard is held.
pub const POINT_READ_CHUNK: usize = 4 * 1024;

/// Bytes fetched per body read while a read-ahead guard is held.
pub const READ_AHEAD_CHUNK: usize = 1024 * 1024;

const CHECKSUM_BUF_SIZE: usize = 64 * 1024;
const WORD_HEADER_MAX: u64 = 2 * MAX_VARINT_LEN as u64;

/// An opened, validated segment file.
///
/// The whole file is checksummed at open, so a `Decompressor` that opened
/// successfully only fails later on I/O errors, on a file replaced behind
/// its back, or on misuse such as reading past the last word.
#[derive(Debug)]
pub struct Decompressor {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
    patterns: Vec<Vec<u8>>,
    word_count: u64,
    body: Range<u64>,
    offsets: Option<Vec<u64>>,
    checksum: u32,
    read_ahead: AtomicUsize,
    body_reads: AtomicU64,
}

impl Decompressor {
    /// Opens and validates the segment file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt`, `UnsupportedVersion` or `ChecksumMismatch` if the
    /// file is not a complete segment of the current format.
    pub fn open(path: impl AsRef<Path>) -> CodecResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        if size < (FIXED_HEADER_SIZE + 8 + CRC_SIZE) as u64 {
            return Err(CodecError::corrupt("segment file too short"));
        }

        let mut header = [0u8; FIXED_HEADER_SIZE];
        file.read_exact(&mut header)?;
        if header[0..4] != SEGMENT_MAGIC {
            return Err(CodecError::corrupt("invalid segment magic"));
        }
        let version = read_u16(&header, 4);
        if version != SEGMENT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                expected: SEGMENT_VERSION,
            });
        }

        let crc_pos = size - CRC_SIZE as u64;
        let mut trailer = [0u8; CRC_SIZE];
        file.seek(SeekFrom::Start(crc_pos))?;
        file.read_exact(&mut trailer)?;
        let expected = read_u32(&trailer, 0);
        let actual = checksum_prefix(&file, crc_pos)?;
        if expected != actual {
            return Err(CodecError::ChecksumMismatch { expected, actual });
        }

        let flags = read_u16(&header, 6);
        let word_count = read_u64(&header, 8);
        let pattern_count = read_u32(&header, 16);

        file.seek(SeekFrom::Start(FIXED_HEADER_SIZE as u64))?;
        let (patterns, body, offsets) = {
            let mut reader = BufReader::new(&file);
            let mut pos = FIXED_HEADER_SIZE as u64;

            let mut patterns = Vec::with_capacity(pattern_count.min(4096) as usize);
            for _ in 0..pattern_count {
                let (len, width) = header_uvarint(&mut reader)?;
                pos += width;
                let end = pos
                    .checked_add(len)
                    .filter(|&end| end <= crc_pos)
                    .ok_or_else(|| CodecError::corrupt("pattern extends beyond file"))?;
                let mut pattern = vec![0u8; len as usize];
                reader.read_exact(&mut pattern)?;
                patterns.push(pattern);
                pos = end;
            }

            if pos + 8 > crc_pos {
                return Err(CodecError::corrupt("missing body length"));
            }
            let mut len_buf = [0u8; 8];
            reader.read_exact(&mut len_buf)?;
            let body_len = u64::from_le_bytes(len_buf);
            pos += 8;
            let body_end = pos
                .checked_add(body_len)
                .filter(|&end| end <= crc_pos)
                .ok_or_else(|| CodecError::corrupt("body extends beyond file"))?;
            let body = pos..body_end;

            let offsets = if flags & FLAG_OFFSETS != 0 {
                let table_len = word_count
                    .checked_mul(8)
                    .ok_or_else(|| CodecError::corrupt("offset table too large"))?;
                if body_end.checked_add(table_len) != Some(crc_pos) {
                    return Err(CodecError::corrupt("offset table size mismatch"));
                }
                reader.seek(SeekFrom::Start(body_end))?;
                let mut raw = vec![0u8; table_len as usize];
                reader.read_exact(&mut raw)?;
                let table = raw
                    .chunks_exact(8)
                    .map(|c| read_u64(c, 0))
                    .collect::<Vec<_>>();
                if table.iter().any(|&o| o >= body_len) {
                    return Err(CodecError::corrupt("word offset beyond body"));
                }
                Some(table)
            } else {
                if body_end != crc_pos {
                    return Err(CodecError::corrupt("trailing bytes after body"));
                }
                None
            };
            if word_count == 0 && body_len != 0 {
                return Err(CodecError::corrupt("body present without words"));
            }
            (patterns, body, offsets)
        };

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
            patterns,
            word_count,
            body,
            offsets,
            checksum: actual,
            read_ahead: AtomicUsize::new(0),
            body_reads: AtomicU64::new(0),
        })
    }

    /// Path the segment was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component of the path, for logging.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Number of words in the segment.
    #[must_use]
    pub fn word_count(&self) -> u64 {
        self.word_count
    }

    /// Number of dictionary patterns.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checksum over the file content. Indices record it to detect staleness.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Word offsets relative to the body, if the file carries a table.
    #[must_use]
    pub fn offsets(&self) -> Option<&[u64]> {
        self.offsets.as_deref()
    }

    /// Number of positioned reads issued against the body so far.
    #[must_use]
    pub fn body_reads(&self) -> u64 {
        self.body_reads.load(Ordering::Relaxed)
    }

    /// Returns a getter positioned at the first word.
    #[must_use]
    pub fn make_getter(&self) -> Getter<'_> {
        Getter {
            d: self,
            pos: self.body.start,
            window: Vec::new(),
            window_start: self.body.start,
        }
    }

    /// Acquires a read-ahead hint for a sequential pass.
    ///
    /// Hints nest: the hint stays active until every guard is dropped.
    /// While active, getters fetch [`READ_AHEAD_CHUNK`] bytes per read.
    #[must_use = "read-ahead is released when the guard is dropped"]
    pub fn enable_read_ahead(&self) -> ReadAheadGuard<'_> {
        self.read_ahead.fetch_add(1, Ordering::AcqRel);
        ReadAheadGuard {
            counter: &self.read_ahead,
        }
    }

    /// Returns true while at least one read-ahead guard is alive.
    #[must_use]
    pub fn read_ahead_active(&self) -> bool {
        self.read_ahead.load(Ordering::Acquire) > 0
    }

    fn chunk_size(&self) -> usize {
        if self.read_ahead_active() {
            READ_AHEAD_CHUNK
        } else {
            POINT_READ_CHUNK
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> CodecResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        self.body_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn pattern(&self, id: u64) -> CodecResult<&[u8]> {
        self.patterns
            .get(id as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| CodecError::corrupt(format!("unknown pattern {id}")))
    }
}

/// CRC32 over the first `len` bytes of `file`.
fn checksum_prefix(mut file: &File, len: u64) -> io::Result<u32> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = file.take(len);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CHECKSUM_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Reads a header varint, returning it with its encoded width.
fn header_uvarint<R: Read>(reader: &mut R) -> CodecResult<(u64, u64)> {
    let mut counted = CountingReader { inner: reader, n: 0 };
    match read_uvarint_from(&mut counted) {
        Ok(Some(v)) => Ok((v, counted.n)),
        Ok(None) => Err(CodecError::corrupt("header ends inside pattern table")),
        Err(e) if matches!(e.kind(), io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData) => {
            Err(CodecError::corrupt(format!("bad pattern length: {e}")))
        }
        Err(e) => Err(e.into()),
    }
}

struct CountingReader<'a, R> {
    inner: &'a mut R,
    n: u64,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.n += n as u64;
        Ok(n)
    }
}

/// Releases a read-ahead hint on drop.
#[derive(Debug)]
pub struct ReadAheadGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for ReadAheadGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Sequential cursor over the words of a [`Decompressor`].
///
/// Each getter owns a window of body bytes. Words inside the window decode
/// without touching the file.
#[derive(Debug, Clone)]
pub struct Getter<'a> {
    d: &'a Decompressor,
    pos: u64,
    window: Vec<u8>,
    window_start: u64,
}

impl Getter<'_> {
    /// Returns true if another word follows.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.pos < self.d.body.end
    }

    /// Offset of the next word, relative to the body start.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.pos - self.d.body.start
    }

    /// Moves to a word boundary previously reported by [`Getter::offset`].
    pub fn reset(&mut self, offset: u64) -> CodecResult<()> {
        let pos = self
            .d
            .body
            .start
            .checked_add(offset)
            .filter(|&p| p <= self.d.body.end)
            .ok_or_else(|| CodecError::corrupt(format!("offset {offset} beyond body")))?;
        self.pos = pos;
        Ok(())
    }

    /// Decodes the next word into `buf`, replacing its contents.
    pub fn next(&mut self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.clear();
        let (decoded_len, ops) = self.read_word_header()?;
        let ops_len = (ops.end - ops.start) as usize;
        let start = self.fill(ops.start, ops_len)?;
        buf.reserve(decoded_len);

        let d = self.d;
        let body = &self.window[start..start + ops_len];
        let mut pos = 0;
        while pos < body.len() {
            let tag = read_uvarint(body, &mut pos)?;
            if tag & 1 == 1 {
                buf.extend_from_slice(d.pattern(tag >> 1)?);
            } else {
                let len = (tag >> 1) as usize;
                let end = pos
                    .checked_add(len)
                    .filter(|&e| e <= body.len())
                    .ok_or_else(|| CodecError::corrupt("literal extends beyond word"))?;
                buf.extend_from_slice(&body[pos..end]);
                pos = end;
            }
        }
        if buf.len() != decoded_len {
            return Err(CodecError::corrupt(format!(
                "word decoded to {} bytes, header says {decoded_len}",
                buf.len()
            )));
        }
        self.pos = ops.end;
        Ok(())
    }

    /// Decodes the next word into a fresh buffer.
    pub fn next_word(&mut self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.next(&mut buf)?;
        Ok(buf)
    }

    /// Advances past the next word without decoding it.
    ///
    /// Returns the decoded length of the skipped word.
    pub fn skip(&mut self) -> CodecResult<u64> {
        let (decoded_len, ops) = self.read_word_header()?;
        self.pos = ops.end;
        Ok(decoded_len as u64)
    }

    fn read_word_header(&mut self) -> CodecResult<(usize, Range<u64>)> {
        if !self.has_next() {
            return Err(CodecError::NoMoreWords);
        }
        let avail = (self.d.body.end - self.pos).min(WORD_HEADER_MAX) as usize;
        let start = self.fill(self.pos, avail)?;
        let header = &self.window[start..start + avail];
        let mut rel = 0;
        let decoded_len = read_uvarint(header, &mut rel)? as usize;
        let ops_len = read_uvarint(header, &mut rel)?;
        let ops_start = self.pos + rel as u64;
        let end = ops_start
            .checked_add(ops_len)
            .filter(|&e| e <= self.d.body.end)
            .ok_or_else(|| CodecError::corrupt("word extends beyond body"))?;
        Ok((decoded_len, ops_start..end))
    }

    /// Makes `[pos, pos + len)` resident in the window and returns the
    /// window index of `pos`.
    fn fill(&mut self, pos: u64, len: usize) -> CodecResult<usize> {
        let end = pos
            .checked_add(len as u64)
            .filter(|&e| e <= self.d.body.end)
            .ok_or_else(|| CodecError::corrupt("word extends beyond body"))?;
        let window_end = self.window_start + self.window.len() as u64;
        if pos < self.window_start || end > window_end {
            let chunk = len.max(self.d.chunk_size()) as u64;
            let read_end = pos.saturating_add(chunk).min(self.d.body.end);
            self.window.resize((read_end - pos) as usize, 0);
            self.d.read_at(pos, &mut self.window)?;
            self.window_start = pos;
        }
        Ok((pos - self.window_start) as usize)
    }
}
