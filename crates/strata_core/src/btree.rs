//! Sparse B-tree index over a segment of sorted `(key, value)` word pairs.
//!
//! Building scans the data file once and keeps every `m`-th key with the
//! offset of its word as a separator. A lookup binary-searches the
//! separators, positions a getter at the chosen offset and scans at most
//! `m` pairs forward.
//!
//! ## File layout
//!
//! ```text
//! | magic "SGBT" (4) | version (2) | m u32 | key_count u64 |
//! | data_word_count u64 | data_crc u32 | sep_count u64 |
//! | (uvarint key_len, key, offset u64, ordinal u64)* | crc32 (4) |
//! ```
//!
//! The data file's word count and checksum are recorded so an index built
//! for a different version of the data file is detected as stale.

use crate::error::{CoreError, CoreResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_codec::{put_uvarint, read_uvarint, write_atomic, CancelToken, Decompressor, Getter};
use tracing::debug;

/// Magic bytes for B-tree index files.
pub const BTREE_MAGIC: [u8; 4] = *b"SGBT";

/// Current B-tree file version.
pub const BTREE_VERSION: u16 = 1;

const FIXED_HEADER: usize = 4 + 2 + 4 + 8 + 8 + 4 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Separator {
    key: Vec<u8>,
    offset: u64,
    ordinal: u64,
}

/// An opened B-tree index bound to its data file.
#[derive(Debug)]
pub struct BtreeIndex {
    path: PathBuf,
    data: Arc<Decompressor>,
    m: u32,
    key_count: u64,
    separators: Vec<Separator>,
}

impl BtreeIndex {
    /// Scans `data` and writes an index with one separator every `m` keys.
    ///
    /// # Errors
    ///
    /// Returns `CorruptSegment` if the data is not an even number of words
    /// with strictly ascending keys.
    pub fn build(path: &Path, data: &Decompressor, m: u32, cancel: &CancelToken) -> CoreResult<()> {
        let m = m.max(1);
        let codec_err = |e| CoreError::from_codec(data.path(), e);
        if data.word_count() % 2 != 0 {
            return Err(CoreError::corrupt_segment(
                data.path(),
                "odd word count in key/value file",
            ));
        }

        let _read_ahead = data.enable_read_ahead();
        let mut getter = data.make_getter();
        let mut separators = Vec::new();
        let mut key = Vec::new();
        let mut prev: Option<Vec<u8>> = None;
        let mut ordinal = 0u64;

        while getter.has_next() {
            if ordinal % 4096 == 0 {
                cancel.check()?;
            }
            let offset = getter.offset();
            getter.next(&mut key).map_err(codec_err)?;
            if prev.as_deref().is_some_and(|p| p >= key.as_slice()) {
                return Err(CoreError::corrupt_segment(
                    data.path(),
                    format!("keys not strictly ascending at ordinal {ordinal}"),
                ));
            }
            if ordinal % u64::from(m) == 0 {
                separators.push(Separator {
                    key: key.clone(),
                    offset,
                    ordinal,
                });
            }
            getter.skip().map_err(codec_err)?;
            prev = Some(std::mem::take(&mut key));
            ordinal += 1;
        }

        let mut buf = Vec::with_capacity(FIXED_HEADER + separators.len() * 32);
        buf.extend_from_slice(&BTREE_MAGIC);
        buf.extend_from_slice(&BTREE_VERSION.to_le_bytes());
        buf.extend_from_slice(&m.to_le_bytes());
        buf.extend_from_slice(&ordinal.to_le_bytes());
        buf.extend_from_slice(&data.word_count().to_le_bytes());
        buf.extend_from_slice(&data.checksum().to_le_bytes());
        buf.extend_from_slice(&(separators.len() as u64).to_le_bytes());
        for sep in &separators {
            put_uvarint(&mut buf, sep.key.len() as u64);
            buf.extend_from_slice(&sep.key);
            buf.extend_from_slice(&sep.offset.to_le_bytes());
            buf.extend_from_slice(&sep.ordinal.to_le_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        cancel.check()?;
        write_atomic(path, &buf)?;
        debug!(
            file = %path.display(),
            keys = ordinal,
            separators = separators.len(),
            "built btree index"
        );
        Ok(())
    }

    /// Opens an index and checks it against its data file.
    ///
    /// # Errors
    ///
    /// - `IndexStale` if the file is missing or was built for other data
    /// - `CorruptSegment` if the index file itself is damaged
    pub fn open(path: &Path, data: Arc<Decompressor>) -> CoreResult<Self> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::index_stale(path));
            }
            Err(e) => return Err(e.into()),
        };
        let corrupt = |msg: &str| CoreError::corrupt_segment(path, msg.to_string());

        if bytes.len() < FIXED_HEADER + 4 || bytes[0..4] != BTREE_MAGIC {
            return Err(corrupt("invalid btree magic"));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(body) != stored {
            return Err(corrupt("btree checksum mismatch"));
        }
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version != BTREE_VERSION {
            return Err(corrupt("unsupported btree version"));
        }

        let u64_at = |pos: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&body[pos..pos + 8]);
            u64::from_le_bytes(b)
        };
        let m = u32::from_le_bytes([body[6], body[7], body[8], body[9]]);
        let key_count = u64_at(10);
        let data_words = u64_at(18);
        let data_crc = u32::from_le_bytes([body[26], body[27], body[28], body[29]]);
        let sep_count = u64_at(30);

        if data_words != data.word_count() || data_crc != data.checksum() {
            return Err(CoreError::index_stale(path));
        }
        if m == 0 || key_count * 2 != data_words {
            return Err(corrupt("btree header inconsistent with data"));
        }

        let mut pos = FIXED_HEADER;
        let mut separators = Vec::with_capacity(sep_count.min(body.len() as u64) as usize);
        for _ in 0..sep_count {
            let len = read_uvarint(body, &mut pos).map_err(|e| corrupt(&e.to_string()))? as usize;
            if pos + len + 16 > body.len() {
                return Err(corrupt("separator extends beyond file"));
            }
            let key = body[pos..pos + len].to_vec();
            pos += len;
            let offset = u64_at(pos);
            let ordinal = u64_at(pos + 8);
            pos += 16;
            separators.push(Separator {
                key,
                offset,
                ordinal,
            });
        }
        if pos != body.len() {
            return Err(corrupt("trailing bytes in btree"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            data,
            m,
            key_count,
            separators,
        })
    }

    /// Builds the index file and opens it.
    pub fn build_and_open(
        path: &Path,
        data: Arc<Decompressor>,
        m: u32,
        cancel: &CancelToken,
    ) -> CoreResult<Self> {
        Self::build(path, &data, m, cancel)?;
        Self::open(path, data)
    }

    /// Index file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Branching factor.
    #[must_use]
    pub fn m(&self) -> u32 {
        self.m
    }

    /// Number of keys in the data file.
    #[must_use]
    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Number of in-memory separators.
    #[must_use]
    pub fn separator_count(&self) -> usize {
        self.separators.len()
    }

    /// Positions a cursor at the first key `>= key`.
    ///
    /// Returns `None` if every key is smaller.
    pub fn seek(&self, key: &[u8]) -> CoreResult<Option<Cursor<'_>>> {
        let idx = self.separators.partition_point(|s| s.key.as_slice() <= key);
        let Some(sep) = self.separators.get(idx.saturating_sub(1)) else {
            return Ok(None);
        };

        let mut cursor = Cursor {
            index: self,
            getter: self.data.make_getter(),
            key: Vec::new(),
            value: Vec::new(),
            ordinal: sep.ordinal,
        };
        cursor.getter.reset(sep.offset).map_err(|e| self.codec_err(e))?;
        while cursor.read_pair()? {
            if cursor.key.as_slice() >= key {
                return Ok(Some(cursor));
            }
            cursor.ordinal += 1;
        }
        Ok(None)
    }

    /// Returns the value stored under exactly `key`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Ok(self
            .seek(key)?
            .filter(|c| c.key() == key)
            .map(Cursor::into_value))
    }

    /// Cursor at the first key.
    pub fn first(&self) -> CoreResult<Option<Cursor<'_>>> {
        self.seek(&[])
    }

    fn codec_err(&self, e: strata_codec::CodecError) -> CoreError {
        CoreError::from_codec(self.data.path(), e)
    }
}

/// A position in a B-tree indexed file.
#[derive(Debug)]
pub struct Cursor<'a> {
    index: &'a BtreeIndex,
    getter: Getter<'a>,
    key: Vec<u8>,
    value: Vec<u8>,
    ordinal: u64,
}

impl Cursor<'_> {
    /// Current key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Position of the current key among all keys.
    #[must_use]
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Consumes the cursor, returning the current value.
    #[must_use]
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    /// Advances to the next key. Returns false at the end.
    pub fn next(&mut self) -> CoreResult<bool> {
        if !self.read_pair()? {
            return Ok(false);
        }
        self.ordinal += 1;
        Ok(true)
    }

    fn read_pair(&mut self) -> CoreResult<bool> {
        if !self.getter.has_next() {
            return Ok(false);
        }
        self.getter
            .next(&mut self.key)
            .map_err(|e| self.index.codec_err(e))?;
        self.getter
            .next(&mut self.value)
            .map_err(|e| self.index.codec_err(e))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strata_codec::{Compressor, CompressorConfig};
    use tempfile::TempDir;

    fn data_file(dir: &TempDir, pairs: &[(Vec<u8>, Vec<u8>)]) -> Arc<Decompressor> {
        let path = dir.path().join("data.kv");
        let mut c = Compressor::new(&path, CompressorConfig::default());
        for (k, v) in pairs {
            c.add_word(k);
            c.add_word(v);
        }
        c.compress(&CancelToken::new()).unwrap();
        Arc::new(Decompressor::open(&path).unwrap())
    }

    fn numbered(n: u32) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| ((i * 2).to_be_bytes().to_vec(), format!("v{i}").into_bytes()))
            .collect()
    }

    #[test]
    fn seek_exact_between_and_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = numbered(100);
        let data = data_file(&dir, &pairs);
        let idx_path = dir.path().join("data.bt");
        let idx = BtreeIndex::build_and_open(&idx_path, data, 8, &CancelToken::new()).unwrap();
        assert_eq!(idx.key_count(), 100);
        assert_eq!(idx.separator_count(), 13);

        let c = idx.seek(&10u32.to_be_bytes()).unwrap().unwrap();
        assert_eq!(c.key(), 10u32.to_be_bytes());
        assert_eq!(c.value(), b"v5");
        assert_eq!(c.ordinal(), 5);

        let c = idx.seek(&11u32.to_be_bytes()).unwrap().unwrap();
        assert_eq!(c.key(), 12u32.to_be_bytes());

        assert!(idx.seek(&199u32.to_be_bytes()).unwrap().is_none());
        assert_eq!(idx.get(&198u32.to_be_bytes()).unwrap(), Some(b"v99".to_vec()));
        assert_eq!(idx.get(&3u32.to_be_bytes()).unwrap(), None);
        assert_eq!(idx.first().unwrap().unwrap().key(), 0u32.to_be_bytes());
    }

    #[test]
    fn cursor_walks_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let data = data_file(&dir, &numbered(20));
        let idx_path = dir.path().join("data.bt");
        let idx = BtreeIndex::build_and_open(&idx_path, data, 4, &CancelToken::new()).unwrap();

        let mut c = idx.seek(&30u32.to_be_bytes()).unwrap().unwrap();
        let mut seen = vec![c.key().to_vec()];
        while c.next().unwrap() {
            seen.push(c.key().to_vec());
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(c.ordinal(), 19);
    }

    #[test]
    fn empty_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = data_file(&dir, &[]);
        let idx_path = dir.path().join("data.bt");
        let idx = BtreeIndex::build_and_open(&idx_path, data, 4, &CancelToken::new()).unwrap();
        assert!(idx.seek(b"anything").unwrap().is_none());
        assert!(idx.first().unwrap().is_none());
    }

    #[test]
    fn unsorted_data_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = vec![(b"b".to_vec(), b"1".to_vec()), (b"a".to_vec(), b"2".to_vec())];
        let data = data_file(&dir, &pairs);
        let err = BtreeIndex::build(&dir.path().join("x.bt"), &data, 4, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::CorruptSegment { .. }));
    }

    #[test]
    fn index_for_other_data_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let first = data_file(&dir, &numbered(10));
        let idx_path = dir.path().join("data.bt");
        BtreeIndex::build(&idx_path, &first, 4, &CancelToken::new()).unwrap();

        let second = data_file(&dir, &numbered(11));
        let err = BtreeIndex::open(&idx_path, second).unwrap_err();
        assert!(err.is_index_stale());

        let missing = BtreeIndex::open(&dir.path().join("none.bt"), first).unwrap_err();
        assert!(missing.is_index_stale());
    }

    #[test]
    fn damaged_index_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let data = data_file(&dir, &numbered(10));
        let idx_path = dir.path().join("data.bt");
        BtreeIndex::build(&idx_path, &data, 4, &CancelToken::new()).unwrap();

        let mut bytes = fs::read(&idx_path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x55;
        fs::write(&idx_path, bytes).unwrap();
        assert!(matches!(
            BtreeIndex::open(&idx_path, data),
            Err(CoreError::CorruptSegment { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn seek_matches_linear_search(
            keys in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..6), 0..120),
            probes in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..6), 1..40),
            m in 1u32..10,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let pairs: Vec<_> = keys.iter().enumerate()
                .map(|(i, k)| (k.clone(), i.to_le_bytes().to_vec()))
                .collect();
            let data = data_file(&dir, &pairs);
            let idx = BtreeIndex::build_and_open(&dir.path().join("p.bt"), data, m, &CancelToken::new()).unwrap();

            // Probe separator keys and their neighbours as well as random keys.
            let mut all_probes = probes.clone();
            for (k, _) in pairs.iter().step_by(m as usize) {
                all_probes.push(k.clone());
                let mut after = k.clone();
                after.push(0);
                all_probes.push(after);
            }

            for probe in &all_probes {
                let expected = pairs.iter().position(|(k, _)| k >= probe);
                let got = idx.seek(probe).unwrap();
                match expected {
                    None => prop_assert!(got.is_none()),
                    Some(i) => {
                        let c = got.unwrap();
                        prop_assert_eq!(c.key(), pairs[i].0.as_slice());
                        prop_assert_eq!(c.value(), pairs[i].1.as_slice());
                        prop_assert_eq!(c.ordinal(), i as u64);
                    }
                }
            }
        }
    }
}
