//! The immutable file set of one domain over one step range.
//!
//! A set is three data files plus up to three B-tree indices:
//!
//! - `kv`: `(key, flag ‖ txNum ‖ value)` for the newest change of each key
//! - `v`: `(key ‖ txNum, flag ‖ value)` for every change
//! - `ef`: `(key, TxNum list)`
//! - `bt`, `vi`, `efi`: indices over `kv`, `v`, `ef`
//!
//! Data files are written `ef`, `v`, `kv`; a `kv` on disk means the data
//! set is complete. Only `bt` is required for reads. Without `vi`/`efi`
//! the history lookups fall back to a sequential scan.
//!
//! Sets are shared through `Arc`. Merge and prune mark a superseded set as
//! garbage; its files are deleted when the last reference is dropped, which
//! is after every context that could read it has closed.

use crate::btree::BtreeIndex;
use crate::dir::{file_name, FileKind};
use crate::error::{CoreError, CoreResult};
use crate::inverted::{encode_tx_list, TxNumList};
use crate::types::{decode_latest, decode_value, StepRange, TxNum};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_codec::{sync_dir, try_map, CancelToken, Compressor, CompressorConfig, Decompressor};
use tracing::{debug, warn};

/// Sorted contents for a new file set.
#[derive(Debug, Default)]
pub struct SegmentData {
    /// `(key, encoded latest value)`, ascending by key.
    pub latest: Vec<(Vec<u8>, Vec<u8>)>,
    /// `(key ‖ txNum, encoded value)`, ascending by composite key.
    pub history: Vec<(Vec<u8>, Vec<u8>)>,
    /// `(key, ascending TxNums)`, ascending by key.
    pub inverted: Vec<(Vec<u8>, Vec<TxNum>)>,
}

impl SegmentData {
    /// Number of history entries.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.history.len()
    }
}

/// Settings used when writing a file set.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Codec settings for the data files.
    pub codec: CompressorConfig,
    /// B-tree branching factor.
    pub btree_m: u32,
    /// Whether to build `vi` and `efi` as well as `bt`.
    pub optional_indices: bool,
    /// Threads for index builds.
    pub index_workers: usize,
}

/// Summary of one file set, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Owning domain.
    pub domain: String,
    /// Steps covered.
    pub range: StepRange,
    /// Keys in `kv`.
    pub keys: u64,
    /// Entries in `v`.
    pub changes: u64,
    /// Total bytes across data files.
    pub size: u64,
    /// Index kinds present.
    pub indices: Vec<FileKind>,
}

/// One domain's files for one step range.
#[derive(Debug)]
pub struct SegmentFiles {
    domain: String,
    range: StepRange,
    snapshots: PathBuf,
    kv: Arc<Decompressor>,
    history: Arc<Decompressor>,
    inverted: Arc<Decompressor>,
    kv_index: RwLock<Option<Arc<BtreeIndex>>>,
    history_index: RwLock<Option<Arc<BtreeIndex>>>,
    inverted_index: RwLock<Option<Arc<BtreeIndex>>>,
    garbage: AtomicBool,
}

fn open_data(path: &Path) -> CoreResult<Arc<Decompressor>> {
    Decompressor::open(path)
        .map(Arc::new)
        .map_err(|e| match e {
            strata_codec::CodecError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                CoreError::PartialWrite {
                    path: path.to_path_buf(),
                }
            }
            other => CoreError::from_codec(path, other),
        })
}

impl SegmentFiles {
    /// Opens an existing file set. Missing or unusable indices are left
    /// unset and reported by [`SegmentFiles::missing_indices`].
    ///
    /// # Errors
    ///
    /// - `PartialWrite` if a data file is missing
    /// - `CorruptSegment` if a data file fails validation
    pub fn open(snapshots: &Path, domain: &str, range: StepRange) -> CoreResult<Self> {
        let path = |kind| snapshots.join(file_name(domain, range, kind));
        let files = Self {
            domain: domain.to_string(),
            range,
            snapshots: snapshots.to_path_buf(),
            kv: open_data(&path(FileKind::Kv))?,
            history: open_data(&path(FileKind::History))?,
            inverted: open_data(&path(FileKind::Inverted))?,
            kv_index: RwLock::new(None),
            history_index: RwLock::new(None),
            inverted_index: RwLock::new(None),
            garbage: AtomicBool::new(false),
        };
        if files.kv.word_count() % 2 != 0 || files.history.word_count() % 2 != 0 {
            return Err(CoreError::corrupt_segment(
                path(FileKind::Kv),
                "odd word count in key/value file",
            ));
        }
        for kind in [FileKind::KvIndex, FileKind::HistoryIndex, FileKind::InvertedIndex] {
            files.try_open_index(kind);
        }
        Ok(files)
    }

    /// Writes a complete file set and opens it.
    ///
    /// On failure every file of the set written so far is removed.
    pub fn write(
        snapshots: &Path,
        domain: &str,
        range: StepRange,
        data: &SegmentData,
        opts: &WriteOptions,
        cancel: &CancelToken,
    ) -> CoreResult<Self> {
        let result = Self::write_inner(snapshots, domain, range, data, opts, cancel);
        if result.is_err() {
            remove_set(snapshots, domain, range);
        }
        result
    }

    fn write_inner(
        snapshots: &Path,
        domain: &str,
        range: StepRange,
        data: &SegmentData,
        opts: &WriteOptions,
        cancel: &CancelToken,
    ) -> CoreResult<Self> {
        let path = |kind| snapshots.join(file_name(domain, range, kind));

        let mut ef = Compressor::new(path(FileKind::Inverted), opts.codec.clone());
        for (key, txs) in &data.inverted {
            ef.add_word(key);
            ef.add_word(&encode_tx_list(txs)?);
        }
        ef.compress(cancel)?;

        let mut v = Compressor::new(path(FileKind::History), opts.codec.clone());
        for (key, value) in &data.history {
            v.add_word(key);
            v.add_word(value);
        }
        v.compress(cancel)?;

        let mut kv = Compressor::new(path(FileKind::Kv), opts.codec.clone());
        for (key, value) in &data.latest {
            kv.add_word(key);
            kv.add_word(value);
        }
        kv.compress(cancel)?;

        let files = Self::open(snapshots, domain, range)?;
        let mut kinds = vec![FileKind::KvIndex];
        if opts.optional_indices {
            kinds.extend([FileKind::HistoryIndex, FileKind::InvertedIndex]);
        }
        files.build_indices(&kinds, opts.btree_m, opts.index_workers, cancel)?;
        Ok(files)
    }

    /// Owning domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Steps covered.
    #[must_use]
    pub fn range(&self) -> StepRange {
        self.range
    }

    /// Path of one file of the set.
    #[must_use]
    pub fn path(&self, kind: FileKind) -> PathBuf {
        self.snapshots.join(file_name(&self.domain, self.range, kind))
    }

    /// Number of keys in `kv`.
    #[must_use]
    pub fn key_count(&self) -> u64 {
        self.kv.word_count() / 2
    }

    /// Number of entries in `v`.
    #[must_use]
    pub fn change_count(&self) -> u64 {
        self.history.word_count() / 2
    }

    /// Total bytes across the data files.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.kv.size() + self.history.size() + self.inverted.size()
    }

    fn data(&self, kind: FileKind) -> Option<&Arc<Decompressor>> {
        match kind {
            FileKind::Kv => Some(&self.kv),
            FileKind::History => Some(&self.history),
            FileKind::Inverted => Some(&self.inverted),
            _ => None,
        }
    }

    fn index_slot(&self, kind: FileKind) -> Option<&RwLock<Option<Arc<BtreeIndex>>>> {
        match kind {
            FileKind::KvIndex => Some(&self.kv_index),
            FileKind::HistoryIndex => Some(&self.history_index),
            FileKind::InvertedIndex => Some(&self.inverted_index),
            _ => None,
        }
    }

    /// The opened index of `kind`, if present.
    #[must_use]
    pub fn index(&self, kind: FileKind) -> Option<Arc<BtreeIndex>> {
        self.index_slot(kind).and_then(|slot| slot.read().clone())
    }

    fn try_open_index(&self, kind: FileKind) {
        let (Some(slot), Some(data)) = (
            self.index_slot(kind),
            kind.indexed_data().and_then(|d| self.data(d)),
        ) else {
            return;
        };
        let path = self.path(kind);
        match BtreeIndex::open(&path, Arc::clone(data)) {
            Ok(index) => *slot.write() = Some(Arc::new(index)),
            Err(CoreError::IndexStale { .. }) if !path.exists() => {}
            Err(e) => {
                warn!(file = %path.display(), error = %e, "discarding unusable index");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(file = %path.display(), error = %e, "failed to remove index");
                }
            }
        }
    }

    /// Index kinds not currently available. `optional` includes `vi`/`efi`.
    #[must_use]
    pub fn missing_indices(&self, optional: bool) -> Vec<FileKind> {
        let kinds: &[FileKind] = if optional {
            &[FileKind::KvIndex, FileKind::HistoryIndex, FileKind::InvertedIndex]
        } else {
            &[FileKind::KvIndex]
        };
        kinds
            .iter()
            .copied()
            .filter(|&k| self.index(k).is_none())
            .collect()
    }

    /// Builds the given indices and installs them. Readers switch to a new
    /// index atomically.
    pub fn build_indices(
        &self,
        kinds: &[FileKind],
        m: u32,
        workers: usize,
        cancel: &CancelToken,
    ) -> CoreResult<()> {
        let built = try_map(kinds.to_vec(), workers, |kind| {
            let data = kind
                .indexed_data()
                .and_then(|d| self.data(d))
                .ok_or_else(|| CoreError::invalid_operation(format!("{kind} is not an index")))?;
            let index = BtreeIndex::build_and_open(&self.path(kind), Arc::clone(data), m, cancel)?;
            Ok::<_, CoreError>((kind, index))
        })?;
        for (kind, index) in built {
            if let Some(slot) = self.index_slot(kind) {
                *slot.write() = Some(Arc::new(index));
            }
        }
        Ok(())
    }

    /// Newest change of `key` in this range: `(txNum, value-or-tombstone)`.
    ///
    /// # Errors
    ///
    /// Returns `IndexStale` if the `bt` index is not available.
    pub fn get_latest(&self, key: &[u8]) -> CoreResult<Option<(TxNum, Option<Vec<u8>>)>> {
        let index = self
            .index(FileKind::KvIndex)
            .ok_or_else(|| CoreError::index_stale(self.path(FileKind::KvIndex)))?;
        index.get(key)?.map(|v| decode_latest(&v)).transpose()
    }

    /// TxNums at which `key` changed in this range.
    pub fn tx_list(&self, key: &[u8]) -> CoreResult<Option<TxNumList>> {
        let raw = match self.index(FileKind::InvertedIndex) {
            Some(index) => index.get(key)?,
            None => self.scan_get(&self.inverted, key)?,
        };
        raw.map(TxNumList::decode).transpose()
    }

    /// The value `key` was set to at `tx_num`, if this range holds that
    /// change. The inner `None` is a deletion.
    pub fn history_value(&self, key: &[u8], tx_num: TxNum) -> CoreResult<Option<Option<Vec<u8>>>> {
        let mut composite = Vec::with_capacity(key.len() + 8);
        composite.extend_from_slice(key);
        composite.extend_from_slice(&tx_num.to_be_bytes());
        let raw = match self.index(FileKind::HistoryIndex) {
            Some(index) => index.get(&composite)?,
            None => self.scan_get(&self.history, &composite)?,
        };
        raw.map(|v| decode_value(&v)).transpose()
    }

    fn scan_get(&self, data: &Decompressor, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let mut found = None;
        self.scan(data, &CancelToken::new(), |k, v| {
            if k == key {
                found = Some(v.to_vec());
            }
            Ok(k < key)
        })?;
        Ok(found)
    }

    /// Calls `f(key, value)` for each pair of a data file in order until it
    /// returns `false`.
    pub fn for_each(
        &self,
        kind: FileKind,
        cancel: &CancelToken,
        f: impl FnMut(&[u8], &[u8]) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        let data = self
            .data(kind)
            .ok_or_else(|| CoreError::invalid_operation(format!("{kind} is not a data file")))?;
        self.scan(data, cancel, f)
    }

    fn scan(
        &self,
        data: &Decompressor,
        cancel: &CancelToken,
        mut f: impl FnMut(&[u8], &[u8]) -> CoreResult<bool>,
    ) -> CoreResult<()> {
        let codec_err = |e| CoreError::from_codec(data.path(), e);
        let _read_ahead = data.enable_read_ahead();
        let mut getter = data.make_getter();
        let (mut key, mut value) = (Vec::new(), Vec::new());
        let mut n = 0u64;
        while getter.has_next() {
            if n % 4096 == 0 {
                cancel.check()?;
            }
            getter.next(&mut key).map_err(codec_err)?;
            getter.next(&mut value).map_err(codec_err)?;
            if !f(&key, &value)? {
                break;
            }
            n += 1;
        }
        Ok(())
    }

    /// Summary for listings.
    #[must_use]
    pub fn info(&self) -> FileInfo {
        FileInfo {
            domain: self.domain.clone(),
            range: self.range,
            keys: self.key_count(),
            changes: self.change_count(),
            size: self.size(),
            indices: [FileKind::KvIndex, FileKind::HistoryIndex, FileKind::InvertedIndex]
                .into_iter()
                .filter(|&k| self.index(k).is_some())
                .collect(),
        }
    }

    /// Schedules the files for deletion once the last reference is dropped.
    pub fn mark_garbage(&self) {
        self.garbage.store(true, Ordering::Release);
    }

    /// Returns true if the set has been superseded or pruned.
    #[must_use]
    pub fn is_garbage(&self) -> bool {
        self.garbage.load(Ordering::Acquire)
    }
}

impl Drop for SegmentFiles {
    fn drop(&mut self) {
        if self.is_garbage() {
            remove_set(&self.snapshots, &self.domain, self.range);
        }
    }
}

/// Best-effort removal of every file of a set.
pub(crate) fn remove_set(snapshots: &Path, domain: &str, range: StepRange) {
    let mut removed = 0;
    for kind in FileKind::ALL {
        let path = snapshots.join(file_name(domain, range, kind));
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %path.display(), error = %e, "failed to delete segment file"),
        }
    }
    if removed > 0 {
        if let Err(e) = sync_dir(snapshots) {
            warn!(dir = %snapshots.display(), error = %e, "failed to sync snapshots dir");
        }
        debug!(domain, range = %range, files = removed, "deleted segment files");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{encode_latest, encode_value};

    fn opts(optional: bool) -> WriteOptions {
        WriteOptions {
            codec: CompressorConfig::default(),
            btree_m: 4,
            optional_indices: optional,
            index_workers: 2,
        }
    }

    fn sample() -> SegmentData {
        let mut data = SegmentData::default();
        for i in 0u64..20 {
            let key = format!("key{i:02}").into_bytes();
            let deleted = i % 7 == 6;
            let value = (!deleted).then(|| format!("val{i}").into_bytes());
            data.latest.push((key.clone(), encode_latest(i * 2 + 1, value.as_deref())));

            for tx in [i * 2, i * 2 + 1] {
                let mut composite = key.clone();
                composite.extend_from_slice(&tx.to_be_bytes());
                let mut v = Vec::new();
                let val = if tx == i * 2 + 1 { value.clone() } else { Some(b"first".to_vec()) };
                encode_value(val.as_deref(), &mut v);
                data.history.push((composite, v));
            }
            data.inverted.push((key, vec![i * 2, i * 2 + 1]));
        }
        data
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let range = StepRange::new(0, 4).unwrap();
        let files =
            SegmentFiles::write(dir.path(), "accounts", range, &sample(), &opts(true), &CancelToken::new())
                .unwrap();

        assert_eq!(files.key_count(), 20);
        assert_eq!(files.change_count(), 40);
        assert!(files.missing_indices(true).is_empty());

        assert_eq!(
            files.get_latest(b"key03").unwrap(),
            Some((7, Some(b"val3".to_vec())))
        );
        assert_eq!(files.get_latest(b"key06").unwrap(), Some((13, None)));
        assert_eq!(files.get_latest(b"nope").unwrap(), None);

        let txs = files.tx_list(b"key05").unwrap().unwrap();
        assert_eq!(txs.to_vec(), vec![10, 11]);
        assert_eq!(files.history_value(b"key05", 10).unwrap(), Some(Some(b"first".to_vec())));
        assert_eq!(files.history_value(b"key05", 12).unwrap(), None);
    }

    #[test]
    fn optional_indices_fall_back_to_scan() {
        let dir = tempfile::tempdir().unwrap();
        let range = StepRange::new(0, 1).unwrap();
        let files =
            SegmentFiles::write(dir.path(), "code", range, &sample(), &opts(false), &CancelToken::new())
                .unwrap();
        assert_eq!(
            files.missing_indices(true),
            vec![FileKind::HistoryIndex, FileKind::InvertedIndex]
        );
        assert!(files.missing_indices(false).is_empty());
        assert_eq!(files.tx_list(b"key19").unwrap().unwrap().to_vec(), vec![38, 39]);
        assert_eq!(files.history_value(b"key19", 39).unwrap(), Some(Some(b"val19".to_vec())));
        assert_eq!(files.tx_list(b"key20").unwrap().map(|l| l.len()), None);
    }

    #[test]
    fn missing_kv_index_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let range = StepRange::new(0, 1).unwrap();
        let files =
            SegmentFiles::write(dir.path(), "code", range, &sample(), &opts(false), &CancelToken::new())
                .unwrap();
        drop(files);
        fs::remove_file(dir.path().join(file_name("code", range, FileKind::KvIndex))).unwrap();

        let files = SegmentFiles::open(dir.path(), "code", range).unwrap();
        assert_eq!(files.missing_indices(false), vec![FileKind::KvIndex]);
        assert!(files.get_latest(b"key01").unwrap_err().is_index_stale());

        files
            .build_indices(&[FileKind::KvIndex], 4, 1, &CancelToken::new())
            .unwrap();
        assert!(files.get_latest(b"key01").unwrap().is_some());
    }

    #[test]
    fn garbage_files_deleted_on_last_drop() {
        let dir = tempfile::tempdir().unwrap();
        let range = StepRange::new(0, 1).unwrap();
        let files = Arc::new(
            SegmentFiles::write(dir.path(), "code", range, &sample(), &opts(true), &CancelToken::new())
                .unwrap(),
        );
        let reader = Arc::clone(&files);
        files.mark_garbage();
        drop(files);
        assert!(reader.path(FileKind::Kv).exists());
        assert!(reader.get_latest(b"key01").unwrap().is_some());
        drop(reader);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn cancelled_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = SegmentFiles::write(
            dir.path(),
            "code",
            StepRange::new(0, 1).unwrap(),
            &sample(),
            &opts(true),
            &cancel,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_data_file_is_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let err = SegmentFiles::open(dir.path(), "code", StepRange::new(0, 1).unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::PartialWrite { .. }));
    }
}
