//! Data directory management.
//!
//! ```text
//! <datadir>/
//! ├─ MANIFEST          # Pruned boundaries and last commitment
//! ├─ LOCK              # Advisory lock for the single aggregator
//! └─ snapshots/
//!    ├─ v1-accounts.0-16.kv
//!    ├─ v1-accounts.0-16.bt
//!    └─ ...
//! ```
//!
//! File names encode the domain, the step range and the file kind, so the
//! directory itself is the registry: discovery needs no catalog beyond the
//! manifest.

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use crate::types::StepRange;
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use strata_codec::{is_temp_path, sync_dir, write_atomic};
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
const SNAPSHOTS_DIR: &str = "snapshots";

/// Prefix carrying the file naming version.
const NAME_PREFIX: &str = "v1-";

/// The kinds of file kept per (domain, step range).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    /// Latest value per key.
    Kv,
    /// Every change, keyed `key ‖ txNum`.
    History,
    /// TxNum list per key.
    Inverted,
    /// B-tree over `Kv`.
    KvIndex,
    /// B-tree over `History`.
    HistoryIndex,
    /// B-tree over `Inverted`.
    InvertedIndex,
}

impl FileKind {
    /// Data files in write order. `Kv` is last and marks a complete set.
    pub const DATA: [FileKind; 3] = [FileKind::Inverted, FileKind::History, FileKind::Kv];

    /// Every kind.
    pub const ALL: [FileKind; 6] = [
        FileKind::Kv,
        FileKind::History,
        FileKind::Inverted,
        FileKind::KvIndex,
        FileKind::HistoryIndex,
        FileKind::InvertedIndex,
    ];

    /// File extension.
    #[must_use]
    pub const fn ext(self) -> &'static str {
        match self {
            Self::Kv => "kv",
            Self::History => "v",
            Self::Inverted => "ef",
            Self::KvIndex => "bt",
            Self::HistoryIndex => "vi",
            Self::InvertedIndex => "efi",
        }
    }

    /// Parses a file extension.
    #[must_use]
    pub fn from_ext(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.ext() == ext)
    }

    /// Returns true for index files.
    #[must_use]
    pub const fn is_index(self) -> bool {
        matches!(self, Self::KvIndex | Self::HistoryIndex | Self::InvertedIndex)
    }

    /// The data file an index is built over.
    #[must_use]
    pub const fn indexed_data(self) -> Option<FileKind> {
        match self {
            Self::KvIndex => Some(Self::Kv),
            Self::HistoryIndex => Some(Self::History),
            Self::InvertedIndex => Some(Self::Inverted),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ext())
    }
}

/// A parsed snapshot file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotFile {
    /// Owning domain.
    pub domain: String,
    /// Steps covered.
    pub range: StepRange,
    /// What the file holds.
    pub kind: FileKind,
}

impl SnapshotFile {
    /// File name for this triple.
    #[must_use]
    pub fn file_name(&self) -> String {
        file_name(&self.domain, self.range, self.kind)
    }
}

/// Builds the file name for `(domain, range, kind)`.
#[must_use]
pub fn file_name(domain: &str, range: StepRange, kind: FileKind) -> String {
    format!("{NAME_PREFIX}{domain}.{range}.{}", kind.ext())
}

/// Parses a file name produced by [`file_name`].
#[must_use]
pub fn parse_file_name(name: &str) -> Option<SnapshotFile> {
    let rest = name.strip_prefix(NAME_PREFIX)?;
    let (rest, ext) = rest.rsplit_once('.')?;
    let (domain, range) = rest.rsplit_once('.')?;
    if domain.is_empty() {
        return None;
    }
    Some(SnapshotFile {
        domain: domain.to_string(),
        range: range.parse().ok()?,
        kind: FileKind::from_ext(ext)?,
    })
}

/// Manages the data directory and holds its exclusive lock.
///
/// Only one `DataDir` can exist per directory at a time, across processes.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    snapshots: PathBuf,
    _lock_file: File,
}

impl DataDir {
    /// Opens or creates a data directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `DataDirLocked` if another `DataDir` holds the directory.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "data directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DataDirLocked);
        }

        let snapshots = path.join(SNAPSHOTS_DIR);
        fs::create_dir_all(&snapshots)?;

        Ok(Self {
            path: path.to_path_buf(),
            snapshots,
            _lock_file: lock_file,
        })
    }

    /// Root of the data directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding segment and index files.
    #[must_use]
    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots
    }

    /// Path of the MANIFEST file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Path of one snapshot file.
    #[must_use]
    pub fn file_path(&self, domain: &str, range: StepRange, kind: FileKind) -> PathBuf {
        self.snapshots.join(file_name(domain, range, kind))
    }

    /// Loads the manifest. Returns `None` for a new directory.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Manifest::decode(&data).map(Some)
    }

    /// Saves the manifest atomically: temp file, fsync, rename, fsync dir.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        write_atomic(&self.manifest_path(), &manifest.encode())?;
        Ok(())
    }

    /// Lists every parseable snapshot file. Unknown names are skipped.
    pub fn scan(&self) -> CoreResult<Vec<SnapshotFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.snapshots)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match parse_file_name(name) {
                Some(file) => files.push(file),
                None if !is_temp_path(Path::new(name)) => {
                    debug!(file = name, "ignoring unrecognized file in snapshots dir");
                }
                None => {}
            }
        }
        files.sort_by(|a, b| {
            (&a.domain, a.range.from, a.range.to, a.kind).cmp(&(&b.domain, b.range.from, b.range.to, b.kind))
        });
        Ok(files)
    }

    /// Removes temp files left by interrupted writes. Returns the count.
    pub fn remove_temp_files(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.snapshots)? {
            let path = entry?.path();
            if is_temp_path(&path) {
                fs::remove_file(&path)?;
                debug!(file = %path.display(), "removed temp file");
                removed += 1;
            }
        }
        if removed > 0 {
            sync_dir(&self.snapshots)?;
        }
        Ok(removed)
    }

    /// Deletes the given snapshot files, ignoring ones already gone.
    /// Returns how many were removed.
    pub fn delete_files(&self, files: &[SnapshotFile]) -> CoreResult<usize> {
        let mut removed = 0;
        for file in files {
            let path = self.snapshots.join(file.file_name());
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "failed to delete snapshot file");
                    return Err(e.into());
                }
            }
        }
        if removed > 0 {
            sync_dir(&self.snapshots)?;
        }
        Ok(removed)
    }
}
