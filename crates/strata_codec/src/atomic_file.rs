//! Crash-safe file replacement.
//!
//! Every immutable file is produced the same way:
//! 1. Write to `<name>.tmp`
//! 2. Sync the temporary file to disk
//! 3. Rename it over the final name
//! 4. Fsync the parent directory so the rename is durable
//!
//! A crash at any point leaves either no final file or a complete one; a
//! stray `*.tmp` is recognised and removed on the next open.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to files that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Returns the temporary path used while writing `path`.
#[must_use]
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(OsString::new, |n| n.to_os_string());
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Returns true if `path` names an unfinished temporary file.
#[must_use]
pub fn is_temp_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
}

/// Writes `data` to `path` via a synced temporary file and rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = temp_path_for(path);
    let result = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, path)
    })();
    if result.is_err() {
        // Leave nothing half-written behind; the next open would remove it anyway.
        let _ = fs::remove_file(&temp);
        return result;
    }
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Fsyncs a directory so that creates, renames and deletes in it are durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Directory fsync is not available on this platform; NTFS journals metadata.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.kv");
        write_atomic(&path, b"payload").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn temp_naming() {
        let path = Path::new("/data/v1-accounts.0-10.kv");
        let temp = temp_path_for(path);
        assert_eq!(temp, Path::new("/data/v1-accounts.0-10.kv.tmp"));
        assert!(is_temp_path(&temp));
        assert!(!is_temp_path(path));
    }
}
