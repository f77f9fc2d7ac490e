//! Snapshot removal commands.

use std::path::Path;
use strata_core::{DataDir, StepRange};

/// Deletes snapshot files: every one when `range` is `None`, otherwise
/// those whose range equals `range`.
pub fn run(path: &Path, range: Option<StepRange>) -> Result<usize, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data directory at {:?}", path).into());
    }
    let dir = DataDir::open(path, false)?;
    let files: Vec<_> = dir
        .scan()?
        .into_iter()
        .filter(|f| range.map_or(true, |r| f.range == r))
        .collect();
    let removed = dir.delete_files(&files)?;
    match range {
        Some(r) => println!("Removed {removed} files for steps {r}"),
        None => println!("Removed {removed} files"),
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::FileKind;

    #[test]
    fn removes_only_matching_range() {
        let dir = tempfile::tempdir().unwrap();
        let kept = StepRange::new(0, 1).unwrap();
        let doomed = StepRange::new(1, 2).unwrap();
        {
            let data = DataDir::open(dir.path(), true).unwrap();
            for range in [kept, doomed] {
                for kind in FileKind::DATA {
                    std::fs::write(data.file_path("accounts", range, kind), b"x").unwrap();
                }
            }
        }

        assert_eq!(run(dir.path(), Some(doomed)).unwrap(), 3);
        assert_eq!(run(dir.path(), None).unwrap(), 3);
    }
}
