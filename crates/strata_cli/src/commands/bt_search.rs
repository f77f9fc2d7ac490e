//! Looks a key up through an index file.

use super::parse_key;
use std::path::Path;
use std::sync::Arc;
use strata_codec::Decompressor;
use strata_core::{parse_file_name, BtreeIndex, FileKind};

/// Runs the bt-search command. `src` must be a `.bt`, `.vi` or `.efi`
/// file; the data file it indexes is opened from the same directory.
pub fn run(src: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let key = parse_key(key)?;
    let name = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("Invalid index path {:?}", src))?;
    let file = parse_file_name(name).ok_or_else(|| format!("Not a snapshot file: {name}"))?;
    let data_kind = file
        .kind
        .indexed_data()
        .ok_or_else(|| format!("Not an index file: {name}"))?;

    let data_path = src.with_file_name(strata_core::file_name(&file.domain, file.range, data_kind));
    let data = Arc::new(Decompressor::open(&data_path)?);
    let index = BtreeIndex::open(src, data)?;

    match index.seek(&key)? {
        Some(cursor) if cursor.key() == key.as_slice() => {
            println!("Found at ordinal {}", cursor.ordinal());
            println!("Value: {}", hex::encode(cursor.value()));
        }
        Some(cursor) => {
            println!("Not found; next key is {}", hex::encode(cursor.key()));
        }
        None => println!("Not found; key is past the last entry"),
    }
    if data_kind == FileKind::History {
        println!("(history keys are key ‖ txNum)");
    }
    Ok(())
}
