//! Inspect command implementation.

use super::AggregatorArgs;
use serde::Serialize;

/// Data directory listing.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory path.
    pub path: String,
    /// TxNum up to which every domain is frozen.
    pub frozen_tx_num: u64,
    /// TxNum of the last persisted commitment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment_tx_num: Option<u64>,
    /// Registered file sets.
    pub files: Vec<FileEntry>,
}

/// One registered file set.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    /// Owning domain.
    pub domain: String,
    /// First step.
    pub from: u64,
    /// End step, exclusive.
    pub to: u64,
    /// Keys in the kv file.
    pub keys: u64,
    /// History entries.
    pub changes: u64,
    /// Bytes across data files.
    pub size: u64,
    /// Index extensions present.
    pub indices: Vec<String>,
}

/// Runs the inspect command.
pub fn run(args: &AggregatorArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let agg = args.open()?;
    let result = InspectResult {
        path: args.path.display().to_string(),
        frozen_tx_num: agg.end_tx_num_frozen(),
        commitment_tx_num: agg.last_commitment().map(|c| c.tx_num),
        files: agg
            .files()
            .into_iter()
            .map(|f| FileEntry {
                domain: f.domain,
                from: f.range.from,
                to: f.range.to,
                keys: f.keys,
                changes: f.changes,
                size: f.size,
                indices: f.indices.iter().map(|k| k.ext().to_string()).collect(),
            })
            .collect(),
    };
    agg.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Data directory: {}", result.path);
    println!("Frozen up to TxNum: {}", result.frozen_tx_num);
    match result.commitment_tx_num {
        Some(tx) => println!("Last commitment at TxNum: {tx}"),
        None => println!("Last commitment: none"),
    }
    println!();
    println!(
        "{:<12} {:>8} {:>8} {:>10} {:>10} {:>12}  indices",
        "domain", "from", "to", "keys", "changes", "bytes"
    );
    for f in &result.files {
        println!(
            "{:<12} {:>8} {:>8} {:>10} {:>10} {:>12}  {}",
            f.domain,
            f.from,
            f.to,
            f.keys,
            f.changes,
            f.size,
            f.indices.join(",")
        );
    }
}
