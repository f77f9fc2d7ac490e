//! CLI command implementations.

pub mod bt_search;
pub mod debug;
pub mod inspect;
pub mod maintain;
pub mod remove;
pub mod segment;

use std::path::PathBuf;
use std::sync::Arc;
use strata_core::{Aggregator, AggregatorConfig, DomainConfig};
use strata_storage::MemHotStore;
use tracing::debug;

/// Everything needed to open a data directory.
#[derive(Debug, Clone)]
pub struct AggregatorArgs {
    /// Data directory.
    pub path: PathBuf,
    /// TxNums per step.
    pub step_size: u64,
    /// Domains to register.
    pub domains: Vec<String>,
}

impl AggregatorArgs {
    /// Opens the directory's frozen files. The hot store starts empty, so
    /// only frozen history is visible.
    pub fn open(&self) -> Result<Aggregator, Box<dyn std::error::Error>> {
        if !self.path.exists() {
            return Err(format!("No data directory at {:?}", self.path).into());
        }
        debug!(path = %self.path.display(), step_size = self.step_size, "opening data directory");
        let config = AggregatorConfig::default()
            .step_size(self.step_size)
            .domains(self.domains.iter().map(DomainConfig::new).collect());
        Ok(Aggregator::open(
            &self.path,
            Arc::new(MemHotStore::new()),
            config,
        )?)
    }
}

/// Decodes a hex key, accepting an optional `0x` prefix.
pub fn parse_key(key: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key = key.strip_prefix("0x").unwrap_or(key);
    Ok(hex::decode(key).map_err(|e| format!("Invalid hex key: {e}"))?)
}
